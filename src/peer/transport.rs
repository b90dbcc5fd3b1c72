use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

use super::error::PeerError;
use super::message::{Handshake, Message, HANDSHAKE_LEN};
use crate::constants::{MAX_MESSAGE_SIZE, PEER_READ_TIMEOUT, PEER_WRITE_TIMEOUT};

/// Framed transport over one peer TCP connection.
///
/// Reads are bounded by an idle timeout and frames by a size cap; a peer
/// that stalls or announces an oversized frame fails the session instead of
/// wedging it.
pub struct PeerTransport {
    stream: TcpStream,
    read_buf: BytesMut,
    read_timeout: Duration,
    write_timeout: Duration,
    max_frame: usize,
}

impl PeerTransport {
    pub fn new(stream: TcpStream) -> Self {
        Self::with_limits(stream, PEER_READ_TIMEOUT, MAX_MESSAGE_SIZE)
    }

    pub fn with_limits(stream: TcpStream, read_timeout: Duration, max_frame: usize) -> Self {
        Self {
            stream,
            read_buf: BytesMut::with_capacity(32 * 1024),
            read_timeout,
            write_timeout: PEER_WRITE_TIMEOUT,
            max_frame,
        }
    }

    pub async fn send_handshake(&mut self, handshake: &Handshake) -> Result<(), PeerError> {
        let data = handshake.encode();
        timeout(self.write_timeout, self.stream.write_all(&data))
            .await
            .map_err(|_| PeerError::Timeout)??;
        Ok(())
    }

    pub async fn receive_handshake(&mut self) -> Result<Handshake, PeerError> {
        self.fill_to(HANDSHAKE_LEN).await?;
        let data = self.read_buf.split_to(HANDSHAKE_LEN);
        Handshake::decode(&data)
    }

    pub async fn send_message(&mut self, message: &Message) -> Result<(), PeerError> {
        let data = message.encode();
        timeout(self.write_timeout, self.stream.write_all(&data))
            .await
            .map_err(|_| PeerError::Timeout)??;
        Ok(())
    }

    /// Reads one length-prefixed frame and decodes it.
    pub async fn receive_message(&mut self) -> Result<Message, PeerError> {
        self.fill_to(4).await?;

        let length = u32::from_be_bytes([
            self.read_buf[0],
            self.read_buf[1],
            self.read_buf[2],
            self.read_buf[3],
        ]) as usize;

        if length > self.max_frame {
            return Err(PeerError::InvalidMessage(format!(
                "frame too large: {length} bytes"
            )));
        }

        self.fill_to(4 + length).await?;

        let mut frame = self.read_buf.split_to(4 + length);
        let body = frame.split_off(4);
        Message::decode(body.freeze())
    }

    async fn fill_to(&mut self, len: usize) -> Result<(), PeerError> {
        while self.read_buf.len() < len {
            let n = timeout(self.read_timeout, self.stream.read_buf(&mut self.read_buf))
                .await
                .map_err(|_| PeerError::Timeout)??;

            if n == 0 {
                return Err(PeerError::ConnectionClosed);
            }
        }
        Ok(())
    }
}
