use std::collections::{HashSet, VecDeque};
use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, trace};

use super::error::PeerError;
use super::extension::{ExtensionHandshake, EXTENSION_HANDSHAKE_ID};
use super::message::{Handshake, Message};
use super::metadata::{MetadataBuffer, MetadataMessage, MetadataMessageType};
use super::peer_id::PeerId;
use super::transport::PeerTransport;
use crate::constants::{
    CLIENT, MAX_MESSAGE_SIZE, MAX_METADATA_SIZE, METADATA_PIPELINE, PEER_READ_TIMEOUT,
    SESSION_DEADLINE, UT_METADATA_ID,
};
use crate::metainfo::InfoHash;

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Handshaking,
    ExtHandshaking,
    FetchingMetadata,
    Done,
    Failed,
}

/// Tunables for one peer session. Defaults come from `constants`; tests
/// shrink the timeouts.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Overall deadline for the whole session.
    pub deadline: Duration,
    /// Idle timeout for a single read.
    pub read_timeout: Duration,
    /// Maximum outstanding metadata piece requests.
    pub pipeline: usize,
    /// Maximum accepted frame length.
    pub max_frame: usize,
    /// Maximum accepted `metadata_size` advertisement.
    pub max_metadata_size: i64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            deadline: SESSION_DEADLINE,
            read_timeout: PEER_READ_TIMEOUT,
            pipeline: METADATA_PIPELINE,
            max_frame: MAX_MESSAGE_SIZE,
            max_metadata_size: MAX_METADATA_SIZE,
        }
    }
}

/// One client-initiated metadata fetch from one peer.
///
/// The session drives a TCP connection from handshake through the
/// ut_metadata exchange and either yields the validated raw info bytes or a
/// typed failure. It never requests torrent data: no `interested`, no
/// `request`, no uploads. Unrelated inbound traffic (bitfields, haves,
/// choking, fast-extension messages) is tolerated and discarded.
pub struct PeerSession {
    addr: SocketAddr,
    info_hash: InfoHash,
    peer_id: PeerId,
    config: SessionConfig,
    state: SessionState,
}

impl PeerSession {
    pub fn new(addr: SocketAddr, info_hash: InfoHash, peer_id: PeerId) -> Self {
        Self::with_config(addr, info_hash, peer_id, SessionConfig::default())
    }

    pub fn with_config(
        addr: SocketAddr,
        info_hash: InfoHash,
        peer_id: PeerId,
        config: SessionConfig,
    ) -> Self {
        Self {
            addr,
            info_hash,
            peer_id,
            config,
            state: SessionState::Connecting,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Runs the session to completion under its deadline.
    pub async fn run(mut self) -> Result<Bytes, PeerError> {
        let deadline = self.config.deadline;
        let result = match timeout(deadline, self.drive()).await {
            Ok(result) => result,
            Err(_) => Err(PeerError::Timeout),
        };

        self.state = match result {
            Ok(_) => SessionState::Done,
            Err(_) => SessionState::Failed,
        };
        if let Err(ref e) = result {
            debug!(peer = %self.addr, error = %e, "peer session failed");
        }
        result
    }

    async fn drive(&mut self) -> Result<Bytes, PeerError> {
        debug!(peer = %self.addr, "connecting");
        let stream = TcpStream::connect(self.addr)
            .await
            .map_err(PeerError::Connect)?;
        let mut transport =
            PeerTransport::with_limits(stream, self.config.read_timeout, self.config.max_frame);

        self.state = SessionState::Handshaking;
        let ours = Handshake::new(*self.info_hash.as_bytes(), *self.peer_id.as_bytes());
        transport.send_handshake(&ours).await?;
        let theirs = transport.receive_handshake().await?;

        if theirs.info_hash != *self.info_hash.as_bytes() {
            return Err(PeerError::Handshake("wrong info hash in reply".into()));
        }
        if !theirs.supports_extension_protocol() {
            return Err(PeerError::Handshake("peer lacks extension protocol".into()));
        }
        trace!(
            peer = %self.addr,
            remote_id = ?PeerId::from_bytes(&theirs.peer_id),
            "handshake complete"
        );

        self.state = SessionState::ExtHandshaking;
        let ext = ExtensionHandshake::with_extensions(&[("ut_metadata", UT_METADATA_ID)], CLIENT);
        transport
            .send_message(&Message::Extended {
                id: EXTENSION_HANDSHAKE_ID,
                payload: ext.encode()?,
            })
            .await?;
        if theirs.supports_fast_extension() {
            transport.send_message(&Message::HaveNone).await?;
        }

        let (metadata_id, metadata_size) = self.await_extension_handshake(&mut transport).await?;

        self.state = SessionState::FetchingMetadata;
        debug!(peer = %self.addr, size = metadata_size, "fetching metadata");
        self.fetch_metadata(&mut transport, metadata_id, metadata_size)
            .await
    }

    /// Waits for the peer's extended handshake and extracts its ut_metadata
    /// ID and the advertised metadata size.
    async fn await_extension_handshake(
        &mut self,
        transport: &mut PeerTransport,
    ) -> Result<(u8, usize), PeerError> {
        loop {
            match transport.receive_message().await? {
                Message::Extended { id, payload } if id == EXTENSION_HANDSHAKE_ID => {
                    let theirs = ExtensionHandshake::decode(&payload)?;

                    let metadata_id = theirs.extension_id("ut_metadata").ok_or_else(|| {
                        PeerError::Extension("peer does not support ut_metadata".into())
                    })?;
                    let size = theirs.metadata_size.ok_or_else(|| {
                        PeerError::Extension("peer did not report metadata_size".into())
                    })?;
                    if size <= 0 || size > self.config.max_metadata_size {
                        return Err(PeerError::Extension(format!(
                            "unreasonable metadata_size {size}"
                        )));
                    }

                    return Ok((metadata_id, size as usize));
                }
                other => self.absorb(other),
            }
        }
    }

    async fn fetch_metadata(
        &mut self,
        transport: &mut PeerTransport,
        metadata_id: u8,
        metadata_size: usize,
    ) -> Result<Bytes, PeerError> {
        let mut buffer = MetadataBuffer::new(metadata_size);
        let mut pending: VecDeque<u32> = buffer.missing().collect();
        let mut outstanding: HashSet<u32> = HashSet::new();
        let mut retried: HashSet<u32> = HashSet::new();

        while outstanding.len() < self.config.pipeline {
            let Some(piece) = pending.pop_front() else {
                break;
            };
            self.request_piece(transport, metadata_id, piece).await?;
            outstanding.insert(piece);
        }

        loop {
            let message = transport.receive_message().await?;
            let payload = match message {
                Message::Extended { id, payload } if id == UT_METADATA_ID => payload,
                other => {
                    self.absorb(other);
                    continue;
                }
            };

            let Some(msg) = MetadataMessage::decode(&payload)? else {
                debug!(peer = %self.addr, "unknown ut_metadata msg_type; ignoring");
                continue;
            };

            match msg.msg_type {
                MetadataMessageType::Data => {
                    if !outstanding.remove(&msg.piece) {
                        if buffer.has_piece(msg.piece) {
                            continue;
                        }
                        return Err(PeerError::Protocol(format!(
                            "unrequested metadata piece {}",
                            msg.piece
                        )));
                    }
                    if let Some(total) = msg.total_size {
                        if total != buffer.size() as i64 {
                            return Err(PeerError::Protocol(format!(
                                "total_size changed from {} to {total}",
                                buffer.size()
                            )));
                        }
                    }

                    buffer.insert(msg.piece, msg.data.unwrap_or_default())?;
                    trace!(peer = %self.addr, piece = msg.piece, "metadata piece stored");

                    if buffer.is_complete() {
                        return buffer.assemble(&self.info_hash);
                    }
                    if let Some(next) = pending.pop_front() {
                        self.request_piece(transport, metadata_id, next).await?;
                        outstanding.insert(next);
                    }
                }
                MetadataMessageType::Reject => {
                    if !outstanding.contains(&msg.piece) {
                        return Err(PeerError::Protocol(format!(
                            "reject for unrequested piece {}",
                            msg.piece
                        )));
                    }
                    if retried.insert(msg.piece) {
                        debug!(peer = %self.addr, piece = msg.piece, "piece rejected; retrying");
                        self.request_piece(transport, metadata_id, msg.piece).await?;
                    } else {
                        return Err(PeerError::MetadataReject { piece: msg.piece });
                    }
                }
                MetadataMessageType::Request => {
                    // We hold nothing to serve.
                    trace!(peer = %self.addr, piece = msg.piece, "rejecting inbound request");
                    let payload = MetadataMessage::reject(msg.piece).encode()?;
                    transport
                        .send_message(&Message::Extended {
                            id: metadata_id,
                            payload,
                        })
                        .await?;
                }
            }
        }
    }

    async fn request_piece(
        &self,
        transport: &mut PeerTransport,
        metadata_id: u8,
        piece: u32,
    ) -> Result<(), PeerError> {
        trace!(peer = %self.addr, piece, "requesting metadata piece");
        let payload = MetadataMessage::request(piece).encode()?;
        transport
            .send_message(&Message::Extended {
                id: metadata_id,
                payload,
            })
            .await
    }

    /// Messages unrelated to the metadata exchange are read and dropped;
    /// none of them terminates the session.
    fn absorb(&self, message: Message) {
        trace!(peer = %self.addr, message = ?message_kind(&message), "ignoring message");
    }
}

fn message_kind(message: &Message) -> &'static str {
    match message {
        Message::KeepAlive => "keep-alive",
        Message::Choke => "choke",
        Message::Unchoke => "unchoke",
        Message::Interested => "interested",
        Message::NotInterested => "not-interested",
        Message::Have { .. } => "have",
        Message::Bitfield(_) => "bitfield",
        Message::Request { .. } => "request",
        Message::Piece { .. } => "piece",
        Message::Cancel { .. } => "cancel",
        Message::Port(_) => "port",
        Message::Suggest { .. } => "suggest",
        Message::HaveAll => "have-all",
        Message::HaveNone => "have-none",
        Message::Reject { .. } => "reject",
        Message::AllowedFast { .. } => "allowed-fast",
        Message::Extended { .. } => "extended",
    }
}
