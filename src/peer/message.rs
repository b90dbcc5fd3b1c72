use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::error::PeerError;

/// The BitTorrent protocol identifier.
pub const PROTOCOL: &[u8] = b"BitTorrent protocol";
/// Length of the handshake message in bytes.
pub const HANDSHAKE_LEN: usize = 68;

/// Message type identifiers in the peer wire protocol.
///
/// Each message (except keep-alive) has a one-byte ID following the length
/// prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageId {
    Choke = 0,
    Unchoke = 1,
    Interested = 2,
    NotInterested = 3,
    Have = 4,
    Bitfield = 5,
    Request = 6,
    Piece = 7,
    Cancel = 8,
    /// DHT port announcement.
    Port = 9,
    // Fast extension (BEP-6)
    Suggest = 13,
    HaveAll = 14,
    HaveNone = 15,
    Reject = 16,
    AllowedFast = 17,
    /// Extension protocol message (BEP-10).
    Extended = 20,
}

impl TryFrom<u8> for MessageId {
    type Error = PeerError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(MessageId::Choke),
            1 => Ok(MessageId::Unchoke),
            2 => Ok(MessageId::Interested),
            3 => Ok(MessageId::NotInterested),
            4 => Ok(MessageId::Have),
            5 => Ok(MessageId::Bitfield),
            6 => Ok(MessageId::Request),
            7 => Ok(MessageId::Piece),
            8 => Ok(MessageId::Cancel),
            9 => Ok(MessageId::Port),
            13 => Ok(MessageId::Suggest),
            14 => Ok(MessageId::HaveAll),
            15 => Ok(MessageId::HaveNone),
            16 => Ok(MessageId::Reject),
            17 => Ok(MessageId::AllowedFast),
            20 => Ok(MessageId::Extended),
            _ => Err(PeerError::InvalidMessageId(value)),
        }
    }
}

/// The BitTorrent handshake message.
///
/// The handshake is the first message exchanged between peers: protocol
/// identifier, 8 reserved capability bytes, the 20-byte info hash, and the
/// sender's 20-byte peer ID.
///
/// Reserved bits set by this client:
/// - Byte 5, bit 4 (`0x10`): extension protocol ([BEP-10])
/// - Byte 7, bit 2 (`0x04`): fast extension ([BEP-6])
///
/// [BEP-6]: http://bittorrent.org/beps/bep_0006.html
/// [BEP-10]: http://bittorrent.org/beps/bep_0010.html
#[derive(Debug, Clone)]
pub struct Handshake {
    /// The torrent's info hash.
    pub info_hash: [u8; 20],
    /// The sender's peer ID.
    pub peer_id: [u8; 20],
    /// Reserved bytes for protocol extensions.
    pub reserved: [u8; 8],
}

impl Handshake {
    /// Creates a handshake with extension protocol and fast extension
    /// advertised.
    pub fn new(info_hash: [u8; 20], peer_id: [u8; 20]) -> Self {
        let mut reserved = [0u8; 8];
        reserved[5] |= 0x10; // Extension protocol (BEP-10)
        reserved[7] |= 0x04; // Fast extension (BEP-6)
        Self {
            info_hash,
            peer_id,
            reserved,
        }
    }

    /// Returns `true` if the peer supports the extension protocol (BEP-10).
    pub fn supports_extension_protocol(&self) -> bool {
        (self.reserved[5] & 0x10) != 0
    }

    /// Returns `true` if the peer supports the fast extension (BEP-6).
    pub fn supports_fast_extension(&self) -> bool {
        (self.reserved[7] & 0x04) != 0
    }

    /// Encodes the handshake to bytes for transmission.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HANDSHAKE_LEN);
        buf.put_u8(19);
        buf.put_slice(PROTOCOL);
        buf.put_slice(&self.reserved);
        buf.put_slice(&self.info_hash);
        buf.put_slice(&self.peer_id);
        buf.freeze()
    }

    pub fn decode(data: &[u8]) -> Result<Self, PeerError> {
        if data.len() < HANDSHAKE_LEN {
            return Err(PeerError::Handshake("truncated handshake".into()));
        }

        if data[0] != 19 || &data[1..20] != PROTOCOL {
            return Err(PeerError::Handshake("bad protocol string".into()));
        }

        let mut reserved = [0u8; 8];
        reserved.copy_from_slice(&data[20..28]);

        let mut info_hash = [0u8; 20];
        info_hash.copy_from_slice(&data[28..48]);

        let mut peer_id = [0u8; 20];
        peer_id.copy_from_slice(&data[48..68]);

        Ok(Self {
            info_hash,
            peer_id,
            reserved,
        })
    }
}

/// A peer wire protocol message.
///
/// On the wire each message is length-prefixed: a 4-byte big-endian length
/// followed by a 1-byte message ID and payload; length 0 is a keep-alive.
/// [`Message::encode`] produces the prefixed frame, [`Message::decode`]
/// consumes a frame body whose prefix the transport already stripped.
#[derive(Debug, Clone)]
pub enum Message {
    KeepAlive,
    Choke,
    Unchoke,
    Interested,
    NotInterested,
    Have { piece: u32 },
    Bitfield(Bytes),
    Request { index: u32, begin: u32, length: u32 },
    Piece { index: u32, begin: u32, data: Bytes },
    Cancel { index: u32, begin: u32, length: u32 },
    Port(u16),
    // Fast extension
    Suggest { piece: u32 },
    HaveAll,
    HaveNone,
    Reject { index: u32, begin: u32, length: u32 },
    AllowedFast { piece: u32 },
    /// Extension protocol message: one-byte extended ID plus payload. The
    /// payload is a bencoded dictionary, optionally followed by raw bytes.
    Extended { id: u8, payload: Bytes },
}

impl Message {
    /// Encodes the message to a length-prefixed frame for transmission.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();

        match self {
            Message::KeepAlive => {
                buf.put_u32(0);
            }
            Message::Choke => put_bare(&mut buf, MessageId::Choke),
            Message::Unchoke => put_bare(&mut buf, MessageId::Unchoke),
            Message::Interested => put_bare(&mut buf, MessageId::Interested),
            Message::NotInterested => put_bare(&mut buf, MessageId::NotInterested),
            Message::Have { piece } => put_piece32(&mut buf, MessageId::Have, *piece),
            Message::Bitfield(bits) => {
                buf.put_u32(1 + bits.len() as u32);
                buf.put_u8(MessageId::Bitfield as u8);
                buf.put_slice(bits);
            }
            Message::Request {
                index,
                begin,
                length,
            } => put_triple(&mut buf, MessageId::Request, *index, *begin, *length),
            Message::Piece { index, begin, data } => {
                buf.put_u32(9 + data.len() as u32);
                buf.put_u8(MessageId::Piece as u8);
                buf.put_u32(*index);
                buf.put_u32(*begin);
                buf.put_slice(data);
            }
            Message::Cancel {
                index,
                begin,
                length,
            } => put_triple(&mut buf, MessageId::Cancel, *index, *begin, *length),
            Message::Port(port) => {
                buf.put_u32(3);
                buf.put_u8(MessageId::Port as u8);
                buf.put_u16(*port);
            }
            Message::Suggest { piece } => put_piece32(&mut buf, MessageId::Suggest, *piece),
            Message::HaveAll => put_bare(&mut buf, MessageId::HaveAll),
            Message::HaveNone => put_bare(&mut buf, MessageId::HaveNone),
            Message::Reject {
                index,
                begin,
                length,
            } => put_triple(&mut buf, MessageId::Reject, *index, *begin, *length),
            Message::AllowedFast { piece } => {
                put_piece32(&mut buf, MessageId::AllowedFast, *piece)
            }
            Message::Extended { id, payload } => {
                buf.put_u32(2 + payload.len() as u32);
                buf.put_u8(MessageId::Extended as u8);
                buf.put_u8(*id);
                buf.put_slice(payload);
            }
        }

        buf.freeze()
    }

    /// Decodes a message from a frame body (length prefix already stripped).
    ///
    /// An empty body is a keep-alive. Extended message bodies may be as
    /// short as two bytes (id byte plus a one-byte payload); no minimum
    /// beyond the fields themselves is imposed.
    pub fn decode(mut body: Bytes) -> Result<Self, PeerError> {
        if body.is_empty() {
            return Ok(Message::KeepAlive);
        }

        let id = MessageId::try_from(body.get_u8())?;

        match id {
            MessageId::Choke => Ok(Message::Choke),
            MessageId::Unchoke => Ok(Message::Unchoke),
            MessageId::Interested => Ok(Message::Interested),
            MessageId::NotInterested => Ok(Message::NotInterested),
            MessageId::Have => {
                if body.remaining() < 4 {
                    return Err(PeerError::InvalidMessage("have too short".into()));
                }
                Ok(Message::Have {
                    piece: body.get_u32(),
                })
            }
            MessageId::Bitfield => Ok(Message::Bitfield(body)),
            MessageId::Request => {
                let (index, begin, length) = get_triple(&mut body, "request")?;
                Ok(Message::Request {
                    index,
                    begin,
                    length,
                })
            }
            MessageId::Piece => {
                if body.remaining() < 8 {
                    return Err(PeerError::InvalidMessage("piece too short".into()));
                }
                let index = body.get_u32();
                let begin = body.get_u32();
                Ok(Message::Piece {
                    index,
                    begin,
                    data: body,
                })
            }
            MessageId::Cancel => {
                let (index, begin, length) = get_triple(&mut body, "cancel")?;
                Ok(Message::Cancel {
                    index,
                    begin,
                    length,
                })
            }
            MessageId::Port => {
                if body.remaining() < 2 {
                    return Err(PeerError::InvalidMessage("port too short".into()));
                }
                Ok(Message::Port(body.get_u16()))
            }
            MessageId::Suggest => {
                if body.remaining() < 4 {
                    return Err(PeerError::InvalidMessage("suggest too short".into()));
                }
                Ok(Message::Suggest {
                    piece: body.get_u32(),
                })
            }
            MessageId::HaveAll => Ok(Message::HaveAll),
            MessageId::HaveNone => Ok(Message::HaveNone),
            MessageId::Reject => {
                let (index, begin, length) = get_triple(&mut body, "reject")?;
                Ok(Message::Reject {
                    index,
                    begin,
                    length,
                })
            }
            MessageId::AllowedFast => {
                if body.remaining() < 4 {
                    return Err(PeerError::InvalidMessage("allowed fast too short".into()));
                }
                Ok(Message::AllowedFast {
                    piece: body.get_u32(),
                })
            }
            MessageId::Extended => {
                if body.remaining() < 1 {
                    return Err(PeerError::InvalidMessage("extended too short".into()));
                }
                let ext_id = body.get_u8();
                Ok(Message::Extended {
                    id: ext_id,
                    payload: body,
                })
            }
        }
    }
}

fn put_bare(buf: &mut BytesMut, id: MessageId) {
    buf.put_u32(1);
    buf.put_u8(id as u8);
}

fn put_piece32(buf: &mut BytesMut, id: MessageId, piece: u32) {
    buf.put_u32(5);
    buf.put_u8(id as u8);
    buf.put_u32(piece);
}

fn put_triple(buf: &mut BytesMut, id: MessageId, index: u32, begin: u32, length: u32) {
    buf.put_u32(13);
    buf.put_u8(id as u8);
    buf.put_u32(index);
    buf.put_u32(begin);
    buf.put_u32(length);
}

fn get_triple(body: &mut Bytes, what: &str) -> Result<(u32, u32, u32), PeerError> {
    if body.remaining() < 12 {
        return Err(PeerError::InvalidMessage(format!("{what} too short")));
    }
    Ok((body.get_u32(), body.get_u32(), body.get_u32()))
}
