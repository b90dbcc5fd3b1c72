//! Metadata exchange extension (ut_metadata, BEP-9).
//!
//! Peers that have a torrent's info dictionary serve it in 16 KiB pieces
//! over extended messages. This module provides the message codec and the
//! per-session buffer that collects pieces until the whole dictionary can be
//! validated against the magnet's info hash.

use bytes::{Bytes, BytesMut};
use sha1::{Digest, Sha1};

use super::error::PeerError;
use crate::bencode::{decode_prefix, encode, Value};
use crate::constants::METADATA_PIECE_SIZE;
use crate::metainfo::InfoHash;

/// Message types for the ut_metadata extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataMessageType {
    /// Request a piece of metadata.
    Request = 0,
    /// Provide a piece of metadata.
    Data = 1,
    /// Reject a metadata request.
    Reject = 2,
}

impl MetadataMessageType {
    pub fn from_value(v: i64) -> Option<Self> {
        match v {
            0 => Some(MetadataMessageType::Request),
            1 => Some(MetadataMessageType::Data),
            2 => Some(MetadataMessageType::Reject),
            _ => None,
        }
    }
}

/// A ut_metadata message: a small bencoded header, plus the raw piece bytes
/// after the header for data messages.
#[derive(Debug, Clone)]
pub struct MetadataMessage {
    pub msg_type: MetadataMessageType,
    pub piece: u32,
    /// Total metadata size; only present in data messages.
    pub total_size: Option<i64>,
    /// The piece payload; only present in data messages.
    pub data: Option<Bytes>,
}

impl MetadataMessage {
    pub fn request(piece: u32) -> Self {
        Self {
            msg_type: MetadataMessageType::Request,
            piece,
            total_size: None,
            data: None,
        }
    }

    pub fn data(piece: u32, total_size: i64, data: Bytes) -> Self {
        Self {
            msg_type: MetadataMessageType::Data,
            piece,
            total_size: Some(total_size),
            data: Some(data),
        }
    }

    pub fn reject(piece: u32) -> Self {
        Self {
            msg_type: MetadataMessageType::Reject,
            piece,
            total_size: None,
            data: None,
        }
    }

    /// Encodes to the extended-message payload: bencoded header dict,
    /// followed by the raw piece bytes for data messages.
    pub fn encode(&self) -> Result<Bytes, PeerError> {
        let mut dict = std::collections::BTreeMap::new();

        dict.insert(
            Bytes::from_static(b"msg_type"),
            Value::Integer(self.msg_type as i64),
        );
        dict.insert(
            Bytes::from_static(b"piece"),
            Value::Integer(self.piece as i64),
        );
        if let Some(total_size) = self.total_size {
            dict.insert(Bytes::from_static(b"total_size"), Value::Integer(total_size));
        }

        let mut out = encode(&Value::Dict(dict))?;
        if let Some(ref data) = self.data {
            out.extend_from_slice(data);
        }
        Ok(Bytes::from(out))
    }

    /// Decodes an extended-message payload.
    ///
    /// Returns `Ok(None)` for an unknown `msg_type`, which the session
    /// ignores rather than treating as a protocol violation.
    pub fn decode(payload: &[u8]) -> Result<Option<Self>, PeerError> {
        let (header, used) = decode_prefix(payload)?;
        if header.as_dict().is_none() {
            return Err(PeerError::Extension("metadata header is not a dict".into()));
        }

        let raw_type = header
            .int_field(b"msg_type")
            .ok_or_else(|| PeerError::Extension("missing msg_type".into()))?;

        let Some(msg_type) = MetadataMessageType::from_value(raw_type) else {
            return Ok(None);
        };

        let piece = header
            .int_field(b"piece")
            .ok_or_else(|| PeerError::Extension("missing piece".into()))?;
        let piece = u32::try_from(piece)
            .map_err(|_| PeerError::Extension("piece out of range".into()))?;

        let total_size = header.int_field(b"total_size");

        let data = if msg_type == MetadataMessageType::Data {
            Some(Bytes::copy_from_slice(&payload[used..]))
        } else {
            None
        };

        Ok(Some(Self {
            msg_type,
            piece,
            total_size,
            data,
        }))
    }
}

/// Collects metadata pieces for one peer session.
///
/// Invariants: every piece is exactly 16 384 bytes except possibly the last,
/// and there are `ceil(size / 16384)` pieces in total. [`MetadataBuffer::insert`]
/// enforces the per-piece size so a lying peer fails early.
#[derive(Debug)]
pub struct MetadataBuffer {
    size: usize,
    pieces: Vec<Option<Bytes>>,
    received: usize,
}

impl MetadataBuffer {
    pub fn new(size: usize) -> Self {
        let num_pieces = size.div_ceil(METADATA_PIECE_SIZE);
        Self {
            size,
            pieces: vec![None; num_pieces],
            received: 0,
        }
    }

    /// Advertised total size in bytes.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn num_pieces(&self) -> usize {
        self.pieces.len()
    }

    /// Expected length of a given piece.
    pub fn piece_len(&self, piece: u32) -> usize {
        let offset = piece as usize * METADATA_PIECE_SIZE;
        if offset >= self.size {
            0
        } else {
            (self.size - offset).min(METADATA_PIECE_SIZE)
        }
    }

    /// Piece indices not yet received, in order.
    pub fn missing(&self) -> impl Iterator<Item = u32> + '_ {
        self.pieces
            .iter()
            .enumerate()
            .filter(|(_, p)| p.is_none())
            .map(|(i, _)| i as u32)
    }

    pub fn has_piece(&self, piece: u32) -> bool {
        self.pieces
            .get(piece as usize)
            .is_some_and(|p| p.is_some())
    }

    /// Stores a received piece, checking index and exact length.
    pub fn insert(&mut self, piece: u32, data: Bytes) -> Result<(), PeerError> {
        let expected = self.piece_len(piece);
        if piece as usize >= self.pieces.len() {
            return Err(PeerError::Protocol(format!(
                "metadata piece {piece} out of range"
            )));
        }
        if data.len() != expected {
            return Err(PeerError::Protocol(format!(
                "metadata piece {piece} has {} bytes, expected {expected}",
                data.len()
            )));
        }

        let slot = &mut self.pieces[piece as usize];
        if slot.is_none() {
            *slot = Some(data);
            self.received += 1;
        }
        Ok(())
    }

    pub fn is_complete(&self) -> bool {
        self.received == self.pieces.len()
    }

    /// Concatenates the pieces and validates the SHA-1 against the expected
    /// info hash, yielding the immutable info blob.
    pub fn assemble(self, expected: &InfoHash) -> Result<Bytes, PeerError> {
        debug_assert!(self.is_complete());

        let mut blob = BytesMut::with_capacity(self.size);
        for piece in self.pieces.into_iter().flatten() {
            blob.extend_from_slice(&piece);
        }
        let blob = blob.freeze();

        let digest: [u8; 20] = Sha1::digest(&blob).into();
        if &digest != expected.as_bytes() {
            return Err(PeerError::HashMismatch);
        }

        Ok(blob)
    }
}
