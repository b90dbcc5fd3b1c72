use std::collections::BTreeMap;

use bytes::Bytes;

use super::error::PeerError;
use crate::bencode::{decode, encode, Value};

/// Extended ID of the extension handshake itself (BEP-10).
pub const EXTENSION_HANDSHAKE_ID: u8 = 0;

/// The BEP-10 extension handshake: a mapping from extension name to the
/// extended message ID the sender listens on, plus a few optional fields.
///
/// For a metadata fetch the interesting parts are the peer's `ut_metadata`
/// ID and the advertised `metadata_size`.
#[derive(Debug, Clone, Default)]
pub struct ExtensionHandshake {
    /// The `m` mapping: extension name to extended message ID.
    pub extensions: BTreeMap<String, u8>,
    /// Client name and version (`v`).
    pub client: Option<String>,
    /// Size of the info dictionary in bytes (`metadata_size`, BEP-9).
    pub metadata_size: Option<i64>,
}

impl ExtensionHandshake {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds our outgoing handshake: the given extensions plus the client
    /// string.
    pub fn with_extensions(extensions: &[(&str, u8)], client: &str) -> Self {
        let mut hs = Self::new();
        for (name, id) in extensions {
            hs.extensions.insert((*name).to_string(), *id);
        }
        hs.client = Some(client.to_string());
        hs
    }

    pub fn encode(&self) -> Result<Bytes, PeerError> {
        let mut dict = BTreeMap::new();

        let mut m = BTreeMap::new();
        for (name, id) in &self.extensions {
            m.insert(
                Bytes::copy_from_slice(name.as_bytes()),
                Value::Integer(*id as i64),
            );
        }
        dict.insert(Bytes::from_static(b"m"), Value::Dict(m));

        if let Some(ref client) = self.client {
            dict.insert(Bytes::from_static(b"v"), Value::string(client));
        }

        if let Some(size) = self.metadata_size {
            dict.insert(Bytes::from_static(b"metadata_size"), Value::Integer(size));
        }

        let encoded = encode(&Value::Dict(dict))?;
        Ok(Bytes::from(encoded))
    }

    pub fn decode(data: &[u8]) -> Result<Self, PeerError> {
        let value = decode(data)?;
        if value.as_dict().is_none() {
            return Err(PeerError::Extension("expected dict".into()));
        }

        let mut hs = Self::new();

        if let Some(m) = value.get(b"m").and_then(|v| v.as_dict()) {
            for (key, val) in m {
                if let (Ok(name), Some(id)) = (std::str::from_utf8(key), val.as_integer()) {
                    // id 0 means the sender disabled the extension
                    if (1..=255).contains(&id) {
                        hs.extensions.insert(name.to_string(), id as u8);
                    }
                }
            }
        }

        hs.client = value.str_field(b"v").map(String::from);
        hs.metadata_size = value.int_field(b"metadata_size");

        Ok(hs)
    }

    pub fn extension_id(&self, name: &str) -> Option<u8> {
        self.extensions.get(name).copied()
    }
}
