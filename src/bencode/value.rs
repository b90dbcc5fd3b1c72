use std::collections::BTreeMap;

use bytes::Bytes;

/// A bencode value: integer, byte string, list, or dictionary.
///
/// Protocol handlers mostly receive dictionaries and pull typed fields out
/// of them, so besides the shape accessors this type carries field helpers
/// (`int_field`, `str_field`, `bytes_field`) that combine the key lookup
/// with the type check. All of them return `None` when the value has a
/// different shape, so a malformed tracker response or extension message
/// surfaces as a schema error at the point of use.
///
/// # Examples
///
/// ```
/// use torrify::bencode::decode;
///
/// let reply = decode(b"d8:intervali1800e5:peers0:e").unwrap();
/// assert_eq!(reply.int_field(b"interval"), Some(1800));
/// assert_eq!(reply.bytes_field(b"peers").map(|b| b.len()), Some(0));
/// assert_eq!(reply.int_field(b"peers"), None); // wrong type
/// assert_eq!(reply.int_field(b"missing"), None);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// A signed 64-bit integer.
    Integer(i64),
    /// A byte string (may or may not be valid UTF-8).
    Bytes(Bytes),
    /// An ordered list of values.
    List(Vec<Value>),
    /// A dictionary with byte string keys (sorted by key when encoded).
    Dict(BTreeMap<Bytes, Value>),
}

impl Value {
    /// Creates a byte string value from a UTF-8 string.
    pub fn string(s: &str) -> Self {
        Value::Bytes(Bytes::copy_from_slice(s.as_bytes()))
    }

    /// Returns the value as an integer, if it is one.
    pub fn as_integer(&self) -> Option<i64> {
        if let Value::Integer(i) = self {
            Some(*i)
        } else {
            None
        }
    }

    /// Returns the value as a byte string, if it is one.
    pub fn as_bytes(&self) -> Option<&Bytes> {
        if let Value::Bytes(b) = self {
            Some(b)
        } else {
            None
        }
    }

    /// Returns the value as a UTF-8 string, if it is a byte string holding
    /// valid UTF-8.
    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(self.as_bytes()?).ok()
    }

    /// Returns the value as a list, if it is one.
    pub fn as_list(&self) -> Option<&[Value]> {
        if let Value::List(l) = self {
            Some(l)
        } else {
            None
        }
    }

    /// Returns the value as a dictionary reference, if it is one.
    pub fn as_dict(&self) -> Option<&BTreeMap<Bytes, Value>> {
        if let Value::Dict(d) = self {
            Some(d)
        } else {
            None
        }
    }

    /// Looks up a key in this value if it is a dictionary.
    ///
    /// Returns `None` if the value is not a dictionary or the key is absent.
    pub fn get(&self, key: &[u8]) -> Option<&Value> {
        self.as_dict()?.get(key)
    }

    /// Integer dictionary field: `get` plus the type check.
    pub fn int_field(&self, key: &[u8]) -> Option<i64> {
        self.get(key)?.as_integer()
    }

    /// UTF-8 string dictionary field.
    pub fn str_field(&self, key: &[u8]) -> Option<&str> {
        self.get(key)?.as_str()
    }

    /// Byte string dictionary field.
    pub fn bytes_field(&self, key: &[u8]) -> Option<&Bytes> {
        self.get(key)?.as_bytes()
    }
}
