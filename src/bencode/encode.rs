use super::error::BencodeError;
use super::value::Value;

/// Encodes a value to canonical bencode.
///
/// Dictionary keys are emitted in sorted order (the `BTreeMap` order), so
/// `encode(&decode(b)?)` reproduces `b` exactly when `b` was canonical.
pub fn encode(value: &Value) -> Result<Vec<u8>, BencodeError> {
    let mut buf = Vec::new();
    encode_into(value, &mut buf);
    Ok(buf)
}

/// Encodes a value into an existing buffer.
///
/// Exposed so callers composing an outer dictionary around raw pre-encoded
/// bytes (a fetched info dictionary) can interleave encoded values with
/// verbatim slices.
pub fn encode_into(value: &Value, buf: &mut Vec<u8>) {
    match value {
        Value::Integer(i) => {
            buf.push(b'i');
            buf.extend_from_slice(i.to_string().as_bytes());
            buf.push(b'e');
        }
        Value::Bytes(b) => {
            buf.extend_from_slice(b.len().to_string().as_bytes());
            buf.push(b':');
            buf.extend_from_slice(b);
        }
        Value::List(l) => {
            buf.push(b'l');
            for item in l {
                encode_into(item, buf);
            }
            buf.push(b'e');
        }
        Value::Dict(d) => {
            buf.push(b'd');
            for (key, val) in d {
                buf.extend_from_slice(key.len().to_string().as_bytes());
                buf.push(b':');
                buf.extend_from_slice(key);
                encode_into(val, buf);
            }
            buf.push(b'e');
        }
    }
}
