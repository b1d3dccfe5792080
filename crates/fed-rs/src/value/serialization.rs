//! Byte-level encoding of [`Value`]s exchanged with executors and archives.

use thiserror::Error;

use super::Value;

const MAGIC: &[u8; 8] = b"FEDRSVAL";
const VERSION: u32 = 1;
const HEADER_LEN: usize = MAGIC.len() + 4;

#[derive(Debug, Error)]
pub enum ValueSerdeError {
    #[error("bincode error: {0}")]
    Bincode(#[from] bincode::Error),
    #[error("invalid value magic header")]
    BadMagic,
    #[error("unsupported value encoding version {0}")]
    UnsupportedVersion(u32),
}

/// Encodes `value` as a versioned, self-describing byte payload.
pub fn serialize_value(value: &Value) -> Result<Vec<u8>, ValueSerdeError> {
    let payload = bincode::serialize(value)?;
    let mut bytes = Vec::with_capacity(HEADER_LEN + payload.len());
    bytes.extend_from_slice(MAGIC);
    bytes.extend_from_slice(&VERSION.to_le_bytes());
    bytes.extend_from_slice(&payload);
    Ok(bytes)
}

/// Decodes a payload produced by [`serialize_value`].
pub fn deserialize_value(bytes: &[u8]) -> Result<Value, ValueSerdeError> {
    if bytes.len() < HEADER_LEN || &bytes[..MAGIC.len()] != MAGIC {
        return Err(ValueSerdeError::BadMagic);
    }
    let mut version = [0u8; 4];
    version.copy_from_slice(&bytes[MAGIC.len()..HEADER_LEN]);
    let version = u32::from_le_bytes(version);
    if version != VERSION {
        return Err(ValueSerdeError::UnsupportedVersion(version));
    }
    Ok(bincode::deserialize(&bytes[HEADER_LEN..])?)
}
