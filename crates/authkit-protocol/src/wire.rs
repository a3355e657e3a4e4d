//! Binary codec for frame bodies.
//!
//! All frame bodies are bincode with fixed-width little-endian integers, so
//! an `i32` error code is always four bytes on the wire regardless of its
//! value.

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::value::VariantMap;

/// Largest frame body accepted by either side (16 MiB).
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Errors produced while encoding or decoding frame bodies.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("encode error: {0}")]
    Encode(#[from] bincode::error::EncodeError),

    #[error("decode error: {0}")]
    Decode(#[from] bincode::error::DecodeError),

    #[error("{extra} trailing bytes after frame body")]
    TrailingBytes { extra: usize },

    #[error("frame too large: {size} bytes (max {MAX_FRAME_SIZE})")]
    FrameTooLarge { size: usize },

    #[error("invalid reply: {0}")]
    InvalidReply(String),
}

fn config() -> impl bincode::config::Config {
    bincode::config::standard().with_fixed_int_encoding()
}

/// Encode any serializable value into a frame body.
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, WireError> {
    let bytes = bincode::serde::encode_to_vec(value, config())?;
    if bytes.len() > MAX_FRAME_SIZE {
        return Err(WireError::FrameTooLarge { size: bytes.len() });
    }
    Ok(bytes)
}

/// Decode a frame body, rejecting bodies with unconsumed trailing bytes.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, WireError> {
    if bytes.len() > MAX_FRAME_SIZE {
        return Err(WireError::FrameTooLarge { size: bytes.len() });
    }
    let (value, read) = bincode::serde::decode_from_slice(bytes, config())?;
    if read != bytes.len() {
        return Err(WireError::TrailingBytes {
            extra: bytes.len() - read,
        });
    }
    Ok(value)
}

/// Encode an argument map into the opaque blob carried by `PerformAction`.
pub fn encode_map(map: &VariantMap) -> Result<Vec<u8>, WireError> {
    encode(map)
}

/// Decode an argument blob produced by [`encode_map`].
pub fn decode_map(bytes: &[u8]) -> Result<VariantMap, WireError> {
    decode(bytes)
}
