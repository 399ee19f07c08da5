//! Payload encodings.
//!
//! The envelope metadata is stored by each backend in its own way; the
//! [`Format`] only covers the payload bytes inside it.

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use thiserror::Error;
use tintbox_core::Raw;

/// Error raised while encoding or decoding a payload.
#[derive(Error, Debug)]
pub enum FormatError {
    /// The payload could not be encoded.
    #[error("payload serialization failed: {0}")]
    Serialize(Box<dyn std::error::Error + Send + Sync>),

    /// Stored bytes could not be decoded into the requested type.
    #[error("payload deserialization failed: {0}")]
    Deserialize(Box<dyn std::error::Error + Send + Sync>),
}

/// Payload encoding used by a [`CacheStore`](crate::CacheStore).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Format {
    /// Human-readable JSON (`serde_json`).
    #[default]
    Json,
    /// Compact binary encoding (`bincode` standard config).
    Bincode,
}

impl Format {
    /// Encodes `value` into payload bytes.
    pub fn encode<T>(&self, value: &T) -> Result<Raw, FormatError>
    where
        T: Serialize + ?Sized,
    {
        match self {
            Format::Json => serde_json::to_vec(value)
                .map(Raw::from)
                .map_err(|e| FormatError::Serialize(Box::new(e))),
            Format::Bincode => {
                bincode::serde::encode_to_vec(value, bincode::config::standard())
                    .map(Raw::from)
                    .map_err(|e| FormatError::Serialize(Box::new(e)))
            }
        }
    }

    /// Decodes payload bytes into `T`.
    pub fn decode<T>(&self, data: &[u8]) -> Result<T, FormatError>
    where
        T: DeserializeOwned,
    {
        match self {
            Format::Json => {
                serde_json::from_slice(data).map_err(|e| FormatError::Deserialize(Box::new(e)))
            }
            Format::Bincode => {
                bincode::serde::decode_from_slice(data, bincode::config::standard())
                    .map(|(value, _)| value)
                    .map_err(|e| FormatError::Deserialize(Box::new(e)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Swatch {
        name: String,
        rgb: [u8; 3],
    }

    #[test]
    fn test_bincode_and_json_decode_what_they_encode() {
        let swatch = Swatch {
            name: "Vermilion".to_owned(),
            rgb: [227, 66, 52],
        };
        for format in [Format::Json, Format::Bincode] {
            let raw = format.encode(&swatch).unwrap();
            let back: Swatch = format.decode(&raw).unwrap();
            assert_eq!(back, swatch, "{format:?}");
        }
    }

    #[test]
    fn test_decode_garbage_is_an_error() {
        let result = Format::Json.decode::<Swatch>(b"not json");
        assert!(matches!(result, Err(FormatError::Deserialize(_))));
    }
}
