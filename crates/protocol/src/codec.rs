//! Codec abstraction for payload serialization/deserialization
//!
//! Replication proxies own the framing of their payloads but delegate the
//! byte encoding to a codec. Two codecs are provided:
//!
//! - [`PostcardCodec`]: compact binary, the default for replication traffic
//! - [`JsonCodec`]: human-readable, used for the diagnostic debug channel
//!
//! # Usage
//!
//! ```
//! use veles_protocol::codec::{Codec, PostcardCodec};
//! use serde::{Serialize, Deserialize};
//!
//! #[derive(Serialize, Deserialize, Debug, PartialEq)]
//! struct Sample {
//!     keyframe: u32,
//! }
//!
//! let codec = PostcardCodec;
//! let value = Sample { keyframe: 7 };
//!
//! let bytes = codec.encode(&value).unwrap();
//! let decoded: Sample = codec.decode(&bytes).unwrap();
//! assert_eq!(value, decoded);
//! ```

use bytes::Bytes;
use serde::{de::DeserializeOwned, Serialize};

use crate::error::{ProtocolError, Result};

/// Codec trait for serializing/deserializing replication payloads
pub trait Codec: Send + Sync {
    /// Returns a human-readable name for this codec
    fn name(&self) -> &'static str;

    /// Encodes a serializable payload into bytes
    fn encode<T: Serialize>(&self, payload: &T) -> Result<Bytes>;

    /// Decodes bytes into a deserializable payload
    fn decode<T: DeserializeOwned>(&self, bytes: &Bytes) -> Result<T>;
}

/// Postcard codec
///
/// Compact binary serialization. Default for replication traffic, where
/// bandwidth matters and both ends run the same schema.
#[derive(Debug, Clone, Copy)]
pub struct PostcardCodec;

impl Codec for PostcardCodec {
    fn name(&self) -> &'static str {
        "Postcard"
    }

    fn encode<T: Serialize>(&self, payload: &T) -> Result<Bytes> {
        let vec = postcard::to_allocvec(payload)
            .map_err(|e| ProtocolError::Codec(format!("Postcard encode failed: {}", e)))?;
        Ok(Bytes::from(vec))
    }

    fn decode<T: DeserializeOwned>(&self, bytes: &Bytes) -> Result<T> {
        postcard::from_bytes(bytes)
            .map_err(|e| ProtocolError::Codec(format!("Postcard decode failed: {}", e)))
    }
}

/// JSON codec
///
/// Human-readable serialization. Used for the debug channel so captured
/// frames can be read straight off the wire.
#[derive(Debug, Clone, Copy)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn name(&self) -> &'static str {
        "JSON"
    }

    fn encode<T: Serialize>(&self, payload: &T) -> Result<Bytes> {
        let vec = serde_json::to_vec(payload)
            .map_err(|e| ProtocolError::Codec(format!("JSON encode failed: {}", e)))?;
        Ok(Bytes::from(vec))
    }

    fn decode<T: DeserializeOwned>(&self, bytes: &Bytes) -> Result<T> {
        serde_json::from_slice(bytes)
            .map_err(|e| ProtocolError::Codec(format!("JSON decode failed: {}", e)))
    }
}
