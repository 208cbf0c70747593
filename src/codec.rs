//! Body codec collaborator.
//!
//! Opaque to the dispatch core beyond "produces and consumes byte streams";
//! the default implementation is JSON over `serde_json`.

use std::io;

use crate::errors::{Error, Result};

/// Encodes and decodes response bodies.
pub trait Codec: Send + Sync {
    /// Media type this codec handles, e.g. `application/json`. Compared
    /// against the first `Content-Type` element before decoding.
    fn media_type(&self) -> &str;

    fn encode(&self, value: &serde_json::Value) -> Result<Vec<u8>>;

    fn decode(&self, reader: &mut dyn io::Read) -> Result<serde_json::Value>;
}

/// JSON codec backed by `serde_json`.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn media_type(&self) -> &str {
        "application/json"
    }

    fn encode(&self, value: &serde_json::Value) -> Result<Vec<u8>> {
        serde_json::to_vec(value).map_err(Error::Serialization)
    }

    fn decode(&self, reader: &mut dyn io::Read) -> Result<serde_json::Value> {
        serde_json::from_reader(reader).map_err(Error::Serialization)
    }
}
