//! The unit a docker delivers: a tracing token plus an opaque payload.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::trace::Trace;
use crate::wire::WireError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub trace: Trace,
    /// A complete frame (see [`crate::wire`]).
    pub payload: Bytes,
}

impl Envelope {
    #[must_use]
    pub fn new(trace: Trace, payload: Bytes) -> Self {
        Self { trace, payload }
    }

    /// Serializes the envelope for transport to another docker.
    ///
    /// # Errors
    ///
    /// Returns `WireError::Encode` if serialization fails.
    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        Ok(rmp_serde::to_vec_named(self)?)
    }

    /// Inverse of [`Envelope::encode`].
    ///
    /// # Errors
    ///
    /// Returns `WireError::Decode` if `bytes` is not an encoded envelope.
    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}
