//! Protocol framing for service payloads.
//!
//! # Frame layout
//!
//! ```text
//! +----------------+-------------------------------+
//! | proto id (u16) | body (MsgPack, named fields)  |
//! |  little-endian |                               |
//! +----------------+-------------------------------+
//! ```
//!
//! The protocol ID is what a service's slot table dispatches on. Bodies are
//! encoded with `rmp_serde::to_vec_named()`.

use bytes::{BufMut, Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::types::ProtoId;

/// Size of the protocol ID header in bytes.
pub const HEADER_LEN: usize = 2;

/// Largest frame `encode` will produce.
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

/// A message type with a fixed wire identity.
pub trait Proto: Serialize + DeserializeOwned {
    const PROTO_ID: ProtoId;
    const PROTO_NAME: &'static str;
}

/// Errors produced while framing or unframing payloads.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("frame shorter than the {HEADER_LEN}-byte header ({len} bytes)")]
    Truncated { len: usize },
    #[error("frame of {len} bytes exceeds the {max}-byte limit")]
    Oversized { len: usize, max: usize },
    #[error("expected protocol {expected}, frame carries {actual}")]
    ProtoMismatch { expected: ProtoId, actual: ProtoId },
    #[error("encode failed: {0}")]
    Encode(#[from] rmp_serde::encode::Error),
    #[error("decode failed: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
}

/// Encodes `proto` into a complete frame.
///
/// # Errors
///
/// Returns `WireError::Encode` if the body cannot be serialized and
/// `WireError::Oversized` if the frame would exceed [`MAX_FRAME_LEN`].
pub fn encode<P: Proto>(proto: &P) -> Result<Bytes, WireError> {
    let body = rmp_serde::to_vec_named(proto)?;
    let len = HEADER_LEN + body.len();
    if len > MAX_FRAME_LEN {
        return Err(WireError::Oversized {
            len,
            max: MAX_FRAME_LEN,
        });
    }

    let mut buf = BytesMut::with_capacity(len);
    buf.put_u16_le(P::PROTO_ID.0);
    buf.put_slice(&body);
    Ok(buf.freeze())
}

/// Borrowed view of a received frame, positioned at the body.
#[derive(Debug, Clone, Copy)]
pub struct Frame<'a> {
    proto_id: ProtoId,
    body: &'a [u8],
}

impl<'a> Frame<'a> {
    /// Splits `bytes` into protocol ID and body.
    ///
    /// # Errors
    ///
    /// Returns `WireError::Truncated` if `bytes` cannot hold the header.
    pub fn parse(bytes: &'a [u8]) -> Result<Self, WireError> {
        match bytes {
            [lo, hi, body @ ..] => Ok(Self {
                proto_id: ProtoId(u16::from_le_bytes([*lo, *hi])),
                body,
            }),
            _ => Err(WireError::Truncated { len: bytes.len() }),
        }
    }

    #[must_use]
    pub fn proto_id(&self) -> ProtoId {
        self.proto_id
    }

    #[must_use]
    pub fn body(&self) -> &'a [u8] {
        self.body
    }

    /// Decodes the body as `P`.
    ///
    /// # Errors
    ///
    /// Returns `WireError::ProtoMismatch` if the frame is not a `P`, or
    /// `WireError::Decode` if the body is malformed.
    pub fn read<P: Proto>(&self) -> Result<P, WireError> {
        if self.proto_id != P::PROTO_ID {
            return Err(WireError::ProtoMismatch {
                expected: P::PROTO_ID,
                actual: self.proto_id,
            });
        }
        Ok(rmp_serde::from_slice(self.body)?)
    }
}
