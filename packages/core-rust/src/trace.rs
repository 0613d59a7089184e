//! Tracing token threaded through request/reply exchanges.
//!
//! A [`Trace`] rides alongside every payload. It carries the sender's address,
//! the correlation ID the sender registered for a reply (`trace_id`), and on a
//! reply the originator's correlation ID (`trace_back_id`). Only these integers
//! cross the process boundary; the callbacks they refer to stay in the
//! originating service's registry.

use serde::{Deserialize, Serialize};

use crate::types::{CallbackId, ClientAssociation, DockerId, ServiceAddress};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trace {
    /// Address of the sending service.
    pub from: ServiceAddress,
    /// Docker hosting the sending service.
    pub from_docker: DockerId,
    /// Address of the target service.
    pub to: ServiceAddress,
    /// Docker hosting the target, `DockerId::INVALID` until resolved.
    pub to_docker: DockerId,
    /// Correlation ID the sender expects to be echoed back, or `NONE`.
    pub trace_id: CallbackId,
    /// On a reply, the originator's `trace_id`; `NONE` on a fresh request.
    pub trace_back_id: CallbackId,
    /// Client session the exchange acts for, if any.
    pub client: Option<ClientAssociation>,
}

impl Trace {
    /// Builds the token of a fresh request.
    #[must_use]
    pub fn request(
        from: ServiceAddress,
        from_docker: DockerId,
        to: ServiceAddress,
        trace_id: CallbackId,
    ) -> Self {
        Self {
            from,
            from_docker,
            to,
            to_docker: DockerId::INVALID,
            trace_id,
            trace_back_id: CallbackId::NONE,
            client: None,
        }
    }

    /// Builds the token of a reply to `self`.
    ///
    /// The reply is addressed to the original sender on its original docker and
    /// echoes the sender's `trace_id` as `trace_back_id`. `trace_id` is the new
    /// correlation ID for a further round-trip, or `NONE`.
    #[must_use]
    pub fn reply(&self, from_docker: DockerId, trace_id: CallbackId) -> Self {
        Self {
            from: self.to,
            from_docker,
            to: self.from,
            to_docker: self.from_docker,
            trace_id,
            trace_back_id: self.trace_id,
            client: self.client,
        }
    }

    #[must_use]
    pub fn with_client(mut self, client: Option<ClientAssociation>) -> Self {
        self.client = client;
        self
    }

    /// Whether this token answers an earlier request.
    #[must_use]
    pub const fn is_reply(&self) -> bool {
        self.trace_back_id.is_valid()
    }
}
