//! Breeze core: service addressing, the tracing token, and payload framing.

pub mod clock;
pub mod envelope;
pub mod trace;
pub mod types;
pub mod wire;

pub use clock::{ClockSource, ManualClock, SystemClock};
pub use envelope::Envelope;
pub use trace::Trace;
pub use types::{
    CallbackId, ClientAssociation, DockerId, ProtoId, ServiceAddress, ServiceId, ServiceName,
    ServiceType, SessionId, TimerId,
};
pub use wire::{Frame, Proto, WireError};
