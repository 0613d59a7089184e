//! Identity types shared by services and dockers.
//!
//! All identifiers are `Copy` newtypes over fixed-width integers so they can
//! cross a process boundary inside a [`Trace`](crate::Trace) unchanged.
//! The value `0` is reserved as the invalid/unassigned sentinel for every kind.

use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! id_newtype {
    (
        $(#[$meta:meta])*
        $name:ident($inner:ty), $invalid:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub $inner);

        impl $name {
            pub const $invalid: Self = Self(0);

            /// Returns `true` unless this is the reserved sentinel value.
            #[must_use]
            pub const fn is_valid(self) -> bool {
                self.0 != 0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<$inner> for $name {
            fn from(value: $inner) -> Self {
                Self(value)
            }
        }
    };
}

id_newtype!(
    /// Category of service logic (e.g. "user", "world", "chat").
    ServiceType(u16), INVALID
);

id_newtype!(
    /// Instance identifier, unique within a service type.
    ///
    /// `ServiceId::INVALID` doubles as the singleton/unassigned instance.
    ServiceId(u64), INVALID
);

id_newtype!(
    /// Identifier of a hosting process.
    DockerId(u32), INVALID
);

id_newtype!(
    /// Connected client session, local to the docker that owns its transport.
    SessionId(u32), INVALID
);

id_newtype!(
    /// Periodic tick registration owned by a non-shell service.
    TimerId(u64), INVALID
);

id_newtype!(
    /// Correlation token binding a reply to a pending callback.
    CallbackId(u64), NONE
);

/// Wire protocol identifier, the first framing field of every payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProtoId(pub u16);

impl fmt::Display for ProtoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Human-readable label of a service instance.
pub type ServiceName = String;

/// Logical address of a service instance anywhere in the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ServiceAddress {
    pub service_type: ServiceType,
    pub service_id: ServiceId,
}

impl ServiceAddress {
    #[must_use]
    pub const fn new(service_type: ServiceType, service_id: ServiceId) -> Self {
        Self {
            service_type,
            service_id,
        }
    }

    /// Address of "the" instance of a type, used when no instance ID is given.
    #[must_use]
    pub const fn singleton(service_type: ServiceType) -> Self {
        Self::new(service_type, ServiceId::INVALID)
    }

    #[must_use]
    pub const fn is_singleton(&self) -> bool {
        !self.service_id.is_valid()
    }
}

impl fmt::Display for ServiceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.service_type, self.service_id)
    }
}

/// Link between a user-facing service and a connected external session.
///
/// The session ID is only meaningful on the docker that owns the session's
/// transport, so the two always travel together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientAssociation {
    pub session_id: SessionId,
    pub docker_id: DockerId,
}
