//! Service lifecycle state machine.
//!
//! State machine: Created -> Initializing -> Working -> Unloading -> Destroyed
//!
//! Each edge is taken exactly once and only forwards. Initializing -> Working
//! and Unloading -> Destroyed happen on the explicit `finish_load` /
//! `finish_unload` signals, never on hook return alone.

/// Current lifecycle phase of a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceStatus {
    /// Constructed by the docker, load hook not yet called.
    Created,
    /// Load hook called, waiting for `finish_load`.
    Initializing,
    /// Fully operational.
    Working,
    /// Unload hook called, waiting for `finish_unload`.
    Unloading,
    /// Terminal. The docker releases the instance.
    Destroyed,
}

impl ServiceStatus {
    /// Whether `self -> to` is an edge of the lifecycle.
    #[must_use]
    pub const fn can_transition(self, to: Self) -> bool {
        matches!(
            (self, to),
            (Self::Created, Self::Initializing)
                | (Self::Initializing, Self::Working)
                | (Self::Working, Self::Unloading)
                | (Self::Unloading, Self::Destroyed)
        )
    }

    /// States in which the service exchanges messages.
    ///
    /// Initializing is included so an asynchronous load can talk to its
    /// dependencies (inbound, only replies to its own callbacks); Unloading
    /// so the service can drain.
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Initializing | Self::Working | Self::Unloading)
    }

    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Destroyed)
    }
}
