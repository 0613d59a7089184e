use breeze_core::{ServiceAddress, WireError};

use super::status::ServiceStatus;

/// Errors surfaced synchronously to the caller of `to_service` / `back_to_service`.
#[derive(Debug, thiserror::Error)]
pub enum RouteError {
    #[error("no docker can reach service {target}")]
    Unreachable { target: ServiceAddress },
    #[error("delivery to {target} rejected: {reason}")]
    Rejected {
        target: ServiceAddress,
        reason: &'static str,
    },
    #[error("service cannot send while {status:?}")]
    NotActive { status: ServiceStatus },
    #[error("hosting docker has been dropped")]
    DockerGone,
    #[error("failed to encode message: {0}")]
    Encode(#[from] WireError),
}

/// Lifecycle phase a docker was waiting on when it gave up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecyclePhase {
    Load,
    Unload,
}

/// Errors surfaced to the docker while driving a service's lifecycle.
#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("invalid status transition {from:?} -> {to:?}")]
    InvalidTransition {
        from: ServiceStatus,
        to: ServiceStatus,
    },
    #[error("on_load failed for {address}")]
    LoadFailed { address: ServiceAddress },
    #[error("on_unload failed for {address}")]
    UnloadFailed { address: ServiceAddress },
    #[error("{phase:?} of {address} did not finish within {timeout_ms}ms")]
    Timeout {
        address: ServiceAddress,
        phase: LifecyclePhase,
        timeout_ms: u64,
    },
    #[error("shell services never own a timer")]
    ShellTimer,
    #[error("service {address} is already hosted")]
    Duplicate { address: ServiceAddress },
    #[error("service {address} is not hosted here")]
    NotFound { address: ServiceAddress },
    #[error("host task of {address} exited unexpectedly")]
    HostGone { address: ServiceAddress },
}
