use breeze_core::DockerId;

use crate::service::ServiceConfig;

/// Configuration of one in-process docker.
///
/// Controls mailbox sizes, lifecycle timeouts, and the settings shared by
/// every hosted service.
#[derive(Debug, Clone)]
pub struct DockerConfig {
    /// Identifier of this docker, unique across linked dockers.
    pub docker_id: DockerId,
    /// Bounded mailbox capacity per hosted service.
    pub mailbox_capacity: usize,
    /// Bounded capacity of the inbound channel from linked dockers.
    pub peer_channel_capacity: usize,
    /// How long to wait for `finish_load` in milliseconds.
    pub load_timeout_ms: u64,
    /// How long to wait for `finish_unload` in milliseconds.
    pub unload_timeout_ms: u64,
    /// Settings applied to every hosted service.
    pub service: ServiceConfig,
}

impl DockerConfig {
    #[must_use]
    pub fn new(docker_id: DockerId) -> Self {
        Self {
            docker_id,
            ..Self::default()
        }
    }
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            docker_id: DockerId(1),
            mailbox_capacity: 256,
            peer_channel_capacity: 1024,
            load_timeout_ms: 5_000,
            unload_timeout_ms: 5_000,
            service: ServiceConfig::default(),
        }
    }
}
