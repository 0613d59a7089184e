//! Breeze server: service hosting, request/reply routing, and the node binary's building blocks.

pub mod docker;
pub mod logging;
pub mod service;

pub use docker::{Docker, DockerConfig, LocalDocker, ServiceSpec};
pub use logging::{init_tracing, LogFormat};
pub use service::{
    on_reply, on_reply_proto, Dispatch, LifecycleError, RouteError, Service, ServiceBehavior,
    ServiceConfig, ServiceStatus,
};
