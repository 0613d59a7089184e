//! Breeze demo node.
//!
//! Starts two linked in-process dockers: `front` hosts a pinger that sends a
//! `Ping` on every tick, `back` hosts a shell echo service that answers with
//! a `Pong`. Runs until the configured duration elapses or Ctrl-C.

use std::time::{Duration, Instant};

use breeze_core::{DockerId, Proto, ProtoId, ServiceAddress, ServiceId, ServiceType};
use breeze_server::{
    init_tracing, on_reply_proto, DockerConfig, LocalDocker, LogFormat, Service, ServiceBehavior,
    ServiceConfig, ServiceSpec,
};
use clap::Parser;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(author, version, about = "Runs two linked Breeze dockers exchanging pings", long_about = None)]
struct Args {
    /// How long to run before shutting down, in seconds.
    #[arg(long, env = "BREEZE_DURATION_SECS", default_value_t = 5)]
    duration_secs: u64,

    /// Tick interval of the pinger, in milliseconds.
    #[arg(long, env = "BREEZE_TICK_MS", default_value_t = 1_000)]
    tick_ms: u64,

    /// Log output format.
    #[arg(long, env = "BREEZE_LOG_FORMAT", value_enum, default_value_t = LogFormat::Plain)]
    log_format: LogFormat,

    /// Docker ID of the node hosting the pinger.
    #[arg(long, default_value_t = 1)]
    front_docker: u32,

    /// Docker ID of the node hosting the echo service.
    #[arg(long, default_value_t = 2)]
    back_docker: u32,
}

// ---------------------------------------------------------------------------
// Protocols
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
struct Ping {
    seq: u64,
}

impl Proto for Ping {
    const PROTO_ID: ProtoId = ProtoId(100);
    const PROTO_NAME: &'static str = "Ping";
}

#[derive(Debug, Serialize, Deserialize)]
struct Pong {
    seq: u64,
}

impl Proto for Pong {
    const PROTO_ID: ProtoId = ProtoId(101);
    const PROTO_NAME: &'static str = "Pong";
}

const ECHO: ServiceAddress = ServiceAddress {
    service_type: ServiceType(1),
    service_id: ServiceId(0),
};

const PINGER: ServiceAddress = ServiceAddress {
    service_type: ServiceType(2),
    service_id: ServiceId(0),
};

// ---------------------------------------------------------------------------
// Services
// ---------------------------------------------------------------------------

struct Echo;

impl ServiceBehavior for Echo {
    fn on_load(&mut self, service: &mut Service<Self>) -> bool {
        service.slotting::<Ping, _>(|_echo, service, trace, ping| {
            if let Err(e) = service.back_to_service_proto(trace, &Pong { seq: ping.seq }, None) {
                warn!(seq = ping.seq, error = %e, "pong not sent");
            }
        });
        service.finish_load().is_ok()
    }

    fn on_unload(&mut self, service: &mut Service<Self>) -> bool {
        service.finish_unload().is_ok()
    }
}

#[derive(Default)]
struct Pinger {
    seq: u64,
    answered: u64,
}

impl ServiceBehavior for Pinger {
    fn on_load(&mut self, service: &mut Service<Self>) -> bool {
        service.finish_load().is_ok()
    }

    fn on_tick(&mut self, service: &mut Service<Self>) {
        if !service.can_to_service(ECHO) {
            warn!(target_service = %ECHO, "echo not reachable yet");
            return;
        }
        self.seq += 1;
        let sent = Instant::now();
        let result = service.to_service_proto(
            ECHO,
            &Ping { seq: self.seq },
            on_reply_proto::<Pong, Self, _>(move |pinger, _service, trace, pong| {
                pinger.answered += 1;
                info!(
                    seq = pong.seq,
                    from_docker = %trace.from_docker,
                    rtt = ?sent.elapsed(),
                    "pong"
                );
            }),
        );
        if let Err(e) = result {
            warn!(seq = self.seq, error = %e, "ping not sent");
        }
    }

    fn on_unload(&mut self, service: &mut Service<Self>) -> bool {
        info!(
            sent = self.seq,
            answered = self.answered,
            pending = service.pending_callbacks(),
            "pinger stopping"
        );
        service.finish_unload().is_ok()
    }
}

fn docker_config(docker_id: u32, tick_ms: u64) -> DockerConfig {
    DockerConfig {
        service: ServiceConfig {
            tick_interval_ms: tick_ms,
            ..ServiceConfig::default()
        },
        ..DockerConfig::new(DockerId(docker_id))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.log_format)?;

    let front = LocalDocker::new(docker_config(args.front_docker, args.tick_ms));
    let back = LocalDocker::new(docker_config(args.back_docker, args.tick_ms));
    front.link(&back);

    back.spawn_service(ServiceSpec::new(ECHO, "echo").shell(true), Echo)
        .await?;
    front
        .spawn_service(ServiceSpec::new(PINGER, "pinger"), Pinger::default())
        .await?;
    info!(duration_secs = args.duration_secs, "node running");

    tokio::select! {
        () = tokio::time::sleep(Duration::from_secs(args.duration_secs)) => {}
        result = tokio::signal::ctrl_c() => {
            result?;
            info!("interrupted");
        }
    }

    front.shutdown().await?;
    back.shutdown().await?;
    info!("node stopped");
    Ok(())
}
