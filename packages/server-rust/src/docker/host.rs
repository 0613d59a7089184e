//! Per-service host task.
//!
//! Every hosted service runs on its own tokio task that owns the
//! `Service<B>` and its behaviour. The task:
//! 1. Receives commands (lifecycle, deliveries, client changes) on a bounded mpsc mailbox
//! 2. Calls `Service::tick` at the configured interval while it holds a timer
//! 3. Publishes every status change on a watch channel
//! 4. Exits once the service reaches `Destroyed` or the mailbox closes
//!
//! All calls into one service are therefore serialized.

use std::time::Duration;

use breeze_core::{ClientAssociation, Envelope, TimerId};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info_span, Instrument};

use crate::service::{Dispatch, LifecycleError, Service, ServiceBehavior, ServiceStatus};

/// Commands a docker sends to a host task.
#[derive(Debug)]
pub(crate) enum HostCommand {
    /// Run `on_load`; the reply carries the hook's result.
    Load {
        reply: oneshot::Sender<Result<(), LifecycleError>>,
    },
    /// Hand an inbound message to `Service::process`.
    Deliver(Envelope),
    /// Replace the client association and run `on_client_change`.
    ClientChange(Option<ClientAssociation>),
    /// Run `on_unload`; the reply carries the hook's result.
    Unload {
        reply: oneshot::Sender<Result<(), LifecycleError>>,
    },
}

/// Owns one service for the lifetime of its host task.
pub(crate) struct ServiceHost<B: ServiceBehavior> {
    service: Service<B>,
    behavior: B,
    status_tx: watch::Sender<ServiceStatus>,
    /// Registration handed to the service once it is Working.
    timer: TimerId,
    tick_interval_ms: u64,
}

impl<B: ServiceBehavior> ServiceHost<B> {
    pub(crate) fn new(
        service: Service<B>,
        behavior: B,
        status_tx: watch::Sender<ServiceStatus>,
        timer: TimerId,
        tick_interval_ms: u64,
    ) -> Self {
        Self {
            service,
            behavior,
            status_tx,
            timer,
            tick_interval_ms,
        }
    }

    /// Spawns the host task.
    pub(crate) fn spawn(self, rx: mpsc::Receiver<HostCommand>) -> tokio::task::JoinHandle<()> {
        let span = info_span!(
            "service",
            address = %self.service.address(),
            name = %self.service.service_name(),
            shell = self.service.is_shell(),
        );
        tokio::spawn(self.run(rx).instrument(span))
    }

    async fn run(mut self, mut rx: mpsc::Receiver<HostCommand>) {
        let mut ticker = tokio::time::interval(Duration::from_millis(self.tick_interval_ms.max(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // Skip the first immediate tick so on_tick doesn't fire at startup.
        ticker.tick().await;

        loop {
            let ticking = self.service.timer_id().is_some();
            tokio::select! {
                cmd = rx.recv() => {
                    match cmd {
                        Some(cmd) => self.handle(cmd),
                        None => break, // Evicted by the docker.
                    }
                }
                _ = ticker.tick(), if ticking => {
                    self.service.tick(&mut self.behavior);
                }
            }

            self.sync_status();
            if self.service.status().is_terminal() {
                break;
            }
        }
        debug!(status = ?self.service.status(), "host task exiting");
    }

    fn handle(&mut self, cmd: HostCommand) {
        match cmd {
            HostCommand::Load { reply } => {
                let result = self.service.load(&mut self.behavior);
                let _ = reply.send(result);
            }
            HostCommand::Deliver(envelope) => {
                let outcome =
                    self.service
                        .process(&mut self.behavior, &envelope.trace, &envelope.payload);
                metrics::counter!("breeze_dispatch_total", "outcome" => outcome_label(outcome))
                    .increment(1);
            }
            HostCommand::ClientChange(client) => {
                self.service.change_client(&mut self.behavior, client);
            }
            HostCommand::Unload { reply } => {
                let result = self.service.unload(&mut self.behavior);
                let _ = reply.send(result);
            }
        }
    }

    /// Starts the timer on reaching Working and publishes status changes.
    fn sync_status(&mut self) {
        let status = self.service.status();
        if status == ServiceStatus::Working
            && !self.service.is_shell()
            && self.service.timer_id().is_none()
        {
            // Only fails for shells, excluded above.
            let _ = self.service.begin_timer(self.timer);
        }
        self.status_tx.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
    }
}

fn outcome_label(outcome: Dispatch) -> &'static str {
    match outcome {
        Dispatch::Callback(_) => "callback",
        Dispatch::Slot(_) => "slot",
        Dispatch::Unhandled(_) => "unhandled",
        Dispatch::Malformed => "malformed",
        Dispatch::Rejected(_) => "rejected",
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
