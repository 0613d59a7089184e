//! Docker: hosts services and routes envelopes between them.
//!
//! 1. **Trait** ([`Docker`]): what a service needs from its host
//! 2. **Host** (`host`): one tokio task per service, serializing every call into it
//! 3. **Local** (`local`): in-process docker with linkable peers
//! 4. **Config** (`config`): mailbox sizes and lifecycle timeouts

pub mod config;
mod host;
pub mod local;

pub use config::DockerConfig;
pub use local::{LocalDocker, ServiceSpec};

use breeze_core::{DockerId, Envelope, ServiceAddress};

use crate::service::RouteError;

/// Routing obligations of a docker towards the services it hosts.
///
/// Services hold a `Weak<dyn Docker>`; implementations must be callable from
/// any thread and must never block.
pub trait Docker: Send + Sync {
    /// Identifier of this docker.
    fn docker_id(&self) -> DockerId;

    /// Whether a route to `target` exists right now. Read-only.
    fn resolve(&self, target: ServiceAddress) -> bool;

    /// Hands `envelope` to `envelope.trace.to`, locally or through a peer.
    ///
    /// # Errors
    ///
    /// `Unreachable` if no route exists, `Rejected` if the target's mailbox
    /// or the peer channel is full, `Encode` if the envelope cannot be
    /// serialized for a peer.
    fn deliver(&self, envelope: Envelope) -> Result<(), RouteError>;
}

// ---------------------------------------------------------------------------
// Integration tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod integration_tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use breeze_core::{
        wire, CallbackId, ClientAssociation, Proto, ProtoId, ServiceId, ServiceType, SessionId,
        Trace,
    };
    use parking_lot::Mutex;
    use serde::{Deserialize, Serialize};

    use super::*;
    use crate::service::{
        on_reply_proto, LifecycleError, LifecyclePhase, Service, ServiceBehavior, ServiceConfig,
        ServiceStatus,
    };

    #[derive(Debug, Serialize, Deserialize)]
    struct Ask {
        n: u32,
    }

    impl Proto for Ask {
        const PROTO_ID: ProtoId = ProtoId(1);
        const PROTO_NAME: &'static str = "Ask";
    }

    #[derive(Debug, Serialize, Deserialize)]
    struct Answer {
        n: u32,
    }

    impl Proto for Answer {
        const PROTO_ID: ProtoId = ProtoId(2);
        const PROTO_NAME: &'static str = "Answer";
    }

    const ECHO: ServiceAddress = ServiceAddress {
        service_type: ServiceType(2),
        service_id: ServiceId(0),
    };

    fn addr(id: u64) -> ServiceAddress {
        ServiceAddress::new(ServiceType(3), ServiceId(id))
    }

    fn config(id: u32) -> DockerConfig {
        DockerConfig {
            load_timeout_ms: 500,
            unload_timeout_ms: 500,
            service: ServiceConfig {
                tick_interval_ms: 10,
                ..ServiceConfig::default()
            },
            ..DockerConfig::new(DockerId(id))
        }
    }

    #[derive(Clone, Default)]
    struct Journal(Arc<Mutex<Vec<String>>>);

    impl Journal {
        fn push(&self, entry: impl Into<String>) {
            self.0.lock().push(entry.into());
        }

        fn entries(&self) -> Vec<String> {
            self.0.lock().clone()
        }

        fn contains(&self, entry: &str) -> bool {
            self.0.lock().iter().any(|e| e == entry)
        }

        fn count(&self, entry: &str) -> usize {
            self.0.lock().iter().filter(|e| *e == entry).count()
        }
    }

    /// Polls `check` until it holds or about a second passes.
    async fn eventually(mut check: impl FnMut() -> bool) -> bool {
        for _ in 0..200 {
            if check() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        check()
    }

    // -- behaviours ----------------------------------------------------------

    /// Answers every `Ask { n }` with `Answer { n + 1 }`.
    struct Echo {
        journal: Journal,
    }

    impl ServiceBehavior for Echo {
        fn on_load(&mut self, service: &mut Service<Self>) -> bool {
            service.slotting::<Ask, _>(|echo, service, trace, ask| {
                echo.journal.push(format!("echo:{}", ask.n));
                let _ = service.back_to_service_proto(trace, &Answer { n: ask.n + 1 }, None);
            });
            service.slotting::<Answer, _>(|echo, _service, _trace, _answer| {
                echo.journal.push("echo:answer");
            });
            service.finish_load().is_ok()
        }

        fn on_unload(&mut self, service: &mut Service<Self>) -> bool {
            service.finish_unload().is_ok()
        }
    }

    /// Finishes loading only once `target` answers.
    struct Asker {
        target: ServiceAddress,
        journal: Journal,
    }

    impl ServiceBehavior for Asker {
        fn on_load(&mut self, service: &mut Service<Self>) -> bool {
            service
                .to_service_proto(
                    self.target,
                    &Ask { n: 1 },
                    on_reply_proto::<Answer, Self, _>(|asker, service, trace, answer| {
                        asker
                            .journal
                            .push(format!("reply:{}:from:{}", answer.n, trace.from_docker));
                        let _ = service.finish_load();
                    }),
                )
                .is_ok()
        }

        fn on_unload(&mut self, service: &mut Service<Self>) -> bool {
            service.finish_unload().is_ok()
        }
    }

    /// Records hooks; finishes load and unload immediately.
    struct Recorder {
        name: &'static str,
        journal: Journal,
        fail_unload: bool,
    }

    impl Recorder {
        fn new(name: &'static str, journal: &Journal) -> Self {
            Self {
                name,
                journal: journal.clone(),
                fail_unload: false,
            }
        }
    }

    impl ServiceBehavior for Recorder {
        fn on_load(&mut self, service: &mut Service<Self>) -> bool {
            self.journal.push(format!("load:{}", self.name));
            service.finish_load().is_ok()
        }

        fn on_unload(&mut self, service: &mut Service<Self>) -> bool {
            self.journal.push(format!("unload:{}", self.name));
            if self.fail_unload {
                return false;
            }
            service.finish_unload().is_ok()
        }

        fn on_client_change(&mut self, service: &mut Service<Self>) {
            self.journal
                .push(format!("client:{}", service.client_session_id()));
        }
    }

    struct Ticker {
        ticks: Arc<AtomicU32>,
    }

    impl ServiceBehavior for Ticker {
        fn on_load(&mut self, service: &mut Service<Self>) -> bool {
            service.finish_load().is_ok()
        }

        fn on_tick(&mut self, _service: &mut Service<Self>) {
            self.ticks.fetch_add(1, Ordering::SeqCst);
        }

        fn on_unload(&mut self, service: &mut Service<Self>) -> bool {
            service.finish_unload().is_ok()
        }
    }

    /// Loads without ever finishing, or fails outright.
    struct Stuck {
        fail: bool,
    }

    impl ServiceBehavior for Stuck {
        fn on_load(&mut self, _service: &mut Service<Self>) -> bool {
            !self.fail
        }

        fn on_unload(&mut self, service: &mut Service<Self>) -> bool {
            service.finish_unload().is_ok()
        }
    }

    /// Flushes to the echo service before finishing its unload.
    struct Flusher {
        journal: Journal,
    }

    impl ServiceBehavior for Flusher {
        fn on_load(&mut self, service: &mut Service<Self>) -> bool {
            service.finish_load().is_ok()
        }

        fn on_unload(&mut self, service: &mut Service<Self>) -> bool {
            service
                .to_service_proto(
                    ECHO,
                    &Ask { n: 10 },
                    on_reply_proto::<Answer, Self, _>(|flusher, service, _trace, answer| {
                        flusher.journal.push(format!("flushed:{}", answer.n));
                        let _ = service.finish_unload();
                    }),
                )
                .is_ok()
        }
    }

    /// Tries an unknown target during load and records the outcome.
    struct Prober {
        journal: Journal,
    }

    impl ServiceBehavior for Prober {
        fn on_load(&mut self, service: &mut Service<Self>) -> bool {
            let target = ServiceAddress::singleton(ServiceType(99));
            let reachable = service.can_to_service(target);
            let result = service.to_service_proto(
                target,
                &Ask { n: 1 },
                on_reply_proto::<Answer, Self, _>(|prober, _service, _trace, _answer| {
                    prober.journal.push("unexpected reply");
                }),
            );
            if !reachable && matches!(result, Err(RouteError::Unreachable { .. })) {
                self.journal
                    .push(format!("unreachable:{}", service.pending_callbacks()));
            }
            service.finish_load().is_ok()
        }

        fn on_unload(&mut self, service: &mut Service<Self>) -> bool {
            service.finish_unload().is_ok()
        }
    }

    async fn spawn_echo(docker: &LocalDocker, journal: &Journal) {
        docker
            .spawn_service(
                ServiceSpec::new(ECHO, "echo"),
                Echo {
                    journal: journal.clone(),
                },
            )
            .await
            .unwrap();
    }

    // -- lifecycle -----------------------------------------------------------

    #[tokio::test]
    async fn load_completes_when_dependency_answers() {
        let docker = LocalDocker::new(config(1));
        let echo_log = Journal::default();
        let asker_log = Journal::default();
        spawn_echo(&docker, &echo_log).await;

        let asker = docker
            .spawn_service(
                ServiceSpec::new(addr(1), "asker"),
                Asker {
                    target: ECHO,
                    journal: asker_log.clone(),
                },
            )
            .await
            .unwrap();

        assert_eq!(docker.status(asker), Some(ServiceStatus::Working));
        assert_eq!(asker_log.entries(), vec!["reply:2:from:1"]);
        assert_eq!(echo_log.entries(), vec!["echo:1"]);
    }

    #[tokio::test]
    async fn reply_is_not_redelivered_to_the_replier() {
        let docker = LocalDocker::new(config(1));
        let echo_log = Journal::default();
        let asker_log = Journal::default();
        spawn_echo(&docker, &echo_log).await;
        docker
            .spawn_service(
                ServiceSpec::new(addr(1), "asker"),
                Asker {
                    target: ECHO,
                    journal: asker_log.clone(),
                },
            )
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!echo_log.contains("echo:answer"));
        assert_eq!(asker_log.count("reply:2:from:1"), 1);
    }

    #[tokio::test]
    async fn load_failure_evicts_the_instance() {
        let docker = LocalDocker::new(config(1));
        let err = docker
            .spawn_service(ServiceSpec::new(addr(1), "stuck"), Stuck { fail: true })
            .await
            .unwrap_err();

        assert!(matches!(err, LifecycleError::LoadFailed { address } if address == addr(1)));
        assert_eq!(docker.status(addr(1)), None);
        assert!(!docker.resolve(addr(1)));
        assert!(docker.is_empty());
    }

    #[tokio::test]
    async fn load_times_out_without_finish_load() {
        let docker = LocalDocker::new(DockerConfig {
            load_timeout_ms: 50,
            ..config(1)
        });
        let err = docker
            .spawn_service(ServiceSpec::new(addr(1), "stuck"), Stuck { fail: false })
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            LifecycleError::Timeout {
                phase: LifecyclePhase::Load,
                timeout_ms: 50,
                ..
            }
        ));
        assert_eq!(docker.status(addr(1)), None);
    }

    #[tokio::test]
    async fn duplicate_address_is_rejected() {
        let docker = LocalDocker::new(config(1));
        let journal = Journal::default();
        docker
            .spawn_service(ServiceSpec::new(addr(1), "a"), Recorder::new("a", &journal))
            .await
            .unwrap();
        let err = docker
            .spawn_service(ServiceSpec::new(addr(1), "b"), Recorder::new("b", &journal))
            .await
            .unwrap_err();

        assert!(matches!(err, LifecycleError::Duplicate { .. }));
        assert_eq!(docker.status(addr(1)), Some(ServiceStatus::Working));
        assert!(!journal.contains("load:b"));
    }

    #[tokio::test]
    async fn unload_waits_for_deferred_finish() {
        let docker = LocalDocker::new(config(1));
        let echo_log = Journal::default();
        let journal = Journal::default();
        spawn_echo(&docker, &echo_log).await;
        docker
            .spawn_service(
                ServiceSpec::new(addr(1), "flusher"),
                Flusher {
                    journal: journal.clone(),
                },
            )
            .await
            .unwrap();

        docker.unload_service(addr(1)).await.unwrap();

        assert_eq!(journal.entries(), vec!["flushed:11"]);
        assert_eq!(docker.status(addr(1)), None);
        assert!(!docker.resolve(addr(1)));
    }

    #[tokio::test]
    async fn unload_failure_evicts_the_instance() {
        let docker = LocalDocker::new(config(1));
        let journal = Journal::default();
        let mut recorder = Recorder::new("a", &journal);
        recorder.fail_unload = true;
        docker
            .spawn_service(ServiceSpec::new(addr(1), "a"), recorder)
            .await
            .unwrap();

        let err = docker.unload_service(addr(1)).await.unwrap_err();
        assert!(matches!(err, LifecycleError::UnloadFailed { .. }));
        assert_eq!(docker.status(addr(1)), None);
    }

    #[tokio::test]
    async fn unload_unknown_address_is_not_found() {
        let docker = LocalDocker::new(config(1));
        let err = docker.unload_service(addr(5)).await.unwrap_err();
        assert!(matches!(err, LifecycleError::NotFound { .. }));
    }

    #[tokio::test]
    async fn shutdown_unloads_in_reverse_order() {
        let docker = LocalDocker::new(config(1));
        let journal = Journal::default();
        for (id, name) in [(1, "first"), (2, "second"), (3, "third")] {
            docker
                .spawn_service(
                    ServiceSpec::new(addr(id), name),
                    Recorder::new(name, &journal),
                )
                .await
                .unwrap();
        }

        docker.shutdown().await.unwrap();

        let unloads: Vec<_> = journal
            .entries()
            .into_iter()
            .filter(|e| e.starts_with("unload:"))
            .collect();
        assert_eq!(unloads, vec!["unload:third", "unload:second", "unload:first"]);
        assert!(docker.is_empty());
    }

    #[tokio::test]
    async fn client_change_reaches_the_behaviour() {
        let docker = LocalDocker::new(config(1));
        let journal = Journal::default();
        docker
            .spawn_service(ServiceSpec::new(addr(1), "a"), Recorder::new("a", &journal))
            .await
            .unwrap();

        docker
            .set_client(
                addr(1),
                Some(ClientAssociation {
                    session_id: SessionId(7),
                    docker_id: DockerId(1),
                }),
            )
            .await
            .unwrap();
        assert!(eventually(|| journal.contains("client:7")).await);

        docker.set_client(addr(1), None).await.unwrap();
        assert!(eventually(|| journal.contains("client:0")).await);
    }

    // -- ticking -------------------------------------------------------------

    #[tokio::test]
    async fn shell_services_never_tick() {
        let docker = LocalDocker::new(config(1));
        let regular = Arc::new(AtomicU32::new(0));
        let shell = Arc::new(AtomicU32::new(0));
        docker
            .spawn_service(
                ServiceSpec::new(addr(1), "regular"),
                Ticker {
                    ticks: regular.clone(),
                },
            )
            .await
            .unwrap();
        docker
            .spawn_service(
                ServiceSpec::new(addr(2), "shell").shell(true),
                Ticker {
                    ticks: shell.clone(),
                },
            )
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(regular.load(Ordering::SeqCst) >= 2);
        assert_eq!(shell.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn ticks_stop_after_unload() {
        let docker = LocalDocker::new(config(1));
        let ticks = Arc::new(AtomicU32::new(0));
        docker
            .spawn_service(
                ServiceSpec::new(addr(1), "ticker"),
                Ticker {
                    ticks: ticks.clone(),
                },
            )
            .await
            .unwrap();
        assert!(eventually(|| ticks.load(Ordering::SeqCst) > 0).await);

        docker.unload_service(addr(1)).await.unwrap();
        let after_unload = ticks.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), after_unload);
    }

    // -- routing -------------------------------------------------------------

    #[tokio::test]
    async fn unresolvable_target_leaves_no_callback() {
        let docker = LocalDocker::new(config(1));
        let journal = Journal::default();
        docker
            .spawn_service(
                ServiceSpec::new(addr(1), "prober"),
                Prober {
                    journal: journal.clone(),
                },
            )
            .await
            .unwrap();

        assert_eq!(journal.entries(), vec!["unreachable:0"]);
    }

    #[tokio::test]
    async fn deliver_to_unknown_address_is_unreachable() {
        let docker = LocalDocker::new(config(1));
        let trace = Trace::request(addr(1), DockerId(1), addr(2), CallbackId::NONE);
        let payload = wire::encode(&Ask { n: 1 }).unwrap();

        let err = docker.deliver(Envelope::new(trace, payload)).unwrap_err();
        assert!(matches!(err, RouteError::Unreachable { target } if target == addr(2)));
    }

    #[tokio::test]
    async fn full_mailbox_rejects_delivery() {
        let docker = LocalDocker::new(DockerConfig {
            mailbox_capacity: 1,
            ..config(1)
        });
        let journal = Journal::default();
        spawn_echo(&docker, &journal).await;

        // The current-thread runtime cannot drain the mailbox between these calls.
        let trace = Trace::request(addr(1), DockerId(1), ECHO, CallbackId::NONE);
        let payload = wire::encode(&Ask { n: 1 }).unwrap();
        docker
            .deliver(Envelope::new(trace, payload.clone()))
            .unwrap();
        let err = docker.deliver(Envelope::new(trace, payload)).unwrap_err();

        assert!(matches!(
            err,
            RouteError::Rejected {
                reason: "mailbox full",
                ..
            }
        ));
    }

    // -- linked dockers ------------------------------------------------------

    #[tokio::test]
    async fn round_trip_across_linked_dockers() {
        let a = LocalDocker::new(config(1));
        let b = LocalDocker::new(config(2));
        a.link(&b);

        let echo_log = Journal::default();
        let asker_log = Journal::default();
        spawn_echo(&b, &echo_log).await;
        assert!(eventually(|| a.resolve(ECHO)).await);

        a.spawn_service(
            ServiceSpec::new(addr(1), "asker"),
            Asker {
                target: ECHO,
                journal: asker_log.clone(),
            },
        )
        .await
        .unwrap();

        assert_eq!(asker_log.entries(), vec!["reply:2:from:2"]);
        assert_eq!(echo_log.entries(), vec!["echo:1"]);
    }

    #[tokio::test]
    async fn link_exchanges_existing_services() {
        let a = LocalDocker::new(config(1));
        let b = LocalDocker::new(config(2));
        let journal = Journal::default();
        spawn_echo(&b, &journal).await;
        assert!(!a.resolve(ECHO));

        a.link(&b);
        assert!(a.resolve(ECHO));
    }

    #[tokio::test]
    async fn unload_withdraws_remote_route() {
        let a = LocalDocker::new(config(1));
        let b = LocalDocker::new(config(2));
        let journal = Journal::default();
        spawn_echo(&b, &journal).await;
        a.link(&b);
        assert!(a.resolve(ECHO));

        b.unload_service(ECHO).await.unwrap();
        assert!(eventually(|| !a.resolve(ECHO)).await);
    }

    #[tokio::test]
    async fn local_instance_shadows_remote_route() {
        let a = LocalDocker::new(config(1));
        let b = LocalDocker::new(config(2));
        let remote_log = Journal::default();
        let local_log = Journal::default();
        spawn_echo(&b, &remote_log).await;
        a.link(&b);
        spawn_echo(&a, &local_log).await;

        let asker_log = Journal::default();
        a.spawn_service(
            ServiceSpec::new(addr(1), "asker"),
            Asker {
                target: ECHO,
                journal: asker_log.clone(),
            },
        )
        .await
        .unwrap();

        assert_eq!(asker_log.entries(), vec!["reply:2:from:1"]);
        assert!(remote_log.entries().is_empty());
    }

    #[tokio::test]
    async fn unloading_a_shadow_restores_the_peer_route() {
        let a = LocalDocker::new(config(1));
        let b = LocalDocker::new(config(2));
        let remote_log = Journal::default();
        let local_log = Journal::default();
        spawn_echo(&b, &remote_log).await;
        a.link(&b);
        spawn_echo(&a, &local_log).await;

        a.unload_service(ECHO).await.unwrap();
        assert_eq!(a.status(ECHO), None);
        assert!(a.resolve(ECHO));
        assert_eq!(b.status(ECHO), Some(ServiceStatus::Working));

        let asker_log = Journal::default();
        a.spawn_service(
            ServiceSpec::new(addr(1), "asker"),
            Asker {
                target: ECHO,
                journal: asker_log.clone(),
            },
        )
        .await
        .unwrap();

        assert_eq!(asker_log.entries(), vec!["reply:2:from:2"]);
        assert_eq!(remote_log.entries(), vec!["echo:1"]);
        assert!(local_log.entries().is_empty());
    }

    #[tokio::test]
    async fn shutdown_continues_past_a_failed_unload() {
        let docker = LocalDocker::new(config(1));
        let journal = Journal::default();
        for (id, name) in [(1, "first"), (2, "second"), (3, "third")] {
            let mut recorder = Recorder::new(name, &journal);
            recorder.fail_unload = name == "second";
            docker
                .spawn_service(ServiceSpec::new(addr(id), name), recorder)
                .await
                .unwrap();
        }

        let err = docker.shutdown().await.unwrap_err();
        assert!(matches!(err, LifecycleError::UnloadFailed { address } if address == addr(2)));

        let unloads: Vec<_> = journal
            .entries()
            .into_iter()
            .filter(|e| e.starts_with("unload:"))
            .collect();
        assert_eq!(unloads, vec!["unload:third", "unload:second", "unload:first"]);
        assert!(docker.is_empty());
    }
}
