//! In-process docker hosting services on tokio tasks.
//!
//! Routes are kept in a `DashMap` keyed by service address. A route is either
//! a local mailbox or the ID of a linked peer docker. Peers exchange encoded
//! envelopes and route announcements over bounded mpsc channels.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use breeze_core::{
    ClientAssociation, ClockSource, DockerId, Envelope, ServiceAddress, ServiceName, SystemClock,
    TimerId,
};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::config::DockerConfig;
use super::host::{HostCommand, ServiceHost};
use super::Docker;
use crate::service::{
    LifecycleError, LifecyclePhase, RouteError, Service, ServiceBehavior, ServiceIdentity,
    ServiceStatus,
};

// ---------------------------------------------------------------------------
// Routes and peer messages
// ---------------------------------------------------------------------------

#[derive(Clone)]
struct LocalEntry {
    tx: mpsc::Sender<HostCommand>,
    status: watch::Receiver<ServiceStatus>,
    /// Peer that also hosts this address; its route comes back on eviction.
    shadowed: Option<DockerId>,
}

#[derive(Clone)]
enum Route {
    Local(LocalEntry),
    Remote(DockerId),
}

/// Traffic between linked dockers.
#[derive(Debug)]
enum PeerMessage {
    /// An encoded [`Envelope`] addressed to a service on the receiving docker.
    Envelope(Vec<u8>),
    /// `address` is now hosted on `docker_id`.
    Announce {
        address: ServiceAddress,
        docker_id: DockerId,
    },
    /// `address` left `docker_id`.
    Withdraw {
        address: ServiceAddress,
        docker_id: DockerId,
    },
}

/// What to host: address, diagnostic name, and whether it is a shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceSpec {
    pub address: ServiceAddress,
    pub name: ServiceName,
    /// Shell services never tick.
    pub shell: bool,
}

impl ServiceSpec {
    #[must_use]
    pub fn new(address: ServiceAddress, name: impl Into<ServiceName>) -> Self {
        Self {
            address,
            name: name.into(),
            shell: false,
        }
    }

    #[must_use]
    pub fn shell(mut self, shell: bool) -> Self {
        self.shell = shell;
        self
    }
}

// ---------------------------------------------------------------------------
// DockerInner
// ---------------------------------------------------------------------------

struct DockerInner {
    config: DockerConfig,
    clock: Arc<dyn ClockSource>,
    routes: DashMap<ServiceAddress, Route>,
    peers: RwLock<HashMap<DockerId, mpsc::Sender<PeerMessage>>>,
    peer_tx: mpsc::Sender<PeerMessage>,
    /// Addresses of loaded local services, oldest first.
    load_order: Mutex<Vec<ServiceAddress>>,
    next_timer: AtomicU64,
    pump: JoinHandle<()>,
}

impl DockerInner {
    fn docker_id(&self) -> DockerId {
        self.config.docker_id
    }

    fn local_entry(&self, address: ServiceAddress) -> Option<LocalEntry> {
        match self.routes.get(&address).as_deref() {
            Some(Route::Local(entry)) => Some(entry.clone()),
            _ => None,
        }
    }

    fn local_addresses(&self) -> Vec<ServiceAddress> {
        self.routes
            .iter()
            .filter(|r| matches!(r.value(), Route::Local(_)))
            .map(|r| *r.key())
            .collect()
    }

    /// Adds `Remote` routes. A local instance keeps the address and only
    /// remembers the peer.
    fn adopt_remote(&self, addresses: &[ServiceAddress], docker_id: DockerId) {
        for address in addresses {
            match self.routes.entry(*address) {
                Entry::Occupied(mut o) => {
                    if let Route::Local(entry) = o.get_mut() {
                        entry.shadowed = Some(docker_id);
                    }
                }
                Entry::Vacant(v) => {
                    v.insert(Route::Remote(docker_id));
                }
            }
        }
    }

    fn broadcast(&self, make: impl Fn() -> PeerMessage) {
        for (peer_id, tx) in self.peers.read().iter() {
            if tx.try_send(make()).is_err() {
                warn!(docker = %self.docker_id(), peer = %peer_id, "peer channel unavailable, announcement dropped");
            }
        }
    }

    /// Drops the local instance at `address` and tells peers it is gone.
    /// A shadowed peer route is restored.
    ///
    /// Dropping the last mailbox sender stops the host task.
    fn evict(&self, address: ServiceAddress) {
        let removed = match self.routes.entry(address) {
            Entry::Occupied(mut o) => {
                let shadowed = match o.get() {
                    Route::Local(entry) => Some(entry.shadowed),
                    Route::Remote(_) => None,
                };
                match shadowed {
                    Some(Some(peer_id)) => {
                        o.insert(Route::Remote(peer_id));
                        true
                    }
                    Some(None) => {
                        o.remove();
                        true
                    }
                    None => false,
                }
            }
            Entry::Vacant(_) => false,
        };
        self.load_order.lock().retain(|a| *a != address);
        if removed {
            let docker_id = self.docker_id();
            self.broadcast(|| PeerMessage::Withdraw { address, docker_id });
            debug!(docker = %docker_id, service = %address, "service evicted");
        }
    }

    fn deliver_local(
        &self,
        target: ServiceAddress,
        entry: &LocalEntry,
        envelope: Envelope,
    ) -> Result<(), RouteError> {
        match entry.tx.try_send(HostCommand::Deliver(envelope)) {
            Ok(()) => {
                metrics::counter!("breeze_envelopes_delivered_total").increment(1);
                Ok(())
            }
            Err(TrySendError::Full(_)) => {
                metrics::counter!("breeze_envelopes_rejected_total", "reason" => "mailbox_full")
                    .increment(1);
                Err(RouteError::Rejected {
                    target,
                    reason: "mailbox full",
                })
            }
            Err(TrySendError::Closed(_)) => Err(RouteError::Unreachable { target }),
        }
    }

    fn forward(
        &self,
        target: ServiceAddress,
        peer_id: DockerId,
        envelope: &Envelope,
    ) -> Result<(), RouteError> {
        let Some(tx) = self.peers.read().get(&peer_id).cloned() else {
            return Err(RouteError::Unreachable { target });
        };
        let bytes = envelope.encode()?;
        match tx.try_send(PeerMessage::Envelope(bytes)) {
            Ok(()) => {
                metrics::counter!("breeze_envelopes_forwarded_total").increment(1);
                Ok(())
            }
            Err(TrySendError::Full(_)) => {
                metrics::counter!("breeze_envelopes_rejected_total", "reason" => "peer_full")
                    .increment(1);
                Err(RouteError::Rejected {
                    target,
                    reason: "peer channel full",
                })
            }
            Err(TrySendError::Closed(_)) => Err(RouteError::Unreachable { target }),
        }
    }

    fn on_peer_message(&self, msg: PeerMessage) {
        match msg {
            PeerMessage::Envelope(bytes) => {
                let envelope = match Envelope::decode(&bytes) {
                    Ok(envelope) => envelope,
                    Err(e) => {
                        warn!(docker = %self.docker_id(), error = %e, "undecodable envelope from peer");
                        return;
                    }
                };
                let target = envelope.trace.to;
                // Never forward again: a peer only sends what it believes is hosted here.
                let result = match self.local_entry(target) {
                    Some(entry) => self.deliver_local(target, &entry, envelope),
                    None => Err(RouteError::Unreachable { target }),
                };
                if let Err(e) = result {
                    warn!(docker = %self.docker_id(), to = %target, error = %e, "peer envelope dropped");
                }
            }
            PeerMessage::Announce { address, docker_id } => {
                self.adopt_remote(&[address], docker_id);
                debug!(docker = %self.docker_id(), service = %address, peer = %docker_id, "remote service announced");
            }
            PeerMessage::Withdraw { address, docker_id } => {
                if let Some(mut route) = self.routes.get_mut(&address) {
                    if let Route::Local(entry) = route.value_mut() {
                        if entry.shadowed == Some(docker_id) {
                            entry.shadowed = None;
                        }
                    }
                }
                self.routes.remove_if(&address, |_, route| {
                    matches!(route, Route::Remote(d) if *d == docker_id)
                });
                debug!(docker = %self.docker_id(), service = %address, peer = %docker_id, "remote service withdrawn");
            }
        }
    }
}

impl Drop for DockerInner {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

impl Docker for DockerInner {
    fn docker_id(&self) -> DockerId {
        self.config.docker_id
    }

    fn resolve(&self, target: ServiceAddress) -> bool {
        self.routes.contains_key(&target)
    }

    fn deliver(&self, mut envelope: Envelope) -> Result<(), RouteError> {
        let target = envelope.trace.to;
        // Clone out of the map so no shard lock is held while sending.
        let route = self.routes.get(&target).map(|r| r.value().clone());
        match route {
            Some(Route::Local(entry)) => {
                envelope.trace.to_docker = self.docker_id();
                self.deliver_local(target, &entry, envelope)
            }
            Some(Route::Remote(peer_id)) => {
                envelope.trace.to_docker = peer_id;
                self.forward(target, peer_id, &envelope)
            }
            None => Err(RouteError::Unreachable { target }),
        }
    }
}

async fn pump(inner: Weak<DockerInner>, mut rx: mpsc::Receiver<PeerMessage>) {
    while let Some(msg) = rx.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        inner.on_peer_message(msg);
    }
}

// ---------------------------------------------------------------------------
// LocalDocker
// ---------------------------------------------------------------------------

/// Hosts services in this process and routes between them.
///
/// Cheap to clone; clones share the same route table. Must be created inside
/// a tokio runtime.
#[derive(Clone)]
pub struct LocalDocker {
    inner: Arc<DockerInner>,
}

impl LocalDocker {
    #[must_use]
    pub fn new(config: DockerConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Creates a docker whose services read time from `clock`.
    #[must_use]
    pub fn with_clock(config: DockerConfig, clock: Arc<dyn ClockSource>) -> Self {
        let (peer_tx, peer_rx) = mpsc::channel(config.peer_channel_capacity);
        let inner = Arc::new_cyclic(|weak| DockerInner {
            config,
            clock,
            routes: DashMap::new(),
            peers: RwLock::new(HashMap::new()),
            peer_tx,
            load_order: Mutex::new(Vec::new()),
            next_timer: AtomicU64::new(1),
            pump: tokio::spawn(pump(weak.clone(), peer_rx)),
        });
        Self { inner }
    }

    #[must_use]
    pub fn docker_id(&self) -> DockerId {
        self.inner.docker_id()
    }

    /// Status of the local instance at `address`, if it is still hosted here.
    #[must_use]
    pub fn status(&self, address: ServiceAddress) -> Option<ServiceStatus> {
        self.inner
            .local_entry(address)
            .map(|entry| *entry.status.borrow())
    }

    /// Number of local instances.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner
            .routes
            .iter()
            .filter(|r| matches!(r.value(), Route::Local(_)))
            .count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Hosts a new service and drives it to Working.
    ///
    /// Returns once the service has called `finish_load`. The service can
    /// already receive messages while it is Initializing.
    ///
    /// # Errors
    ///
    /// - `Duplicate` if a local instance already owns the address.
    /// - `LoadFailed` if `on_load` returns `false`.
    /// - `Timeout` if `finish_load` is not called within `load_timeout_ms`.
    ///
    /// On every error the instance is evicted.
    pub async fn spawn_service<B: ServiceBehavior>(
        &self,
        spec: ServiceSpec,
        behavior: B,
    ) -> Result<ServiceAddress, LifecycleError> {
        let inner = &self.inner;
        let address = spec.address;
        let (tx, rx) = mpsc::channel(inner.config.mailbox_capacity);
        let (status_tx, status_rx) = watch::channel(ServiceStatus::Created);

        let mut entry = LocalEntry {
            tx: tx.clone(),
            status: status_rx.clone(),
            shadowed: None,
        };
        // A local instance shadows a remote route to the same address.
        match inner.routes.entry(address) {
            Entry::Occupied(mut o) => {
                let &Route::Remote(peer_id) = o.get() else {
                    return Err(LifecycleError::Duplicate { address });
                };
                entry.shadowed = Some(peer_id);
                o.insert(Route::Local(entry));
            }
            Entry::Vacant(v) => {
                v.insert(Route::Local(entry));
            }
        }
        // Announced before loading so replies to an Initializing service can
        // come back from a peer.
        let docker_id = inner.docker_id();
        inner.broadcast(|| PeerMessage::Announce { address, docker_id });

        let weak: Weak<DockerInner> = Arc::downgrade(inner);
        let service = Service::new(
            ServiceIdentity {
                address,
                name: spec.name.clone(),
                docker_id: inner.docker_id(),
            },
            spec.shell,
            weak,
            inner.clock.clone(),
            inner.config.service.clone(),
        );
        let timer = TimerId(inner.next_timer.fetch_add(1, Ordering::Relaxed));
        let host = ServiceHost::new(
            service,
            behavior,
            status_tx,
            timer,
            inner.config.service.tick_interval_ms,
        );
        // Detached; the task ends once the service is destroyed or evicted.
        drop(host.spawn(rx));

        if let Err(e) = self.request(address, &tx, |reply| HostCommand::Load { reply }).await {
            inner.evict(address);
            return Err(e);
        }

        let timeout_ms = inner.config.load_timeout_ms;
        let mut status = status_rx;
        let reached = tokio::time::timeout(
            Duration::from_millis(timeout_ms),
            status.wait_for(|s| !matches!(s, ServiceStatus::Created | ServiceStatus::Initializing)),
        )
        .await
        .map(|r| r.map(|s| *s));

        match reached {
            Ok(Ok(ServiceStatus::Working)) => {}
            Ok(_) => {
                inner.evict(address);
                return Err(LifecycleError::HostGone { address });
            }
            Err(_) => {
                warn!(docker = %inner.docker_id(), service = %address, timeout_ms, "load timed out");
                inner.evict(address);
                return Err(LifecycleError::Timeout {
                    address,
                    phase: LifecyclePhase::Load,
                    timeout_ms,
                });
            }
        }

        inner.load_order.lock().push(address);
        info!(docker = %docker_id, service = %address, name = %spec.name, shell = spec.shell, "service loaded");
        Ok(address)
    }

    /// Unloads the local instance at `address` and removes its route.
    ///
    /// # Errors
    ///
    /// - `NotFound` if nothing is hosted at `address`.
    /// - `UnloadFailed` if `on_unload` returns `false`.
    /// - `Timeout` if `finish_unload` is not called within `unload_timeout_ms`.
    ///
    /// The instance is evicted whatever the outcome.
    pub async fn unload_service(&self, address: ServiceAddress) -> Result<(), LifecycleError> {
        let inner = &self.inner;
        let entry = inner
            .local_entry(address)
            .ok_or(LifecycleError::NotFound { address })?;

        if let Err(e) = self
            .request(address, &entry.tx, |reply| HostCommand::Unload { reply })
            .await
        {
            inner.evict(address);
            return Err(e);
        }

        let timeout_ms = inner.config.unload_timeout_ms;
        let mut status = entry.status;
        let reached = tokio::time::timeout(
            Duration::from_millis(timeout_ms),
            status.wait_for(|s| s.is_terminal()),
        )
        .await
        .map(|r| r.is_ok());
        inner.evict(address);

        match reached {
            Ok(true) => {
                info!(docker = %inner.docker_id(), service = %address, "service unloaded");
                Ok(())
            }
            Ok(false) => Err(LifecycleError::HostGone { address }),
            Err(_) => {
                warn!(docker = %inner.docker_id(), service = %address, timeout_ms, "unload timed out, service evicted");
                Err(LifecycleError::Timeout {
                    address,
                    phase: LifecyclePhase::Unload,
                    timeout_ms,
                })
            }
        }
    }

    /// Replaces the client association of the instance at `address`.
    ///
    /// `on_client_change` runs on the instance's host task after this returns.
    ///
    /// # Errors
    ///
    /// `NotFound` if nothing is hosted at `address`, `HostGone` if its host
    /// task has exited.
    pub async fn set_client(
        &self,
        address: ServiceAddress,
        client: Option<ClientAssociation>,
    ) -> Result<(), LifecycleError> {
        let entry = self
            .inner
            .local_entry(address)
            .ok_or(LifecycleError::NotFound { address })?;
        entry
            .tx
            .send(HostCommand::ClientChange(client))
            .await
            .map_err(|_| LifecycleError::HostGone { address })
    }

    /// Connects two dockers so each can route to the other's services.
    ///
    /// Services already hosted are exchanged immediately; later spawns and
    /// evictions are announced over the peer channel.
    pub fn link(&self, other: &LocalDocker) {
        let (a, b) = (&self.inner, &other.inner);
        if a.docker_id() == b.docker_id() {
            warn!(docker = %a.docker_id(), "refusing to link dockers with the same ID");
            return;
        }
        a.peers.write().insert(b.docker_id(), b.peer_tx.clone());
        b.peers.write().insert(a.docker_id(), a.peer_tx.clone());
        a.adopt_remote(&b.local_addresses(), b.docker_id());
        b.adopt_remote(&a.local_addresses(), a.docker_id());
        info!(docker = %a.docker_id(), peer = %b.docker_id(), "dockers linked");
    }

    /// Unloads every local service, newest first.
    ///
    /// # Errors
    ///
    /// The first unload error. Services that fail to unload are evicted and
    /// the remaining ones are still unloaded.
    pub async fn shutdown(&self) -> Result<(), LifecycleError> {
        let order = self.inner.load_order.lock().clone();
        let mut first_error = None;
        for address in order.iter().rev() {
            if self.status(*address).is_none() {
                continue;
            }
            if let Err(e) = self.unload_service(*address).await {
                warn!(docker = %self.docker_id(), service = %address, error = %e, "unload failed during shutdown");
                first_error.get_or_insert(e);
            }
        }
        info!(docker = %self.docker_id(), "docker shut down");
        first_error.map_or(Ok(()), Err)
    }

    /// Sends a lifecycle command and waits for the hook's result.
    async fn request(
        &self,
        address: ServiceAddress,
        tx: &mpsc::Sender<HostCommand>,
        make: impl FnOnce(oneshot::Sender<Result<(), LifecycleError>>) -> HostCommand,
    ) -> Result<(), LifecycleError> {
        let (reply, rx) = oneshot::channel();
        tx.send(make(reply))
            .await
            .map_err(|_| LifecycleError::HostGone { address })?;
        rx.await
            .map_err(|_| LifecycleError::HostGone { address })?
    }
}

impl Docker for LocalDocker {
    fn docker_id(&self) -> DockerId {
        self.inner.docker_id()
    }

    fn resolve(&self, target: ServiceAddress) -> bool {
        self.inner.resolve(target)
    }

    fn deliver(&self, envelope: Envelope) -> Result<(), RouteError> {
        self.inner.deliver(envelope)
    }
}
