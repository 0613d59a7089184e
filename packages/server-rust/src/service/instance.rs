//! The service entity: identity, lifecycle, routing and inbound dispatch.
//!
//! `toService`-style sends go out through the hosting [`Docker`]; replies come
//! back as ordinary inbound messages whose `trace_back_id` is matched against
//! this instance's callback registry before slot dispatch is attempted.

use std::sync::{Arc, Weak};

use breeze_core::{
    wire, CallbackId, ClientAssociation, ClockSource, DockerId, Envelope, Frame, Proto, ProtoId,
    ServiceAddress, ServiceId, ServiceName, ServiceType, SessionId, TimerId, Trace,
};
use bytes::Bytes;
use tracing::{debug, error, warn};

use super::behavior::ServiceBehavior;
use super::callback::CallbackRegistry;
use super::config::ServiceConfig;
use super::error::{LifecycleError, RouteError};
use super::slots::SlotTable;
use super::status::ServiceStatus;
use crate::docker::Docker;

/// Handler bound to one protocol ID.
pub type Slot<B> = Arc<dyn Fn(&mut B, &mut Service<B>, &Trace, &Frame<'_>) + Send + Sync>;

/// One-shot handler for the reply to an outgoing message.
pub type ServiceCallback<B> = Box<dyn FnOnce(&mut B, &mut Service<B>, &Trace, &Frame<'_>) + Send>;

/// Wraps a closure as a reply callback for `to_service` / `back_to_service`.
pub fn on_reply<B, F>(f: F) -> Option<ServiceCallback<B>>
where
    B: ServiceBehavior,
    F: FnOnce(&mut B, &mut Service<B>, &Trace, &Frame<'_>) + Send + 'static,
{
    Some(Box::new(f))
}

/// Like [`on_reply`], decoding the reply as `P` first.
///
/// A reply that does not decode as `P` is logged and the closure is not called.
pub fn on_reply_proto<P, B, F>(f: F) -> Option<ServiceCallback<B>>
where
    P: Proto,
    B: ServiceBehavior,
    F: FnOnce(&mut B, &mut Service<B>, &Trace, P) + Send + 'static,
{
    on_reply(move |behavior: &mut B, service: &mut Service<B>, trace: &Trace, frame: &Frame<'_>| {
        match frame.read::<P>() {
            Ok(msg) => f(behavior, service, trace, msg),
            Err(e) => warn!(
                service = %service.address(),
                proto = P::PROTO_NAME,
                error = %e,
                "reply does not decode as expected protocol"
            ),
        }
    })
}

/// Identity assigned by the hosting docker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceIdentity {
    pub address: ServiceAddress,
    pub name: ServiceName,
    /// Docker currently hosting the instance.
    pub docker_id: DockerId,
}

/// What `process` did with an inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// A pending reply callback was consumed and invoked.
    Callback(CallbackId),
    /// The slot bound to this protocol ID was invoked.
    Slot(ProtoId),
    /// Neither a callback nor a slot matched.
    Unhandled(ProtoId),
    /// The payload is not a frame.
    Malformed,
    /// The service is not in a state that accepts messages.
    Rejected(ServiceStatus),
}

/// A hosted service instance.
///
/// `B` is the per-type behaviour; see [`ServiceBehavior`].
pub struct Service<B> {
    identity: ServiceIdentity,
    client: Option<ClientAssociation>,
    status: ServiceStatus,
    shell: bool,
    slots: SlotTable<Slot<B>>,
    callbacks: CallbackRegistry<ServiceCallback<B>>,
    timer: Option<TimerId>,
    docker: Weak<dyn Docker>,
    clock: Arc<dyn ClockSource>,
    config: ServiceConfig,
}

impl<B: ServiceBehavior> Service<B> {
    /// Creates an instance in `Created`.
    #[must_use]
    pub fn new(
        identity: ServiceIdentity,
        shell: bool,
        docker: Weak<dyn Docker>,
        clock: Arc<dyn ClockSource>,
        config: ServiceConfig,
    ) -> Self {
        Self {
            identity,
            client: None,
            status: ServiceStatus::Created,
            shell,
            slots: SlotTable::new(),
            callbacks: CallbackRegistry::new(),
            timer: None,
            docker,
            clock,
            config,
        }
    }

    // -----------------------------------------------------------------------
    // Identity and state
    // -----------------------------------------------------------------------

    #[must_use]
    pub fn address(&self) -> ServiceAddress {
        self.identity.address
    }

    #[must_use]
    pub fn service_type(&self) -> ServiceType {
        self.identity.address.service_type
    }

    #[must_use]
    pub fn service_id(&self) -> ServiceId {
        self.identity.address.service_id
    }

    #[must_use]
    pub fn service_name(&self) -> &str {
        &self.identity.name
    }

    #[must_use]
    pub fn docker_id(&self) -> DockerId {
        self.identity.docker_id
    }

    #[must_use]
    pub fn client(&self) -> Option<ClientAssociation> {
        self.client
    }

    #[must_use]
    pub fn client_session_id(&self) -> SessionId {
        self.client.map_or(SessionId::INVALID, |c| c.session_id)
    }

    #[must_use]
    pub fn client_docker_id(&self) -> DockerId {
        self.client.map_or(DockerId::INVALID, |c| c.docker_id)
    }

    #[must_use]
    pub fn status(&self) -> ServiceStatus {
        self.status
    }

    #[must_use]
    pub fn is_shell(&self) -> bool {
        self.shell
    }

    #[must_use]
    pub fn timer_id(&self) -> Option<TimerId> {
        self.timer
    }

    /// Number of callbacks still waiting for a reply.
    #[must_use]
    pub fn pending_callbacks(&self) -> usize {
        self.callbacks.len()
    }

    #[must_use]
    pub fn slot_name(&self, proto_id: ProtoId) -> Option<&'static str> {
        self.slots.name(proto_id)
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    fn transition(&mut self, to: ServiceStatus) -> Result<(), LifecycleError> {
        if !self.status.can_transition(to) {
            return Err(LifecycleError::InvalidTransition {
                from: self.status,
                to,
            });
        }
        debug!(service = %self.address(), from = ?self.status, to = ?to, "status change");
        self.status = to;
        Ok(())
    }

    /// Enters `Initializing` and runs `on_load`.
    ///
    /// # Errors
    ///
    /// `InvalidTransition` unless `Created`; `LoadFailed` if the hook returns `false`.
    pub fn load(&mut self, behavior: &mut B) -> Result<(), LifecycleError> {
        self.transition(ServiceStatus::Initializing)?;
        if behavior.on_load(self) {
            Ok(())
        } else {
            error!(service = %self.address(), name = %self.service_name(), "on_load failed");
            Err(LifecycleError::LoadFailed {
                address: self.address(),
            })
        }
    }

    /// Signals that loading is complete: `Initializing -> Working`.
    ///
    /// # Errors
    ///
    /// `InvalidTransition` unless `Initializing`.
    pub fn finish_load(&mut self) -> Result<(), LifecycleError> {
        self.transition(ServiceStatus::Working)
    }

    /// Enters `Unloading` and runs `on_unload`.
    ///
    /// # Errors
    ///
    /// `InvalidTransition` unless `Working`; `UnloadFailed` if the hook returns `false`.
    pub fn unload(&mut self, behavior: &mut B) -> Result<(), LifecycleError> {
        self.transition(ServiceStatus::Unloading)?;
        self.timer = None;
        if behavior.on_unload(self) {
            Ok(())
        } else {
            error!(service = %self.address(), name = %self.service_name(), "on_unload failed");
            Err(LifecycleError::UnloadFailed {
                address: self.address(),
            })
        }
    }

    /// Signals that unloading is complete: `Unloading -> Destroyed`.
    ///
    /// # Errors
    ///
    /// `InvalidTransition` unless `Unloading`.
    pub fn finish_unload(&mut self) -> Result<(), LifecycleError> {
        self.transition(ServiceStatus::Destroyed)?;
        // Handlers may capture state of their own; release them with the instance.
        self.slots.clear();
        Ok(())
    }

    /// Records the tick registration assigned by the docker.
    ///
    /// # Errors
    ///
    /// `ShellTimer` for shell services.
    pub fn begin_timer(&mut self, timer: TimerId) -> Result<(), LifecycleError> {
        if self.shell {
            return Err(LifecycleError::ShellTimer);
        }
        self.timer = Some(timer);
        Ok(())
    }

    /// Runs one periodic tick. Returns whether `on_tick` was called.
    ///
    /// Only Working, non-shell instances tick. Expired callbacks are swept
    /// here when a sweep is due.
    pub fn tick(&mut self, behavior: &mut B) -> bool {
        if self.shell || self.status != ServiceStatus::Working {
            return false;
        }
        behavior.on_tick(self);
        self.sweep_if_due(self.clock.now());
        true
    }

    /// Replaces the client association and notifies the behaviour.
    pub fn change_client(&mut self, behavior: &mut B, client: Option<ClientAssociation>) {
        self.client = client;
        behavior.on_client_change(self);
    }

    fn sweep_if_due(&mut self, now: u64) {
        if self.callbacks.sweep_due(now, self.config.sweep_interval_ms) {
            let dropped = self.callbacks.sweep(now, self.config.callback_max_age_ms);
            if dropped > 0 {
                debug!(service = %self.address(), dropped, "expired callbacks swept");
            }
        }
    }

    // -----------------------------------------------------------------------
    // Slots
    // -----------------------------------------------------------------------

    /// Binds a raw handler to `proto_id`, replacing any previous binding.
    pub fn slotting_raw<F>(&mut self, proto_id: ProtoId, name: &'static str, handler: F)
    where
        F: Fn(&mut B, &mut Service<B>, &Trace, &Frame<'_>) + Send + Sync + 'static,
    {
        self.slots.register(proto_id, name, Arc::new(handler));
    }

    /// Binds a typed handler for `P`.
    ///
    /// Messages that fail to decode as `P` are logged and dropped.
    pub fn slotting<P, F>(&mut self, handler: F)
    where
        P: Proto,
        F: Fn(&mut B, &mut Service<B>, &Trace, P) + Send + Sync + 'static,
    {
        self.slotting_raw(
            P::PROTO_ID,
            P::PROTO_NAME,
            move |behavior: &mut B, service: &mut Service<B>, trace: &Trace, frame: &Frame<'_>| {
                match frame.read::<P>() {
                    Ok(msg) => handler(behavior, service, trace, msg),
                    Err(e) => warn!(
                        service = %service.address(),
                        proto = P::PROTO_NAME,
                        error = %e,
                        "failed to decode message"
                    ),
                }
            },
        );
    }

    // -----------------------------------------------------------------------
    // Routing
    // -----------------------------------------------------------------------

    /// Whether the hosting docker could route a message to `target` right now.
    #[must_use]
    pub fn can_to_service(&self, target: ServiceAddress) -> bool {
        self.docker
            .upgrade()
            .is_some_and(|docker| docker.resolve(target))
    }

    /// Sends a framed payload to `target`.
    ///
    /// `callback`, if any, is registered before the envelope leaves and fires
    /// at most once, when the target answers with `back_to_service`.
    ///
    /// # Errors
    ///
    /// Fails synchronously when the service is not active, the target does not
    /// resolve, or the docker refuses the envelope. The callback is never
    /// left registered after a failure.
    pub fn to_service(
        &mut self,
        target: ServiceAddress,
        payload: Bytes,
        callback: Option<ServiceCallback<B>>,
    ) -> Result<(), RouteError> {
        let trace = Trace::request(self.address(), self.docker_id(), target, CallbackId::NONE)
            .with_client(self.client);
        self.send(trace, payload, callback)
    }

    /// Encodes `proto` and sends it to `target`.
    ///
    /// # Errors
    ///
    /// `RouteError::Encode` if `proto` cannot be framed (also logged; nothing
    /// is sent), otherwise as [`Service::to_service`].
    pub fn to_service_proto<P: Proto>(
        &mut self,
        target: ServiceAddress,
        proto: &P,
        callback: Option<ServiceCallback<B>>,
    ) -> Result<(), RouteError> {
        let payload = self.encode(proto)?;
        self.to_service(target, payload, callback)
    }

    /// Replies to the sender of the message that carried `trace`.
    ///
    /// On arrival the reply is matched against the originator's callback
    /// registry. A new `callback` continues the conversation.
    ///
    /// # Errors
    ///
    /// As [`Service::to_service`].
    pub fn back_to_service(
        &mut self,
        trace: &Trace,
        payload: Bytes,
        callback: Option<ServiceCallback<B>>,
    ) -> Result<(), RouteError> {
        let reply = trace.reply(self.docker_id(), CallbackId::NONE);
        self.send(reply, payload, callback)
    }

    /// Encodes `proto` and replies with it.
    ///
    /// # Errors
    ///
    /// As [`Service::to_service_proto`].
    pub fn back_to_service_proto<P: Proto>(
        &mut self,
        trace: &Trace,
        proto: &P,
        callback: Option<ServiceCallback<B>>,
    ) -> Result<(), RouteError> {
        let payload = self.encode(proto)?;
        self.back_to_service(trace, payload, callback)
    }

    fn encode<P: Proto>(&self, proto: &P) -> Result<Bytes, RouteError> {
        wire::encode(proto).map_err(|e| {
            error!(
                service = %self.address(),
                proto = P::PROTO_NAME,
                error = %e,
                "failed to encode message, send abandoned"
            );
            RouteError::Encode(e)
        })
    }

    fn send(
        &mut self,
        mut trace: Trace,
        payload: Bytes,
        callback: Option<ServiceCallback<B>>,
    ) -> Result<(), RouteError> {
        if !self.status.is_active() {
            return Err(RouteError::NotActive {
                status: self.status,
            });
        }
        let docker = self.docker.upgrade().ok_or(RouteError::DockerGone)?;
        let target = trace.to;
        if !docker.resolve(target) {
            warn!(from = %self.address(), to = %target, "target service unreachable");
            return Err(RouteError::Unreachable { target });
        }

        let now = self.clock.now();
        self.sweep_if_due(now);
        trace.trace_id = self.callbacks.register(now, callback);

        debug!(
            from = %trace.from,
            to = %target,
            trace_id = %trace.trace_id,
            trace_back_id = %trace.trace_back_id,
            "sending"
        );
        if let Err(e) = docker.deliver(Envelope::new(trace, payload)) {
            // Never delivered, so no reply can arrive for it.
            drop(self.callbacks.consume(trace.trace_id));
            warn!(from = %self.address(), to = %target, error = %e, "delivery refused");
            return Err(e);
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Inbound
    // -----------------------------------------------------------------------

    /// Handles one inbound message.
    ///
    /// A pending callback matching `trace.trace_back_id` takes precedence over
    /// the slot table; only one of the two is ever invoked. While Initializing
    /// only replies to pending callbacks are accepted.
    pub fn process(&mut self, behavior: &mut B, trace: &Trace, bytes: &[u8]) -> Dispatch {
        if !self.status.is_active() {
            warn!(service = %self.address(), status = ?self.status, "message dropped, service not active");
            return Dispatch::Rejected(self.status);
        }

        let frame = match Frame::parse(bytes) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(service = %self.address(), from = %trace.from, error = %e, "malformed payload");
                return Dispatch::Malformed;
            }
        };

        if let Some(callback) = self.callbacks.consume(trace.trace_back_id) {
            callback(behavior, self, trace, &frame);
            return Dispatch::Callback(trace.trace_back_id);
        }

        let proto_id = frame.proto_id();
        if self.status == ServiceStatus::Initializing {
            warn!(
                service = %self.address(),
                from = %trace.from,
                proto = %proto_id,
                "message dropped, service still loading"
            );
            return Dispatch::Rejected(self.status);
        }

        if let Some(slot) = self.slots.get(proto_id).cloned() {
            slot(behavior, self, trace, &frame);
            return Dispatch::Slot(proto_id);
        }

        if trace.is_reply() {
            warn!(
                service = %self.address(),
                from = %trace.from,
                proto = %proto_id,
                trace_back_id = %trace.trace_back_id,
                "no handler for protocol, reply callback missing or expired"
            );
        } else {
            warn!(
                service = %self.address(),
                from = %trace.from,
                proto = %proto_id,
                "no handler for protocol"
            );
        }
        Dispatch::Unhandled(proto_id)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
