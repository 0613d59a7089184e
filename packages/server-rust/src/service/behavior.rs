use super::instance::Service;

/// Lifecycle hooks implemented once per service type.
///
/// A docker owns one `Service<B>` and one `B` per hosted instance and calls
/// these hooks from the instance's host task, never concurrently. All
/// per-instance state lives in `B`; slot handlers and reply callbacks receive
/// it as their first argument.
///
/// Loading and unloading complete only on the explicit
/// [`Service::finish_load`] / [`Service::finish_unload`] signals, which may be
/// sent from inside the hook or later (e.g. from a reply callback once a
/// dependency answers).
pub trait ServiceBehavior: Send + Sized + 'static {
    /// Set up the instance: register slots, ask other services for data.
    ///
    /// Returning `false` reports a failed load to the docker.
    fn on_load(&mut self, service: &mut Service<Self>) -> bool;

    /// Called periodically while Working. Never called on shell services.
    fn on_tick(&mut self, _service: &mut Service<Self>) {}

    /// Flush and drain before teardown.
    ///
    /// Returning `false` reports a failed unload to the docker.
    fn on_unload(&mut self, service: &mut Service<Self>) -> bool;

    /// The instance's client association changed (e.g. a reconnect).
    fn on_client_change(&mut self, _service: &mut Service<Self>) {}
}
