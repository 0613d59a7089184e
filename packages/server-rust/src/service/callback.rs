//! One-shot reply callbacks keyed by correlation ID.
//!
//! Only the [`CallbackId`] crosses the process boundary; the callback itself
//! stays here until a matching reply consumes it or the sweep expires it.
//! Either way it leaves the registry exactly once.

use std::collections::HashMap;

use breeze_core::CallbackId;

struct Pending<C> {
    registered_at_ms: u64,
    callback: C,
}

/// Per-service table of callbacks awaiting a reply.
pub struct CallbackRegistry<C> {
    /// Last issued sequence value. Wraps at `u64::MAX`.
    seq: u64,
    entries: HashMap<CallbackId, Pending<C>>,
    last_sweep_ms: u64,
}

impl<C> CallbackRegistry<C> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            seq: 0,
            entries: HashMap::new(),
            last_sweep_ms: 0,
        }
    }

    /// Starts the sequence just after `seq`.
    #[cfg(test)]
    pub(crate) fn starting_at(seq: u64) -> Self {
        Self {
            seq,
            ..Self::new()
        }
    }

    /// Stores `callback` and returns its correlation ID.
    ///
    /// Returns `CallbackId::NONE` without storing anything when `callback` is
    /// `None`.
    pub fn register(&mut self, now_ms: u64, callback: Option<C>) -> CallbackId {
        let Some(callback) = callback else {
            return CallbackId::NONE;
        };
        let id = self.next_id();
        self.entries.insert(
            id,
            Pending {
                registered_at_ms: now_ms,
                callback,
            },
        );
        id
    }

    /// Next sequence value that is neither the sentinel nor still pending.
    ///
    /// After a wrap this skips over entries that are still live, so an ID is
    /// never shared by two pending callbacks.
    fn next_id(&mut self) -> CallbackId {
        loop {
            self.seq = self.seq.wrapping_add(1);
            let id = CallbackId(self.seq);
            if id.is_valid() && !self.entries.contains_key(&id) {
                return id;
            }
        }
    }

    /// Removes and returns the callback registered under `id`.
    pub fn consume(&mut self, id: CallbackId) -> Option<C> {
        if !id.is_valid() {
            return None;
        }
        self.entries.remove(&id).map(|p| p.callback)
    }

    /// Drops every callback registered more than `max_age_ms` before `now_ms`.
    ///
    /// Dropped callbacks are not invoked. Returns how many were removed.
    pub fn sweep(&mut self, now_ms: u64, max_age_ms: u64) -> usize {
        self.last_sweep_ms = now_ms;
        let before = self.entries.len();
        self.entries
            .retain(|_, p| now_ms.saturating_sub(p.registered_at_ms) <= max_age_ms);
        before - self.entries.len()
    }

    /// Whether at least `interval_ms` passed since the last sweep.
    #[must_use]
    pub fn sweep_due(&self, now_ms: u64, interval_ms: u64) -> bool {
        now_ms.saturating_sub(self.last_sweep_ms) >= interval_ms
    }

    #[must_use]
    pub fn contains(&self, id: CallbackId) -> bool {
        self.entries.contains_key(&id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<C> Default for CallbackRegistry<C> {
    fn default() -> Self {
        Self::new()
    }
}
