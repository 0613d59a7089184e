//! Protocol dispatch table: protocol ID -> slot handler.
//!
//! Mutated while the service sets itself up (normally inside `on_load`) and
//! read on every inbound message. The owning service serializes both.

use std::collections::HashMap;

use breeze_core::ProtoId;

/// Maps protocol IDs to handlers, with a parallel diagnostic name per ID.
pub struct SlotTable<H> {
    slots: HashMap<ProtoId, H>,
    names: HashMap<ProtoId, &'static str>,
}

impl<H> SlotTable<H> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: HashMap::new(),
            names: HashMap::new(),
        }
    }

    /// Binds `handler` to `proto_id`, replacing any previous binding.
    pub fn register(&mut self, proto_id: ProtoId, name: &'static str, handler: H) {
        self.slots.insert(proto_id, handler);
        self.names.insert(proto_id, name);
    }

    #[must_use]
    pub fn get(&self, proto_id: ProtoId) -> Option<&H> {
        self.slots.get(&proto_id)
    }

    /// Diagnostic name registered for `proto_id`.
    #[must_use]
    pub fn name(&self, proto_id: ProtoId) -> Option<&'static str> {
        self.names.get(&proto_id).copied()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Drops every binding.
    pub fn clear(&mut self) {
        self.slots.clear();
        self.names.clear();
    }
}

impl<H> Default for SlotTable<H> {
    fn default() -> Self {
        Self::new()
    }
}
