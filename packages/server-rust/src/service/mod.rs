//! The service entity and its building blocks.
//!
//! 1. **Slots** (`slots`): protocol ID -> handler dispatch table
//! 2. **Callbacks** (`callback`): correlation ID -> one-shot reply handler, with expiry
//! 3. **Status** (`status`): Created -> Initializing -> Working -> Unloading -> Destroyed
//! 4. **Behaviour** (`behavior`): per-type lifecycle hooks
//! 5. **Instance** (`instance`): identity, routing (`to_service`, `back_to_service`) and `process`

pub mod behavior;
pub mod callback;
pub mod config;
pub mod error;
pub mod instance;
pub mod slots;
pub mod status;

// Re-export key types for convenient access.
pub use behavior::ServiceBehavior;
pub use callback::CallbackRegistry;
pub use config::ServiceConfig;
pub use error::{LifecycleError, LifecyclePhase, RouteError};
pub use instance::{
    on_reply, on_reply_proto, Dispatch, Service, ServiceCallback, ServiceIdentity, Slot,
};
pub use slots::SlotTable;
pub use status::ServiceStatus;
