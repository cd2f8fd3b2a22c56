//! Post-commit event hooks.
//!
//! The APIs publish an event after the state change that caused it has been committed. Handlers run on their own
//! tasks, so a slow or failing handler never affects the operation that produced the event.
mod channel;
mod event_types;
mod hooks;

pub use channel::{EventHandler, EventProducer, Handler};
pub use event_types::*;
pub use hooks::{EventHandlers, EventHooks, EventProducers};
