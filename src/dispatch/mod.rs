//! Dispatch — handler abstraction, registry, and the fan-out/fan-in coordinator.

pub mod coordinator;
pub mod handler;
pub mod registry;

pub use coordinator::{Dispatcher, PhaseOutcome};
pub use handler::{ActionHandler, ApplyOutcome};
pub use registry::HandlerRegistry;
