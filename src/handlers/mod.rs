//! Built-in action handlers.

pub mod dry_run;

pub use dry_run::{DryRunHandler, dry_run_registry};
