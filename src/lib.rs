//! Tickwork – A tick-driven cooperative scripting runtime for simulated bots
//!
//! This crate implements:
//! - A fixed-quantum tick clock and a dispatcher that serializes all
//!   simulation work onto one sim thread
//! - Supervised script executions that can be cancelled cooperatively and
//!   never take down their siblings when they fail
//! - Suspension gates: wait for a condition, bounded by a tick timeout
//! - Per-agent script stacks persisted as JSON and rebuilt on login, with
//!   dynamic scripts restored as placeholders
//! - A driver running the simulation on its own thread, plus a CLI

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

/// Runtime core: clock, dispatcher, scripts, persistence
pub mod runtime;

/// Scripts shipped with the runtime
pub mod scripts;

// Re-export key types for convenience
pub use runtime::agent::AgentId;
pub use runtime::context::ScriptContext;
pub use runtime::registry::ScriptRegistry;
pub use runtime::script::{Script, ScriptFuture};
pub use runtime::{Runtime, RuntimeConfig, SimDriver};

/// Current version of the tickwork runtime
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
