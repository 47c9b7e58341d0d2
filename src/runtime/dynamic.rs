//! Dynamic (non-persistent) scripts and their placeholders
//!
//! A dynamic script never has anything worth saving: its snapshot has no
//! payload. When a stack is rebuilt, a dynamic entry becomes a
//! [`PlaceholderScript`] that does nothing but hold the entry's position,
//! so the restored stack has the persisted length and order. A later
//! reconciliation pass ([`ScriptStack::prune_placeholders`]) removes them.
//!
//! [`ScriptStack::prune_placeholders`]: super::stack::ScriptStack::prune_placeholders

use std::any::Any;

use super::agent::{AgentId, ScriptId};
use super::context::ScriptContext;
use super::error::RegistryResult;
use super::script::{AnyScript, BotScript, Script, ScriptFuture, ScriptState};
use super::snapshot::ScriptSnapshot;

/// Behavior that is unsafe to resume after a restart
pub trait DynamicScript: Send + 'static {
    /// Stable type identity, still persisted so the stack keeps its shape
    const KIND: &'static str;

    /// Entry point
    fn run(&self, ctx: ScriptContext) -> ScriptFuture;
}

/// Adapts a [`DynamicScript`] to the [`Script`] contract with an empty snapshot
pub struct Dynamic<D>(pub D);

impl<D: DynamicScript> Script for Dynamic<D> {
    const KIND: &'static str = D::KIND;
    const PERSISTENT: bool = false;
    type Data = ();

    fn run(&self, ctx: ScriptContext) -> ScriptFuture {
        self.0.run(ctx)
    }

    fn snapshot(&self) {}

    fn load(&mut self, _data: ()) {}
}

struct Noop;

impl DynamicScript for Noop {
    const KIND: &'static str = PlaceholderScript::KIND;

    fn run(&self, _ctx: ScriptContext) -> ScriptFuture {
        Box::pin(async { Ok(()) })
    }
}

/// No-op stand-in for a dynamic script that was not restored
pub struct PlaceholderScript {
    replaces: String,
    inner: BotScript<Dynamic<Noop>>,
}

impl PlaceholderScript {
    /// Type identity reported by [`AnyScript::kind`]
    pub const KIND: &'static str = "placeholder";

    /// Stand in for a persisted entry of type `replaces`
    pub fn new(ctx: ScriptContext, replaces: impl Into<String>) -> Self {
        Self {
            replaces: replaces.into(),
            inner: BotScript::new(ctx, Dynamic(Noop)),
        }
    }

    /// Type identity of the entry this placeholder holds the position of
    pub fn replaces(&self) -> &str {
        &self.replaces
    }
}

impl AnyScript for PlaceholderScript {
    fn id(&self) -> ScriptId {
        self.inner.id()
    }

    fn kind(&self) -> &str {
        Self::KIND
    }

    fn agent(&self) -> AgentId {
        self.inner.agent()
    }

    fn start(&self) -> bool {
        self.inner.start()
    }

    fn stop(&self) -> bool {
        self.inner.stop()
    }

    fn state(&self) -> ScriptState {
        self.inner.state()
    }

    /// Keeps the replaced type so a save before reconciliation round-trips
    fn snapshot(&self) -> RegistryResult<ScriptSnapshot> {
        Ok(ScriptSnapshot::empty(self.replaces.clone()))
    }

    fn is_placeholder(&self) -> bool {
        true
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
