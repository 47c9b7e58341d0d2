//! Per-agent ordered script stack
//!
//! Index 0 is the bottom; the last entry is the top, the currently
//! dominant behavior. Order is preserved through snapshot and rebuild.

use super::agent::{AgentId, ScriptId};
use super::error::{RegistryResult, ScriptError, ScriptResult};
use super::script::AnyScript;
use super::snapshot::ScriptSnapshot;

/// Ordered scripts of one agent
pub struct ScriptStack {
    agent: AgentId,
    scripts: Vec<Box<dyn AnyScript>>,
}

impl ScriptStack {
    /// Empty stack for `agent`
    pub fn new(agent: AgentId) -> Self {
        Self {
            agent,
            scripts: Vec::new(),
        }
    }

    /// Owning agent
    pub fn agent(&self) -> AgentId {
        self.agent
    }

    /// Push on top. Returns the script's identity.
    pub fn push(&mut self, script: Box<dyn AnyScript>) -> ScriptId {
        debug_assert_eq!(script.agent(), self.agent, "script bound to another agent");
        let id = script.id();
        self.scripts.push(script);
        id
    }

    /// Insert at `index` (0 is the bottom)
    pub fn insert(&mut self, index: usize, script: Box<dyn AnyScript>) -> ScriptResult<ScriptId> {
        if index > self.scripts.len() {
            return Err(ScriptError::StackIndexOutOfBounds {
                index,
                len: self.scripts.len(),
            });
        }
        debug_assert_eq!(script.agent(), self.agent, "script bound to another agent");
        let id = script.id();
        self.scripts.insert(index, script);
        Ok(id)
    }

    /// Remove the top script. It is returned as is, not stopped.
    pub fn pop(&mut self) -> Option<Box<dyn AnyScript>> {
        self.scripts.pop()
    }

    /// Remove a script by identity. It is returned as is, not stopped.
    pub fn remove(&mut self, id: ScriptId) -> Option<Box<dyn AnyScript>> {
        let index = self.position(id)?;
        Some(self.scripts.remove(index))
    }

    /// Index of the script with identity `id`
    pub fn position(&self, id: ScriptId) -> Option<usize> {
        self.scripts.iter().position(|script| script.id() == id)
    }

    /// Top script
    pub fn top(&self) -> Option<&dyn AnyScript> {
        self.scripts.last().map(|script| &**script)
    }

    /// Script at `index`
    pub fn get(&self, index: usize) -> Option<&dyn AnyScript> {
        self.scripts.get(index).map(|script| &**script)
    }

    /// Script by identity
    pub fn find(&self, id: ScriptId) -> Option<&dyn AnyScript> {
        self.position(id).and_then(|index| self.get(index))
    }

    /// Bottom to top
    pub fn iter(&self) -> impl Iterator<Item = &dyn AnyScript> {
        self.scripts.iter().map(|script| &**script)
    }

    /// Number of scripts
    pub fn len(&self) -> usize {
        self.scripts.len()
    }

    /// Whether the stack is empty
    pub fn is_empty(&self) -> bool {
        self.scripts.is_empty()
    }

    /// Type identities, bottom to top
    pub fn kinds(&self) -> Vec<String> {
        self.scripts.iter().map(|script| script.kind().to_string()).collect()
    }

    /// Stop every running script. Returns how many were stopped.
    pub fn stop_all(&self) -> usize {
        self.scripts.iter().filter(|script| script.stop()).count()
    }

    /// Snapshot every script, bottom to top
    pub fn snapshot(&self) -> RegistryResult<Vec<ScriptSnapshot>> {
        self.scripts.iter().map(|script| script.snapshot()).collect()
    }

    /// Drop placeholder entries left by a rebuild. Returns how many were removed.
    pub fn prune_placeholders(&mut self) -> usize {
        let before = self.scripts.len();
        self.scripts.retain(|script| {
            if script.is_placeholder() {
                script.stop();
                false
            } else {
                true
            }
        });
        before - self.scripts.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::clock::TickScheduler;
    use crate::runtime::context::{RuntimeContext, ScriptContext};
    use crate::runtime::dispatch::Dispatcher;
    use crate::runtime::dynamic::PlaceholderScript;
    use crate::runtime::scope::TaskScope;
    use crate::runtime::script::BotScript;
    use crate::scripts::idle::IdleScript;
    use std::sync::Arc;
    use std::time::Duration;

    fn context() -> ScriptContext {
        let dispatcher = Dispatcher::new();
        dispatcher.bind_current_thread();
        let runtime = RuntimeContext::new(
            Arc::new(TickScheduler::new()),
            TaskScope::new(dispatcher),
            Duration::from_millis(600),
        );
        runtime.for_agent(AgentId::new())
    }

    fn idle(ctx: &ScriptContext, ticks: u64) -> Box<dyn AnyScript> {
        Box::new(BotScript::new(ctx.clone(), IdleScript::new(ticks)))
    }

    #[test]
    fn test_push_pop_order() {
        let ctx = context();
        let mut stack = ScriptStack::new(ctx.agent());
        let bottom = stack.push(idle(&ctx, 5));
        let top = stack.push(Box::new(PlaceholderScript::new(ctx.clone(), "emote")));

        assert_eq!(stack.len(), 2);
        assert_eq!(stack.top().unwrap().id(), top);
        assert_eq!(stack.get(0).unwrap().id(), bottom);
        assert_eq!(stack.kinds(), vec!["idle", "placeholder"]);

        assert_eq!(stack.pop().unwrap().id(), top);
        assert_eq!(stack.top().unwrap().id(), bottom);
    }

    #[test]
    fn test_insert_and_remove_by_identity() {
        let ctx = context();
        let mut stack = ScriptStack::new(ctx.agent());
        let a = stack.push(idle(&ctx, 1));
        let c = stack.push(idle(&ctx, 3));
        let b = stack.insert(1, idle(&ctx, 2)).unwrap();

        let order: Vec<_> = stack.iter().map(|script| script.id()).collect();
        assert_eq!(order, vec![a, b, c]);

        assert!(stack.remove(b).is_some());
        assert!(stack.remove(b).is_none());
        assert_eq!(stack.position(c), Some(1));
        assert!(stack.find(a).is_some());

        assert_eq!(
            stack.insert(9, idle(&ctx, 1)).err(),
            Some(ScriptError::StackIndexOutOfBounds { index: 9, len: 2 })
        );
    }

    #[test]
    fn test_stop_all_and_prune() {
        let ctx = context();
        let mut stack = ScriptStack::new(ctx.agent());
        stack.push(idle(&ctx, 10));
        stack.push(Box::new(PlaceholderScript::new(ctx.clone(), "emote")));
        stack.push(idle(&ctx, 10));

        for script in stack.iter() {
            if !script.is_placeholder() {
                script.start();
            }
        }
        assert_eq!(stack.stop_all(), 2);
        assert!(stack.iter().filter(|s| !s.is_placeholder()).all(|s| s.is_interrupted()));

        assert_eq!(stack.prune_placeholders(), 1);
        assert_eq!(stack.kinds(), vec!["idle", "idle"]);
    }
}
