//! Scripts: the author-facing contract and the lifecycle around it
//!
//! A script author implements [`Script`]: an entry point plus a typed
//! snapshot/load pair. [`BotScript`] binds a script to its agent and owns
//! at most one live execution in the task scope:
//!
//! ```text
//! Idle --start--> Running --(body returns Ok)--------------> Finished
//!                    |----(stop / scope shutdown / error)--> Interrupted
//! Finished | Interrupted --start--> Running (fresh execution)
//! ```
//!
//! Cancellation is cooperative. A body is only dropped at a suspension
//! point (a gate or a delay), so a loop that never awaits cannot be stopped
//! and stalls the sim thread; bodies must await at least once per tick of
//! work.

use std::any::Any;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;

use super::agent::{AgentId, ScriptId};
use super::context::ScriptContext;
use super::error::{RegistryError, RegistryResult};
use super::scope::TaskHandle;
use super::snapshot::ScriptSnapshot;

/// Body of a script execution
pub type ScriptFuture = BoxFuture<'static, anyhow::Result<()>>;

/// Contract implemented by every behavioral script
///
/// State the body mutates must be shared with the script value (for
/// example through `Arc`s cloned into the future) so that
/// [`snapshot`](Script::snapshot) observes progress.
pub trait Script: Send + 'static {
    /// Stable type identity used for persistence
    const KIND: &'static str;

    /// Whether snapshots carry a payload. Dynamic scripts set this to false.
    const PERSISTENT: bool = true;

    /// Persisted payload
    type Data: Serialize + DeserializeOwned + Send + 'static;

    /// Entry point, run by [`BotScript::start`]
    fn run(&self, ctx: ScriptContext) -> ScriptFuture;

    /// Capture enough state to resume equivalent behavior later.
    ///
    /// Only called at tick boundaries, never mid-mutation.
    fn snapshot(&self) -> Self::Data;

    /// Restore from a snapshot. Must not start execution.
    fn load(&mut self, data: Self::Data);
}

/// Lifecycle state of a script
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptState {
    /// No execution handle
    Idle,
    /// Execution in progress, possibly suspended
    Running,
    /// Execution returned normally
    Finished,
    /// Execution was stopped, cancelled by shutdown, or failed
    Interrupted,
}

/// Type-erased script as stored in a [`ScriptStack`](super::stack::ScriptStack)
pub trait AnyScript: Send + Sync {
    /// Instance identity
    fn id(&self) -> ScriptId;

    /// Type identity
    fn kind(&self) -> &str;

    /// Owning agent
    fn agent(&self) -> AgentId;

    /// Launch a fresh execution. Returns false if one is already running.
    fn start(&self) -> bool;

    /// Cancel the running execution. Returns false if nothing was running.
    fn stop(&self) -> bool;

    /// Current lifecycle state
    fn state(&self) -> ScriptState;

    /// Capture a persistable snapshot
    fn snapshot(&self) -> RegistryResult<ScriptSnapshot>;

    /// Whether this entry stands in for a dynamic script that was not restored
    fn is_placeholder(&self) -> bool {
        false
    }

    /// Downcasting support
    fn as_any(&self) -> &dyn Any;

    /// No execution handle
    fn is_idle(&self) -> bool {
        self.state() == ScriptState::Idle
    }

    /// Execution active
    fn is_running(&self) -> bool {
        self.state() == ScriptState::Running
    }

    /// Execution completed normally
    fn is_finished(&self) -> bool {
        self.state() == ScriptState::Finished
    }

    /// Execution stopped or failed
    fn is_interrupted(&self) -> bool {
        self.state() == ScriptState::Interrupted
    }
}

/// A [`Script`] bound to its agent, with its execution handle
pub struct BotScript<S: Script> {
    id: ScriptId,
    ctx: ScriptContext,
    script: Mutex<S>,
    handle: Mutex<Option<TaskHandle>>,
}

impl<S: Script> BotScript<S> {
    /// Bind `script` to the agent of `ctx`. The script starts Idle.
    pub fn new(ctx: ScriptContext, script: S) -> Self {
        Self {
            id: ScriptId::new(),
            ctx,
            script: Mutex::new(script),
            handle: Mutex::new(None),
        }
    }

    /// Inspect the wrapped script
    pub fn with_script<R>(&self, f: impl FnOnce(&S) -> R) -> R {
        f(&self.script.lock())
    }

    /// Restore the wrapped script from `data` without starting it
    pub fn load(&self, data: S::Data) {
        self.script.lock().load(data);
    }

    /// Typed snapshot of the wrapped script
    pub fn snapshot_data(&self) -> S::Data {
        self.script.lock().snapshot()
    }

    /// Handle of the current or last execution
    pub fn handle(&self) -> Option<TaskHandle> {
        self.handle.lock().clone()
    }

    fn task_name(&self) -> String {
        format!("{}@{}", S::KIND, self.ctx.agent())
    }
}

impl<S: Script> AnyScript for BotScript<S> {
    fn id(&self) -> ScriptId {
        self.id
    }

    fn kind(&self) -> &str {
        S::KIND
    }

    fn agent(&self) -> AgentId {
        self.ctx.agent()
    }

    fn start(&self) -> bool {
        let mut handle = self.handle.lock();
        if handle.as_ref().is_some_and(TaskHandle::is_active) {
            tracing::warn!(script = S::KIND, agent = %self.ctx.agent(), "start rejected: already running");
            return false;
        }

        let body = self.script.lock().run(self.ctx.clone());
        let task = self.ctx.runtime().scope().launch(self.task_name(), body);
        tracing::debug!(script = S::KIND, agent = %self.ctx.agent(), task = %task.id(), "script started");
        *handle = Some(task);
        true
    }

    fn stop(&self) -> bool {
        let current = self.handle.lock().clone();
        match current {
            Some(task) if task.is_active() => {
                let stopped = task.cancel();
                if stopped {
                    tracing::debug!(script = S::KIND, agent = %self.ctx.agent(), "script stopped");
                }
                stopped
            }
            _ => false,
        }
    }

    fn state(&self) -> ScriptState {
        match self.handle.lock().as_ref() {
            None => ScriptState::Idle,
            Some(task) if task.is_active() => ScriptState::Running,
            Some(task) if task.is_completed() => ScriptState::Finished,
            Some(_) => ScriptState::Interrupted,
        }
    }

    fn snapshot(&self) -> RegistryResult<ScriptSnapshot> {
        if !S::PERSISTENT {
            return Ok(ScriptSnapshot::empty(S::KIND));
        }
        let data = self.snapshot_data();
        let value = serde_json::to_value(&data).map_err(|e| RegistryError::SnapshotFailed {
            kind: S::KIND.to_string(),
            detail: e.to_string(),
        })?;
        Ok(ScriptSnapshot::new(S::KIND, Some(value)))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
