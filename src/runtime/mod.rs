//! Runtime orchestrator and public API
//!
//! This module provides the main `Runtime` struct that owns the tick clock,
//! the task scope, the script registry and every loaded agent's script
//! stack, and exposes the lifecycle used by a host: login, tick, checkpoint,
//! logout and shutdown.
//!
//! Every method that touches script state is meant to run on the sim
//! thread. Script bodies must not call back into the `Runtime` directly
//! while the runtime holds its agent table; they queue the mutation with
//! [`Dispatcher::defer`](dispatch::Dispatcher::defer) instead.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

// Submodules
pub mod agent;
pub mod clock;
pub mod context;
pub mod dispatch;
pub mod driver;
pub mod dynamic;
pub mod error;
pub mod gate;
pub mod registry;
pub mod scope;
pub mod script;
pub mod snapshot;
pub mod stack;
pub mod storage;

/// Configuration for the tickwork runtime
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Root directory for runtime storage (default: .tickwork/)
    pub root: PathBuf,

    /// Wall-clock length of one tick, in milliseconds
    pub tick_millis: u64,

    /// Number of ticks between automatic checkpoints (0 disables them)
    pub checkpoint_interval: u64,

    /// Enable debug tracing
    pub debug: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from(".tickwork"),
            tick_millis: 600,
            checkpoint_interval: 100,
            debug: false,
        }
    }
}

impl RuntimeConfig {
    /// Wall-clock length of one tick, never zero
    pub fn tick_duration(&self) -> Duration {
        Duration::from_millis(self.tick_millis.max(1))
    }
}

use agent::{AgentId, ScriptId};
use clock::{Tick, TickClock, TickScheduler};
use context::{RuntimeContext, ScriptContext};
use dispatch::Dispatcher;
use registry::ScriptRegistry;
use scope::TaskScope;
use script::{AnyScript, BotScript, Script};
use snapshot::{AgentRecord, RecordStore};
use stack::ScriptStack;
use storage::Storage;

/// The main runtime orchestrator
///
/// Coordinates the tick clock, the task scope, script reconstruction and
/// persistence for every loaded agent.
pub struct Runtime {
    config: RuntimeConfig,
    clock: Arc<TickScheduler>,
    context: RuntimeContext,
    registry: ScriptRegistry,
    records: RecordStore,
    agents: Mutex<BTreeMap<AgentId, ScriptStack>>,
}

impl Runtime {
    /// Create a new runtime with the given configuration
    ///
    /// Creates the storage layout if it is missing. The sim thread is not
    /// bound; call [`Runtime::bind_current_thread`] or hand the runtime to a
    /// [`SimDriver`](driver::SimDriver).
    pub fn new(config: RuntimeConfig, registry: ScriptRegistry) -> Result<Self> {
        storage::init_storage(&config.root)?;

        let clock = Arc::new(TickScheduler::new());
        let scope = TaskScope::new(Dispatcher::new());
        let context = RuntimeContext::new(clock.clone(), scope, config.tick_duration());
        let records = RecordStore::new(Storage::new(config.root.clone()));

        tracing::info!(
            root = %config.root.display(),
            tick_millis = config.tick_millis,
            types = registry.list_types().len(),
            "runtime created"
        );

        Ok(Self {
            config,
            clock,
            context,
            registry,
            records,
            agents: Mutex::new(BTreeMap::new()),
        })
    }

    /// Initialize runtime storage directories and metadata
    pub fn init(config: RuntimeConfig) -> anyhow::Result<()> {
        storage::init_storage(&config.root)?;
        storage::write_config(&config)?;
        Ok(())
    }

    /// Open an existing runtime from storage
    pub fn open(root: PathBuf, registry: ScriptRegistry) -> Result<Self> {
        let config = storage::load_config(&root)?;
        Self::new(config, registry)
    }

    /// Get the current configuration
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Shared context handed to scripts
    pub fn context(&self) -> &RuntimeContext {
        &self.context
    }

    /// Dispatcher onto the sim thread
    pub fn dispatcher(&self) -> &Dispatcher {
        self.context.dispatcher()
    }

    /// Script type registry
    pub fn registry(&self) -> &ScriptRegistry {
        &self.registry
    }

    /// Persisted agent records
    pub fn records(&self) -> &RecordStore {
        &self.records
    }

    /// Make the calling thread the sim thread
    pub fn bind_current_thread(&self) {
        self.dispatcher().bind_current_thread();
    }

    /// Last completed tick
    pub fn current_tick(&self) -> Tick {
        self.clock.current_tick()
    }

    /// Context for a script bound to `agent`
    pub fn script_context(&self, agent: AgentId) -> ScriptContext {
        self.context.for_agent(agent)
    }

    /// Advance the simulation by one tick
    ///
    /// Drains queued work, fires due tick callbacks, drains the work they
    /// produced, then checkpoints every `checkpoint_interval` ticks. A failed
    /// checkpoint is logged and does not stop the tick.
    pub fn tick(&self) -> Tick {
        let dispatcher = self.dispatcher();
        dispatcher.run_pending();
        let tick = self.clock.tick();
        dispatcher.run_pending();

        let interval = self.config.checkpoint_interval;
        if interval > 0 && tick % interval == 0 {
            if let Err(e) = self.checkpoint() {
                tracing::error!(tick, error = %e, "periodic checkpoint failed");
            }
        }
        tick
    }

    /// Load an agent's persisted stack and start its top script
    ///
    /// An agent without a record starts with an empty stack. Dynamic entries
    /// are restored as placeholders and pruned before the top script starts.
    /// Any entry that cannot be rebuilt aborts the whole login. Returns the
    /// number of scripts on the restored stack.
    pub fn login(&self, agent: AgentId) -> Result<usize> {
        if self.is_loaded(agent) {
            return Err(RuntimeError::AgentAlreadyLoaded(agent.to_string()));
        }

        let snapshots = match self.records.load(&agent)? {
            Some(record) => {
                if record.agent != agent {
                    tracing::warn!(agent = %agent, recorded = %record.agent, "record names another agent");
                }
                record.scripts
            }
            None => Vec::new(),
        };

        let mut stack = self
            .registry
            .reconstruct_stack(&self.context, agent, &snapshots)?;
        let pruned = stack.prune_placeholders();
        let len = stack.len();

        if let Some(top) = stack.top() {
            top.start();
        }

        let mut agents = self.agents.lock();
        if agents.contains_key(&agent) {
            stack.stop_all();
            return Err(RuntimeError::AgentAlreadyLoaded(agent.to_string()));
        }
        agents.insert(agent, stack);

        tracing::info!(agent = %agent, scripts = len, pruned, "agent logged in");
        Ok(len)
    }

    /// Push `script` on top of the agent's stack and start it
    pub fn push_script<S: Script>(&self, agent: AgentId, script: S) -> Result<ScriptId> {
        if !self.is_loaded(agent) {
            return Err(RuntimeError::AgentNotLoaded(agent.to_string()));
        }
        let script = BotScript::new(self.script_context(agent), script);
        script.start();
        self.with_stack(agent, move |stack| stack.push(Box::new(script)))
    }

    /// Snapshot and persist one agent without unloading it
    pub fn save_agent(&self, agent: AgentId) -> Result<AgentRecord> {
        let scripts = {
            let agents = self.agents.lock();
            let stack = agents
                .get(&agent)
                .ok_or_else(|| RuntimeError::AgentNotLoaded(agent.to_string()))?;
            stack.snapshot()?
        };
        let record = AgentRecord::new(agent, self.current_tick(), scripts);
        self.records.save(&record)?;
        Ok(record)
    }

    /// Persist the agent's stack, stop its scripts and unload it
    ///
    /// The record is written before anything is stopped. When the snapshot
    /// or the write fails the agent stays loaded and untouched.
    pub fn logout(&self, agent: AgentId) -> Result<AgentRecord> {
        let record = self.save_agent(agent)?;

        let stack = self.agents.lock().remove(&agent);
        if let Some(stack) = stack {
            let stopped = stack.stop_all();
            tracing::info!(agent = %agent, scripts = stack.len(), stopped, "agent logged out");
        }
        Ok(record)
    }

    /// Persist every loaded agent. Returns how many records were written.
    ///
    /// Every agent is attempted; the first failure is returned after the rest
    /// have been saved.
    pub fn checkpoint(&self) -> Result<usize> {
        let tick = self.current_tick();
        let snapshots: Vec<_> = {
            let agents = self.agents.lock();
            agents
                .iter()
                .map(|(agent, stack)| (*agent, stack.snapshot()))
                .collect()
        };

        let mut saved = 0;
        let mut first_error = None;
        for (agent, scripts) in snapshots {
            let result = scripts
                .map_err(RuntimeError::from)
                .and_then(|scripts| {
                    self.records
                        .save(&AgentRecord::new(agent, tick, scripts))
                        .map_err(RuntimeError::from)
                });
            match result {
                Ok(()) => saved += 1,
                Err(e) => {
                    tracing::error!(agent = %agent, tick, error = %e, "agent checkpoint failed");
                    first_error.get_or_insert(e);
                }
            }
        }

        tracing::debug!(tick, saved, "checkpoint complete");
        match first_error {
            Some(e) => Err(e),
            None => Ok(saved),
        }
    }

    /// Run `f` against a loaded agent's stack
    pub fn with_stack<R>(&self, agent: AgentId, f: impl FnOnce(&mut ScriptStack) -> R) -> Result<R> {
        let mut agents = self.agents.lock();
        let stack = agents
            .get_mut(&agent)
            .ok_or_else(|| RuntimeError::AgentNotLoaded(agent.to_string()))?;
        Ok(f(stack))
    }

    /// Whether `agent` is loaded
    pub fn is_loaded(&self, agent: AgentId) -> bool {
        self.agents.lock().contains_key(&agent)
    }

    /// Loaded agents, sorted
    pub fn agents(&self) -> Vec<AgentId> {
        self.agents.lock().keys().copied().collect()
    }

    /// Checkpoint every agent, then cancel every script execution
    ///
    /// Agents stay loaded with interrupted scripts. Launches after shutdown
    /// are refused by the task scope.
    pub fn shutdown(&self) -> Result<()> {
        let saved = self.checkpoint();
        self.context.scope().shutdown();
        self.dispatcher().run_pending();
        tracing::info!(tick = self.current_tick(), "runtime shut down");
        saved.map(|_| ())
    }
}

// Re-export commonly used types
pub use driver::SimDriver;
pub use error::{RegistryError, Result, RuntimeError, ScriptError, StorageError};
pub use gate::GateOutcome;
pub use script::ScriptState;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scripts::idle::{IdleData, IdleScript};
    use tempfile::TempDir;

    fn runtime(dir: &TempDir) -> Runtime {
        let config = RuntimeConfig {
            root: dir.path().join("store"),
            checkpoint_interval: 0,
            ..RuntimeConfig::default()
        };
        let registry = ScriptRegistry::new();
        registry.register_default::<IdleScript>().unwrap();
        let runtime = Runtime::new(config, registry).unwrap();
        runtime.bind_current_thread();
        runtime
    }

    #[test]
    fn test_config_defaults() {
        let config = RuntimeConfig::default();
        assert_eq!(config.tick_duration(), Duration::from_millis(600));
        assert_eq!(config.checkpoint_interval, 100);

        let zero = RuntimeConfig {
            tick_millis: 0,
            ..RuntimeConfig::default()
        };
        assert_eq!(zero.tick_duration(), Duration::from_millis(1));
    }

    #[test]
    fn test_login_without_record_is_empty() {
        let dir = TempDir::new().unwrap();
        let runtime = runtime(&dir);
        let agent = AgentId::new();

        assert_eq!(runtime.login(agent).unwrap(), 0);
        assert!(runtime.is_loaded(agent));
        assert!(matches!(
            runtime.login(agent),
            Err(RuntimeError::AgentAlreadyLoaded(_))
        ));
    }

    #[test]
    fn test_logout_persists_remaining_ticks() {
        let dir = TempDir::new().unwrap();
        let runtime = runtime(&dir);
        let agent = AgentId::new();
        runtime.login(agent).unwrap();
        runtime.push_script(agent, IdleScript::new(10)).unwrap();

        for _ in 0..4 {
            runtime.tick();
        }

        let record = runtime.logout(agent).unwrap();
        assert!(!runtime.is_loaded(agent));
        assert_eq!(record.scripts.len(), 1);
        let data: IdleData =
            serde_json::from_value(record.scripts[0].data.clone().unwrap()).unwrap();
        assert_eq!(data.remaining, 6);

        let stored = runtime.records().load(&agent).unwrap().unwrap();
        assert_eq!(stored.scripts, record.scripts);
    }

    #[test]
    fn test_unknown_agent_operations_fail() {
        let dir = TempDir::new().unwrap();
        let runtime = runtime(&dir);
        let agent = AgentId::new();
        assert!(matches!(runtime.logout(agent), Err(RuntimeError::AgentNotLoaded(_))));
        assert!(matches!(
            runtime.push_script(agent, IdleScript::new(1)),
            Err(RuntimeError::AgentNotLoaded(_))
        ));
        assert!(runtime.with_stack(agent, |stack| stack.len()).is_err());
    }

    #[test]
    fn test_periodic_checkpoint() {
        let dir = TempDir::new().unwrap();
        let config = RuntimeConfig {
            root: dir.path().join("store"),
            checkpoint_interval: 3,
            ..RuntimeConfig::default()
        };
        let registry = ScriptRegistry::new();
        registry.register_default::<IdleScript>().unwrap();
        let runtime = Runtime::new(config, registry).unwrap();
        runtime.bind_current_thread();

        let agent = AgentId::new();
        runtime.login(agent).unwrap();
        runtime.push_script(agent, IdleScript::new(50)).unwrap();

        runtime.tick();
        runtime.tick();
        assert!(runtime.records().load(&agent).unwrap().is_none());

        runtime.tick();
        let record = runtime.records().load(&agent).unwrap().unwrap();
        assert_eq!(record.tick, 3);
    }

    #[test]
    fn test_shutdown_interrupts_scripts() {
        let dir = TempDir::new().unwrap();
        let runtime = runtime(&dir);
        let agent = AgentId::new();
        runtime.login(agent).unwrap();
        runtime.push_script(agent, IdleScript::new(50)).unwrap();

        runtime.shutdown().unwrap();
        let interrupted = runtime
            .with_stack(agent, |stack| stack.top().unwrap().is_interrupted())
            .unwrap();
        assert!(interrupted);
        assert!(runtime.records().load(&agent).unwrap().is_some());
    }
}
