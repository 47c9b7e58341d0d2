//! Execution contexts handed to scripts
//!
//! [`RuntimeContext`] replaces any process-wide state: it is built once by
//! the [`Runtime`](super::Runtime) and cloned into every script.

use std::sync::Arc;
use std::time::Duration;

use super::agent::AgentId;
use super::clock::{self, Tick, TickClock};
use super::dispatch::Dispatcher;
use super::gate::{self, Delay, GateWait};
use super::scope::TaskScope;

/// Clock, dispatcher and task scope shared by every script
#[derive(Clone)]
pub struct RuntimeContext {
    clock: Arc<dyn TickClock>,
    dispatcher: Dispatcher,
    scope: TaskScope,
    quantum: Duration,
}

impl RuntimeContext {
    /// Bundle the runtime collaborators. `quantum` is the wall-clock length of a tick.
    pub fn new(clock: Arc<dyn TickClock>, scope: TaskScope, quantum: Duration) -> Self {
        Self {
            clock,
            dispatcher: scope.dispatcher().clone(),
            scope,
            quantum,
        }
    }

    /// Tick clock
    pub fn clock(&self) -> &dyn TickClock {
        self.clock.as_ref()
    }

    /// Dispatcher onto the sim thread
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Task scope owning script executions
    pub fn scope(&self) -> &TaskScope {
        &self.scope
    }

    /// Wall-clock length of one tick
    pub fn quantum(&self) -> Duration {
        self.quantum
    }

    /// Context for a script bound to `agent`
    pub fn for_agent(&self, agent: AgentId) -> ScriptContext {
        ScriptContext {
            runtime: self.clone(),
            agent,
        }
    }
}

/// What a running script can reach: its agent and the runtime collaborators
#[derive(Clone)]
pub struct ScriptContext {
    runtime: RuntimeContext,
    agent: AgentId,
}

impl ScriptContext {
    /// Agent owning the script
    pub fn agent(&self) -> AgentId {
        self.agent
    }

    /// Shared runtime context
    pub fn runtime(&self) -> &RuntimeContext {
        &self.runtime
    }

    /// Current tick number
    pub fn current_tick(&self) -> Tick {
        self.runtime.clock.current_tick()
    }

    /// Convert a wall-clock duration into ticks
    pub fn ticks_for(&self, duration: Duration) -> u64 {
        clock::ticks_for(duration, self.runtime.quantum)
    }

    /// Suspend for `ticks` ticks
    pub fn delay(&self, ticks: u64) -> Delay {
        gate::delay(self.runtime.clock(), ticks)
    }

    /// Suspend until `cond` holds or `timeout_ticks` pass
    pub fn wait_until<F>(&self, cond: F, timeout_ticks: u64) -> GateWait
    where
        F: FnMut() -> bool + Send + 'static,
    {
        gate::wait_until(self.runtime.clock(), cond, timeout_ticks)
    }

    /// Like [`wait_until`](Self::wait_until) with a wall-clock timeout,
    /// converted to ticks now.
    pub fn wait_until_for<F>(&self, cond: F, timeout: Duration) -> GateWait
    where
        F: FnMut() -> bool + Send + 'static,
    {
        self.wait_until(cond, self.ticks_for(timeout))
    }
}
