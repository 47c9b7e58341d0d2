//! Integration tests for supervised isolation and suspension
//!
//! A script that errors or panics is interrupted on its own; the rest of
//! the simulation keeps ticking.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tempfile::TempDir;
use tickwork::runtime::GateOutcome;
use tickwork::runtime::registry::ScriptRegistry;
use tickwork::runtime::script::AnyScript;
use tickwork::scripts::IdleScript;
use tickwork::{AgentId, Runtime, RuntimeConfig, Script, ScriptContext, ScriptFuture};

struct Faulty;

impl Script for Faulty {
    const KIND: &'static str = "faulty";
    type Data = ();

    fn run(&self, ctx: ScriptContext) -> ScriptFuture {
        Box::pin(async move {
            ctx.delay(2).await;
            anyhow::bail!("lost track of the target")
        })
    }

    fn snapshot(&self) {}

    fn load(&mut self, _data: ()) {}
}

struct Panicky;

fn explode() {
    panic!("pathfinding blew up");
}

impl Script for Panicky {
    const KIND: &'static str = "panicky";
    type Data = ();

    fn run(&self, ctx: ScriptContext) -> ScriptFuture {
        Box::pin(async move {
            ctx.delay(1).await;
            explode();
            Ok(())
        })
    }

    fn snapshot(&self) {}

    fn load(&mut self, _data: ()) {}
}

/// Waits for a door to open, recording the outcome and the tick it resolved on
struct WaitForDoor {
    open: Arc<AtomicBool>,
    timeout: u64,
    satisfied: Arc<AtomicBool>,
    resolved_at: Arc<AtomicU64>,
}

impl Script for WaitForDoor {
    const KIND: &'static str = "wait-for-door";
    type Data = ();

    fn run(&self, ctx: ScriptContext) -> ScriptFuture {
        let open = self.open.clone();
        let timeout = self.timeout;
        let satisfied = self.satisfied.clone();
        let resolved_at = self.resolved_at.clone();
        Box::pin(async move {
            let outcome = ctx
                .wait_until(move || open.load(Ordering::SeqCst), timeout)
                .await;
            satisfied.store(outcome == GateOutcome::Satisfied, Ordering::SeqCst);
            resolved_at.store(ctx.current_tick(), Ordering::SeqCst);
            Ok(())
        })
    }

    fn snapshot(&self) {}

    fn load(&mut self, _data: ()) {}
}

fn runtime(temp: &TempDir) -> Runtime {
    let config = RuntimeConfig {
        root: temp.path().to_path_buf(),
        checkpoint_interval: 0,
        ..RuntimeConfig::default()
    };
    let registry = ScriptRegistry::new();
    registry.register_default::<IdleScript>().unwrap();
    let runtime = Runtime::new(config, registry).unwrap();
    runtime.bind_current_thread();
    runtime
}

fn top_is(runtime: &Runtime, agent: AgentId, check: fn(&dyn AnyScript) -> bool) -> bool {
    runtime
        .with_stack(agent, |stack| check(stack.top().unwrap()))
        .unwrap()
}

#[test]
fn test_failures_stay_with_their_agent() {
    let temp = TempDir::new().unwrap();
    let runtime = runtime(&temp);
    let healthy = AgentId::new();
    let failing = AgentId::new();
    let crashing = AgentId::new();

    for agent in [healthy, failing, crashing] {
        runtime.login(agent).unwrap();
    }
    runtime.push_script(healthy, IdleScript::new(5)).unwrap();
    runtime.push_script(failing, Faulty).unwrap();
    runtime.push_script(crashing, Panicky).unwrap();

    for _ in 0..3 {
        runtime.tick();
    }
    assert!(top_is(&runtime, failing, |s| s.is_interrupted()));
    assert!(top_is(&runtime, crashing, |s| s.is_interrupted()));
    assert!(top_is(&runtime, healthy, |s| s.is_running()));

    for _ in 0..2 {
        runtime.tick();
    }
    assert!(top_is(&runtime, healthy, |s| s.is_finished()));

    // A failed script can be started again.
    let restarted = runtime
        .with_stack(failing, |stack| stack.top().unwrap().start())
        .unwrap();
    assert!(restarted);
    assert!(top_is(&runtime, failing, |s| s.is_running()));
}

#[test]
fn test_gate_satisfied_before_timeout() {
    let temp = TempDir::new().unwrap();
    let runtime = runtime(&temp);
    let agent = AgentId::new();
    runtime.login(agent).unwrap();

    let open = Arc::new(AtomicBool::new(false));
    let satisfied = Arc::new(AtomicBool::new(false));
    let resolved_at = Arc::new(AtomicU64::new(0));
    runtime
        .push_script(
            agent,
            WaitForDoor {
                open: open.clone(),
                timeout: 10,
                satisfied: satisfied.clone(),
                resolved_at: resolved_at.clone(),
            },
        )
        .unwrap();

    runtime.tick();
    runtime.tick();
    open.store(true, Ordering::SeqCst);
    runtime.tick();

    assert!(top_is(&runtime, agent, |s| s.is_finished()));
    assert!(satisfied.load(Ordering::SeqCst));
    assert_eq!(resolved_at.load(Ordering::SeqCst), 3);
}

#[test]
fn test_gate_times_out_on_the_exact_tick() {
    let temp = TempDir::new().unwrap();
    let runtime = runtime(&temp);
    let agent = AgentId::new();
    runtime.login(agent).unwrap();

    let satisfied = Arc::new(AtomicBool::new(true));
    let resolved_at = Arc::new(AtomicU64::new(0));
    runtime
        .push_script(
            agent,
            WaitForDoor {
                open: Arc::new(AtomicBool::new(false)),
                timeout: 4,
                satisfied: satisfied.clone(),
                resolved_at: resolved_at.clone(),
            },
        )
        .unwrap();

    for _ in 0..3 {
        runtime.tick();
        assert!(top_is(&runtime, agent, |s| s.is_running()));
    }
    runtime.tick();

    assert!(top_is(&runtime, agent, |s| s.is_finished()));
    assert!(!satisfied.load(Ordering::SeqCst));
    assert_eq!(resolved_at.load(Ordering::SeqCst), 4);
}

#[test]
fn test_stop_interrupts_suspended_script() {
    let temp = TempDir::new().unwrap();
    let runtime = runtime(&temp);
    let agent = AgentId::new();
    runtime.login(agent).unwrap();
    runtime.push_script(agent, IdleScript::new(100)).unwrap();
    runtime.tick();

    let stopped = runtime
        .with_stack(agent, |stack| stack.top().unwrap().stop())
        .unwrap();
    assert!(stopped);
    runtime.tick();
    assert!(top_is(&runtime, agent, |s| s.is_interrupted()));
}
