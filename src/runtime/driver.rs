//! Dedicated sim thread driving a runtime in real time
//!
//! The driver owns one OS thread running a current-thread tokio runtime.
//! It binds that thread as the sim thread, ticks the [`Runtime`] once per
//! tick quantum and drains queued work as soon as it arrives. Other threads
//! reach the simulation through [`SimDriver::run_on_sim`].

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tokio::sync::oneshot;
use tokio::time::{self, Instant, MissedTickBehavior};

use super::Runtime;
use super::error::{Result, RuntimeError};

/// Owns the sim thread of a runtime
pub struct SimDriver {
    runtime: Arc<Runtime>,
    stop_tx: Option<oneshot::Sender<()>>,
    thread: Option<JoinHandle<Result<()>>>,
}

impl SimDriver {
    /// Spawn the sim thread and wait until it is bound
    ///
    /// Must not be called from inside an async context.
    pub fn spawn(runtime: Arc<Runtime>) -> Result<Self> {
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        let (ready_tx, ready_rx) = oneshot::channel::<()>();
        let sim = runtime.clone();

        let thread = thread::Builder::new()
            .name("tickwork-sim".to_string())
            .spawn(move || -> Result<()> {
                let rt = tokio::runtime::Builder::new_current_thread()
                    .enable_time()
                    .build()
                    .map_err(|e| RuntimeError::SimThread(e.to_string()))?;

                sim.bind_current_thread();
                let _ = ready_tx.send(());

                let quantum = sim.config().tick_duration();
                rt.block_on(async {
                    let mut interval = time::interval_at(Instant::now() + quantum, quantum);
                    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                    loop {
                        tokio::select! {
                            _ = &mut stop_rx => break,
                            _ = interval.tick() => {
                                sim.tick();
                            }
                            _ = sim.dispatcher().work_available() => {
                                sim.dispatcher().run_pending();
                            }
                        }
                    }
                });

                sim.shutdown()
            })
            .map_err(|e| RuntimeError::SimThread(e.to_string()))?;

        ready_rx
            .blocking_recv()
            .map_err(|_| RuntimeError::SimThread("sim thread exited during startup".to_string()))?;
        tracing::info!(quantum = ?runtime.config().tick_duration(), "sim driver started");

        Ok(Self {
            runtime,
            stop_tx: Some(stop_tx),
            thread: Some(thread),
        })
    }

    /// Driven runtime
    pub fn runtime(&self) -> &Arc<Runtime> {
        &self.runtime
    }

    /// Whether the sim thread is still running
    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|thread| !thread.is_finished())
    }

    /// Run `f` on the sim thread and wait for its result
    ///
    /// Runs inline when called from the sim thread itself.
    pub fn run_on_sim<R, F>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&Runtime) -> R + Send + 'static,
        R: Send + 'static,
    {
        if self.runtime.dispatcher().is_sim_thread() {
            return Ok(f(&self.runtime));
        }
        if !self.is_running() {
            return Err(RuntimeError::SimThread("sim thread is not running".to_string()));
        }

        let (tx, rx) = oneshot::channel();
        let runtime = self.runtime.clone();
        self.runtime.dispatcher().dispatch(move || {
            let _ = tx.send(f(&runtime));
        });
        rx.blocking_recv()
            .map_err(|_| RuntimeError::SimThread("sim thread dropped the request".to_string()))
    }

    /// Stop the sim thread. The runtime checkpoints and shuts down first.
    pub fn stop(mut self) -> Result<()> {
        self.halt()
    }

    fn halt(&mut self) -> Result<()> {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        match self.thread.take() {
            Some(thread) => {
                let result = thread
                    .join()
                    .map_err(|_| RuntimeError::SimThread("sim thread panicked".to_string()))?;
                tracing::info!(tick = self.runtime.current_tick(), "sim driver stopped");
                result
            }
            None => Ok(()),
        }
    }
}

impl Drop for SimDriver {
    fn drop(&mut self) {
        if let Err(e) = self.halt() {
            tracing::warn!(error = %e, "sim driver stopped with an error");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::RuntimeConfig;
    use crate::runtime::agent::AgentId;
    use crate::runtime::registry::ScriptRegistry;
    use crate::scripts::idle::IdleScript;
    use std::time::Duration;
    use tempfile::TempDir;

    fn driver(dir: &TempDir) -> SimDriver {
        let config = RuntimeConfig {
            root: dir.path().join("store"),
            tick_millis: 5,
            checkpoint_interval: 0,
            debug: false,
        };
        let registry = ScriptRegistry::new();
        registry.register_default::<IdleScript>().unwrap();
        let runtime = Arc::new(Runtime::new(config, registry).unwrap());
        SimDriver::spawn(runtime).unwrap()
    }

    #[test]
    fn test_run_on_sim_reaches_sim_thread() {
        let dir = TempDir::new().unwrap();
        let driver = driver(&dir);
        let on_sim = driver
            .run_on_sim(|runtime| runtime.dispatcher().is_sim_thread())
            .unwrap();
        assert!(on_sim);
        assert!(!driver.runtime().dispatcher().is_sim_thread());
        driver.stop().unwrap();
    }

    #[test]
    fn test_ticks_advance_in_real_time() {
        let dir = TempDir::new().unwrap();
        let driver = driver(&dir);
        let agent = AgentId::new();
        driver
            .run_on_sim(move |runtime| {
                runtime.login(agent)?;
                runtime.push_script(agent, IdleScript::new(3))
            })
            .unwrap()
            .unwrap();

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        loop {
            let finished = driver
                .run_on_sim(move |runtime| {
                    runtime
                        .with_stack(agent, |stack| stack.top().is_some_and(|s| s.is_finished()))
                        .unwrap_or(false)
                })
                .unwrap();
            if finished {
                break;
            }
            assert!(std::time::Instant::now() < deadline, "idle never finished");
            thread::sleep(Duration::from_millis(5));
        }
        assert!(driver.runtime().current_tick() >= 3);
        driver.stop().unwrap();
    }

    #[test]
    fn test_run_on_sim_after_stop_fails() {
        let dir = TempDir::new().unwrap();
        let mut driver = driver(&dir);
        driver.halt().unwrap();
        assert!(!driver.is_running());
        assert!(matches!(
            driver.run_on_sim(|runtime| runtime.current_tick()),
            Err(RuntimeError::SimThread(_))
        ));
    }
}
