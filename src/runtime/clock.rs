//! Tick clock interface and the in-process recurring scheduler
//!
//! The rest of the runtime only depends on [`TickClock`]; [`TickScheduler`]
//! is the implementation driven by [`Runtime::tick`](super::Runtime::tick).

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

/// Tick number since the clock was created
pub type Tick = u64;

/// Returned by a recurring callback to keep or drop its registration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickControl {
    /// Run again after the next interval
    Continue,
    /// Deregister
    Stop,
}

/// Callback invoked on the sim thread once per interval
pub type TickCallback = Box<dyn FnMut() -> TickControl + Send + 'static>;

/// Cancellable registration returned by [`TickClock::schedule_recurring`]
#[derive(Debug, Clone)]
pub struct TickHandle {
    cancelled: Arc<AtomicBool>,
}

impl TickHandle {
    fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Deregister the callback. It will not run again.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Whether the registration was cancelled
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Minimal contract the runtime needs from a fixed-quantum scheduler
pub trait TickClock: Send + Sync {
    /// Invoke `callback` every `interval_ticks` ticks, starting `interval_ticks`
    /// after registration.
    fn schedule_recurring(&self, interval_ticks: u64, callback: TickCallback) -> TickHandle;

    /// Number of ticks executed so far
    fn current_tick(&self) -> Tick;
}

struct Recurring {
    interval: u64,
    countdown: u64,
    callback: TickCallback,
    handle: TickHandle,
}

/// Recurring-callback scheduler advanced explicitly with [`TickScheduler::tick`]
pub struct TickScheduler {
    tick: AtomicU64,
    entries: Mutex<Vec<Recurring>>,
}

impl TickScheduler {
    /// Create a scheduler at tick 0
    pub fn new() -> Self {
        Self {
            tick: AtomicU64::new(0),
            entries: Mutex::new(Vec::new()),
        }
    }

    /// Advance one tick and run every due callback. Returns the new tick number.
    ///
    /// Callbacks registered while this runs first become due on a later tick.
    /// A callback that panics is deregistered; the others keep their slots.
    pub fn tick(&self) -> Tick {
        let now = self.tick.fetch_add(1, Ordering::AcqRel) + 1;

        // Run without holding the lock so callbacks can register more callbacks.
        let mut running = std::mem::take(&mut *self.entries.lock());
        running.retain_mut(|entry| {
            if entry.handle.is_cancelled() {
                return false;
            }
            entry.countdown -= 1;
            if entry.countdown > 0 {
                return true;
            }
            entry.countdown = entry.interval;
            match panic::catch_unwind(AssertUnwindSafe(&mut entry.callback)) {
                Ok(TickControl::Continue) => !entry.handle.is_cancelled(),
                Ok(TickControl::Stop) => {
                    entry.handle.cancel();
                    false
                }
                Err(_) => {
                    tracing::error!(tick = now, "tick callback panicked; deregistered");
                    entry.handle.cancel();
                    false
                }
            }
        });

        let mut entries = self.entries.lock();
        let added = std::mem::replace(&mut *entries, running);
        entries.extend(added);
        now
    }

    /// Number of live registrations
    pub fn registered(&self) -> usize {
        self.entries
            .lock()
            .iter()
            .filter(|entry| !entry.handle.is_cancelled())
            .count()
    }
}

impl Default for TickScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl TickClock for TickScheduler {
    fn schedule_recurring(&self, interval_ticks: u64, callback: TickCallback) -> TickHandle {
        let interval = interval_ticks.max(1);
        let handle = TickHandle::new();
        self.entries.lock().push(Recurring {
            interval,
            countdown: interval,
            callback,
            handle: handle.clone(),
        });
        handle
    }

    fn current_tick(&self) -> Tick {
        self.tick.load(Ordering::Acquire)
    }
}

/// Convert a wall-clock duration into whole ticks, rounding up.
///
/// A non-zero duration is never shorter than one tick.
pub fn ticks_for(duration: Duration, quantum: Duration) -> u64 {
    let quantum = quantum.as_nanos().max(1);
    let nanos = duration.as_nanos();
    let ticks = nanos.div_ceil(quantum);
    u64::try_from(ticks).unwrap_or(u64::MAX)
}
