//! Suspension gates: wait for a condition or a tick timeout
//!
//! A gate registers a per-tick check with the [`TickClock`]. Each tick the
//! condition is evaluated first, then the timeout, so a condition that turns
//! true on the timeout tick still counts as satisfied. The outcome lands in a
//! [`ResultCell`] that accepts exactly one write.

use std::any::Any;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::task::{Context, Poll};

use futures::task::AtomicWaker;
use parking_lot::Mutex;

use super::clock::{TickClock, TickControl};
use super::error::{ScriptError, ScriptResult};

/// How a gate resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateOutcome {
    /// The condition held
    Satisfied,
    /// The timeout elapsed first
    TimedOut,
}

impl GateOutcome {
    /// Whether the condition held
    pub fn is_satisfied(self) -> bool {
        self == GateOutcome::Satisfied
    }

    /// Whether the gate timed out
    pub fn is_timed_out(self) -> bool {
        self == GateOutcome::TimedOut
    }
}

const OPEN: u8 = 0;
const DELIVERED: u8 = 1;
const DISCARDED: u8 = 2;

/// Single-producer, single-consumer slot written at most once.
///
/// Later writes are ignored, and so is a write after the consumer discarded
/// the slot.
pub struct ResultCell<T> {
    state: AtomicU8,
    value: Mutex<Option<T>>,
    waker: AtomicWaker,
}

impl<T> ResultCell<T> {
    /// Create an open cell
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(OPEN),
            value: Mutex::new(None),
            waker: AtomicWaker::new(),
        }
    }

    /// Store `value` if nothing was stored or discarded yet. Returns whether it won.
    pub fn deliver(&self, value: T) -> bool {
        {
            let mut slot = self.value.lock();
            if self
                .state
                .compare_exchange(OPEN, DELIVERED, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                return false;
            }
            *slot = Some(value);
        }
        self.waker.wake();
        true
    }

    /// Close the cell from the consumer side. Returns whether it was still open.
    pub fn discard(&self) -> bool {
        self.state
            .compare_exchange(OPEN, DISCARDED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Whether a value was delivered or the consumer went away
    pub fn is_closed(&self) -> bool {
        self.state.load(Ordering::Acquire) != OPEN
    }

    /// Whether a value was delivered
    pub fn is_delivered(&self) -> bool {
        self.state.load(Ordering::Acquire) == DELIVERED
    }

    /// Take the delivered value, registering `cx` for wakeup while open.
    ///
    /// Resolves to `None` once the cell was discarded or the value was taken.
    pub fn poll_take(&self, cx: &mut Context<'_>) -> Poll<Option<T>> {
        self.waker.register(cx.waker());
        // The state only moves to DELIVERED while the value lock is held.
        let mut slot = self.value.lock();
        match self.state.load(Ordering::Acquire) {
            OPEN => Poll::Pending,
            _ => Poll::Ready(slot.take()),
        }
    }
}

impl<T> Default for ResultCell<T> {
    fn default() -> Self {
        Self::new()
    }
}

enum Resolution {
    Outcome(GateOutcome),
    Panicked(Box<dyn Any + Send>),
}

/// Condition evaluated once per tick on the sim thread
pub type Condition = Box<dyn FnMut() -> bool + Send + 'static>;

/// One-shot wait on a condition with a tick timeout
pub struct SuspensionGate {
    cond: Mutex<Option<Condition>>,
    submitted: AtomicBool,
}

impl SuspensionGate {
    /// Create a gate around `cond`
    pub fn new<F>(cond: F) -> Self
    where
        F: FnMut() -> bool + Send + 'static,
    {
        Self {
            cond: Mutex::new(Some(Box::new(cond))),
            submitted: AtomicBool::new(false),
        }
    }

    /// Whether [`submit`](Self::submit) was already called
    pub fn is_submitted(&self) -> bool {
        self.submitted.load(Ordering::Acquire)
    }

    /// Start checking once per tick, beginning with the next tick.
    ///
    /// Resolves to [`GateOutcome::TimedOut`] on the `timeout_ticks`-th check
    /// unless the condition held first. Fails if the gate was already submitted.
    pub fn submit(&self, clock: &dyn TickClock, timeout_ticks: u64) -> ScriptResult<GateWait> {
        if self.submitted.swap(true, Ordering::AcqRel) {
            return Err(ScriptError::GateAlreadySubmitted);
        }
        let Some(mut cond) = self.cond.lock().take() else {
            return Err(ScriptError::GateAlreadySubmitted);
        };

        let cell = Arc::new(ResultCell::new());
        let slot = cell.clone();
        let mut elapsed: u64 = 0;
        clock.schedule_recurring(
            1,
            Box::new(move || {
                if slot.is_closed() {
                    return TickControl::Stop;
                }
                elapsed += 1;
                match std::panic::catch_unwind(std::panic::AssertUnwindSafe(&mut cond)) {
                    Ok(true) => {
                        slot.deliver(Resolution::Outcome(GateOutcome::Satisfied));
                        TickControl::Stop
                    }
                    Ok(false) if elapsed >= timeout_ticks => {
                        slot.deliver(Resolution::Outcome(GateOutcome::TimedOut));
                        TickControl::Stop
                    }
                    Ok(false) => TickControl::Continue,
                    Err(payload) => {
                        // Re-raised inside the waiting task so its scope records the failure.
                        slot.deliver(Resolution::Panicked(payload));
                        TickControl::Stop
                    }
                }
            }),
        );

        Ok(GateWait { cell })
    }
}

/// Pending outcome of a submitted [`SuspensionGate`]
///
/// Dropping it closes the result slot; the per-tick check notices and
/// deregisters on its next run.
#[must_use = "a gate does nothing unless awaited"]
pub struct GateWait {
    cell: Arc<ResultCell<Resolution>>,
}

impl GateWait {
    /// Whether the gate has resolved
    pub fn is_resolved(&self) -> bool {
        self.cell.is_delivered()
    }
}

impl Future for GateWait {
    type Output = GateOutcome;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<GateOutcome> {
        match self.cell.poll_take(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Some(Resolution::Outcome(outcome))) => Poll::Ready(outcome),
            Poll::Ready(Some(Resolution::Panicked(payload))) => std::panic::resume_unwind(payload),
            // Polled again after resolving.
            Poll::Ready(None) => Poll::Ready(GateOutcome::TimedOut),
        }
    }
}

impl Drop for GateWait {
    fn drop(&mut self) {
        self.cell.discard();
    }
}

/// Wait until `cond` holds or `timeout_ticks` ticks pass
pub fn wait_until<F>(clock: &dyn TickClock, cond: F, timeout_ticks: u64) -> GateWait
where
    F: FnMut() -> bool + Send + 'static,
{
    match SuspensionGate::new(cond).submit(clock, timeout_ticks) {
        Ok(wait) => wait,
        Err(_) => unreachable!("fresh gate cannot be submitted twice"),
    }
}

/// Pure tick delay
#[must_use = "a delay does nothing unless awaited"]
pub struct Delay {
    wait: Option<GateWait>,
}

/// Suspend for `ticks` ticks. Zero ticks resolves immediately.
pub fn delay(clock: &dyn TickClock, ticks: u64) -> Delay {
    let wait = (ticks > 0).then(|| wait_until(clock, || false, ticks));
    Delay { wait }
}

impl Future for Delay {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        match self.wait.as_mut() {
            None => Poll::Ready(()),
            Some(wait) => Pin::new(wait).poll(cx).map(|_| ()),
        }
    }
}
