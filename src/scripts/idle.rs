//! Idle: a bot lingers in place for a number of ticks
//!
//! The snapshot persists the remaining ticks, never below one, so a
//! resumed idle never schedules zero or negative work.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::runtime::context::ScriptContext;
use crate::runtime::script::{Script, ScriptFuture};

/// Persisted idle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdleData {
    /// Ticks left to idle
    pub remaining: u64,
}

/// Ticks left out of `total` after `elapsed`, clamped to at least one
pub fn remaining_ticks(total: u64, elapsed: u64) -> u64 {
    total.saturating_sub(elapsed).max(1)
}

/// Idles for a fixed number of ticks
#[derive(Debug)]
pub struct IdleScript {
    duration: u64,
    elapsed: Arc<AtomicU64>,
}

impl IdleScript {
    /// Idle for `duration` ticks
    pub fn new(duration: u64) -> Self {
        Self {
            duration: duration.max(1),
            elapsed: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Total ticks of the current run
    pub fn duration(&self) -> u64 {
        self.duration
    }

    /// Ticks already spent idling
    pub fn elapsed(&self) -> u64 {
        self.elapsed.load(Ordering::Acquire)
    }

    /// Ticks left, at least one
    pub fn remaining(&self) -> u64 {
        remaining_ticks(self.duration, self.elapsed())
    }
}

impl Default for IdleScript {
    fn default() -> Self {
        Self::new(1)
    }
}

impl Script for IdleScript {
    const KIND: &'static str = "idle";
    type Data = IdleData;

    fn run(&self, ctx: ScriptContext) -> ScriptFuture {
        let duration = self.duration;
        let elapsed = self.elapsed.clone();
        Box::pin(async move {
            while elapsed.load(Ordering::Acquire) < duration {
                ctx.delay(1).await;
                elapsed.fetch_add(1, Ordering::AcqRel);
            }
            tracing::debug!(agent = %ctx.agent(), ticks = duration, "idle finished");
            Ok(())
        })
    }

    fn snapshot(&self) -> IdleData {
        IdleData {
            remaining: self.remaining(),
        }
    }

    fn load(&mut self, data: IdleData) {
        self.duration = data.remaining.max(1);
        self.elapsed.store(0, Ordering::Release);
    }
}
