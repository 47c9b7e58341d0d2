//! Supervised task scope for script executions
//!
//! Every script execution is a task owned by the [`TaskScope`]. Tasks are
//! polled only on the sim thread: their wakers re-enter through the
//! [`Dispatcher`], whichever thread fired them. A task that fails or panics
//! is logged and retired without touching its siblings; only
//! [`TaskScope::shutdown`] cancels everything.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};

use futures::future::BoxFuture;
use futures::task::{self as futures_task, ArcWake};
use parking_lot::Mutex;

use super::dispatch::Dispatcher;

/// Body of a task
pub type TaskFuture = BoxFuture<'static, anyhow::Result<()>>;

/// Task identifier, unique within a scope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

/// Execution state of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Not yet terminated
    Active,
    /// Body returned `Ok`
    Completed,
    /// Body returned an error or panicked
    Failed,
    /// Cancelled by its handle or by scope shutdown
    Cancelled,
}

impl TaskState {
    /// Whether the task has terminated
    pub fn is_terminal(self) -> bool {
        !matches!(self, TaskState::Active)
    }
}

struct TaskCell {
    id: TaskId,
    name: String,
    state: Mutex<TaskState>,
    future: Mutex<Option<TaskFuture>>,
    scheduled: AtomicBool,
    scope: Weak<ScopeInner>,
}

impl TaskCell {
    fn state(&self) -> TaskState {
        *self.state.lock()
    }

    /// Move out of `Active`. Returns false if the task had already terminated.
    fn terminate(&self, to: TaskState) -> bool {
        let mut state = self.state.lock();
        if *state == TaskState::Active {
            *state = to;
            true
        } else {
            false
        }
    }

    fn run(self: &Arc<Self>) {
        let Some(mut slot) = self.future.try_lock() else {
            // Woken from inside its own poll; go again once that poll unwinds.
            if let Some(scope) = self.scope.upgrade() {
                let cell = self.clone();
                scope.dispatcher.defer(move || cell.run());
            }
            return;
        };
        self.scheduled.store(false, Ordering::Release);

        if self.state().is_terminal() {
            let future = slot.take();
            drop(slot);
            drop(future);
            self.retire();
            return;
        }

        let Some(future) = slot.as_mut() else {
            return;
        };

        let waker = futures_task::waker(self.clone());
        let mut cx = Context::from_waker(&waker);
        let polled = panic::catch_unwind(AssertUnwindSafe(|| future.as_mut().poll(&mut cx)));

        let outcome = match polled {
            Ok(Poll::Pending) => {
                if !self.state().is_terminal() {
                    return;
                }
                // Cancelled while it was running.
                None
            }
            Ok(Poll::Ready(Ok(()))) => Some(TaskState::Completed),
            Ok(Poll::Ready(Err(err))) => {
                tracing::error!(task = %self.name, id = %self.id, error = %format!("{err:#}"), "task failed");
                Some(TaskState::Failed)
            }
            Err(payload) => {
                tracing::error!(task = %self.name, id = %self.id, panic = %panic_message(&*payload), "task panicked");
                Some(TaskState::Failed)
            }
        };

        let future = slot.take();
        drop(slot);
        drop(future);

        if let Some(outcome) = outcome {
            if self.terminate(outcome) {
                tracing::debug!(task = %self.name, id = %self.id, state = ?outcome, "task finished");
            }
        }
        self.retire();
    }

    /// Drop the body of a cancelled task unless it is currently being polled.
    fn discard(self: &Arc<Self>) {
        if let Some(mut slot) = self.future.try_lock() {
            let future = slot.take();
            drop(slot);
            drop(future);
            self.retire();
        }
    }

    fn retire(&self) {
        if let Some(scope) = self.scope.upgrade() {
            scope.tasks.lock().remove(&self.id);
        }
    }
}

impl ArcWake for TaskCell {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        if arc_self.scheduled.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(scope) = arc_self.scope.upgrade() {
            let cell = arc_self.clone();
            scope.dispatcher.dispatch(move || cell.run());
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Handle to a launched task
#[derive(Clone)]
pub struct TaskHandle {
    cell: Arc<TaskCell>,
}

impl TaskHandle {
    /// Task identifier
    pub fn id(&self) -> TaskId {
        self.cell.id
    }

    /// Task name used in logs
    pub fn name(&self) -> &str {
        &self.cell.name
    }

    /// Current state
    pub fn state(&self) -> TaskState {
        self.cell.state()
    }

    /// Still running (possibly suspended)
    pub fn is_active(&self) -> bool {
        self.state() == TaskState::Active
    }

    /// Ran to completion
    pub fn is_completed(&self) -> bool {
        self.state() == TaskState::Completed
    }

    /// Cancelled or terminated abnormally
    pub fn is_cancelled(&self) -> bool {
        matches!(self.state(), TaskState::Cancelled | TaskState::Failed)
    }

    /// Terminated by an error or panic
    pub fn is_failed(&self) -> bool {
        self.state() == TaskState::Failed
    }

    /// Request cooperative cancellation. Returns whether the task was active.
    ///
    /// The body is dropped on the sim thread at its current suspension point.
    pub fn cancel(&self) -> bool {
        if !self.cell.terminate(TaskState::Cancelled) {
            return false;
        }
        tracing::debug!(task = %self.cell.name, id = %self.cell.id, "task cancelled");
        match self.cell.scope.upgrade() {
            Some(scope) => {
                let cell = self.cell.clone();
                scope.dispatcher.dispatch(move || cell.discard());
            }
            None => self.cell.discard(),
        }
        true
    }
}

impl fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.cell.id)
            .field("name", &self.cell.name)
            .field("state", &self.state())
            .finish()
    }
}

struct ScopeInner {
    dispatcher: Dispatcher,
    tasks: Mutex<HashMap<TaskId, Arc<TaskCell>>>,
    next_id: AtomicU64,
    shut_down: AtomicBool,
}

/// Supervising owner of every running script task
#[derive(Clone)]
pub struct TaskScope {
    inner: Arc<ScopeInner>,
}

impl TaskScope {
    /// Create a scope whose tasks run on `dispatcher`'s sim thread
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self {
            inner: Arc::new(ScopeInner {
                dispatcher,
                tasks: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                shut_down: AtomicBool::new(false),
            }),
        }
    }

    /// Dispatcher used to resume tasks
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.inner.dispatcher
    }

    /// Start a task tied to this scope's lifetime.
    ///
    /// On the sim thread the body runs inline up to its first suspension
    /// point before this returns. After [`shutdown`](Self::shutdown) the
    /// returned handle is already cancelled.
    pub fn launch<F>(&self, name: impl Into<String>, body: F) -> TaskHandle
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let id = TaskId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let cell = Arc::new(TaskCell {
            id,
            name: name.into(),
            state: Mutex::new(TaskState::Active),
            future: Mutex::new(Some(Box::pin(body))),
            scheduled: AtomicBool::new(true),
            scope: Arc::downgrade(&self.inner),
        });

        {
            let mut tasks = self.inner.tasks.lock();
            if self.inner.shut_down.load(Ordering::Acquire) {
                drop(tasks);
                tracing::warn!(task = %cell.name, "launch after scope shutdown");
                cell.terminate(TaskState::Cancelled);
                cell.future.lock().take();
                return TaskHandle { cell };
            }
            tasks.insert(id, cell.clone());
        }

        tracing::debug!(task = %cell.name, id = %id, "task launched");
        let first = cell.clone();
        self.inner.dispatcher.dispatch(move || first.run());
        TaskHandle { cell }
    }

    /// Cancel every task and refuse new ones
    pub fn shutdown(&self) {
        let tasks: Vec<Arc<TaskCell>> = {
            let tasks = self.inner.tasks.lock();
            self.inner.shut_down.store(true, Ordering::Release);
            tasks.values().cloned().collect()
        };
        tracing::debug!(tasks = tasks.len(), "task scope shutting down");
        for cell in tasks {
            TaskHandle { cell }.cancel();
        }
    }

    /// Whether [`shutdown`](Self::shutdown) was called
    pub fn is_shut_down(&self) -> bool {
        self.inner.shut_down.load(Ordering::Acquire)
    }

    /// Number of tasks that have not terminated
    pub fn active_count(&self) -> usize {
        self.inner
            .tasks
            .lock()
            .values()
            .filter(|cell| cell.state() == TaskState::Active)
            .count()
    }
}
