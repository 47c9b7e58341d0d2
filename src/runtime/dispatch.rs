//! Cooperative dispatcher onto the sim thread
//!
//! Work submitted from the sim thread runs inline. Work submitted from any
//! other thread is queued and runs the next time the sim thread drains the
//! queue, so every simulation mutation has a single writer.

use std::sync::Arc;
use std::thread::{self, ThreadId};

use parking_lot::{Mutex, RwLock};
use tokio::sync::Notify;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// Unit of work routed onto the sim thread
pub type Work = Box<dyn FnOnce() + Send + 'static>;

struct DispatcherInner {
    sim_thread: RwLock<Option<ThreadId>>,
    tx: UnboundedSender<Work>,
    rx: Mutex<UnboundedReceiver<Work>>,
    notify: Notify,
}

/// Routes work onto the sim thread
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

impl Dispatcher {
    /// Create an unbound dispatcher. Until a sim thread is bound, all work is queued.
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(DispatcherInner {
                sim_thread: RwLock::new(None),
                tx,
                rx: Mutex::new(rx),
                notify: Notify::new(),
            }),
        }
    }

    /// Make the calling thread the sim thread
    pub fn bind_current_thread(&self) {
        let id = thread::current().id();
        *self.inner.sim_thread.write() = Some(id);
        tracing::debug!(thread = ?id, "sim thread bound");
    }

    /// Whether the caller is running on the sim thread
    pub fn is_sim_thread(&self) -> bool {
        *self.inner.sim_thread.read() == Some(thread::current().id())
    }

    /// Run `work` inline when already on the sim thread, otherwise queue it.
    pub fn dispatch<F>(&self, work: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.is_sim_thread() {
            work();
        } else {
            self.defer(work);
        }
    }

    /// Always queue `work`, even from the sim thread.
    pub fn defer<F>(&self, work: F)
    where
        F: FnOnce() + Send + 'static,
    {
        // The receiver lives as long as the sender, so this cannot fail.
        let _ = self.inner.tx.send(Box::new(work));
        self.inner.notify.notify_one();
    }

    /// Resolves once work was queued since the last wakeup
    pub async fn work_available(&self) {
        self.inner.notify.notified().await;
    }

    /// Drain the queue on the sim thread. Returns the number of work items run.
    ///
    /// Only work queued before the call runs; work it queues in turn waits
    /// for the next drain.
    pub fn run_pending(&self) -> usize {
        debug_assert!(
            self.inner.sim_thread.read().is_none() || self.is_sim_thread(),
            "run_pending called off the sim thread"
        );
        let budget = self.pending();
        let mut ran = 0;
        while ran < budget {
            // Release the receiver lock before running the work item.
            let next = self.inner.rx.lock().try_recv();
            match next {
                Ok(work) => {
                    work();
                    ran += 1;
                }
                Err(_) => break,
            }
        }
        ran
    }

    /// Number of queued work items
    pub fn pending(&self) -> usize {
        self.inner.rx.lock().len()
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}
