//! Single-writer control queue
//!
//! A [`TaskQueue`] owns one worker thread that runs posted closures in FIFO order.
//! [`TaskQueue::dispatch`] runs the closure inline when the caller is already executing
//! on that worker, and enqueues it otherwise. This gives every piece of state owned by
//! the queue a single writer and a total order of mutations. It is **not** a general
//! reentrant lock: a closure running on queue A that dispatches to queue B is always
//! posted, and code running elsewhere never executes inline.

use crate::error::{CoreError, CoreResult};
use std::cell::Cell;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

type Job = Box<dyn FnOnce() + Send + 'static>;

static NEXT_QUEUE_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static CURRENT_QUEUE: Cell<u64> = const { Cell::new(0) };
}

/// Handle to a serial execution context
///
/// Cloning is cheap; all clones feed the same worker. The worker exits once every
/// handle has been dropped and the remaining backlog has run.
#[derive(Clone)]
pub struct TaskQueue {
    inner: Arc<QueueInner>,
}

struct QueueInner {
    id: u64,
    name: String,
    tx: mpsc::UnboundedSender<Job>,
}

impl TaskQueue {
    /// Create a queue backed by a new named worker thread
    pub fn new(name: impl Into<String>) -> CoreResult<Self> {
        let name = name.into();
        let id = NEXT_QUEUE_ID.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel::<Job>();

        let thread_name = format!("{}-queue", name);
        let worker_name = name.clone();
        std::thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || run_worker(id, worker_name, rx))
            .map_err(|source| CoreError::Spawn {
                name: thread_name,
                source,
            })?;

        debug!("Created control queue {} (id {})", name, id);
        Ok(Self {
            inner: Arc::new(QueueInner { id, name, tx }),
        })
    }

    /// Queue name
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Whether the calling thread is this queue's worker
    pub fn is_current(&self) -> bool {
        CURRENT_QUEUE.with(|current| current.get() == self.inner.id)
    }

    /// Run `task` on the queue: inline if already on it, posted otherwise
    ///
    /// Posting is fire-and-forget. If the worker is gone the task is dropped and a
    /// warning is logged.
    pub fn dispatch<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.is_current() {
            task();
            return;
        }
        if let Err(e) = self.post(task) {
            warn!("Dropping task: {}", e);
        }
    }

    /// Always enqueue `task`, even when called from the worker itself
    pub fn post<F>(&self, task: F) -> CoreResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.inner
            .tx
            .send(Box::new(task))
            .map_err(|_| CoreError::QueueClosed {
                queue: self.inner.name.clone(),
            })
    }

    /// Block until every task posted before this call has run
    ///
    /// Returns immediately when called on the queue itself. Must not be called from
    /// inside an async runtime; use [`TaskQueue::flushed`] there.
    pub fn flush(&self) -> CoreResult<()> {
        if self.is_current() {
            return Ok(());
        }
        let (done_tx, done_rx) = oneshot::channel();
        self.post(move || {
            let _ = done_tx.send(());
        })?;
        done_rx.blocking_recv().map_err(|_| CoreError::QueueClosed {
            queue: self.inner.name.clone(),
        })
    }

    /// Async variant of [`TaskQueue::flush`]
    pub async fn flushed(&self) -> CoreResult<()> {
        if self.is_current() {
            return Ok(());
        }
        let (done_tx, done_rx) = oneshot::channel();
        self.post(move || {
            let _ = done_tx.send(());
        })?;
        done_rx.await.map_err(|_| CoreError::QueueClosed {
            queue: self.inner.name.clone(),
        })
    }
}

impl std::fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskQueue")
            .field("name", &self.inner.name)
            .field("id", &self.inner.id)
            .finish()
    }
}

fn run_worker(id: u64, name: String, mut rx: mpsc::UnboundedReceiver<Job>) {
    CURRENT_QUEUE.with(|current| current.set(id));
    while let Some(job) = rx.blocking_recv() {
        // A panicking task must not take the queue (and every source on it) down.
        if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
            warn!("Task panicked on control queue {}", name);
        }
    }
    debug!("Control queue {} stopped", name);
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn test_dispatch_runs_in_order() {
        let queue = TaskQueue::new("order").unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for i in 0..10 {
            let seen = seen.clone();
            queue.dispatch(move || seen.lock().push(i));
        }
        queue.flush().unwrap();

        assert_eq!(*seen.lock(), (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_dispatch_on_queue_runs_inline() {
        let queue = TaskQueue::new("inline").unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let q = queue.clone();
        let s = seen.clone();
        queue.dispatch(move || {
            s.lock().push("outer-start");
            let inner = s.clone();
            q.dispatch(move || inner.lock().push("inner"));
            s.lock().push("outer-end");
        });
        queue.flush().unwrap();

        assert_eq!(*seen.lock(), vec!["outer-start", "inner", "outer-end"]);
    }

    #[test]
    fn test_post_on_queue_is_deferred() {
        let queue = TaskQueue::new("deferred").unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let q = queue.clone();
        let s = seen.clone();
        queue.dispatch(move || {
            let inner = s.clone();
            q.post(move || inner.lock().push("posted")).unwrap();
            s.lock().push("outer");
        });
        queue.flush().unwrap();
        queue.flush().unwrap();

        assert_eq!(*seen.lock(), vec!["outer", "posted"]);
    }

    #[test]
    fn test_is_current() {
        let queue = TaskQueue::new("current").unwrap();
        let other = TaskQueue::new("other").unwrap();
        assert!(!queue.is_current());

        let (tx, rx) = std::sync::mpsc::channel();
        let q = queue.clone();
        let o = other.clone();
        queue.dispatch(move || {
            tx.send((q.is_current(), o.is_current())).unwrap();
        });

        assert_eq!(rx.recv().unwrap(), (true, false));
    }

    #[test]
    fn test_panicking_task_does_not_stop_queue() {
        let queue = TaskQueue::new("panics").unwrap();
        queue.dispatch(|| panic!("observer exploded"));

        let seen = Arc::new(Mutex::new(false));
        let s = seen.clone();
        queue.dispatch(move || *s.lock() = true);
        queue.flush().unwrap();

        assert!(*seen.lock());
    }

    #[tokio::test]
    async fn test_flushed_async() {
        let queue = TaskQueue::new("async").unwrap();
        let seen = Arc::new(Mutex::new(0));
        let s = seen.clone();
        queue.dispatch(move || *s.lock() += 1);

        queue.flushed().await.unwrap();
        assert_eq!(*seen.lock(), 1);
    }
}
