//! Media source lifecycle
//!
//! A [`MediaSource`] owns the state every source kind shares: the lifecycle state, the
//! enabled flag and the observer list. All mutation and every observer notification
//! runs on the source's control queue. Calls made on that queue run inline; calls made
//! anywhere else are posted, so a caller sees the effect only after the queue got to it
//! (use [`MediaSource::flush`] or [`MediaSource::flushed`] to wait).
//!
//! The `active` and `enabled` flags are also readable lock-free from the producer
//! context.
//!
//! Notifications are delivered in the order they were raised. An observer that changes
//! the source from inside a callback has its change applied at once, but the resulting
//! notification waits until every observer heard about the current one.

use crate::error::MediaResult;
use parking_lot::{Mutex, RwLock};
use rtcsource_core::{RuntimeContext, TaskQueue};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Lifecycle state of a source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceState {
    /// Created, capture not confirmed yet
    Initializing,
    /// Producing frames
    Live,
    /// Temporarily not producing
    Muted,
    /// Finished for good
    Ended,
}

impl SourceState {
    /// Whether `self -> next` is a legal transition
    pub fn can_transition_to(self, next: SourceState) -> bool {
        use SourceState::*;
        matches!(
            (self, next),
            (Initializing, Live)
                | (Live, Muted)
                | (Muted, Live)
                | (Initializing | Live | Muted, Ended)
        )
    }
}

/// Receiver of source notifications
///
/// Called on the control queue, and only while the source is active; the transition to
/// [`SourceState::Ended`] is the last call an observer gets.
pub trait SourceObserver: Send + Sync {
    /// The state changed
    fn on_state_changed(&self, state: SourceState);

    /// Capture delivered its first frame
    fn on_started(&self) {}

    /// Capture failed permanently; the source is about to end
    fn on_fatal_error(&self, _details: &str) {}

    /// Accepted options or device info changed the capture parameters
    fn on_options_changed(&self) {}
}

/// Extension points for source kinds built on [`MediaSource`]
///
/// Called on the control queue.
pub(crate) trait SourceHooks: Send + Sync {
    fn on_enabled_changed(&self, enabled: bool);
    fn on_finalize(&self);
}

/// Shared source lifecycle state machine
#[derive(Clone)]
pub struct MediaSource {
    inner: Arc<SourceInner>,
}

struct SourceInner {
    id: u64,
    queue: TaskQueue,
    state: Mutex<SourceState>,
    active: AtomicBool,
    enabled: AtomicBool,
    observers: Mutex<Vec<Arc<dyn SourceObserver>>>,
    hooks: RwLock<Option<Arc<dyn SourceHooks>>>,
    pending: Mutex<VecDeque<Notification>>,
    delivering: AtomicBool,
}

type Notification = Box<dyn FnOnce(&SourceInner) + Send>;

impl MediaSource {
    /// Create a source with its own control queue
    pub fn new(ctx: &RuntimeContext, live_immediately: bool) -> MediaResult<Self> {
        let id = ctx.next_id();
        let queue = ctx.create_queue(&format!("source-{}", id))?;
        Ok(Self::with_queue(id, queue, live_immediately))
    }

    /// Create a source on an existing control queue
    pub fn with_queue(id: u64, queue: TaskQueue, live_immediately: bool) -> Self {
        let state = if live_immediately {
            SourceState::Live
        } else {
            SourceState::Initializing
        };
        debug!("Media source {} created in {:?}", id, state);
        Self {
            inner: Arc::new(SourceInner {
                id,
                queue,
                state: Mutex::new(state),
                active: AtomicBool::new(true),
                enabled: AtomicBool::new(true),
                observers: Mutex::new(Vec::new()),
                hooks: RwLock::new(None),
                pending: Mutex::new(VecDeque::new()),
                delivering: AtomicBool::new(false),
            }),
        }
    }

    pub(crate) fn set_hooks(&self, hooks: Arc<dyn SourceHooks>) {
        *self.inner.hooks.write() = Some(hooks);
    }

    /// Source id
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Control queue
    pub fn queue(&self) -> &TaskQueue {
        &self.inner.queue
    }

    /// Current state
    pub fn state(&self) -> SourceState {
        *self.inner.state.lock()
    }

    /// Whether the source has not ended
    pub fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::Acquire)
    }

    /// Enabled flag (independent of the state)
    pub fn is_enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::Acquire)
    }

    /// Enable or disable the source
    pub fn set_enabled(&self, enabled: bool) {
        let inner = self.inner.clone();
        self.inner.queue.dispatch(move || inner.apply_enabled(enabled));
    }

    /// Request a state transition
    ///
    /// Identical and illegal transitions are ignored. Observers hear about every
    /// applied transition exactly once.
    pub fn change_state(&self, state: SourceState) {
        let inner = self.inner.clone();
        self.inner.queue.dispatch(move || inner.apply_state(state));
    }

    /// End the source and run finalization, once
    pub fn close(&self) {
        let inner = self.inner.clone();
        self.inner
            .queue
            .dispatch(move || inner.apply_state(SourceState::Ended));
    }

    /// Register an observer (ignored once the source has ended)
    pub fn add_observer(&self, observer: Arc<dyn SourceObserver>) {
        let inner = self.inner.clone();
        self.inner.queue.dispatch(move || {
            if !inner.active.load(Ordering::Acquire) {
                return;
            }
            let mut observers = inner.observers.lock();
            if !observers.iter().any(|o| same_observer(o, &observer)) {
                observers.push(observer);
            }
        });
    }

    /// Unregister an observer
    pub fn remove_observer(&self, observer: &Arc<dyn SourceObserver>) {
        let inner = self.inner.clone();
        let observer = observer.clone();
        self.inner.queue.dispatch(move || {
            inner
                .observers
                .lock()
                .retain(|o| !same_observer(o, &observer));
        });
    }

    /// Number of registered observers
    pub fn observer_count(&self) -> usize {
        self.inner.observers.lock().len()
    }

    /// Tell observers capture started
    pub fn notify_started(&self) {
        self.notify(|o| o.on_started());
    }

    /// Tell observers the capture parameters changed
    pub fn notify_options_changed(&self) {
        self.notify(|o| o.on_options_changed());
    }

    /// Report a permanent failure and end the source
    ///
    /// Only the first report while active reaches observers.
    pub fn fail(&self, details: impl Into<String>) {
        let details = details.into();
        let inner = self.inner.clone();
        self.inner.queue.dispatch(move || {
            if !inner.active.load(Ordering::Acquire) {
                debug!("Source {} already ended, ignoring error: {}", inner.id, details);
                return;
            }
            warn!("Source {} failed: {}", inner.id, details);
            inner.emit(move |inner| {
                for observer in inner.snapshot_observers() {
                    observer.on_fatal_error(&details);
                }
            });
            inner.apply_state(SourceState::Ended);
        });
    }

    /// Run `f` for every observer on the control queue, while active
    pub(crate) fn notify<F>(&self, f: F)
    where
        F: Fn(&dyn SourceObserver) + Send + 'static,
    {
        let inner = self.inner.clone();
        self.inner.queue.dispatch(move || {
            if !inner.active.load(Ordering::Acquire) {
                return;
            }
            inner.emit(move |inner| {
                for observer in inner.snapshot_observers() {
                    f(observer.as_ref());
                }
            });
        });
    }

    /// Wait until everything dispatched so far has run
    ///
    /// Blocks; do not call from async code.
    pub fn flush(&self) -> MediaResult<()> {
        Ok(self.inner.queue.flush()?)
    }

    /// Async variant of [`MediaSource::flush`]
    pub async fn flushed(&self) -> MediaResult<()> {
        Ok(self.inner.queue.flushed().await?)
    }
}

impl SourceInner {
    fn snapshot_observers(&self) -> Vec<Arc<dyn SourceObserver>> {
        self.observers.lock().clone()
    }

    /// Queue a notification and deliver everything queued, unless a delivery further
    /// up the stack is already draining
    fn emit(&self, notification: impl FnOnce(&SourceInner) + Send + 'static) {
        self.pending.lock().push_back(Box::new(notification));
        if self.delivering.swap(true, Ordering::AcqRel) {
            return;
        }
        let _guard = DeliveryGuard(&self.delivering);
        loop {
            let Some(next) = self.pending.lock().pop_front() else {
                break;
            };
            next(self);
        }
    }

    fn hooks(&self) -> Option<Arc<dyn SourceHooks>> {
        self.hooks.read().clone()
    }

    fn apply_enabled(&self, enabled: bool) {
        if !self.active.load(Ordering::Acquire) {
            return;
        }
        if self.enabled.swap(enabled, Ordering::AcqRel) == enabled {
            return;
        }
        debug!("Source {} enabled = {}", self.id, enabled);
        if let Some(hooks) = self.hooks() {
            hooks.on_enabled_changed(enabled);
        }
    }

    fn apply_state(&self, next: SourceState) {
        {
            let mut state = self.state.lock();
            if *state == next {
                return;
            }
            if !state.can_transition_to(next) {
                debug!(
                    "Source {} ignoring transition {:?} -> {:?}",
                    self.id, *state, next
                );
                return;
            }
            *state = next;
        }
        info!("Source {} is now {:?}", self.id, next);

        let finalize = next == SourceState::Ended && self.active.swap(false, Ordering::AcqRel);
        self.emit(move |inner| {
            for observer in inner.snapshot_observers() {
                observer.on_state_changed(next);
            }
        });
        if finalize {
            self.emit(|inner| {
                if let Some(hooks) = inner.hooks() {
                    hooks.on_finalize();
                }
                debug!("Source {} finalized", inner.id);
            });
        }
    }
}

/// Clears the delivering flag even when an observer panics
struct DeliveryGuard<'a>(&'a AtomicBool);

impl Drop for DeliveryGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl std::fmt::Debug for MediaSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaSource")
            .field("id", &self.inner.id)
            .field("state", &self.state())
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

fn same_observer(a: &Arc<dyn SourceObserver>, b: &Arc<dyn SourceObserver>) -> bool {
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(live: bool) -> MediaSource {
        MediaSource::with_queue(1, TaskQueue::new("source-test").unwrap(), live)
    }

    #[derive(Default)]
    struct Recorder {
        states: Mutex<Vec<SourceState>>,
    }

    impl SourceObserver for Recorder {
        fn on_state_changed(&self, state: SourceState) {
            self.states.lock().push(state);
        }
    }

    #[test]
    fn test_transition_table() {
        use SourceState::*;
        assert!(Initializing.can_transition_to(Live));
        assert!(Muted.can_transition_to(Ended));
        assert!(!Initializing.can_transition_to(Muted));
        assert!(!Ended.can_transition_to(Live));
        assert!(!Live.can_transition_to(Initializing));
    }

    #[test]
    fn test_initial_state() {
        assert_eq!(source(false).state(), SourceState::Initializing);
        assert_eq!(source(true).state(), SourceState::Live);
    }

    #[test]
    fn test_notifies_once_per_change() {
        let source = source(false);
        let recorder = Arc::new(Recorder::default());
        source.add_observer(recorder.clone());

        source.change_state(SourceState::Live);
        source.change_state(SourceState::Live);
        source.change_state(SourceState::Muted);
        source.flush().unwrap();

        assert_eq!(
            *recorder.states.lock(),
            vec![SourceState::Live, SourceState::Muted]
        );
    }

    #[test]
    fn test_observer_added_twice_is_registered_once() {
        let source = source(false);
        let recorder: Arc<dyn SourceObserver> = Arc::new(Recorder::default());
        source.add_observer(recorder.clone());
        source.add_observer(recorder.clone());
        source.flush().unwrap();
        assert_eq!(source.observer_count(), 1);

        source.remove_observer(&recorder);
        source.flush().unwrap();
        assert_eq!(source.observer_count(), 0);
    }
}
