//! Event stream for source notifications

use futures::Stream;
use parking_lot::Mutex;
use rtcsource_media::{MediaSource, SourceObserver, SourceState, VideoSource};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tracing::debug;

/// Source events that can occur during a track's life
#[derive(Debug, Clone, PartialEq)]
pub enum SourceEvent {
    /// The source changed state
    StateChanged {
        /// New state
        state: SourceState,
    },
    /// Capture delivered its first frame
    Started,
    /// Capture failed permanently
    FatalError {
        /// Failure details
        details: String,
    },
    /// Capture parameters changed
    OptionsChanged,
}

impl SourceEvent {
    /// Get the event type as a string
    pub fn event_type(&self) -> &'static str {
        match self {
            SourceEvent::StateChanged { .. } => "state_changed",
            SourceEvent::Started => "started",
            SourceEvent::FatalError { .. } => "fatal_error",
            SourceEvent::OptionsChanged => "options_changed",
        }
    }

    /// The last event a stream yields
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SourceEvent::StateChanged {
                state: SourceState::Ended
            }
        )
    }
}

/// Stream of source events for async iteration
///
/// Ends after the source reports [`SourceState::Ended`]. Dropping or closing the
/// stream unsubscribes it from the source.
pub struct EventStream {
    receiver: mpsc::UnboundedReceiver<SourceEvent>,
    subscription: Option<Subscription>,
}

/// Observer registration, removed on drop
struct Subscription {
    source: MediaSource,
    forwarder: Arc<dyn SourceObserver>,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.source.remove_observer(&self.forwarder);
    }
}

impl EventStream {
    /// Subscribe to `source`
    ///
    /// Subscribing to a source that already ended yields a stream that is immediately
    /// exhausted.
    pub fn subscribe(source: &VideoSource) -> Self {
        let (tx, receiver) = mpsc::unbounded_channel();
        let subscription = source.is_active().then(|| {
            let forwarder: Arc<dyn SourceObserver> = Arc::new(EventForwarder {
                sender: Mutex::new(Some(tx)),
            });
            source.add_observer(forwarder.clone());
            Subscription {
                source: source.media_source().clone(),
                forwarder,
            }
        });
        Self {
            receiver,
            subscription,
        }
    }

    /// Try to get the next event without waiting
    pub fn try_next(&mut self) -> Result<Option<SourceEvent>, mpsc::error::TryRecvError> {
        match self.receiver.try_recv() {
            Ok(event) => Ok(Some(event)),
            Err(mpsc::error::TryRecvError::Empty) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Stop receiving; buffered events can still be drained
    pub fn close(&mut self) {
        self.subscription.take();
        self.receiver.close();
    }
}

impl std::fmt::Debug for EventStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventStream")
            .field("subscribed", &self.subscription.is_some())
            .finish()
    }
}

impl Stream for EventStream {
    type Item = SourceEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<SourceEvent>> {
        self.receiver.poll_recv(cx)
    }
}

/// Observer feeding an [`EventStream`]
struct EventForwarder {
    sender: Mutex<Option<mpsc::UnboundedSender<SourceEvent>>>,
}

impl EventForwarder {
    fn forward(&self, event: SourceEvent) {
        let mut sender = self.sender.lock();
        let terminal = event.is_terminal();
        if let Some(tx) = sender.as_ref() {
            debug!("📡 Forwarding source event: {}", event.event_type());
            if tx.send(event).is_err() {
                // Receiver gone
                *sender = None;
            }
        }
        if terminal {
            *sender = None;
        }
    }
}

impl SourceObserver for EventForwarder {
    fn on_state_changed(&self, state: SourceState) {
        self.forward(SourceEvent::StateChanged { state });
    }

    fn on_started(&self) {
        self.forward(SourceEvent::Started);
    }

    fn on_fatal_error(&self, details: &str) {
        self.forward(SourceEvent::FatalError {
            details: details.to_string(),
        });
    }

    fn on_options_changed(&self) {
        self.forward(SourceEvent::OptionsChanged);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_types() {
        assert_eq!(SourceEvent::Started.event_type(), "started");
        assert!(SourceEvent::StateChanged {
            state: SourceState::Ended
        }
        .is_terminal());
        assert!(!SourceEvent::StateChanged {
            state: SourceState::Muted
        }
        .is_terminal());
    }

    #[test]
    fn test_forwarder_closes_after_terminal_event() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let forwarder = EventForwarder {
            sender: Mutex::new(Some(tx)),
        };

        forwarder.on_state_changed(SourceState::Live);
        forwarder.on_state_changed(SourceState::Ended);
        forwarder.on_started();

        assert_eq!(
            rx.try_recv().unwrap(),
            SourceEvent::StateChanged {
                state: SourceState::Live
            }
        );
        assert!(rx.try_recv().unwrap().is_terminal());
        assert!(matches!(
            rx.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
    }
}
