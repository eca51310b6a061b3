//! Outbound event channel.
//!
//! The engine writes `BuildEvent`s into an `EventSink`; a separate consumer
//! (a transport, the CLI, a test) drains the matching `EventReceiver`.
//! Emission is fire-and-forget: a closed receiver is logged and ignored.

use nugget_common::BuildEvent;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;
use tracing::{trace, warn};

/// Sending half of the event stream. Cheap to clone.
#[derive(Clone, Debug)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<BuildEvent>,
    /// Set after the first failed delivery so the warning is logged once
    closed_warned: Arc<AtomicBool>,
}

/// Receiving half of the event stream.
#[derive(Debug)]
pub struct EventReceiver {
    rx: mpsc::UnboundedReceiver<BuildEvent>,
}

/// Create a connected sink/receiver pair.
pub fn channel() -> (EventSink, EventReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        EventSink {
            tx,
            closed_warned: Arc::new(AtomicBool::new(false)),
        },
        EventReceiver { rx },
    )
}

impl EventSink {
    /// A sink whose events are dropped.
    pub fn discard() -> Self {
        let (sink, _rx) = channel();
        sink.closed_warned.store(true, Ordering::Relaxed);
        sink
    }

    pub fn emit(&self, event: BuildEvent) {
        trace!(kind = event.kind(), "emit");
        if let Err(err) = self.tx.send(event) {
            if !self.closed_warned.swap(true, Ordering::Relaxed) {
                warn!(
                    kind = err.0.kind(),
                    "Event receiver closed; further events are discarded"
                );
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl EventReceiver {
    /// Next event, or `None` once every sink is dropped.
    pub async fn recv(&mut self) -> Option<BuildEvent> {
        self.rx.recv().await
    }

    /// Everything currently buffered, without waiting.
    pub fn drain(&mut self) -> Vec<BuildEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            events.push(event);
        }
        events
    }
}
