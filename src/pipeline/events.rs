//! Pipeline event bus.
//!
//! Change propagation is an explicit subscription interface: the pipeline
//! emits events onto a broadcast channel and the renderer (or anything
//! else) subscribes. There is no implicit bubbling from records upward.

use tokio::sync::broadcast;

/// Events observable by pipeline subscribers.
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    /// A frame record changed state or the loaded view changed shape;
    /// subscribers should re-read the display snapshot.
    SequenceChanged,
    /// A fetch round finished streaming results.
    RoundCompleted { succeeded: usize, failed: usize },
    /// A round produced zero successes; worth a user-visible banner.
    FetchFailed { message: String },
}

/// Broadcast bus for pipeline events.
///
/// Emission is best-effort: events sent while nobody subscribes are
/// dropped, and a lagging subscriber loses the oldest events first.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<PipelineEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: PipelineEvent) {
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(64)
    }
}
