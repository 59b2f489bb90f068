//! Engine load broadcasting for external autoscalers
//!
//! The engine's scheduler publishes a [`LoadSample`] on every tick. The
//! monitor keeps the latest sample readable at all times and fans it out to
//! any number of subscribers through a single-slot channel: a publish never
//! blocks, and an unread sample is simply replaced by the next one.

use std::sync::Arc;

use futures::Stream;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;
use tracing::{debug, info};

use crate::engine::SchedulerObserver;

/// Snapshot of engine load
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadSample {
    /// Requests currently being decoded
    pub in_flight: usize,

    /// Requests waiting for a decoding slot
    pub in_queue: usize,

    /// Maximum number of concurrently decoded requests
    pub max_in_flight: usize,
}

/// Process-wide load monitor
#[derive(Clone)]
pub struct LoadMonitor {
    sender: Arc<watch::Sender<LoadSample>>,
}

impl LoadMonitor {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(LoadSample::default());
        info!("Initialized load monitor");

        Self {
            sender: Arc::new(sender),
        }
    }

    /// Replace the current sample and wake subscribers.
    ///
    /// Never blocks; a sample nobody has read yet is overwritten.
    pub fn publish(&self, sample: LoadSample) {
        debug!(
            "Publishing load sample: in_flight={}, in_queue={}, max_in_flight={} ({} subscribers)",
            sample.in_flight,
            sample.in_queue,
            sample.max_in_flight,
            self.sender.receiver_count()
        );
        self.sender.send_replace(sample);
    }

    /// Latest published sample
    pub fn current(&self) -> LoadSample {
        *self.sender.borrow()
    }

    /// Infinite stream of samples: the current one first, then every publish
    /// observed after that. Ends only when the consumer drops it.
    pub fn subscribe(&self) -> impl Stream<Item = LoadSample> + Send + 'static {
        WatchStream::new(self.sender.subscribe())
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for LoadMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl SchedulerObserver for LoadMonitor {
    fn on_schedule(&self, sample: LoadSample) {
        self.publish(sample);
    }
}
