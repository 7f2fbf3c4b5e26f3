//! Fan-out of sync progress ticks to every open progress channel.

use std::sync::{Arc, RwLock};

use tokio::sync::broadcast;
use tokio_stream::{
    Stream, StreamExt,
    wrappers::{BroadcastStream, errors::BroadcastStreamRecvError},
};
use tracing::debug;
use utils::progress::ProgressEvent;

const CHANNEL_CAPACITY: usize = 256;

#[derive(Clone)]
pub struct ProgressHub {
    sender: broadcast::Sender<ProgressEvent>,
    latest: Arc<RwLock<Option<ProgressEvent>>>,
}

impl Default for ProgressHub {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressHub {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            sender,
            latest: Arc::new(RwLock::new(None)),
        }
    }

    /// Send a tick to every subscriber. Having no subscribers is not an error.
    pub fn publish(&self, event: ProgressEvent) {
        // Record and send under the same lock so `subscribe` never sees one without the other
        let mut latest = self
            .latest
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *latest = Some(event.clone());
        if self.sender.send(event).is_err() {
            debug!("Progress tick dropped: no subscribers");
        }
    }

    /// Latest tick of the job currently running, if any
    pub fn running_snapshot(&self) -> Option<ProgressEvent> {
        let latest = self
            .latest
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        running_only(latest.as_ref())
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Subscribe to future ticks, replaying the running job's latest tick first.
    /// Ticks missed by a lagging subscriber are skipped.
    /// A tick is either part of the snapshot or delivered live, never both.
    pub fn subscribe(&self) -> impl Stream<Item = ProgressEvent> + Send + use<> {
        let (receiver, snapshot) = {
            let latest = self
                .latest
                .read()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            (self.sender.subscribe(), running_only(latest.as_ref()))
        };

        let live = BroadcastStream::new(receiver).filter_map(|item| match item {
            Ok(event) => Some(event),
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                debug!(skipped, "Progress subscriber lagged");
                None
            }
        });

        tokio_stream::iter(snapshot).chain(live)
    }
}

fn running_only(event: Option<&ProgressEvent>) -> Option<ProgressEvent> {
    event.filter(|event| !event.is_terminal()).cloned()
}
