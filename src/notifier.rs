use serde::Serialize;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;

use crate::cache::path_resolver::{dirname, normalize};

const BATCH_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Created,
    Changed,
    Deleted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub path: String,
}

impl ChangeEvent {
    pub fn created(path: &str) -> Self {
        ChangeEvent {
            kind: ChangeKind::Created,
            path: path.to_string(),
        }
    }

    pub fn changed(path: &str) -> Self {
        ChangeEvent {
            kind: ChangeKind::Changed,
            path: path.to_string(),
        }
    }

    pub fn deleted(path: &str) -> Self {
        ChangeEvent {
            kind: ChangeKind::Deleted,
            path: path.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerState {
    Idle,
    Armed(Instant),
}

/// Pending events plus the flush timer that guards them.
///
/// Every `schedule` re-arms the timer at `now + delay`; `flush` hands back
/// the queue and returns the timer to `Idle`.
#[derive(Debug)]
pub struct EventBatch {
    delay: Duration,
    pending: Vec<ChangeEvent>,
    state: TimerState,
}

impl EventBatch {
    pub fn new(delay: Duration) -> Self {
        EventBatch {
            delay,
            pending: Vec::new(),
            state: TimerState::Idle,
        }
    }

    pub fn schedule(
        &mut self,
        events: impl IntoIterator<Item = ChangeEvent>,
        now: Instant,
    ) -> Instant {
        self.pending.extend(events);
        let deadline = now + self.delay;
        self.state = TimerState::Armed(deadline);
        deadline
    }

    pub fn state(&self) -> TimerState {
        self.state
    }

    pub fn deadline(&self) -> Option<Instant> {
        match self.state {
            TimerState::Armed(deadline) => Some(deadline),
            TimerState::Idle => None,
        }
    }

    pub fn is_due(&self, now: Instant) -> bool {
        self.deadline().is_some_and(|deadline| now >= deadline)
    }

    pub fn flush(&mut self) -> Vec<ChangeEvent> {
        self.state = TimerState::Idle;
        std::mem::take(&mut self.pending)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Batches change events and publishes them to subscribers once the queue
/// has been quiet for the configured delay.
///
/// Must be created inside a tokio runtime. The batching task ends, after a
/// final flush, when the notifier is dropped.
pub struct ChangeNotifier {
    /// Unbounded so that scheduling never blocks a cache operation.
    events_tx: mpsc::UnboundedSender<Vec<ChangeEvent>>,
    batches_tx: broadcast::Sender<Vec<ChangeEvent>>,
}

impl ChangeNotifier {
    pub fn new(delay: Duration) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (batches_tx, _) = broadcast::channel(BATCH_CHANNEL_CAPACITY);

        tokio::spawn(run_batcher(events_rx, delay, batches_tx.clone()));

        ChangeNotifier {
            events_tx,
            batches_tx,
        }
    }

    pub fn schedule(&self, events: impl IntoIterator<Item = ChangeEvent>) {
        let events: Vec<ChangeEvent> = events.into_iter().collect();
        if events.is_empty() {
            return;
        }
        if let Err(e) = self.events_tx.send(events) {
            tracing::debug!("Failed to schedule change events: {}", e);
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Vec<ChangeEvent>> {
        self.batches_tx.subscribe()
    }

    /// Subscribe to batches touching `path` (and, if `recursive`, anything below it).
    pub fn watch(&self, path: &str, recursive: bool) -> ChangeSubscription {
        ChangeSubscription {
            rx: self.subscribe(),
            path: normalize(path),
            recursive,
        }
    }
}

async fn run_batcher(
    mut events_rx: mpsc::UnboundedReceiver<Vec<ChangeEvent>>,
    delay: Duration,
    batches_tx: broadcast::Sender<Vec<ChangeEvent>>,
) {
    let mut batch = EventBatch::new(delay);

    loop {
        let deadline = batch.deadline();

        tokio::select! {
            received = events_rx.recv() => {
                match received {
                    Some(events) => {
                        batch.schedule(events, Instant::now());
                    }
                    None => {
                        tracing::debug!("Change channel closed, flushing {} pending events", batch.len());
                        publish(&mut batch, &batches_tx);
                        break;
                    }
                }
            }
            // Only armed batches have a timer to wait on.
            _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                publish(&mut batch, &batches_tx);
            }
        }
    }
}

fn publish(batch: &mut EventBatch, batches_tx: &broadcast::Sender<Vec<ChangeEvent>>) {
    let events = batch.flush();
    if events.is_empty() {
        return;
    }
    tracing::trace!("Publishing batch of {} change events", events.len());
    if batches_tx.send(events).is_err() {
        tracing::trace!("No subscribers for change batch");
    }
}

/// A filtered view of the change stream.
pub struct ChangeSubscription {
    rx: broadcast::Receiver<Vec<ChangeEvent>>,
    path: String,
    recursive: bool,
}

impl ChangeSubscription {
    fn matches(&self, event_path: &str) -> bool {
        if self.path == "/" && self.recursive {
            return true;
        }
        if event_path == self.path {
            return true;
        }
        if self.recursive {
            event_path.starts_with(&format!("{}/", self.path.trim_end_matches('/')))
        } else {
            dirname(event_path) == self.path
        }
    }

    /// Next batch containing at least one matching event; `None` once the
    /// notifier is gone.
    pub async fn recv(&mut self) -> Option<Vec<ChangeEvent>> {
        loop {
            match self.rx.recv().await {
                Ok(batch) => {
                    let matching: Vec<ChangeEvent> = batch
                        .into_iter()
                        .filter(|event| self.matches(&event.path))
                        .collect();
                    if !matching.is_empty() {
                        return Some(matching);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!("Change subscription lagged, skipped {} batches", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
