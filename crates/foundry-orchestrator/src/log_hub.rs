//! Per-job log fan-out
//!
//! Each job owns a bounded history and a broadcast channel. A subscriber
//! gets a snapshot of the history and a receiver taken under the same lock,
//! so every entry is seen exactly once: either replayed or live.

use dashmap::DashMap;
use futures::stream::{self, Stream, StreamExt};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::warn;
use uuid::Uuid;

use foundry_core::LogEntry;

const LIVE_BUFFER: usize = 256;

struct JobChannel {
    history: VecDeque<LogEntry>,
    sender: Option<broadcast::Sender<LogEntry>>,
}

impl JobChannel {
    fn open(history: VecDeque<LogEntry>) -> Self {
        let (sender, _) = broadcast::channel(LIVE_BUFFER);
        Self {
            history,
            sender: Some(sender),
        }
    }
}

/// Replay buffer plus live feed for one subscriber
pub struct LogSubscription {
    pub history: Vec<LogEntry>,
    receiver: Option<broadcast::Receiver<LogEntry>>,
}

impl LogSubscription {
    /// Replay-only subscription for a job whose log is already closed
    pub fn finished(history: Vec<LogEntry>) -> Self {
        Self {
            history,
            receiver: None,
        }
    }

    /// The log has been closed; only history remains
    pub fn is_closed(&self) -> bool {
        self.receiver.is_none()
    }

    /// History first, then live entries interleaved with heartbeats.
    /// Ends when the job's log is closed.
    pub fn into_stream(self, heartbeat: Duration) -> impl Stream<Item = LogEntry> + Send + 'static {
        let mut ticker = interval_at(Instant::now() + heartbeat, heartbeat);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let live = stream::unfold((self.receiver, ticker), |(receiver, ticker)| {
            live_next(receiver, ticker)
        });
        stream::iter(self.history).chain(live)
    }
}

enum Next {
    Entry(LogEntry),
    Heartbeat,
    Lagged(u64),
    Closed,
}

async fn live_next(
    mut receiver: Option<broadcast::Receiver<LogEntry>>,
    mut ticker: Interval,
) -> Option<(LogEntry, (Option<broadcast::Receiver<LogEntry>>, Interval))> {
    loop {
        let next = {
            let rx = receiver.as_mut()?;
            tokio::select! {
                msg = rx.recv() => match msg {
                    Ok(entry) => Next::Entry(entry),
                    Err(RecvError::Lagged(skipped)) => Next::Lagged(skipped),
                    Err(RecvError::Closed) => Next::Closed,
                },
                _ = ticker.tick() => Next::Heartbeat,
            }
        };

        match next {
            Next::Entry(entry) => return Some((entry, (receiver, ticker))),
            Next::Heartbeat => return Some((LogEntry::heartbeat(), (receiver, ticker))),
            Next::Lagged(skipped) => {
                warn!(skipped, "Log subscriber lagged; entries dropped");
            }
            Next::Closed => return None,
        }
    }
}

pub struct LogHub {
    channels: DashMap<Uuid, Mutex<JobChannel>>,
    history_capacity: usize,
}

impl LogHub {
    pub fn new(history_capacity: usize) -> Self {
        Self {
            channels: DashMap::new(),
            history_capacity: history_capacity.max(1),
        }
    }

    /// Append to history and fan out to live subscribers
    pub fn publish(&self, job_id: Uuid, entry: LogEntry) {
        let channel = self
            .channels
            .entry(job_id)
            .or_insert_with(|| Mutex::new(JobChannel::open(VecDeque::new())));
        let mut channel = channel.lock();

        if channel.history.len() == self.history_capacity {
            channel.history.pop_front();
        }
        channel.history.push_back(entry.clone());
        if let Some(sender) = &channel.sender {
            // No receivers is fine
            let _ = sender.send(entry);
        }
    }

    /// Open a live channel for `job_id` seeded with persisted history.
    /// No-op when the hub already tracks the job.
    pub fn open_with<F>(&self, job_id: Uuid, seed: F)
    where
        F: FnOnce() -> Vec<LogEntry>,
    {
        self.channels
            .entry(job_id)
            .or_insert_with(|| Mutex::new(JobChannel::open(self.bounded(seed()))));
    }

    fn bounded(&self, entries: Vec<LogEntry>) -> VecDeque<LogEntry> {
        let mut history: VecDeque<LogEntry> = entries.into();
        while history.len() > self.history_capacity {
            history.pop_front();
        }
        history
    }

    /// Subscribe to a running job's log.
    ///
    /// `seed` supplies persisted history when the hub is not tracking the job
    /// yet, for instance after a restart. Finished jobs are replayed with
    /// [`LogSubscription::finished`] instead, so they are never re-tracked.
    pub fn subscribe<F>(&self, job_id: Uuid, seed: F) -> LogSubscription
    where
        F: FnOnce() -> Vec<LogEntry>,
    {
        let channel = self
            .channels
            .entry(job_id)
            .or_insert_with(|| Mutex::new(JobChannel::open(self.bounded(seed()))));
        let channel = channel.lock();

        LogSubscription {
            history: channel.history.iter().cloned().collect(),
            receiver: channel.sender.as_ref().map(broadcast::Sender::subscribe),
        }
    }

    /// End live streams for a job. History stays available for replay.
    pub fn close(&self, job_id: Uuid) {
        if let Some(channel) = self.channels.get(&job_id) {
            channel.lock().sender = None;
        }
    }

    /// Forget a job. Live subscribers see the end of their stream.
    pub fn remove(&self, job_id: Uuid) {
        self.channels.remove(&job_id);
    }

    pub fn is_tracked(&self, job_id: Uuid) -> bool {
        self.channels.contains_key(&job_id)
    }

    /// Number of jobs with a history in memory
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn history(&self, job_id: Uuid) -> Vec<LogEntry> {
        self.channels
            .get(&job_id)
            .map(|c| c.lock().history.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn subscriber_count(&self, job_id: Uuid) -> usize {
        self.channels
            .get(&job_id)
            .and_then(|c| c.lock().sender.as_ref().map(broadcast::Sender::receiver_count))
            .unwrap_or(0)
    }
}

impl Default for LogHub {
    fn default() -> Self {
        Self::new(2000)
    }
}
