use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use tokio::sync::broadcast;

use super::clock::Clock;
use super::filter::ChangeFilter;

/// Changes kept for replay to late subscribers.
const BACKLOG_CAPACITY: usize = 4096;
/// Live fan-out buffer per subscriber before it starts lagging.
const CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
pub(crate) struct ChangeRecord {
    pub clock: Clock,
    pub path: PathBuf,
}

/// Ordered record of every accepted change, with live fan-out.
pub(crate) struct Journal {
    epoch: u64,
    filter: ChangeFilter,
    state: Mutex<JournalState>,
    tx: broadcast::Sender<ChangeRecord>,
}

struct JournalState {
    tick: u64,
    backlog: VecDeque<ChangeRecord>,
}

impl Journal {
    pub fn new(filter: ChangeFilter) -> Self {
        let epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as u64)
            .unwrap_or_default();
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);

        Self {
            epoch,
            filter,
            state: Mutex::new(JournalState {
                tick: 0,
                backlog: VecDeque::new(),
            }),
            tx,
        }
    }

    pub fn filter(&self) -> &ChangeFilter {
        &self.filter
    }

    pub fn now(&self) -> Clock {
        Clock::new(self.epoch, self.state.lock().tick)
    }

    fn record(&self, paths: impl IntoIterator<Item = PathBuf>) -> usize {
        let mut state = self.state.lock();
        let mut recorded = 0;
        for path in paths {
            if !self.filter.is_source_file(&path) {
                continue;
            }
            state.tick += 1;
            let record = ChangeRecord {
                clock: Clock::new(self.epoch, state.tick),
                path,
            };
            if state.backlog.len() == BACKLOG_CAPACITY {
                state.backlog.pop_front();
            }
            state.backlog.push_back(record.clone());
            // sent under the lock so live delivery and backlog agree on order
            let _ = self.tx.send(record);
            recorded += 1;
        }
        recorded
    }

    /// Live receiver plus every journaled change newer than `since`, taken
    /// atomically so nothing is missed or seen twice.
    pub fn attach(&self, since: Option<Clock>) -> (broadcast::Receiver<ChangeRecord>, Vec<ChangeRecord>) {
        let state = self.state.lock();
        let rx = self.tx.subscribe();
        let backlog = match since {
            Some(since) if since.epoch() == self.epoch => state
                .backlog
                .iter()
                .filter(|record| record.clock > since)
                .cloned()
                .collect(),
            _ => Vec::new(),
        };
        (rx, backlog)
    }
}

/// Entry point through which a watch backend reports changed paths.
#[derive(Clone)]
pub struct ChangeSink {
    journal: Arc<Journal>,
}

impl ChangeSink {
    pub(crate) fn new(journal: Arc<Journal>) -> Self {
        Self { journal }
    }

    /// Record changed paths. Non-source files are dropped here. Returns how
    /// many paths were recorded.
    pub fn ingest<I, P>(&self, paths: I) -> usize
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        let recorded = self.journal.record(paths.into_iter().map(Into::into));
        if recorded > 0 {
            tracing::trace!(recorded, "recorded file changes");
        }
        recorded
    }
}

impl std::fmt::Debug for ChangeSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeSink").finish_non_exhaustive()
    }
}
