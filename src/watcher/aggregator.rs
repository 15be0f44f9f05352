//! Accumulates changed identifiers and flushes them once per quiet period.

use std::collections::{BTreeSet, HashSet};

use tokio::time::Duration;

use super::debouncer::DebounceTimer;

/// Identifiers delivered to the consumer in one flush.
///
/// Owned by the consumer; sorted so output is stable.
pub type Batch = BTreeSet<String>;

/// What a timer expiry did with the pending set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// The consumer received this many identifiers.
    Delivered(usize),
    /// A suppression was pending; this many identifiers were discarded.
    Suppressed(usize),
    /// Nothing was pending and no suppression was consumed.
    Empty,
}

/// Pending-set accumulator owning the debounce timer.
///
/// Not thread-safe by itself; the session's event loop is its only owner,
/// so every call is serialized.
pub struct ChangeAggregator<F> {
    /// Identifiers changed since the last flush.
    pending: HashSet<String>,
    /// One-shot: discard the next expiry instead of delivering it.
    skip_next: bool,
    timer: DebounceTimer,
    delay: Duration,
    on_batch: F,
}

impl<F> ChangeAggregator<F>
where
    F: FnMut(Batch),
{
    /// Create an idle aggregator with the given quiet period.
    pub fn new(delay: Duration, on_batch: F) -> Self {
        Self {
            pending: HashSet::new(),
            skip_next: false,
            timer: DebounceTimer::new(),
            delay,
            on_batch,
        }
    }

    /// Add identifiers to the pending set and restart the quiet period.
    ///
    /// Returns `false` without touching the timer when `ids` is empty, so
    /// a flush is only ever scheduled for a non-empty pending set.
    pub fn record_change<I, S>(&mut self, ids: I) -> bool
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut added_any = false;
        for id in ids {
            self.pending.insert(id.into());
            added_any = true;
        }

        if added_any {
            self.timer.reset(self.delay);
        }
        added_any
    }

    /// Timer callback: deliver or discard the pending set.
    ///
    /// The pending set is empty afterward in every branch. A pending
    /// suppression is consumed here even if the set is empty.
    pub fn flush_or_skip(&mut self) -> FlushOutcome {
        let batch: Batch = std::mem::take(&mut self.pending).into_iter().collect();

        if self.skip_next {
            self.skip_next = false;
            crate::log_event!("aggregator", "suppressed", "{} identifiers", batch.len());
            return FlushOutcome::Suppressed(batch.len());
        }

        if batch.is_empty() {
            return FlushOutcome::Empty;
        }

        let count = batch.len();
        crate::log_event!("aggregator", "flushing", "{count} identifiers");
        (self.on_batch)(batch);
        FlushOutcome::Delivered(count)
    }

    /// Discard whatever the next expiry produces.
    ///
    /// The flag is not tied to the current burst: with nothing pending it
    /// applies to the next burst that reaches expiry.
    pub fn suppress_next(&mut self) {
        self.skip_next = true;
    }

    /// Whether the next expiry will be discarded.
    pub fn is_suppressing(&self) -> bool {
        self.skip_next
    }

    /// Identifiers waiting for the next flush.
    pub fn pending(&self) -> &HashSet<String> {
        &self.pending
    }

    /// Number of identifiers waiting for the next flush.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Whether a flush is scheduled.
    pub fn is_scheduled(&self) -> bool {
        self.timer.is_armed()
    }

    /// The configured quiet period.
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Resolves when the quiet period elapses with no further changes.
    ///
    /// Pends forever while no flush is scheduled.
    pub async fn quiet_period_elapsed(&mut self) {
        self.timer.expired().await;
    }

    /// Cancel the scheduled flush and drop pending identifiers.
    pub fn cancel(&mut self) {
        self.timer.cancel();
        self.pending.clear();
    }
}

impl<F> std::fmt::Debug for ChangeAggregator<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeAggregator")
            .field("pending", &self.pending)
            .field("skip_next", &self.skip_next)
            .field("timer", &self.timer)
            .field("delay", &self.delay)
            .finish_non_exhaustive()
    }
}
