//! Random-pick queue for the "surprise me" button.
//!
//! Picks are served from a local queue so a roll never waits on the back.
//! When the queue drains to the low-water mark a batch is requested; only one
//! batch is ever outstanding.  Changing which records are eligible empties
//! the queue and bumps the epoch, and a batch answered for an older epoch is
//! thrown away.

use std::collections::VecDeque;

use launcher_proto::config::RandomConfig;
use launcher_proto::model::{Preferences, RecordSummary};
use launcher_proto::protocol::Request;
use tracing::debug;

/// Which records a random pick may return.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RandomFilter {
    pub broken: bool,
    pub extreme: bool,
    pub excluded_libraries: Vec<String>,
}

impl RandomFilter {
    pub fn from_preferences(prefs: &Preferences) -> Self {
        let mut excluded = prefs.excluded_random_libraries.clone();
        excluded.sort();
        excluded.dedup();
        Self {
            broken: prefs.show_broken,
            extreme: prefs.show_extreme,
            excluded_libraries: excluded,
        }
    }
}

/// A batch request, tagged with the epoch it was issued in.
#[derive(Debug, Clone, PartialEq)]
pub struct RandomBatch {
    pub epoch: u64,
    pub count: usize,
    pub filter: RandomFilter,
}

impl RandomBatch {
    pub fn to_request(&self) -> Request {
        Request::GetRandomRecords {
            count: self.count,
            broken: self.filter.broken,
            extreme: self.filter.extreme,
            excluded_libraries: self.filter.excluded_libraries.clone(),
        }
    }
}

#[derive(Debug, Default)]
pub struct RollOutcome {
    pub picked: Option<RecordSummary>,
    pub request: Option<RandomBatch>,
}

pub struct RandomPickQueue {
    queue: VecDeque<RecordSummary>,
    in_flight: bool,
    epoch: u64,
    filter: RandomFilter,
    low_water_mark: usize,
    batch_size: usize,
}

impl RandomPickQueue {
    pub fn new(config: &RandomConfig) -> Self {
        Self {
            queue: VecDeque::new(),
            in_flight: false,
            epoch: 0,
            filter: RandomFilter::default(),
            low_water_mark: config.low_water_mark,
            batch_size: config.batch_size.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn in_flight(&self) -> bool {
        self.in_flight
    }

    /// Upper bound on the queue length.
    pub fn capacity(&self) -> usize {
        self.batch_size + self.low_water_mark
    }

    /// Next pick, without consuming it.
    pub fn peek(&self) -> Option<&RecordSummary> {
        self.queue.front()
    }

    /// Serve a pick and top up if needed.  The first roll after startup only
    /// primes the queue.
    pub fn roll(&mut self, first_call: bool) -> RollOutcome {
        let picked = if first_call {
            None
        } else {
            self.queue.pop_front()
        };

        let request = if self.queue.len() <= self.low_water_mark && !self.in_flight {
            self.in_flight = true;
            debug!(
                "random queue at {}, requesting {} more",
                self.queue.len(),
                self.batch_size
            );
            Some(RandomBatch {
                epoch: self.epoch,
                count: self.batch_size,
                filter: self.filter.clone(),
            })
        } else {
            None
        };

        RollOutcome { picked, request }
    }

    /// Append a batch answer.  Returns how many records were queued.
    pub fn on_batch(&mut self, epoch: u64, records: Vec<RecordSummary>) -> usize {
        self.in_flight = false;
        if epoch != self.epoch {
            debug!(
                "dropping random batch for epoch {} (current {})",
                epoch, self.epoch
            );
            return 0;
        }
        let room = self.capacity().saturating_sub(self.queue.len());
        let take = records.len().min(self.batch_size).min(room);
        self.queue.extend(records.into_iter().take(take));
        take
    }

    /// The batch request failed; allow the next roll to try again.  Only one
    /// batch is ever out, so this clears the flag whatever its epoch.
    pub fn on_batch_failed(&mut self, epoch: u64) {
        self.in_flight = false;
        if epoch != self.epoch {
            debug!("random batch for old epoch {} failed", epoch);
        }
    }

    /// Apply new eligibility settings.  Any change empties the queue.
    pub fn set_filter(&mut self, filter: RandomFilter) -> bool {
        if filter == self.filter {
            return false;
        }
        debug!("random filter changed, clearing {} queued", self.queue.len());
        self.filter = filter;
        self.queue.clear();
        self.epoch += 1;
        true
    }
}
