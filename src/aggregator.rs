// Shared collection state: every reply is applied here, possibly from many tasks at once.
// `seen` is a lock-free counter so the expected-count check never waits on the aggregation lock.

use crate::error::CollectError;
use crate::models::{ClusterRollup, CollectionSnapshot, StatsReport};
use regex::Regex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio_util::sync::CancellationToken;

/// Regular-expression predicate on server names. An empty pattern matches every name.
#[derive(Debug, Clone, Default)]
pub struct NameFilter {
    regex: Option<Regex>,
}

impl NameFilter {
    pub fn new(pattern: &str) -> Result<Self, CollectError> {
        if pattern.is_empty() {
            return Ok(Self::default());
        }
        let regex = Regex::new(pattern).map_err(|source| CollectError::InvalidFilter {
            pattern: pattern.to_string(),
            source,
        })?;
        Ok(Self { regex: Some(regex) })
    }

    pub fn matches(&self, name: &str) -> bool {
        self.regex.as_ref().is_none_or(|r| r.is_match(name))
    }

    pub fn as_str(&self) -> &str {
        self.regex.as_ref().map_or("", Regex::as_str)
    }
}

/// Result of applying one reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Applied {
    /// False when the name filter rejected the reply (it still counts as seen).
    pub accepted: bool,
    /// This call brought `seen` to exactly the expected count.
    pub reached_expected: bool,
}

#[derive(Debug, Default)]
struct AggregateState {
    snapshot: CollectionSnapshot,
}

impl AggregateState {
    fn admit(&mut self, report: StatsReport) {
        let snapshot = &mut self.snapshot;
        snapshot.totals.add(&report);

        if let Some(cluster) = report.cluster() {
            if !snapshot.clusters.contains_key(cluster) {
                snapshot.cluster_order.push(cluster.to_string());
            }
            snapshot
                .clusters
                .entry(cluster.to_string())
                .or_insert_with(|| ClusterRollup::new(cluster))
                .add(&report);
        }

        snapshot.matched += 1;
        snapshot.reports.push(report);
    }
}

pub struct Aggregator {
    filter: NameFilter,
    /// 0 means no expectation.
    expected: u32,
    seen: AtomicU32,
    expected_reached: CancellationToken,
    state: Mutex<AggregateState>,
}

impl Aggregator {
    pub fn new(filter: NameFilter, expected: u32) -> Self {
        Self {
            filter,
            expected,
            seen: AtomicU32::new(0),
            expected_reached: CancellationToken::new(),
            state: Mutex::new(AggregateState::default()),
        }
    }

    /// Compile `pattern` and build an aggregator; fails before any transport interaction.
    pub fn with_pattern(pattern: &str, expected: u32) -> Result<Self, CollectError> {
        Ok(Self::new(NameFilter::new(pattern)?, expected))
    }

    /// Apply one reply. Safe to call concurrently.
    ///
    /// Only the call whose post-increment `seen` equals the expected count cancels
    /// [`Self::expected_reached`], so the early exit fires exactly once.
    pub fn apply(&self, report: StatsReport) -> Applied {
        let seen = self.seen.fetch_add(1, Ordering::AcqRel) + 1;
        let reached_expected = self.expected != 0 && seen == self.expected;
        if reached_expected {
            tracing::debug!(seen, "expected server count reached");
            self.expected_reached.cancel();
        }

        if !self.filter.matches(report.name()) {
            tracing::trace!(server = report.name(), "reply rejected by name filter");
            return Applied {
                accepted: false,
                reached_expected,
            };
        }

        tracing::trace!(server = report.name(), rtt = ?report.rtt, "reply accepted");
        self.lock().admit(report);
        Applied {
            accepted: true,
            reached_expected,
        }
    }

    /// Cancelled once the expected count is reached; never cancelled when no count is set.
    pub fn expected_reached(&self) -> CancellationToken {
        self.expected_reached.clone()
    }

    pub fn seen(&self) -> u32 {
        self.seen.load(Ordering::Acquire)
    }

    /// Copy of the collected state. Call once no further `apply` can happen.
    pub fn snapshot(&self) -> CollectionSnapshot {
        let mut snapshot = self.lock().snapshot.clone();
        snapshot.seen = self.seen();
        snapshot
    }

    // Poisoning is recovered: callers only ever read whole committed replies.
    fn lock(&self) -> MutexGuard<'_, AggregateState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
