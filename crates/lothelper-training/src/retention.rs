//! Tiered retention for backup snapshots.
//!
//! Backups are bucketed by age: everything recent is kept, older backups are
//! thinned to one per ISO week and then one per calendar month, and anything
//! past the last tier is deleted. Within a bucket the newest backup survives.

use chrono::{DateTime, Datelike, Duration, Utc};
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct RetentionPolicy {
    /// Backups younger than this are always kept.
    pub keep_all: Duration,
    /// Up to this age, keep the newest backup per ISO week.
    pub weekly_until: Duration,
    /// Up to this age, keep the newest backup per calendar month.
    pub monthly_until: Duration,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            keep_all: Duration::days(30),
            weekly_until: Duration::days(180),
            monthly_until: Duration::days(365),
        }
    }
}

/// A backup as seen by the sweep.
#[derive(Debug, Clone)]
pub struct RetentionCandidate {
    pub version: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetentionPlan {
    pub keep: Vec<String>,
    pub delete: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Bucket {
    Week { year: i32, week: u32 },
    Month { year: i32, month: u32 },
}

impl RetentionPolicy {
    /// Decide which backups survive a sweep at `now`.
    #[must_use]
    pub fn plan(&self, now: DateTime<Utc>, candidates: &[RetentionCandidate]) -> RetentionPlan {
        let mut plan = RetentionPlan::default();
        let mut winners: HashMap<Bucket, &RetentionCandidate> = HashMap::new();
        let mut bucketed: Vec<(Bucket, &RetentionCandidate)> = Vec::new();

        for candidate in candidates {
            let age = now - candidate.created_at;
            let bucket = if age < self.keep_all {
                plan.keep.push(candidate.version.clone());
                continue;
            } else if age < self.weekly_until {
                let week = candidate.created_at.iso_week();
                Bucket::Week { year: week.year(), week: week.week() }
            } else if age < self.monthly_until {
                Bucket::Month { year: candidate.created_at.year(), month: candidate.created_at.month() }
            } else {
                plan.delete.push(candidate.version.clone());
                continue;
            };

            bucketed.push((bucket, candidate));
            winners
                .entry(bucket)
                .and_modify(|current| {
                    if is_newer(candidate, *current) {
                        *current = candidate;
                    }
                })
                .or_insert(candidate);
        }

        for (bucket, candidate) in bucketed {
            let keeps = winners.get(&bucket).is_some_and(|winner| winner.version == candidate.version);
            if keeps {
                plan.keep.push(candidate.version.clone());
            } else {
                plan.delete.push(candidate.version.clone());
            }
        }

        plan.keep.sort();
        plan.delete.sort();
        plan
    }
}

fn is_newer(a: &RetentionCandidate, b: &RetentionCandidate) -> bool {
    (a.created_at, &a.version) > (b.created_at, &b.version)
}
