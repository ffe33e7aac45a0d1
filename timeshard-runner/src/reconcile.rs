// Copyright (c) The timeshard Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Reconciling historical timings against the live set of tests.
//!
//! The timings file and the test framework disagree in predictable ways: tests get added, renamed
//! and removed between runs, and concurrent writers can leave the same test recorded twice.
//! [`reconcile`] merges the two sources by name into one timing per live test:
//!
//! * duplicate names in the timings file keep the larger duration;
//! * live tests with no history get the average historical duration;
//! * history for tests that no longer exist is dropped.
//!
//! None of these conditions are fatal. Each is logged as a warning and recorded in the
//! [`ReconcileReport`].

use crate::{
    discovery::DiscoveredTest,
    timings::{DurationSource, LocatedTiming, Timing},
};
use indexmap::{IndexMap, map::Entry};

/// The smallest duration that is ever imputed, in seconds.
///
/// Imputed durations must be positive so that the partitioner still spreads new tests across
/// groups by load.
pub const IMPUTED_DURATION_FLOOR: f64 = 0.0001;

/// The result of [`reconcile`].
#[derive(Clone, Debug, PartialEq)]
pub struct Reconciled {
    /// One timing per live test, in discovery order.
    pub timings: Vec<LocatedTiming>,

    /// What had to be fixed up along the way.
    pub report: ReconcileReport,
}

/// Diagnostics produced by [`reconcile`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ReconcileReport {
    /// Duplicate records found in the timings file.
    pub duplicates: Vec<DuplicateTiming>,

    /// Names that were discovered more than once. Only the first location is kept.
    pub duplicate_discoveries: Vec<String>,

    /// Names with history that are no longer discoverable, in file order.
    pub stale: Vec<String>,

    /// Names that were discovered but had no history, in discovery order.
    pub imputed: Vec<String>,

    /// The duration assigned to tests without history.
    pub imputed_duration: f64,
}

/// A duplicate record in the timings file.
#[derive(Clone, Debug, PartialEq)]
pub struct DuplicateTiming {
    /// The duplicated name.
    pub name: String,

    /// The duration that was kept.
    pub kept: f64,

    /// The duration that was discarded.
    pub discarded: f64,
}

/// Merges persisted timings with the tests discovered in this run.
///
/// The output is deterministic for identical inputs.
pub fn reconcile(
    persisted: impl IntoIterator<Item = Timing>,
    discovered: impl IntoIterator<Item = DiscoveredTest>,
) -> Reconciled {
    let mut report = ReconcileReport::default();

    let mut by_name: IndexMap<String, f64> = IndexMap::new();
    for timing in persisted {
        match by_name.entry(timing.name) {
            Entry::Vacant(entry) => {
                entry.insert(timing.duration);
            }
            Entry::Occupied(mut entry) => {
                let existing = *entry.get();
                let (kept, discarded) = if timing.duration > existing {
                    entry.insert(timing.duration);
                    (timing.duration, existing)
                } else {
                    (existing, timing.duration)
                };
                tracing::warn!(
                    "duplicate timing found for `{}` ({kept}s and {discarded}s), keeping the larger",
                    entry.key(),
                );
                report.duplicates.push(DuplicateTiming {
                    name: entry.key().clone(),
                    kept,
                    discarded,
                });
            }
        }
    }

    // Computed from history only, so that imputed values don't feed into each other.
    let imputed_duration = imputed_duration(by_name.values().copied());
    report.imputed_duration = imputed_duration;

    let mut matched = vec![false; by_name.len()];
    let mut timings: IndexMap<String, LocatedTiming> = IndexMap::new();

    for DiscoveredTest { name, location } in discovered {
        if timings.contains_key(&name) {
            tracing::warn!(
                "test `{name}` was discovered more than once, ignoring the copy at {location}"
            );
            report.duplicate_discoveries.push(name);
            continue;
        }

        let timing = match by_name.get_full(&name) {
            Some((index, _, &duration)) => {
                matched[index] = true;
                LocatedTiming {
                    name: name.clone(),
                    duration,
                    location,
                    source: DurationSource::Measured,
                }
            }
            None => {
                report.imputed.push(name.clone());
                LocatedTiming {
                    name: name.clone(),
                    duration: imputed_duration,
                    location,
                    source: DurationSource::Imputed,
                }
            }
        };
        timings.insert(name, timing);
    }

    for ((name, _), matched) in by_name.iter().zip(&matched) {
        if !matched {
            tracing::warn!("no location found for test `{name}`: removing as stale");
            report.stale.push(name.clone());
        }
    }

    if !report.imputed.is_empty() {
        tracing::debug!(
            "imputed {imputed_duration}s for {} tests without history",
            report.imputed.len(),
        );
    }

    Reconciled {
        timings: timings.into_values().collect(),
        report,
    }
}

fn imputed_duration(durations: impl ExactSizeIterator<Item = f64>) -> f64 {
    let count = durations.len();
    let mean = durations.sum::<f64>() / count as f64;
    // An empty history gives 0/0 = NaN, which fails the comparison below.
    if mean >= IMPUTED_DURATION_FLOOR && mean.is_finite() {
        mean
    } else {
        IMPUTED_DURATION_FLOOR
    }
}
