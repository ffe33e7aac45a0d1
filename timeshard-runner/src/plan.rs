// Copyright (c) The timeshard Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The full partitioning pipeline, from input files to a [`Partitioning`].
//!
//! Every shard builds the same plan from the same inputs. Only the shard that is then selected
//! from it differs.

use crate::{
    config::ResolvedConfig,
    discovery::DiscoveredTests,
    errors::{PartitionError, PlanError},
    partition::Partitioning,
    reconcile::{ReconcileReport, reconcile},
    shard::{ShardSelection, tests_for_shard},
    timings::TimingStore,
};
use camino::Utf8Path;
use std::time::Instant;
use tracing::debug;

/// A partitioning of the discovered tests, along with what reconciliation found.
#[derive(Clone, Debug)]
pub struct ShardPlan {
    report: ReconcileReport,
    partitioning: Partitioning,
}

impl ShardPlan {
    /// Builds the plan from the files named in `config`.
    pub fn from_config(config: &ResolvedConfig) -> Result<Self, PlanError> {
        Self::from_paths(config.input_file(), config.test_list(), config.num_runners())
    }

    /// Loads the timings file and the test list, reconciles them, and partitions the result into
    /// `num_groups` groups.
    pub fn from_paths(
        timings_path: &Utf8Path,
        test_list_path: &Utf8Path,
        num_groups: usize,
    ) -> Result<Self, PlanError> {
        let store = phase("load timings", || TimingStore::load(timings_path))?;
        let discovered = phase("load test list", || DiscoveredTests::from_path(test_list_path))?;
        Self::new(store, discovered, num_groups)
    }

    /// Reconciles already loaded inputs and partitions the result into `num_groups` groups.
    pub fn new(
        store: TimingStore,
        discovered: DiscoveredTests,
        num_groups: usize,
    ) -> Result<Self, PlanError> {
        let reconciled = phase("reconcile", || {
            reconcile(store.into_timings(), discovered)
        });
        let partitioning = phase("partition", || {
            Partitioning::new(reconciled.timings, num_groups)
        })?;

        Ok(Self {
            report: reconciled.report,
            partitioning,
        })
    }

    /// Returns what reconciliation found.
    pub fn report(&self) -> &ReconcileReport {
        &self.report
    }

    /// Returns the partitioning.
    pub fn partitioning(&self) -> &Partitioning {
        &self.partitioning
    }

    /// Returns the tests for `shard`, counting up from 1.
    pub fn shard(&self, shard: usize) -> Result<ShardSelection<'_>, PartitionError> {
        tests_for_shard(&self.partitioning, shard)
    }
}

fn phase<T>(label: &str, f: impl FnOnce() -> T) -> T {
    let start = Instant::now();
    let ret = f();
    debug!("{label}: {:.6}s", start.elapsed().as_secs_f64());
    ret
}
