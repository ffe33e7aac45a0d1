// Copyright (c) The timeshard Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Support for partitioning a test run across several machines, balanced by duration.
//!
//! Partitioning is deterministic: every shard computes the same [`Partitioning`] from the same
//! timings, then reads out its own group. This is what keeps shards consistent without any
//! communication between them.
//!
//! The algorithm is longest-processing-time-first greedy scheduling. Tests are sorted by
//! descending duration and each one is assigned to the group with the least total duration so
//! far. This guarantees that no group exceeds the average load by more than the single longest
//! test.

use crate::{errors::PartitionError, timings::LocatedTiming};
use std::{cmp::Ordering, collections::BinaryHeap, fmt};

/// One group of tests within a [`Partitioning`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Partition {
    members: Vec<LocatedTiming>,
    total_duration: f64,
}

impl Partition {
    /// Returns the tests in this group, in assignment order.
    pub fn members(&self) -> &[LocatedTiming] {
        &self.members
    }

    /// Returns the sum of the durations of the tests in this group, in seconds.
    pub fn total_duration(&self) -> f64 {
        self.total_duration
    }

    /// Returns the number of tests in this group.
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Returns true if no tests were assigned to this group.
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    fn push(&mut self, timing: LocatedTiming) {
        self.total_duration += timing.duration;
        self.members.push(timing);
    }
}

/// A set of timings divided into a fixed number of groups of roughly equal total duration.
#[derive(Clone, Debug, PartialEq)]
pub struct Partitioning {
    groups: Vec<Partition>,
}

impl Partitioning {
    /// Divides `timings` into `num_groups` groups.
    ///
    /// Returns an error if `num_groups` is zero.
    pub fn new(
        mut timings: Vec<LocatedTiming>,
        num_groups: usize,
    ) -> Result<Self, PartitionError> {
        if num_groups == 0 {
            return Err(PartitionError::NoGroups);
        }

        // Sort first so the result doesn't depend on input order.
        timings.sort_by(|a, b| {
            b.duration
                .total_cmp(&a.duration)
                .then_with(|| a.location.cmp(&b.location))
                .then_with(|| a.name.cmp(&b.name))
        });

        let mut groups = vec![Partition::default(); num_groups];
        let mut loads: BinaryHeap<GroupLoad> = (0..num_groups)
            .map(|index| GroupLoad {
                total_duration: 0.0,
                count: 0,
                index,
            })
            .collect();

        for timing in timings {
            // The heap always holds exactly one entry per group.
            let Some(mut load) = loads.pop() else {
                unreachable!("heap has {num_groups} entries");
            };
            let group = &mut groups[load.index];
            group.push(timing);
            load.total_duration = group.total_duration;
            load.count = group.len();
            loads.push(load);
        }

        Ok(Self { groups })
    }

    /// Returns the number of groups.
    pub fn num_groups(&self) -> usize {
        self.groups.len()
    }

    /// Returns the group with the given number, counting up from 1.
    pub fn group(&self, group: usize) -> Result<&Partition, PartitionError> {
        group
            .checked_sub(1)
            .and_then(|index| self.groups.get(index))
            .ok_or(PartitionError::GroupOutOfRange {
                group,
                num_groups: self.groups.len(),
            })
    }

    /// Iterates over the groups in order.
    pub fn groups(&self) -> impl ExactSizeIterator<Item = &Partition> + '_ {
        self.groups.iter()
    }

    /// Returns the total number of tests across all groups.
    pub fn test_count(&self) -> usize {
        self.groups.iter().map(Partition::len).sum()
    }

    /// Returns a displayable summary of the partitioning.
    pub fn summary(&self) -> PartitionSummary<'_> {
        PartitionSummary { partitioning: self }
    }
}

/// A human-readable summary of a [`Partitioning`], returned by [`Partitioning::summary`].
#[derive(Clone, Copy, Debug)]
pub struct PartitionSummary<'a> {
    partitioning: &'a Partitioning,
}

impl fmt::Display for PartitionSummary<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Total Tests: {}", self.partitioning.test_count())?;
        for (index, group) in self.partitioning.groups.iter().enumerate() {
            writeln!(
                f,
                "  Partition {}: {} tests ({:.3}s)",
                index + 1,
                group.len(),
                group.total_duration,
            )?;
        }
        Ok(())
    }
}

/// The current load of a group, ordered so that a max-heap pops the group that should receive
/// the next test.
#[derive(Clone, Copy, Debug)]
struct GroupLoad {
    total_duration: f64,
    count: usize,
    index: usize,
}

impl Ord for GroupLoad {
    fn cmp(&self, other: &Self) -> Ordering {
        // Least duration first, then fewest tests, then lowest index. Reversed because
        // BinaryHeap is a max-heap.
        self.total_duration
            .total_cmp(&other.total_duration)
            .then_with(|| self.count.cmp(&other.count))
            .then_with(|| self.index.cmp(&other.index))
            .reverse()
    }
}

impl PartialOrd for GroupLoad {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for GroupLoad {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for GroupLoad {}
