// Copyright (c) The timeshard Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Selecting the tests for one shard.

use crate::{
    errors::PartitionError,
    partition::Partitioning,
    timings::LocatedTiming,
};
use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexMap;
use itertools::Itertools;
use std::fmt;

/// The tests selected for a single shard, grouped by source file.
#[derive(Clone, Debug, PartialEq)]
pub struct ShardSelection<'a> {
    shard: usize,
    tests: &'a [LocatedTiming],
    files: Vec<ShardFile<'a>>,
}

/// The selected tests within one source file.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ShardFile<'a> {
    file: &'a Utf8Path,
    locators: Vec<&'a str>,
}

impl<'a> ShardFile<'a> {
    /// Returns the path to the source file.
    pub fn file(&self) -> &'a Utf8Path {
        self.file
    }

    /// Returns the locators of the selected tests within the file, in partition order.
    pub fn locators(&self) -> &[&'a str] {
        &self.locators
    }
}

impl fmt::Display for ShardFile<'_> {
    /// Formats as `file[locator1,locator2]`, which is how the test executor selects tests.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.file, self.locators.iter().join(","))
    }
}

/// Returns the tests for `shard` (counting up from 1), grouped by source file.
///
/// Files appear in the order in which they first occur within the shard's partition.
pub fn tests_for_shard(
    partitioning: &Partitioning,
    shard: usize,
) -> Result<ShardSelection<'_>, PartitionError> {
    let partition = partitioning.group(shard)?;

    let mut by_file: IndexMap<&Utf8PathBuf, Vec<&str>> = IndexMap::new();
    for timing in partition.members() {
        by_file
            .entry(&timing.location.file)
            .or_default()
            .push(&timing.location.locator);
    }

    let files = by_file
        .into_iter()
        .map(|(file, locators)| ShardFile {
            file: file.as_path(),
            locators,
        })
        .collect();

    Ok(ShardSelection {
        shard,
        tests: partition.members(),
        files,
    })
}

impl<'a> ShardSelection<'a> {
    /// Returns the shard number, counting up from 1.
    pub fn shard(&self) -> usize {
        self.shard
    }

    /// Returns the selected tests, in partition order.
    pub fn tests(&self) -> &'a [LocatedTiming] {
        self.tests
    }

    /// Returns the selected tests grouped by file.
    pub fn files(&self) -> &[ShardFile<'a>] {
        &self.files
    }

    /// Returns true if no tests were selected.
    pub fn is_empty(&self) -> bool {
        self.tests.is_empty()
    }

    /// Returns one executor argument per file.
    pub fn to_args(&self) -> Vec<String> {
        self.files.iter().map(ToString::to_string).collect()
    }
}
