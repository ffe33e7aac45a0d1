// Copyright (c) The timeshard Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Recording observed test durations.
//!
//! A recording run is separate from a partitioning run: the test framework reports each completed
//! test through [`TimingSink::record`], and at the end of the run the collected timings are
//! written back to the timings file with [`TimingRecorder::persist`].

use crate::{
    errors::{RecordReadError, TimingsWriteError},
    timings::{LockedTimingsFile, Timing, TimingStore, WriteLock, validate_name},
};
use camino::Utf8Path;
use indexmap::IndexMap;
use serde::Deserialize;
use std::io::BufRead;

/// The callback through which a test framework reports completed tests.
pub trait TimingSink {
    /// Records that the test `name` took `duration` seconds.
    fn record(&mut self, name: &str, duration: f64);
}

/// How [`TimingRecorder::persist`] combines recorded timings with the existing file.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PersistMode {
    /// Replace the file with the recorded timings.
    Replace,

    /// Keep existing timings for tests that weren't recorded in this run, and overwrite the rest.
    ///
    /// The read-modify-write happens under the exclusive lock, so shards recording into the same
    /// file don't lose each other's results.
    Merge,
}

/// Collects observed durations during a recording run.
#[derive(Clone, Debug, Default)]
pub struct TimingRecorder {
    timings: IndexMap<String, f64>,
}

impl TimingRecorder {
    /// Creates a new, empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of distinct tests recorded.
    pub fn len(&self) -> usize {
        self.timings.len()
    }

    /// Returns true if nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.timings.is_empty()
    }

    /// Returns the recorded timings, in the order tests were first recorded.
    pub fn to_store(&self) -> TimingStore {
        self.timings
            .iter()
            .map(|(name, &duration)| Timing::new(name.clone(), duration))
            .collect()
    }

    /// Reads observations from `reader`, one JSON object per line, and records each one.
    ///
    /// Each line looks like `{"name": "Widget renders", "duration": 0.25}`. Blank lines are
    /// skipped, as are observations whose names can't be stored (with a warning). Returns the
    /// number of observations recorded.
    pub fn record_json_lines(&mut self, reader: impl BufRead) -> Result<usize, RecordReadError> {
        let mut count = 0;
        for (index, line) in reader.lines().enumerate() {
            let line_number = index + 1;
            let line = line.map_err(|error| RecordReadError::Read { error })?;
            if line.trim().is_empty() {
                continue;
            }

            let observation: Observation = serde_json::from_str(&line)
                .map_err(|error| RecordReadError::Parse { line_number, error })?;
            if !is_valid_duration(observation.duration) {
                return Err(RecordReadError::InvalidDuration {
                    line_number,
                    name: observation.name,
                    duration: observation.duration,
                });
            }

            if let Err(error) = validate_name(&observation.name) {
                tracing::warn!("ignoring observation on line {line_number}: {error}");
                continue;
            }

            self.record(&observation.name, observation.duration);
            count += 1;
        }
        Ok(count)
    }

    /// Writes the recorded timings to `path`, holding an exclusive lock if `lock` asks for one.
    ///
    /// [`PersistMode::Merge`] always locks, since it reads the file back before writing it.
    pub fn persist(
        &self,
        path: &Utf8Path,
        mode: PersistMode,
        lock: WriteLock,
    ) -> Result<(), TimingsWriteError> {
        match mode {
            PersistMode::Replace => self.to_store().write(path, lock),
            PersistMode::Merge => {
                let mut file = LockedTimingsFile::open(path, WriteLock::Exclusive)?;
                let existing = file.read_store().map_err(|error| TimingsWriteError::Merge {
                    path: path.to_owned(),
                    error: Box::new(error),
                })?;
                let merged = self.merge_into(existing);
                tracing::debug!(
                    "merging {} recorded timings into `{path}` ({} total)",
                    self.len(),
                    merged.len(),
                );
                file.replace_contents(&merged)
            }
        }
    }

    fn merge_into(&self, existing: TimingStore) -> TimingStore {
        let mut merged: IndexMap<String, f64> = IndexMap::new();
        for timing in existing.into_timings() {
            let entry = merged.entry(timing.name).or_insert(timing.duration);
            *entry = entry.max(timing.duration);
        }
        for (name, &duration) in &self.timings {
            merged.insert(name.clone(), duration);
        }

        merged
            .into_iter()
            .map(|(name, duration)| Timing::new(name, duration))
            .collect()
    }
}

impl TimingSink for TimingRecorder {
    fn record(&mut self, name: &str, duration: f64) {
        if !is_valid_duration(duration) {
            tracing::warn!("ignoring invalid duration {duration} for test `{name}`");
            return;
        }
        if let Err(error) = validate_name(name) {
            tracing::warn!("ignoring timing: {error}");
            return;
        }
        // The latest observation of a test wins.
        self.timings.insert(name.to_owned(), duration);
    }
}

fn is_valid_duration(duration: f64) -> bool {
    duration.is_finite() && duration >= 0.0
}

#[derive(Deserialize)]
struct Observation {
    name: String,
    duration: f64,
}
