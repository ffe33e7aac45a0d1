// Copyright (c) The timeshard Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The durable store of historical test durations.
//!
//! A timings file holds one record per line: the test name and its duration in seconds, joined by
//! [`SEPARATOR`]. The separator is an ASCII control character, so it cannot collide with commas,
//! colons or whitespace that legitimately appear in test names.
//!
//! The timings file is shared by every shard of a CI run. Readers treat a missing file as empty
//! history and hold a shared advisory lock while reading. Writers may take an exclusive advisory
//! lock on the file for the duration of the write (see [`WriteLock`]).

use crate::errors::{
    InvalidTestNameError, InvalidTestNameReason, TimingsParseError, TimingsParseErrorKind,
    TimingsReadError, TimingsWriteError,
};
use camino::{Utf8Path, Utf8PathBuf};
use debug_ignore::DebugIgnore;
use std::{
    fmt,
    fs::{File, OpenOptions},
    io::{self, Read, Write},
};

/// The separator between the name and the duration of a record: the ASCII group separator.
pub const SEPARATOR: char = '\u{1D}';

/// A single persisted record: a test name and how long it took.
#[derive(Clone, Debug, PartialEq)]
pub struct Timing {
    /// The stable, fully qualified name of the test.
    pub name: String,

    /// The duration of the test, in seconds. Always finite and non-negative.
    pub duration: f64,
}

impl Timing {
    /// Creates a new `Timing`.
    pub fn new(name: impl Into<String>, duration: f64) -> Self {
        Self {
            name: name.into(),
            duration,
        }
    }
}

/// Where a test lives: a source file and a locator within it.
///
/// The locator is either an ordinal (for example an rspec scoped id such as `1:2:3`) or a line
/// number. Locations are ordered by file, then locator.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct TestLocation {
    /// The path to the source file.
    pub file: Utf8PathBuf,

    /// The locator within the file.
    pub locator: String,
}

impl TestLocation {
    /// Creates a new `TestLocation`.
    pub fn new(file: impl Into<Utf8PathBuf>, locator: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            locator: locator.into(),
        }
    }
}

impl fmt::Display for TestLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.locator)
    }
}

/// Where the duration of a [`LocatedTiming`] came from.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DurationSource {
    /// The duration was measured in an earlier run and read from the timings file.
    Measured,

    /// The test had no history, so the duration was imputed from the average.
    Imputed,
}

/// A timing that has been matched to a live, locatable test.
///
/// Produced by [`reconcile`](crate::reconcile::reconcile) and consumed by the
/// [`Partitioning`](crate::partition::Partitioning).
#[derive(Clone, Debug, PartialEq)]
pub struct LocatedTiming {
    /// The stable, fully qualified name of the test.
    pub name: String,

    /// The duration of the test, in seconds.
    pub duration: f64,

    /// Where the test lives.
    pub location: TestLocation,

    /// Whether the duration was measured or imputed.
    pub source: DurationSource,
}

/// Whether to take an exclusive lock on the timings file while writing it.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum WriteLock {
    /// Write without locking.
    None,

    /// Hold an exclusive advisory lock on the file for the duration of the write. Blocks until
    /// any other holder releases it.
    Exclusive,
}

/// An in-memory collection of timings, in file order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TimingStore {
    timings: Vec<Timing>,
}

impl TimingStore {
    /// Creates a new, empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads the timings file at `path`.
    ///
    /// A missing file is treated as an empty store, since the first run has no history. The file
    /// is read under a shared lock, so a concurrent locked write is never observed half-done.
    pub fn load(path: &Utf8Path) -> Result<Self, TimingsReadError> {
        let read_err = |error| TimingsReadError::Read {
            path: path.to_owned(),
            error,
        };

        let mut file = match File::open(path) {
            Ok(file) => file,
            Err(error) if error.kind() == io::ErrorKind::NotFound => {
                tracing::debug!("timings file `{path}` not found, starting with empty history");
                return Ok(Self::new());
            }
            Err(error) => return Err(read_err(error)),
        };

        // Blocks while a writer holds the exclusive lock. Closing the file releases it.
        file.lock_shared().map_err(|error| TimingsReadError::Lock {
            path: path.to_owned(),
            error,
        })?;
        let mut contents = String::new();
        file.read_to_string(&mut contents).map_err(read_err)?;
        drop(file);

        Self::parse(&contents).map_err(|error| TimingsReadError::Parse {
            path: path.to_owned(),
            error,
        })
    }

    /// Parses the contents of a timings file.
    ///
    /// Blank lines at the end of the file are ignored. A blank line anywhere else is corruption.
    pub fn parse(contents: &str) -> Result<Self, TimingsParseError> {
        let mut lines: Vec<&str> = contents.lines().collect();
        while lines.last().is_some_and(|line| line.is_empty()) {
            lines.pop();
        }

        let timings = lines
            .into_iter()
            .enumerate()
            .map(|(index, line)| parse_line(index + 1, line))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { timings })
    }

    /// Serializes the store into the timings file format.
    ///
    /// Fails if any name can't be read back unchanged (see [`validate_name`]).
    pub fn serialize(&self) -> Result<String, InvalidTestNameError> {
        let mut out = String::new();
        for timing in &self.timings {
            validate_name(&timing.name)?;
            out.push_str(&timing.name);
            out.push(SEPARATOR);
            // Display for f64 is the shortest representation that round-trips exactly.
            out.push_str(&timing.duration.to_string());
            out.push('\n');
        }
        Ok(out)
    }

    /// Writes the store to `path`, replacing its contents.
    pub fn write(&self, path: &Utf8Path, lock: WriteLock) -> Result<(), TimingsWriteError> {
        let mut file = LockedTimingsFile::open(path, lock)?;
        file.replace_contents(self)
    }

    /// Adds a timing to the end of the store.
    pub fn push(&mut self, timing: Timing) {
        self.timings.push(timing);
    }

    /// Iterates over the timings in file order.
    pub fn iter(&self) -> impl ExactSizeIterator<Item = &Timing> + '_ {
        self.timings.iter()
    }

    /// Returns the number of timings in the store.
    pub fn len(&self) -> usize {
        self.timings.len()
    }

    /// Returns true if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.timings.is_empty()
    }

    /// Consumes the store, returning the timings in file order.
    pub fn into_timings(self) -> Vec<Timing> {
        self.timings
    }
}

impl FromIterator<Timing> for TimingStore {
    fn from_iter<T: IntoIterator<Item = Timing>>(iter: T) -> Self {
        Self {
            timings: iter.into_iter().collect(),
        }
    }
}

/// Checks that `name` can be stored in a timings file and read back unchanged.
///
/// A name may not be empty, and may not contain a newline or [`SEPARATOR`]. A `\r` anywhere in a
/// name is fine, since every line ends with the duration.
pub fn validate_name(name: &str) -> Result<(), InvalidTestNameError> {
    let reason = if name.is_empty() {
        InvalidTestNameReason::Empty
    } else if name.contains('\n') {
        InvalidTestNameReason::Newline
    } else if name.contains(SEPARATOR) {
        InvalidTestNameReason::Separator
    } else {
        return Ok(());
    };
    Err(InvalidTestNameError::new(name, reason))
}

fn parse_line(line_number: usize, line: &str) -> Result<Timing, TimingsParseError> {
    let err = |kind| TimingsParseError::new(line_number, line, kind);

    let (name, duration) = match line.split_once(SEPARATOR) {
        Some((name, duration)) => (name, duration),
        None if line.is_empty() => return Err(err(TimingsParseErrorKind::MissingName)),
        None => return Err(err(TimingsParseErrorKind::MissingDuration)),
    };

    if name.is_empty() {
        return Err(err(TimingsParseErrorKind::MissingName));
    }
    if duration.is_empty() {
        return Err(err(TimingsParseErrorKind::MissingDuration));
    }
    if duration.contains(SEPARATOR) {
        return Err(err(TimingsParseErrorKind::TooManySeparators));
    }

    let value: f64 = duration.parse().map_err(|_| {
        err(TimingsParseErrorKind::InvalidDuration {
            input: duration.to_owned(),
        })
    })?;
    if !value.is_finite() {
        return Err(err(TimingsParseErrorKind::NonFiniteDuration {
            input: duration.to_owned(),
        }));
    }
    if value < 0.0 {
        return Err(err(TimingsParseErrorKind::NegativeDuration {
            input: duration.to_owned(),
        }));
    }

    Ok(Timing::new(name, value))
}

/// A timings file opened for writing, optionally holding an exclusive lock.
///
/// The lock is released when this is dropped, so every exit path (including failed writes) gives
/// it up.
#[derive(Debug)]
pub(crate) struct LockedTimingsFile {
    path: Utf8PathBuf,
    file: DebugIgnore<File>,
    locked: bool,
}

impl LockedTimingsFile {
    pub(crate) fn open(path: &Utf8Path, lock: WriteLock) -> Result<Self, TimingsWriteError> {
        // Don't truncate on open: another writer may still hold the lock and be mid-write.
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(path)
            .map_err(|error| TimingsWriteError::Open {
                path: path.to_owned(),
                error,
            })?;

        let locked = match lock {
            WriteLock::None => false,
            WriteLock::Exclusive => {
                tracing::debug!("acquiring exclusive lock on `{path}`");
                // Other shards only hold this lock long enough to write the file, so blocking is
                // fine.
                file.lock().map_err(|error| TimingsWriteError::Lock {
                    path: path.to_owned(),
                    error,
                })?;
                true
            }
        };

        Ok(Self {
            path: path.to_owned(),
            file: DebugIgnore(file),
            locked,
        })
    }

    /// Reads the current contents of the file through the (possibly locked) handle.
    pub(crate) fn read_store(&mut self) -> Result<TimingStore, TimingsReadError> {
        let mut contents = String::new();
        self.file
            .read_to_string(&mut contents)
            .map_err(|error| TimingsReadError::Read {
                path: self.path.clone(),
                error,
            })?;
        TimingStore::parse(&contents).map_err(|error| TimingsReadError::Parse {
            path: self.path.clone(),
            error,
        })
    }

    pub(crate) fn replace_contents(&mut self, store: &TimingStore) -> Result<(), TimingsWriteError> {
        // Serialize before truncating, so a bad name leaves the file as it was.
        let contents = store
            .serialize()
            .map_err(|error| TimingsWriteError::InvalidName {
                path: self.path.clone(),
                error,
            })?;
        let map_err = |error| TimingsWriteError::Write {
            path: self.path.clone(),
            error,
        };

        self.file.set_len(0).map_err(map_err)?;
        // set_len doesn't move the cursor, and a merge may have read the file through this handle.
        io::Seek::rewind(&mut *self.file).map_err(map_err)?;
        self.file.write_all(contents.as_bytes()).map_err(map_err)?;
        self.file.flush().map_err(map_err)?;
        Ok(())
    }
}

impl Drop for LockedTimingsFile {
    fn drop(&mut self) {
        if self.locked {
            // Errors here aren't important because the file is about to be closed, which releases
            // the lock anyway.
            _ = self.file.unlock();
        }
    }
}
