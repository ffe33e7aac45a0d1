// Copyright (c) The timeshard Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Errors produced by timeshard.

use crate::timings::SEPARATOR;
use camino::Utf8PathBuf;
use config::ConfigError;
use itertools::Itertools;
use std::{fmt, io};
use thiserror::Error;

/// An error that occurred while parsing the contents of a timings file.
///
/// Any malformed line fails the whole parse: a corrupted timings file points to a bigger problem
/// than one bad record.
#[derive(Clone, Debug, Error, PartialEq)]
#[error("corrupted timing data on line {line_number} ({kind}): {}", display_line(.line))]
pub struct TimingsParseError {
    line_number: usize,
    line: String,
    kind: TimingsParseErrorKind,
}

impl TimingsParseError {
    pub(crate) fn new(
        line_number: usize,
        line: impl Into<String>,
        kind: TimingsParseErrorKind,
    ) -> Self {
        Self {
            line_number,
            line: line.into(),
            kind,
        }
    }

    /// Returns the 1-based line number on which the error occurred.
    pub fn line_number(&self) -> usize {
        self.line_number
    }

    /// Returns the raw contents of the offending line.
    pub fn line(&self) -> &str {
        &self.line
    }

    /// Returns the kind of error that occurred.
    pub fn kind(&self) -> &TimingsParseErrorKind {
        &self.kind
    }
}

fn display_line(line: &str) -> String {
    line.replace(SEPARATOR, "<SEP>")
}

/// The kind of corruption found in a timings file.
#[derive(Clone, Debug, Error, PartialEq)]
#[non_exhaustive]
pub enum TimingsParseErrorKind {
    /// The name field was empty.
    #[error("test name is missing")]
    MissingName,

    /// The line had no separator, or the duration field was empty.
    #[error("duration is missing")]
    MissingDuration,

    /// The line had more than two fields.
    #[error("line has too many separators")]
    TooManySeparators,

    /// The duration could not be parsed as a number.
    #[error("duration `{input}` is not a valid number")]
    InvalidDuration {
        /// The duration field as it appeared in the file.
        input: String,
    },

    /// The duration was NaN or infinite.
    #[error("duration `{input}` is not finite")]
    NonFiniteDuration {
        /// The duration field as it appeared in the file.
        input: String,
    },

    /// The duration was negative.
    #[error("duration `{input}` is negative")]
    NegativeDuration {
        /// The duration field as it appeared in the file.
        input: String,
    },
}

/// A test name that can't be stored in a timings file.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("test name {name:?} cannot be stored in a timings file ({reason})")]
pub struct InvalidTestNameError {
    name: String,
    reason: InvalidTestNameReason,
}

impl InvalidTestNameError {
    pub(crate) fn new(name: impl Into<String>, reason: InvalidTestNameReason) -> Self {
        Self {
            name: name.into(),
            reason,
        }
    }

    /// Returns the rejected name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns why the name was rejected.
    pub fn reason(&self) -> InvalidTestNameReason {
        self.reason
    }
}

/// Why a test name was rejected.
#[derive(Clone, Copy, Debug, Error, Eq, PartialEq)]
#[non_exhaustive]
pub enum InvalidTestNameReason {
    /// The name was empty.
    #[error("name is empty")]
    Empty,

    /// The name contained a newline, which ends a record.
    #[error("name contains a newline")]
    Newline,

    /// The name contained the separator between the name and the duration.
    #[error("name contains the record separator")]
    Separator,
}

/// An error that occurred while reading a timings file from disk.
#[derive(Debug, Error)]
pub enum TimingsReadError {
    /// The file exists but could not be read.
    #[error("failed to read timings file `{path}`")]
    Read {
        /// The path that was read.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: io::Error,
    },

    /// The shared lock on the file could not be acquired.
    #[error("failed to lock timings file `{path}` for reading")]
    Lock {
        /// The path that was locked.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: io::Error,
    },

    /// The file was read but its contents were corrupted.
    #[error("timings file `{path}` is corrupted")]
    Parse {
        /// The path that was read.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: TimingsParseError,
    },
}

/// An error that occurred while writing a timings file to disk.
#[derive(Debug, Error)]
pub enum TimingsWriteError {
    /// The file could not be opened for writing.
    #[error("failed to open timings file `{path}` for writing")]
    Open {
        /// The path that was opened.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: io::Error,
    },

    /// The exclusive lock on the file could not be acquired.
    #[error("failed to lock timings file `{path}`")]
    Lock {
        /// The path that was locked.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: io::Error,
    },

    /// A timing in the store had a name that can't be written.
    ///
    /// The file is left untouched.
    #[error("failed to write timings file `{path}`")]
    InvalidName {
        /// The path that was being written.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: InvalidTestNameError,
    },

    /// Writing the file failed.
    #[error("failed to write timings file `{path}`")]
    Write {
        /// The path that was written.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: io::Error,
    },

    /// While merging, the existing file could not be read back.
    #[error("failed to merge into timings file `{path}`")]
    Merge {
        /// The path that was merged into.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: Box<TimingsReadError>,
    },
}

/// An invalid argument was passed to the partitioner.
///
/// These indicate misuse by the caller and are not retryable.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum PartitionError {
    /// The number of groups was zero.
    #[error("must have at least 1 group")]
    NoGroups,

    /// A group number outside `1..=num_groups` was requested.
    #[error("group {group} not in range (must be between 1 and {num_groups}, inclusive)")]
    GroupOutOfRange {
        /// The group that was requested.
        group: usize,

        /// The total number of groups.
        num_groups: usize,
    },
}

/// An error that occurred while building a [`ShardPlan`](crate::plan::ShardPlan).
#[derive(Debug, Error)]
pub enum PlanError {
    /// The timings file could not be loaded.
    #[error(transparent)]
    Timings(#[from] TimingsReadError),

    /// The test list could not be loaded.
    #[error(transparent)]
    Discovery(#[from] DiscoveryReadError),

    /// Partitioning failed.
    #[error(transparent)]
    Partition(#[from] PartitionError),
}

/// An error that occurred while reading the list of discovered tests.
#[derive(Debug, Error)]
pub enum DiscoveryReadError {
    /// The test list could not be read.
    #[error("failed to read test list `{path}`")]
    Read {
        /// The path that was read.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: io::Error,
    },

    /// The test list was not valid JSON of the expected shape.
    #[error("failed to parse test list{}", display_path(.path.as_ref()))]
    Parse {
        /// The path that was read, if the list came from a file.
        path: Option<Utf8PathBuf>,

        /// The underlying error.
        #[source]
        error: serde_json::Error,
    },

    /// A discovered test had an empty name or file.
    #[error("test list entry {index} has an empty `{field}`")]
    EmptyField {
        /// The 0-based index of the entry in the list.
        index: usize,

        /// The field that was empty.
        field: &'static str,
    },
}

fn display_path(path: Option<&Utf8PathBuf>) -> String {
    match path {
        Some(path) => format!(" `{path}`"),
        None => String::new(),
    }
}

/// An error that occurred while reading observed durations for the recorder.
#[derive(Debug, Error)]
pub enum RecordReadError {
    /// Reading the input failed.
    #[error("failed to read recorded durations")]
    Read {
        /// The underlying error.
        #[source]
        error: io::Error,
    },

    /// A line was not a valid observation.
    #[error("invalid observation on line {line_number}")]
    Parse {
        /// The 1-based line number.
        line_number: usize,

        /// The underlying error.
        #[source]
        error: serde_json::Error,
    },

    /// An observation had a negative or non-finite duration.
    #[error("observation for `{name}` on line {line_number} has invalid duration {duration}")]
    InvalidDuration {
        /// The 1-based line number.
        line_number: usize,

        /// The name of the test.
        name: String,

        /// The duration that was observed.
        duration: f64,
    },
}

/// An error that occurred while reading a configuration source.
#[derive(Debug, Error)]
#[error("failed to parse timeshard config{}", display_path(.config_file.as_ref()))]
pub struct ConfigParseError {
    config_file: Option<Utf8PathBuf>,
    #[source]
    kind: ConfigParseErrorKind,
}

impl ConfigParseError {
    pub(crate) fn new(config_file: Option<Utf8PathBuf>, kind: ConfigParseErrorKind) -> Self {
        Self { config_file, kind }
    }

    /// Returns the config file that was found, if any.
    pub fn config_file(&self) -> Option<&Utf8PathBuf> {
        self.config_file.as_ref()
    }

    /// Returns the kind of error that occurred.
    pub fn kind(&self) -> &ConfigParseErrorKind {
        &self.kind
    }
}

/// The kind of [`ConfigParseError`] that occurred.
#[derive(Debug, Error)]
pub enum ConfigParseErrorKind {
    /// The config file could not be read.
    #[error("failed to read config file")]
    ReadError(#[source] io::Error),

    /// The config file was not valid TOML.
    #[error(transparent)]
    TomlParseError(Box<toml::de::Error>),

    /// A value in the config file had the wrong type.
    #[error(transparent)]
    TomlDeserializeError(Box<serde_path_to_error::Error<toml::de::Error>>),

    /// Merging the configuration sources failed.
    #[error(transparent)]
    BuildError(ConfigError),

    /// A value from the environment or the command line had the wrong type.
    #[error(transparent)]
    DeserializeError(serde_path_to_error::Error<ConfigError>),
}

/// The merged configuration was missing required settings or had invalid values.
///
/// All problems are collected, not just the first.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ConfigResolveError {
    problems: Vec<String>,
}

impl ConfigResolveError {
    pub(crate) fn new(problems: Vec<String>) -> Self {
        Self { problems }
    }

    /// Returns the individual problems that were found.
    pub fn problems(&self) -> &[String] {
        &self.problems
    }
}

impl fmt::Display for ConfigResolveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "configuration errors:")?;
        write!(
            f,
            "{}",
            self.problems
                .iter()
                .map(|problem| format!("  - {problem}"))
                .join("\n")
        )
    }
}

impl std::error::Error for ConfigResolveError {}

/// An error that occurred while running the test executor.
///
/// A test run that fails is not an error here: the executor's exit code is passed through as-is.
#[derive(Debug, Error)]
#[error("failed to execute `{command}`")]
pub struct ExecutorError {
    command: String,
    #[source]
    error: io::Error,
}

impl ExecutorError {
    pub(crate) fn new(command: impl Into<String>, error: io::Error) -> Self {
        Self {
            command: command.into(),
            error,
        }
    }

    /// Returns the command line that failed to run.
    pub fn command(&self) -> &str {
        &self.command
    }
}
