// Copyright (c) The timeshard Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::output::{NO_HEADING_TARGET, StderrStyles};
use camino::Utf8PathBuf;
use owo_colors::OwoColorize;
use std::error::Error;
use thiserror::Error;
use timeshard_runner::{
    errors::{
        ConfigParseError, ConfigResolveError, DiscoveryReadError, ExecutorError, PartitionError,
        PlanError, RecordReadError, TimingsReadError, TimingsWriteError,
    },
    exit_codes::TimeshardExitCode,
};

pub(crate) type Result<T, E = ExpectedError> = std::result::Result<T, E>;

// Note that the #[error()] strings are mostly placeholder messages -- the expected way to print out
// errors is with the display_to_stderr method, which colorizes errors.

/// An expected error, reported to the user with a documented exit code.
#[derive(Debug, Error)]
#[doc(hidden)]
pub enum ExpectedError {
    #[error("current directory is invalid")]
    CurrentDirInvalid {
        #[source]
        err: std::io::Error,
    },
    #[error("current directory is not valid UTF-8")]
    CurrentDirInvalidUtf8 {
        #[source]
        err: camino::FromPathBufError,
    },
    #[error("config parse error")]
    ConfigParseError {
        #[from]
        err: ConfigParseError,
    },
    #[error("config resolve error")]
    ConfigResolveError {
        #[from]
        err: ConfigResolveError,
    },
    #[error("timings read error")]
    TimingsReadError {
        #[from]
        err: TimingsReadError,
    },
    #[error("discovery read error")]
    DiscoveryReadError {
        #[from]
        err: DiscoveryReadError,
    },
    #[error("partition error")]
    PartitionError {
        #[from]
        err: PartitionError,
    },
    #[error("record input read error")]
    RecordInputOpenError {
        path: Utf8PathBuf,
        #[source]
        err: std::io::Error,
    },
    #[error("record read error")]
    RecordReadError {
        #[from]
        err: RecordReadError,
    },
    #[error("timings write error")]
    TimingsWriteError {
        #[from]
        err: TimingsWriteError,
    },
    #[error("executor error")]
    ExecutorError {
        #[from]
        err: ExecutorError,
    },
    #[error("error writing output")]
    WriteOutputError {
        #[source]
        err: std::io::Error,
    },
}

impl From<PlanError> for ExpectedError {
    fn from(err: PlanError) -> Self {
        match err {
            PlanError::Timings(err) => err.into(),
            PlanError::Discovery(err) => err.into(),
            PlanError::Partition(err) => err.into(),
        }
    }
}

impl ExpectedError {
    pub(crate) fn write_output_error(err: std::io::Error) -> Self {
        Self::WriteOutputError { err }
    }

    /// Returns the exit code for the process.
    pub fn process_exit_code(&self) -> i32 {
        match self {
            Self::CurrentDirInvalid { .. }
            | Self::CurrentDirInvalidUtf8 { .. }
            | Self::ConfigParseError { .. }
            | Self::ConfigResolveError { .. }
            | Self::RecordInputOpenError { .. }
            | Self::RecordReadError { .. } => TimeshardExitCode::SETUP_ERROR,
            Self::TimingsReadError { err } => match err {
                TimingsReadError::Parse { .. } => TimeshardExitCode::CORRUPTED_TIMINGS,
                TimingsReadError::Read { .. } | TimingsReadError::Lock { .. } => {
                    TimeshardExitCode::SETUP_ERROR
                }
            },
            Self::DiscoveryReadError { .. } => TimeshardExitCode::DISCOVERY_FAILED,
            Self::PartitionError { .. } => TimeshardExitCode::INVALID_ARGUMENT,
            Self::ExecutorError { .. } => TimeshardExitCode::EXECUTOR_FAILED,
            Self::TimingsWriteError { err } => match err {
                TimingsWriteError::Merge { error, .. }
                    if matches!(**error, TimingsReadError::Parse { .. }) =>
                {
                    TimeshardExitCode::CORRUPTED_TIMINGS
                }
                _ => TimeshardExitCode::WRITE_OUTPUT_ERROR,
            },
            Self::WriteOutputError { .. } => TimeshardExitCode::WRITE_OUTPUT_ERROR,
        }
    }

    /// Displays this error to stderr.
    pub fn display_to_stderr(&self, styles: &StderrStyles) {
        let mut next_error = match &self {
            Self::CurrentDirInvalid { err } => {
                tracing::error!("could not read the current directory");
                Some(err as &dyn Error)
            }
            Self::CurrentDirInvalidUtf8 { err } => {
                tracing::error!(
                    "current directory `{}` is not valid UTF-8",
                    err.as_path().display().style(styles.bold)
                );
                None
            }
            Self::ConfigParseError { err } => {
                match err.config_file() {
                    Some(config_file) => tracing::error!(
                        "failed to parse timeshard config at `{}`",
                        config_file.style(styles.bold)
                    ),
                    None => tracing::error!("failed to parse timeshard config"),
                }
                Some(err.kind() as &dyn Error)
            }
            Self::ConfigResolveError { err } => {
                tracing::error!("invalid timeshard configuration:");
                for problem in err.problems() {
                    tracing::error!(target: NO_HEADING_TARGET, "  - {problem}");
                }
                None
            }
            Self::TimingsReadError { err } => {
                tracing::error!("{err}");
                err.source()
            }
            Self::DiscoveryReadError { err } => {
                tracing::error!("{err}");
                err.source()
            }
            Self::PartitionError { err } => {
                tracing::error!("{err}");
                None
            }
            Self::RecordInputOpenError { path, err } => {
                tracing::error!(
                    "failed to open recorded durations at `{}`",
                    path.style(styles.bold)
                );
                Some(err as &dyn Error)
            }
            Self::RecordReadError { err } => {
                tracing::error!("{err}");
                err.source()
            }
            Self::TimingsWriteError { err } => {
                tracing::error!("{err}");
                err.source()
            }
            Self::ExecutorError { err } => {
                tracing::error!("failed to execute `{}`", err.command().style(styles.bold));
                err.source()
            }
            Self::WriteOutputError { err } => {
                tracing::error!("error writing output");
                Some(err as &dyn Error)
            }
        };

        while let Some(err) = next_error {
            tracing::error!(target: NO_HEADING_TARGET, "\nCaused by:\n  {}", err);
            next_error = err.source();
        }
    }
}
