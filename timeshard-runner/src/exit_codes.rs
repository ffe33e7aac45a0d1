// Copyright (c) The timeshard Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

/// Documented exit codes for `timeshard` failures.
///
/// When the executor runs, its own exit code is propagated unchanged and none of these apply.
/// Unknown/unexpected failures will always result in exit code 1.
pub enum TimeshardExitCode {}

impl TimeshardExitCode {
    /// No errors occurred and timeshard exited normally.
    pub const OK: i32 = 0;

    /// A user issue happened while setting up a timeshard invocation, for example missing or
    /// invalid configuration.
    pub const SETUP_ERROR: i32 = 96;

    /// The timings file was corrupted.
    pub const CORRUPTED_TIMINGS: i32 = 97;

    /// The list of discovered tests could not be read.
    pub const DISCOVERY_FAILED: i32 = 98;

    /// An invalid argument was passed to the partitioner.
    pub const INVALID_ARGUMENT: i32 = 99;

    /// The executor could not be started.
    pub const EXECUTOR_FAILED: i32 = 100;

    /// Writing data to stdout, stderr or the timings file produced an error.
    pub const WRITE_OUTPUT_ERROR: i32 = 110;
}
