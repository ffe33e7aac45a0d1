// Copyright (c) The timeshard Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! Core functionality for [timeshard](https://crates.io/crates/timeshard), which splits a test
//! suite across parallel CI shards using historical per-test durations.
//!
//! The basic flow is:
//!
//! 1. load the [timings file](timings::TimingStore) and the [discovered tests](discovery);
//! 2. [reconcile](reconcile::reconcile) the two by test name;
//! 3. [partition] the result into one group per shard;
//! 4. select the [tests for this shard](shard::tests_for_shard) and hand them to the
//!    [executor].
//!
//! Steps 1-3 are identical on every shard, so no coordination is needed between them.
//! [`plan::ShardPlan`] runs all three.

pub mod config;
pub mod discovery;
pub mod errors;
pub mod executor;
pub mod exit_codes;
pub mod partition;
pub mod plan;
pub mod reconcile;
pub mod recorder;
pub mod shard;
pub mod timings;
