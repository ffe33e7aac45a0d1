// Copyright (c) The timeshard Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Split a test suite across parallel CI shards using historical per-test durations.
//!
//! Run `timeshard run --num-runners N --runner K` on each of `N` CI machines. Every machine
//! computes the same partitioning and runs only its own share of the tests. Record durations
//! after a run with `timeshard record`, so the next partitioning is better balanced.
//!
//! The core logic lives in [`timeshard_runner`].

#![warn(missing_docs)]

mod dispatch;
mod errors;
mod output;

#[doc(hidden)]
pub use dispatch::*;
#[doc(hidden)]
pub use errors::*;
#[doc(hidden)]
pub use output::{OutputContext, OutputWriter};
