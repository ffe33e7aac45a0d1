// Copyright (c) The timeshard Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

mod fixtures;
mod pipeline;
mod recording;
mod timings_file;
