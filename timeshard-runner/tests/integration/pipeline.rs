// Copyright (c) The timeshard Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::fixtures::{suite, write_test_list, write_timings};
use camino_tempfile::Utf8TempDir;
use color_eyre::eyre::{Result, ensure};
use pretty_assertions::assert_eq;
use std::collections::BTreeMap;
use timeshard_runner::{errors::PlanError, plan::ShardPlan, timings::DurationSource};

#[test]
fn every_test_runs_on_exactly_one_shard() -> Result<()> {
    let dir = Utf8TempDir::new()?;
    let timings_path = dir.path().join("timings.txt");
    let test_list_path = dir.path().join("tests.json");

    let suite = suite(60);
    // Only the first 50 tests have history; the rest are imputed.
    write_timings(
        &timings_path,
        suite
            .iter()
            .take(50)
            .map(|(name, _, _, duration)| (name.as_str(), *duration))
            .chain([("Deleted test", 3.0)]),
    )?;
    write_test_list(
        &test_list_path,
        suite
            .iter()
            .map(|(name, file, locator, _)| (name.as_str(), file.as_str(), locator.as_str())),
    )?;

    let num_runners = 4;
    let mut seen: BTreeMap<String, usize> = BTreeMap::new();
    for runner in 1..=num_runners {
        // Each shard builds its own plan, as separate CI machines would.
        let plan = ShardPlan::from_paths(&timings_path, &test_list_path, num_runners)?;
        assert_eq!(plan.report().stale, vec!["Deleted test".to_owned()]);
        assert_eq!(plan.report().imputed.len(), 10);

        let selection = plan.shard(runner)?;
        for test in selection.tests() {
            *seen.entry(test.name.clone()).or_default() += 1;
            if test.source == DurationSource::Imputed {
                assert_eq!(test.duration, plan.report().imputed_duration);
            }
        }
        ensure!(!selection.is_empty(), "shard {runner} has tests");
    }

    assert_eq!(seen.len(), suite.len());
    ensure!(
        seen.values().all(|&count| count == 1),
        "each test is selected exactly once: {seen:?}"
    );
    Ok(())
}

#[test]
fn shards_agree_on_the_partitioning() -> Result<()> {
    let dir = Utf8TempDir::new()?;
    let timings_path = dir.path().join("timings.txt");
    let test_list_path = dir.path().join("tests.json");
    let suite = suite(30);
    write_timings(
        &timings_path,
        suite
            .iter()
            .map(|(name, _, _, duration)| (name.as_str(), *duration)),
    )?;
    write_test_list(
        &test_list_path,
        suite
            .iter()
            .map(|(name, file, locator, _)| (name.as_str(), file.as_str(), locator.as_str())),
    )?;

    let first = ShardPlan::from_paths(&timings_path, &test_list_path, 3)?;
    let second = ShardPlan::from_paths(&timings_path, &test_list_path, 3)?;
    assert_eq!(first.partitioning(), second.partitioning());

    let totals: Vec<f64> = first
        .partitioning()
        .groups()
        .map(|group| group.total_duration())
        .collect();
    let max_duration = suite
        .iter()
        .map(|(_, _, _, duration)| *duration)
        .fold(0.0, f64::max);
    let (min, max) = totals
        .iter()
        .fold((f64::INFINITY, 0.0_f64), |(min, max), &t| (min.min(t), max.max(t)));
    ensure!(
        max - min <= max_duration + 1e-9,
        "shard totals {totals:?} are within the longest test of each other"
    );
    Ok(())
}

#[test]
fn missing_test_list() -> Result<()> {
    let dir = Utf8TempDir::new()?;
    let error = ShardPlan::from_paths(
        &dir.path().join("timings.txt"),
        &dir.path().join("tests.json"),
        2,
    )
    .expect_err("test list does not exist");
    ensure!(
        matches!(error, PlanError::Discovery(_)),
        "expected a discovery error, got {error:?}"
    );
    Ok(())
}
