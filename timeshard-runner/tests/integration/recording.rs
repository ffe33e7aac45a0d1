// Copyright (c) The timeshard Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::fixtures::write_timings;
use camino_tempfile::Utf8TempDir;
use color_eyre::eyre::{Result, ensure};
use pretty_assertions::assert_eq;
use std::collections::BTreeSet;
use timeshard_runner::{
    recorder::{PersistMode, TimingRecorder, TimingSink},
    timings::{Timing, TimingStore, WriteLock},
};

#[test]
fn replace_overwrites_history() -> Result<()> {
    let dir = Utf8TempDir::new()?;
    let path = dir.path().join("timings.txt");
    write_timings(&path, [("old", 1.0), ("kept?", 2.0)])?;

    let mut recorder = TimingRecorder::new();
    recorder.record("new", 0.5);
    recorder.persist(&path, PersistMode::Replace, WriteLock::Exclusive)?;

    assert_eq!(
        TimingStore::load(&path)?.into_timings(),
        vec![Timing::new("new", 0.5)]
    );
    Ok(())
}

#[test]
fn shards_merge_into_one_file() -> Result<()> {
    let dir = Utf8TempDir::new()?;
    let path = dir.path().join("timings.txt");
    write_timings(&path, [("a", 1.0), ("b", 2.0), ("c", 3.0)])?;

    let mut shard_1 = TimingRecorder::new();
    shard_1.record("a", 1.5);
    shard_1.record("d", 4.0);
    let mut shard_2 = TimingRecorder::new();
    shard_2
        .record_json_lines("{\"name\": \"b\", \"duration\": 0.5}\n".as_bytes())?;

    shard_1.persist(&path, PersistMode::Merge, WriteLock::Exclusive)?;
    shard_2.persist(&path, PersistMode::Merge, WriteLock::Exclusive)?;

    assert_eq!(
        TimingStore::load(&path)?.into_timings(),
        vec![
            Timing::new("a", 1.5),
            Timing::new("b", 0.5),
            Timing::new("c", 3.0),
            Timing::new("d", 4.0),
        ]
    );
    Ok(())
}

#[test]
fn merge_creates_missing_file() -> Result<()> {
    let dir = Utf8TempDir::new()?;
    let path = dir.path().join("timings.txt");

    let mut recorder = TimingRecorder::new();
    recorder.record("only", 2.0);
    recorder.persist(&path, PersistMode::Merge, WriteLock::None)?;

    assert_eq!(
        TimingStore::load(&path)?.into_timings(),
        vec![Timing::new("only", 2.0)]
    );
    Ok(())
}

#[test]
fn concurrent_merges_keep_every_timing() -> Result<()> {
    const SHARDS: usize = 8;
    const TESTS_PER_SHARD: usize = 50;

    let dir = Utf8TempDir::new()?;
    let path = dir.path().join("timings.txt");
    write_timings(&path, [("existing", 1.0)])?;

    let recorders: Vec<TimingRecorder> = (0..SHARDS)
        .map(|shard| {
            let mut recorder = TimingRecorder::new();
            for test in 0..TESTS_PER_SHARD {
                recorder.record(&format!("shard {shard} test {test}"), test as f64);
            }
            recorder
        })
        .collect();

    std::thread::scope(|s| {
        let path = path.as_path();
        let handles: Vec<_> = recorders
            .iter()
            .map(|recorder| {
                s.spawn(move || recorder.persist(path, PersistMode::Merge, WriteLock::Exclusive))
            })
            .collect();
        handles
            .into_iter()
            .try_for_each(|handle| handle.join().expect("recording thread panicked"))
    })?;

    let names: BTreeSet<String> = TimingStore::load(&path)?
        .into_timings()
        .into_iter()
        .map(|timing| timing.name)
        .collect();
    ensure!(
        names.len() == SHARDS * TESTS_PER_SHARD + 1,
        "expected every recorded timing to survive, found {}",
        names.len()
    );
    ensure!(names.contains("existing"), "existing timing was kept");
    for shard in 0..SHARDS {
        for test in 0..TESTS_PER_SHARD {
            ensure!(
                names.contains(&format!("shard {shard} test {test}")),
                "timing from shard {shard} test {test} was lost"
            );
        }
    }
    Ok(())
}

#[test]
fn unstorable_names_never_reach_the_file() -> Result<()> {
    let dir = Utf8TempDir::new()?;
    let path = dir.path().join("timings.txt");

    let mut recorder = TimingRecorder::new();
    recorder.record("a\u{1D}b", 2.0);
    recorder.record("Widget\nrenders", 1.0);
    recorder.record("Widget renders", 1.0);
    recorder.persist(&path, PersistMode::Replace, WriteLock::Exclusive)?;

    assert_eq!(
        TimingStore::load(&path)?.into_timings(),
        vec![Timing::new("Widget renders", 1.0)]
    );
    Ok(())
}
