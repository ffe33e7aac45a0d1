// Copyright (c) The timeshard Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use camino_tempfile::Utf8TempDir;
use color_eyre::eyre::{Result, ensure};
use pretty_assertions::assert_eq;
use std::sync::atomic::{AtomicBool, Ordering};
use test_case::test_case;
use timeshard_runner::{
    errors::{TimingsReadError, TimingsWriteError},
    timings::{SEPARATOR, Timing, TimingStore, WriteLock},
};

#[test]
fn missing_file_is_empty() -> Result<()> {
    let dir = Utf8TempDir::new()?;
    let store = TimingStore::load(&dir.path().join("timings.txt"))?;
    ensure!(store.is_empty(), "missing file loads as an empty store");
    Ok(())
}

#[test_case(WriteLock::None; "unlocked")]
#[test_case(WriteLock::Exclusive; "locked")]
fn write_then_load(lock: WriteLock) -> Result<()> {
    let dir = Utf8TempDir::new()?;
    let path = dir.path().join("timings.txt");

    let store: TimingStore = [
        Timing::new("Widget renders", 0.25),
        Timing::new("Widget saves, then reloads", 12.5),
        Timing::new("Widget is instant", 0.0),
    ]
    .into_iter()
    .collect();
    store.write(&path, lock)?;
    assert_eq!(TimingStore::load(&path)?, store);

    // A shorter write replaces the file rather than leaving old bytes behind.
    let shorter: TimingStore = [Timing::new("a", 1.0)].into_iter().collect();
    shorter.write(&path, lock)?;
    assert_eq!(std::fs::read_to_string(&path)?, format!("a{SEPARATOR}1\n"));
    Ok(())
}

#[test]
fn corrupted_file_names_the_line() -> Result<()> {
    let dir = Utf8TempDir::new()?;
    let path = dir.path().join("timings.txt");
    std::fs::write(
        &path,
        format!("a{SEPARATOR}1.5\nb{SEPARATOR}2\nc{SEPARATOR}NaN\n"),
    )?;

    match TimingStore::load(&path) {
        Err(TimingsReadError::Parse { path: error_path, error }) => {
            assert_eq!(error_path, path);
            assert_eq!(error.line_number(), 3);
        }
        other => panic!("expected a parse error, got {other:?}"),
    }
    Ok(())
}

#[cfg(unix)]
#[test]
fn unreadable_path_is_a_read_error() -> Result<()> {
    let dir = Utf8TempDir::new()?;
    // A directory exists but cannot be read as a file.
    let error = TimingStore::load(dir.path()).expect_err("directories are not timings files");
    ensure!(
        matches!(error, TimingsReadError::Read { .. }),
        "expected a read error, got {error:?}"
    );
    Ok(())
}

#[test]
fn failed_write_releases_lock() -> Result<()> {
    let dir = Utf8TempDir::new()?;
    let path = dir.path().join("timings.txt");
    let original: TimingStore = [Timing::new("a", 1.0)].into_iter().collect();
    original.write(&path, WriteLock::Exclusive)?;

    let bad: TimingStore = [Timing::new("b", 2.0), Timing::new("Widget\nrenders", 3.0)]
        .into_iter()
        .collect();
    let error = bad
        .write(&path, WriteLock::Exclusive)
        .expect_err("name with a newline can't be written");
    ensure!(
        matches!(error, TimingsWriteError::InvalidName { .. }),
        "expected an invalid name error, got {error:?}"
    );
    assert_eq!(TimingStore::load(&path)?, original, "file is left untouched");

    // Nothing is holding the lock any more.
    std::fs::File::open(&path)?.try_lock()?;

    let replacement: TimingStore = [Timing::new("c", 4.0)].into_iter().collect();
    replacement.write(&path, WriteLock::Exclusive)?;
    assert_eq!(TimingStore::load(&path)?, replacement);
    Ok(())
}

#[test]
fn load_never_sees_a_partial_locked_write() -> Result<()> {
    const RECORDS: usize = 5000;
    const WRITES: usize = 50;

    let dir = Utf8TempDir::new()?;
    let path = dir.path().join("timings.txt");
    let store: TimingStore = (0..RECORDS)
        .map(|i| Timing::new(format!("Suite test {i}"), i as f64 / 8.0))
        .collect();
    store.write(&path, WriteLock::Exclusive)?;

    let done = AtomicBool::new(false);
    std::thread::scope(|s| -> Result<()> {
        let writer = s.spawn(|| {
            let result = (0..WRITES).try_for_each(|_| store.write(&path, WriteLock::Exclusive));
            done.store(true, Ordering::Release);
            result
        });

        while !done.load(Ordering::Acquire) {
            let loaded = TimingStore::load(&path)?;
            ensure!(
                loaded.len() == RECORDS,
                "read {} records while a write was in progress",
                loaded.len()
            );
        }

        writer.join().expect("writer thread panicked")?;
        Ok(())
    })?;

    assert_eq!(TimingStore::load(&path)?, store);
    Ok(())
}
