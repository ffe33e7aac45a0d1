// Copyright (c) The timeshard Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use camino::Utf8Path;
use color_eyre::eyre::Result;
use itertools::Itertools;
use timeshard_runner::timings::SEPARATOR;

/// A suite of `count` tests spread across a handful of files, with uneven durations.
pub(crate) fn suite(count: usize) -> Vec<(String, String, String, f64)> {
    (0..count)
        .map(|i| {
            let name = format!("Suite test {i}");
            let file = format!("spec/file_{}_spec.rb", i % 7);
            let locator = format!("1:{}", i / 7 + 1);
            // A few slow tests and a long tail of fast ones.
            let duration = if i % 11 == 0 {
                20.0 + i as f64
            } else {
                0.1 * (i % 5 + 1) as f64
            };
            (name, file, locator, duration)
        })
        .collect()
}

pub(crate) fn write_timings<'a>(
    path: &Utf8Path,
    timings: impl IntoIterator<Item = (&'a str, f64)>,
) -> Result<()> {
    let contents: String = timings
        .into_iter()
        .map(|(name, duration)| format!("{name}{SEPARATOR}{duration}\n"))
        .collect();
    std::fs::write(path, contents)?;
    Ok(())
}

pub(crate) fn write_test_list<'a>(
    path: &Utf8Path,
    tests: impl IntoIterator<Item = (&'a str, &'a str, &'a str)>,
) -> Result<()> {
    let entries = tests
        .into_iter()
        .map(|(name, file, locator)| {
            serde_json::json!({ "name": name, "file": file, "locator": locator }).to_string()
        })
        .join(",\n  ");
    std::fs::write(path, format!("[\n  {entries}\n]\n"))?;
    Ok(())
}
