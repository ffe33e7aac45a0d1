// Copyright (c) The timeshard Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The live list of tests, as discovered by the external test framework.
//!
//! timeshard doesn't discover tests itself. The framework writes out a JSON array of tests, each
//! with its stable name and location:
//!
//! ```json
//! [
//!   { "name": "Widget renders", "file": "spec/widget_spec.rb", "locator": "1:1" },
//!   { "name": "Widget saves", "file": "spec/widget_spec.rb", "locator": 14 }
//! ]
//! ```
//!
//! The locator may be a string (an ordinal such as an rspec scoped id) or a line number.

use crate::{errors::DiscoveryReadError, timings::TestLocation};
use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;

/// A test reported by the external framework.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DiscoveredTest {
    /// The stable, fully qualified name of the test.
    pub name: String,

    /// Where the test lives.
    pub location: TestLocation,
}

impl DiscoveredTest {
    /// Creates a new `DiscoveredTest`.
    pub fn new(name: impl Into<String>, location: TestLocation) -> Self {
        Self {
            name: name.into(),
            location,
        }
    }
}

/// The list of tests discovered by the external framework, in discovery order.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct DiscoveredTests {
    tests: Vec<DiscoveredTest>,
}

impl DiscoveredTests {
    /// Reads a test list from a JSON file.
    pub fn from_path(path: &Utf8Path) -> Result<Self, DiscoveryReadError> {
        let contents = std::fs::read_to_string(path).map_err(|error| DiscoveryReadError::Read {
            path: path.to_owned(),
            error,
        })?;
        Self::parse(&contents, Some(path))
    }

    /// Parses a test list from a JSON string.
    pub fn from_json_str(json: &str) -> Result<Self, DiscoveryReadError> {
        Self::parse(json, None)
    }

    fn parse(json: &str, path: Option<&Utf8Path>) -> Result<Self, DiscoveryReadError> {
        let entries: Vec<TestListEntry> =
            serde_json::from_str(json).map_err(|error| DiscoveryReadError::Parse {
                path: path.map(ToOwned::to_owned),
                error,
            })?;

        let tests = entries
            .into_iter()
            .enumerate()
            .map(|(index, entry)| entry.into_test(index))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { tests })
    }

    /// Returns the number of discovered tests.
    pub fn len(&self) -> usize {
        self.tests.len()
    }

    /// Returns true if no tests were discovered.
    pub fn is_empty(&self) -> bool {
        self.tests.is_empty()
    }

    /// Iterates over the discovered tests.
    pub fn iter(&self) -> impl ExactSizeIterator<Item = &DiscoveredTest> + '_ {
        self.tests.iter()
    }
}

impl FromIterator<DiscoveredTest> for DiscoveredTests {
    fn from_iter<T: IntoIterator<Item = DiscoveredTest>>(iter: T) -> Self {
        Self {
            tests: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for DiscoveredTests {
    type Item = DiscoveredTest;
    type IntoIter = std::vec::IntoIter<DiscoveredTest>;

    fn into_iter(self) -> Self::IntoIter {
        self.tests.into_iter()
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct TestListEntry {
    name: String,
    file: Utf8PathBuf,
    locator: Locator,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Locator {
    Line(u64),
    Ordinal(String),
}

impl TestListEntry {
    fn into_test(self, index: usize) -> Result<DiscoveredTest, DiscoveryReadError> {
        if self.name.is_empty() {
            return Err(DiscoveryReadError::EmptyField {
                index,
                field: "name",
            });
        }
        if self.file.as_str().is_empty() {
            return Err(DiscoveryReadError::EmptyField {
                index,
                field: "file",
            });
        }
        let locator = match self.locator {
            Locator::Line(line) => line.to_string(),
            Locator::Ordinal(ordinal) if ordinal.is_empty() => {
                return Err(DiscoveryReadError::EmptyField {
                    index,
                    field: "locator",
                });
            }
            Locator::Ordinal(ordinal) => ordinal,
        };

        Ok(DiscoveredTest::new(
            self.name,
            TestLocation::new(self.file, locator),
        ))
    }
}
