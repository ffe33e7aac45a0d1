// Copyright (c) The timeshard Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration support for timeshard.
//!
//! Configuration is layered from several sources. From lowest to highest precedence:
//!
//! 1. the built-in defaults ([`TimeshardConfig::DEFAULT_CONFIG`]);
//! 2. a `.timeshard.toml` file, found by searching upwards from the current directory;
//! 3. `TIMESHARD_*` environment variables, for example `TIMESHARD_NUM_RUNNERS=4`;
//! 4. command-line arguments ([`ConfigOverrides`]).
//!
//! The config file is deserialized strictly from TOML, so values of the wrong type are rejected
//! rather than coerced. Environment variables are strings by nature and are parsed into the
//! expected types. The merged result is deserialized into a typed [`TimeshardConfig`], then
//! validated once into an immutable [`ResolvedConfig`].

use crate::errors::{ConfigParseError, ConfigParseErrorKind, ConfigResolveError};
use camino::{Utf8Path, Utf8PathBuf};
use config::{
    Config, ConfigBuilder, ConfigError, Environment, File, FileFormat, builder::DefaultState,
};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// The name of the environment variable that controls log output. It shares the configuration
/// prefix but is not a configuration key.
pub const LOG_ENV_VAR: &str = "TIMESHARD_LOG";

/// Configuration merged from all sources, before validation.
#[derive(Clone, Debug, Deserialize)]
pub struct TimeshardConfig {
    input_file: Option<Utf8PathBuf>,
    test_list: Option<Utf8PathBuf>,
    num_runners: Option<i64>,
    runner: Option<i64>,
    dry_run: bool,
    executor: String,
    executor_args: String,
}

/// Values provided on the command line, which take precedence over every other source.
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    /// The timings file.
    pub input_file: Option<Utf8PathBuf>,

    /// The list of discovered tests.
    pub test_list: Option<Utf8PathBuf>,

    /// The total number of shards.
    pub num_runners: Option<i64>,

    /// The shard to run, counting up from 1.
    pub runner: Option<i64>,

    /// Whether to print the command instead of running it.
    pub dry_run: Option<bool>,

    /// The executor command line.
    pub executor: Option<String>,

    /// Extra executor arguments, as a single shell-quoted string.
    pub executor_args: Option<String>,
}

impl TimeshardConfig {
    /// The name of the config file that is searched for.
    pub const CONFIG_FILE_NAME: &'static str = ".timeshard.toml";

    /// Contains the default config as a TOML file.
    pub const DEFAULT_CONFIG: &'static str = include_str!("../default-config.toml");

    /// Environment configuration uses this prefix, plus a `_`.
    pub const ENVIRONMENT_PREFIX: &'static str = "TIMESHARD";

    /// Reads and merges configuration from all sources.
    ///
    /// `config_file` is the config file to read, if any; see [`Self::find_config_file`].
    /// `env_vars` are the process's environment variables. Only those starting with
    /// [`Self::ENVIRONMENT_PREFIX`] are used.
    pub fn from_sources(
        config_file: Option<&Utf8Path>,
        env_vars: impl IntoIterator<Item = (String, String)>,
        overrides: &ConfigOverrides,
    ) -> Result<Self, ConfigParseError> {
        let map_err = |kind| ConfigParseError::new(config_file.map(ToOwned::to_owned), kind);

        let mut builder = Self::make_default_config();
        let mut unknown = BTreeSet::new();

        match config_file {
            Some(config_file) => {
                tracing::debug!("reading config from `{config_file}`");
                let fragment =
                    ConfigFileFragment::read(config_file, &mut unknown).map_err(map_err)?;
                let source = Config::try_from(&fragment)
                    .map_err(|error| map_err(ConfigParseErrorKind::BuildError(error)))?;
                builder = builder.add_source(source);
            }
            None => {
                tracing::debug!("no {} found", Self::CONFIG_FILE_NAME);
            }
        }

        let env_prefix = format!("{}_", Self::ENVIRONMENT_PREFIX);
        let env: config::Map<String, String> = env_vars
            .into_iter()
            .filter(|(key, _)| key.starts_with(&env_prefix) && key != LOG_ENV_VAR)
            .collect();
        if !env.is_empty() {
            tracing::debug!(
                "reading config from environment: {}",
                env.keys().sorted().join(", ")
            );
        }
        builder = builder.add_source(
            Environment::with_prefix(Self::ENVIRONMENT_PREFIX)
                .try_parsing(true)
                .source(Some(env)),
        );

        builder = Self::apply_overrides(builder, overrides)
            .map_err(|error| map_err(ConfigParseErrorKind::BuildError(error)))?;

        let config = Self::build_and_deserialize_config(&builder, &mut unknown).map_err(map_err)?;
        if !unknown.is_empty() {
            tracing::warn!(
                "ignoring unknown configuration keys: {}",
                unknown.iter().join(", ")
            );
        }

        Ok(config)
    }

    /// Searches `start_dir` and its ancestors for [`Self::CONFIG_FILE_NAME`].
    pub fn find_config_file(start_dir: &Utf8Path) -> Option<Utf8PathBuf> {
        start_dir
            .ancestors()
            .map(|dir| dir.join(Self::CONFIG_FILE_NAME))
            .find(|path| path.is_file())
    }

    /// Validates the merged configuration, collecting every problem found.
    pub fn resolve(self) -> Result<ResolvedConfig, ConfigResolveError> {
        let mut problems = Vec::new();

        if self.input_file.is_none() {
            problems.push("missing required config: input_file".to_owned());
        }
        if self.test_list.is_none() {
            problems.push("missing required config: test_list".to_owned());
        }

        let num_runners = match self.num_runners {
            None => {
                problems.push("missing required config: num_runners".to_owned());
                None
            }
            Some(n) if n < 1 => {
                problems.push(format!("num_runners must be at least 1 (got {n})"));
                None
            }
            Some(n) => match usize::try_from(n) {
                Ok(n) => Some(n),
                Err(_) => {
                    problems.push(format!("num_runners is too large (got {n})"));
                    None
                }
            },
        };

        let runner = match (self.runner, num_runners) {
            (None, _) => {
                problems.push("missing required config: runner".to_owned());
                None
            }
            (Some(runner), Some(num_runners))
                if runner < 1 || usize::try_from(runner).map_or(true, |r| r > num_runners) =>
            {
                problems.push(format!(
                    "runner must be between 1 and {num_runners}, inclusive (got {runner})"
                ));
                None
            }
            (Some(runner), _) if runner < 1 => {
                problems.push(format!("runner must be at least 1 (got {runner})"));
                None
            }
            (Some(runner), _) => usize::try_from(runner).ok(),
        };

        let executor = match shell_words::split(&self.executor) {
            Ok(words) if words.is_empty() => {
                problems.push("executor must not be empty".to_owned());
                None
            }
            Ok(words) => Some(words),
            Err(error) => {
                problems.push(format!("executor `{}` is invalid: {error}", self.executor));
                None
            }
        };

        let executor_args = match shell_words::split(&self.executor_args) {
            Ok(words) => Some(words),
            Err(error) => {
                problems.push(format!(
                    "executor_args `{}` is invalid: {error}",
                    self.executor_args
                ));
                None
            }
        };

        match (
            self.input_file,
            self.test_list,
            num_runners,
            runner,
            executor,
            executor_args,
        ) {
            (
                Some(input_file),
                Some(test_list),
                Some(num_runners),
                Some(runner),
                Some(executor),
                Some(executor_args),
            ) if problems.is_empty() => Ok(ResolvedConfig {
                input_file,
                test_list,
                num_runners,
                runner,
                dry_run: self.dry_run,
                executor,
                executor_args,
            }),
            _ => Err(ConfigResolveError::new(problems)),
        }
    }

    // ---
    // Helper methods
    // ---

    fn make_default_config() -> ConfigBuilder<DefaultState> {
        Config::builder().add_source(File::from_str(Self::DEFAULT_CONFIG, FileFormat::Toml))
    }

    fn apply_overrides(
        builder: ConfigBuilder<DefaultState>,
        overrides: &ConfigOverrides,
    ) -> Result<ConfigBuilder<DefaultState>, ConfigError> {
        builder
            .set_override_option(
                "input_file",
                overrides.input_file.as_ref().map(|path| path.to_string()),
            )?
            .set_override_option(
                "test_list",
                overrides.test_list.as_ref().map(|path| path.to_string()),
            )?
            .set_override_option("num_runners", overrides.num_runners)?
            .set_override_option("runner", overrides.runner)?
            .set_override_option("dry_run", overrides.dry_run)?
            .set_override_option("executor", overrides.executor.clone())?
            .set_override_option("executor_args", overrides.executor_args.clone())
    }

    fn build_and_deserialize_config(
        builder: &ConfigBuilder<DefaultState>,
        unknown: &mut BTreeSet<String>,
    ) -> Result<Self, ConfigParseErrorKind> {
        let config = builder
            .build_cloned()
            .map_err(ConfigParseErrorKind::BuildError)?;

        let mut cb = |path: serde_ignored::Path| {
            unknown.insert(path.to_string());
        };
        let ignored_de = serde_ignored::Deserializer::new(config, &mut cb);
        serde_path_to_error::deserialize(ignored_de)
            .map_err(ConfigParseErrorKind::DeserializeError)
    }
}

/// The keys a config file may set, with their exact TOML types.
///
/// `config` coerces strings into numbers and booleans, so the file is deserialized through this
/// type before it is layered in.
#[derive(Debug, Default, Deserialize, Serialize)]
struct ConfigFileFragment {
    #[serde(skip_serializing_if = "Option::is_none")]
    input_file: Option<Utf8PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    test_list: Option<Utf8PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_runners: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    runner: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    dry_run: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    executor: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    executor_args: Option<String>,
}

impl ConfigFileFragment {
    fn read(
        config_file: &Utf8Path,
        unknown: &mut BTreeSet<String>,
    ) -> Result<Self, ConfigParseErrorKind> {
        let toml_str =
            std::fs::read_to_string(config_file).map_err(ConfigParseErrorKind::ReadError)?;
        let toml_de = toml::de::Deserializer::parse(&toml_str)
            .map_err(|error| ConfigParseErrorKind::TomlParseError(Box::new(error)))?;

        let mut cb = |path: serde_ignored::Path| {
            unknown.insert(path.to_string());
        };
        let ignored_de = serde_ignored::Deserializer::new(toml_de, &mut cb);
        serde_path_to_error::deserialize(ignored_de)
            .map_err(|error| ConfigParseErrorKind::TomlDeserializeError(Box::new(error)))
    }
}

/// Fully validated configuration for a partitioning run.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ResolvedConfig {
    input_file: Utf8PathBuf,
    test_list: Utf8PathBuf,
    num_runners: usize,
    runner: usize,
    dry_run: bool,
    executor: Vec<String>,
    executor_args: Vec<String>,
}

impl ResolvedConfig {
    /// Returns the path to the timings file.
    pub fn input_file(&self) -> &Utf8Path {
        &self.input_file
    }

    /// Returns the path to the list of discovered tests.
    pub fn test_list(&self) -> &Utf8Path {
        &self.test_list
    }

    /// Returns the total number of shards. Always at least 1.
    pub fn num_runners(&self) -> usize {
        self.num_runners
    }

    /// Returns the shard to run, in `1..=num_runners`.
    pub fn runner(&self) -> usize {
        self.runner
    }

    /// Returns true if the executor command should be printed rather than run.
    pub fn dry_run(&self) -> bool {
        self.dry_run
    }

    /// Returns the executor program and its leading arguments. Never empty.
    pub fn executor(&self) -> &[String] {
        &self.executor
    }

    /// Returns the extra arguments passed to the executor.
    pub fn executor_args(&self) -> &[String] {
        &self.executor_args
    }
}
