// Copyright (c) The timeshard Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{
    ExpectedError,
    errors::Result,
    output::{OutputContext, OutputOpts, OutputWriter, clap_styles},
};
use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use std::io::{self, BufReader, Write};
use timeshard_runner::{
    config::{ConfigOverrides, ResolvedConfig, TimeshardConfig},
    executor::ShardCommand,
    exit_codes::TimeshardExitCode,
    plan::ShardPlan,
    recorder::{PersistMode, TimingRecorder},
    timings::WriteLock,
};
use tracing::{debug, info};

/// Split a test suite across CI shards using historical test durations.
///
/// Every shard computes the same partitioning from the same timings file and test list, then runs
/// only its own share of the tests.
#[derive(Debug, Parser)]
#[command(version, styles = clap_styles::style())]
pub struct TimeshardApp {
    #[command(flatten)]
    output: OutputOpts,

    #[command(subcommand)]
    command: Command,
}

impl TimeshardApp {
    /// Initializes the output context.
    pub fn init_output(&self) -> OutputContext {
        self.output.init()
    }

    /// Executes the app, returning the process exit code.
    pub fn exec(self, output: OutputContext, output_writer: &mut OutputWriter) -> Result<i32> {
        match self.command {
            Command::Run(opts) => opts.exec(output, output_writer),
            Command::Record(opts) => opts.exec(),
        }
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Partition the test suite and run the tests for one shard
    Run(RunOpts),

    /// Record observed test durations into a timings file
    ///
    /// Durations are read as JSON lines, one `{"name": ..., "duration": ...}` object per
    /// completed test, with the duration in seconds.
    Record(RecordOpts),
}

#[derive(Debug, Args)]
struct RunOpts {
    /// Config file [default: .timeshard.toml in the current directory or an ancestor]
    #[arg(long, value_name = "PATH")]
    config_file: Option<Utf8PathBuf>,

    /// Timings file with historical test durations
    #[arg(long, value_name = "PATH")]
    input_file: Option<Utf8PathBuf>,

    /// JSON list of the tests discovered in this run
    #[arg(long, value_name = "PATH")]
    test_list: Option<Utf8PathBuf>,

    /// Total number of shards
    #[arg(long, value_name = "N", allow_negative_numbers = true)]
    num_runners: Option<i64>,

    /// The shard to run, counting up from 1
    #[arg(long, value_name = "K", allow_negative_numbers = true)]
    runner: Option<i64>,

    /// Command used to run the selected tests
    #[arg(long, value_name = "COMMAND")]
    executor: Option<String>,

    /// Print the command instead of running it
    #[arg(long, overrides_with = "no_dry_run")]
    dry_run: bool,

    /// Run the command, even if a config source asks for a dry run
    #[arg(long, overrides_with = "dry_run")]
    no_dry_run: bool,

    /// Extra arguments passed to the executor before the selected files
    #[arg(last = true, value_name = "EXECUTOR-ARGS")]
    executor_args: Vec<String>,
}

impl RunOpts {
    fn to_overrides(&self) -> ConfigOverrides {
        let dry_run = if self.dry_run {
            Some(true)
        } else if self.no_dry_run {
            Some(false)
        } else {
            None
        };
        let executor_args =
            (!self.executor_args.is_empty()).then(|| shell_words::join(&self.executor_args));

        ConfigOverrides {
            input_file: self.input_file.clone(),
            test_list: self.test_list.clone(),
            num_runners: self.num_runners,
            runner: self.runner,
            dry_run,
            executor: self.executor.clone(),
            executor_args,
        }
    }

    fn make_config(&self) -> Result<ResolvedConfig> {
        let config_file = match &self.config_file {
            Some(config_file) => Some(config_file.clone()),
            None => TimeshardConfig::find_config_file(&current_dir()?),
        };

        let config = TimeshardConfig::from_sources(
            config_file.as_deref(),
            std::env::vars(),
            &self.to_overrides(),
        )?;
        Ok(config.resolve()?)
    }

    fn exec(self, output: OutputContext, output_writer: &mut OutputWriter) -> Result<i32> {
        let config = self.make_config()?;
        debug!(
            "running shard {} of {} (timings: `{}`, test list: `{}`)",
            config.runner(),
            config.num_runners(),
            config.input_file(),
            config.test_list(),
        );

        let plan = ShardPlan::from_config(&config)?;
        let selection = plan.shard(config.runner())?;
        let command = ShardCommand::new(&config, &selection);

        let mut writer = output_writer.stdout_writer();
        write!(writer, "{}", plan.partitioning().summary())
            .map_err(ExpectedError::write_output_error)?;
        if output.verbose {
            writeln!(writer, "Shard {} files:", selection.shard())
                .map_err(ExpectedError::write_output_error)?;
            for file in selection.files() {
                writeln!(writer, "  {file}").map_err(ExpectedError::write_output_error)?;
            }
        }

        if config.dry_run() {
            write!(writer, "{}", command.dry_run_message())
                .map_err(ExpectedError::write_output_error)?;
            writer.flush().map_err(ExpectedError::write_output_error)?;
            return Ok(TimeshardExitCode::OK);
        }
        // The executor shares stdout, so everything printed so far must come first.
        writer.flush().map_err(ExpectedError::write_output_error)?;
        drop(writer);

        if selection.is_empty() {
            // Running the executor with no files would run the whole suite.
            info!("no tests selected for shard {}, skipping", selection.shard());
            return Ok(TimeshardExitCode::OK);
        }

        Ok(command.run()?)
    }
}

#[derive(Debug, Args)]
struct RecordOpts {
    /// Timings file to write
    #[arg(long, short, value_name = "PATH")]
    output: Utf8PathBuf,

    /// File to read durations from, or `-` for standard input
    #[arg(long, short, value_name = "PATH", default_value = "-")]
    input: Utf8PathBuf,

    /// Keep timings for tests not recorded in this run
    #[arg(long)]
    merge: bool,

    /// Write the timings file without taking a lock
    #[arg(long, conflicts_with = "merge")]
    no_lock: bool,
}

impl RecordOpts {
    fn exec(self) -> Result<i32> {
        let mut recorder = TimingRecorder::new();
        let count = if self.input == "-" {
            recorder.record_json_lines(io::stdin().lock())?
        } else {
            let file = std::fs::File::open(&self.input).map_err(|err| {
                ExpectedError::RecordInputOpenError {
                    path: self.input.clone(),
                    err,
                }
            })?;
            recorder.record_json_lines(BufReader::new(file))?
        };

        let mode = if self.merge {
            PersistMode::Merge
        } else {
            PersistMode::Replace
        };
        let lock = if self.no_lock {
            WriteLock::None
        } else {
            WriteLock::Exclusive
        };
        recorder.persist(&self.output, mode, lock)?;

        info!(
            "recorded {count} observations ({} tests) to `{}`",
            recorder.len(),
            self.output,
        );
        Ok(TimeshardExitCode::OK)
    }
}

fn current_dir() -> Result<Utf8PathBuf> {
    let dir = std::env::current_dir().map_err(|err| ExpectedError::CurrentDirInvalid { err })?;
    Utf8PathBuf::try_from(dir).map_err(|err| ExpectedError::CurrentDirInvalidUtf8 { err })
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino_tempfile::Utf8TempDir;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    fn parse(args: &[&str]) -> std::result::Result<TimeshardApp, clap::Error> {
        TimeshardApp::try_parse_from(std::iter::once("timeshard").chain(args.iter().copied()))
    }

    fn run_opts(args: &[&str]) -> RunOpts {
        match parse(args).expect("arguments are valid").command {
            Command::Run(opts) => opts,
            other => panic!("expected run, got {other:?}"),
        }
    }

    #[test]
    fn run_overrides() {
        let opts = run_opts(&[
            "run",
            "--input-file",
            "timings.txt",
            "--num-runners",
            "4",
            "--runner",
            "2",
            "--dry-run",
            "--",
            "--format",
            "documentation",
            "--tag",
            "~slow one",
        ]);
        let overrides = opts.to_overrides();
        assert_eq!(overrides.input_file, Some("timings.txt".into()));
        assert_eq!(overrides.test_list, None);
        assert_eq!(overrides.num_runners, Some(4));
        assert_eq!(overrides.runner, Some(2));
        assert_eq!(overrides.dry_run, Some(true));
        assert_eq!(
            overrides.executor_args.as_deref(),
            Some("--format documentation --tag '~slow one'")
        );
    }

    #[test_case(&["run"], None; "unset")]
    #[test_case(&["run", "--dry-run"], Some(true); "dry run")]
    #[test_case(&["run", "--no-dry-run"], Some(false); "no dry run")]
    #[test_case(&["run", "--dry-run", "--no-dry-run"], Some(false); "last one wins")]
    fn dry_run_flags(args: &[&str], expected: Option<bool>) {
        assert_eq!(run_opts(args).to_overrides().dry_run, expected);
    }

    #[test]
    fn negative_runner_reaches_validation() {
        let opts = run_opts(&["run", "--runner", "-1"]);
        assert_eq!(opts.to_overrides().runner, Some(-1));
    }

    #[test_case(&["run", "--num-runners", "many"]; "non-numeric runners")]
    #[test_case(&["record"]; "record needs output")]
    #[test_case(&["record", "-o", "t.txt", "--merge", "--no-lock"]; "merge always locks")]
    #[test_case(&["--color", "sometimes", "run"]; "invalid color")]
    fn invalid_args(args: &[&str]) {
        parse(args).expect_err("arguments are invalid");
    }

    #[test]
    fn dry_run_prints_summary_and_command() {
        let dir = Utf8TempDir::new().expect("temp dir created");
        let timings = dir.path().join("timings.txt");
        let test_list = dir.path().join("tests.json");
        std::fs::write(&timings, "a\u{1D}5\nb\u{1D}3\nc\u{1D}3\nd\u{1D}1\n")
            .expect("timings written");
        std::fs::write(
            &test_list,
            r#"[
                {"name": "a", "file": "spec/x_spec.rb", "locator": "1:1"},
                {"name": "b", "file": "spec/y_spec.rb", "locator": "1:1"},
                {"name": "c", "file": "spec/y_spec.rb", "locator": "1:2"},
                {"name": "d", "file": "spec/x_spec.rb", "locator": 7}
            ]"#,
        )
        .expect("test list written");

        // An explicitly named config file must exist.
        let missing = dir.path().join("missing.toml");
        let app = parse(&["run", "--config-file", missing.as_str()]).expect("arguments are valid");
        let output = OutputContext {
            verbose: false,
            color: crate::output::Color::Never,
        };
        let mut writer = OutputWriter::Test { stdout: Vec::new() };
        let error = app
            .exec(output, &mut writer)
            .expect_err("config file does not exist");
        assert_eq!(error.process_exit_code(), TimeshardExitCode::SETUP_ERROR);

        let config_file = dir.path().join(".timeshard.toml");
        std::fs::write(
            &config_file,
            format!(
                "input_file = \"{timings}\"\ntest_list = \"{test_list}\"\nnum_runners = 2\n\
                 dry_run = true\nexecutor = \"rspec\"\n"
            ),
        )
        .expect("config written");

        let app = parse(&["run", "--config-file", config_file.as_str(), "--runner", "2"])
            .expect("arguments are valid");
        let mut writer = OutputWriter::Test { stdout: Vec::new() };
        let code = app.exec(output, &mut writer).expect("dry run succeeds");
        assert_eq!(code, TimeshardExitCode::OK);

        let OutputWriter::Test { stdout } = writer else {
            unreachable!("writer was created as a test writer")
        };
        let stdout = String::from_utf8(stdout).expect("output is UTF-8");
        let command = "rspec 'spec/y_spec.rb[1:1,1:2]'";
        assert_eq!(
            stdout,
            format!(
                "Total Tests: 4\n  Partition 1: 2 tests (6.000s)\n  Partition 2: 2 tests (6.000s)\n\
                 Dry run requested:\nWould run\n  {command}\n\n  Length: {}\n",
                command.len()
            )
        );
    }

    #[test]
    fn record_then_merge() {
        let dir = Utf8TempDir::new().expect("temp dir created");
        let input = dir.path().join("observations.jsonl");
        let output = dir.path().join("timings.txt");
        std::fs::write(
            &input,
            "{\"name\": \"a\", \"duration\": 1.5}\n{\"name\": \"b\", \"duration\": 2}\n",
        )
        .expect("observations written");

        let app = parse(&["record", "-o", output.as_str(), "-i", input.as_str()])
            .expect("arguments are valid");
        let context = OutputContext {
            verbose: false,
            color: crate::output::Color::Never,
        };
        let code = app
            .exec(context, &mut OutputWriter::default())
            .expect("record succeeds");
        assert_eq!(code, TimeshardExitCode::OK);

        std::fs::write(&input, "{\"name\": \"c\", \"duration\": 0.25}\n")
            .expect("observations written");
        let app = parse(&["record", "-o", output.as_str(), "-i", input.as_str(), "--merge"])
            .expect("arguments are valid");
        app.exec(context, &mut OutputWriter::default())
            .expect("merge succeeds");

        assert_eq!(
            std::fs::read_to_string(&output).expect("timings file exists"),
            "a\u{1D}1.5\nb\u{1D}2\nc\u{1D}0.25\n"
        );
    }
}
