// Copyright (c) The timeshard Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Running the external test executor for one shard.

use crate::{config::ResolvedConfig, errors::ExecutorError, shard::ShardSelection};
use std::{fmt, process::ExitStatus};
use tracing::debug;

/// The executor invocation for one shard: the configured command, extra arguments, then one
/// argument per selected file.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ShardCommand {
    program: String,
    args: Vec<String>,
}

impl ShardCommand {
    /// Builds the command that runs `selection` with the configured executor.
    pub fn new(config: &ResolvedConfig, selection: &ShardSelection<'_>) -> Self {
        let (program, leading) = config
            .executor()
            .split_first()
            .map(|(program, leading)| (program.clone(), leading))
            .unwrap_or_default();

        let mut args = leading.to_vec();
        args.extend(config.executor_args().iter().cloned());
        args.extend(selection.to_args());
        Self { program, args }
    }

    /// Returns the program to run.
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Returns the arguments passed to the program.
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Returns the command as a single shell-quoted line.
    pub fn to_shell_string(&self) -> String {
        shell_words::join(std::iter::once(&self.program).chain(&self.args))
    }

    /// Returns the message shown instead of running the command.
    pub fn dry_run_message(&self) -> DryRunMessage {
        DryRunMessage {
            command: self.to_shell_string(),
        }
    }

    /// Runs the command to completion, with its standard output and error inherited from this
    /// process.
    ///
    /// Returns the exit code of the command. If the command was killed by a signal, the code is
    /// `128 + signal` on Unix, as a shell would report it.
    pub fn run(&self) -> Result<i32, ExecutorError> {
        let expression = duct::cmd(&self.program, &self.args).unchecked();
        debug!("executing command: {:?}", expression);

        let output = expression
            .run()
            .map_err(|error| ExecutorError::new(self.to_shell_string(), error))?;
        let code = exit_code(output.status);
        debug!("executor exited with {} (exit code {code})", output.status);
        Ok(code)
    }
}

/// The message printed for a dry run.
#[derive(Clone, Debug)]
pub struct DryRunMessage {
    command: String,
}

impl DryRunMessage {
    /// Returns the shell-quoted command that would have run.
    pub fn command(&self) -> &str {
        &self.command
    }
}

impl fmt::Display for DryRunMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Dry run requested:")?;
        writeln!(f, "Would run")?;
        writeln!(f, "  {}", self.command)?;
        writeln!(f)?;
        writeln!(f, "  Length: {}", self.command.len())
    }
}

fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }

    1
}
