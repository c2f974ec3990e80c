//! External command execution
//!
//! Every leaf action the orchestrator drives (secret manager CLI, object
//! storage copy, phase scripts, cloud resource calls) is an external
//! process. This module runs them synchronously with captured output.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror::Error;

/// Errors raised while running an external command
#[derive(Debug, Error)]
pub enum ExecError {
    /// Empty argv
    #[error("empty command")]
    EmptyCommand,

    /// Process could not be started
    #[error("failed to start `{command}`: {source}")]
    Spawn {
        /// Rendered command line
        command: String,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Process exited unsuccessfully
    #[error("`{command}` exited with {}: {}", exit_label(.code), .stderr.trim())]
    Failed {
        /// Rendered command line
        command: String,
        /// Exit code, `None` when killed by a signal
        code: Option<i32>,
        /// Captured standard error
        stderr: String,
    },
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("status {code}"),
        None => "signal".to_string(),
    }
}

/// Captured result of a finished command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` when killed by a signal
    pub code: Option<i32>,
    /// Captured standard output
    pub stdout: String,
    /// Captured standard error
    pub stderr: String,
}

impl CommandOutput {
    /// True for a zero exit code
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Builder for a synchronous external command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShellCommand {
    program: String,
    args: Vec<String>,
    envs: BTreeMap<String, String>,
    clear_env: bool,
    cwd: Option<PathBuf>,
}

impl ShellCommand {
    /// Command running `program`
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    /// Build from an argv vector (`argv[0]` is the program)
    pub fn from_argv<S: AsRef<str>>(argv: &[S]) -> Result<Self, ExecError> {
        let (program, rest) = argv.split_first().ok_or(ExecError::EmptyCommand)?;
        if program.as_ref().trim().is_empty() {
            return Err(ExecError::EmptyCommand);
        }
        Ok(Self::new(program.as_ref()).args(rest.iter().map(|a| a.as_ref().to_string())))
    }

    /// Append one argument
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set one environment variable
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.insert(key.into(), value.into());
        self
    }

    /// Set several environment variables
    pub fn envs<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.envs
            .extend(vars.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Start from an empty environment instead of inheriting the caller's
    pub fn env_clear(mut self) -> Self {
        self.clear_env = true;
        self
    }

    /// Working directory for the child
    pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.cwd = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Program name
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Arguments (excluding the program)
    pub fn arguments(&self) -> &[String] {
        &self.args
    }

    /// Environment overrides
    pub fn environment(&self) -> &BTreeMap<String, String> {
        &self.envs
    }

    /// Human-readable command line, without environment values
    pub fn describe(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Run to completion and capture output, whatever the exit code
    pub fn output(&self) -> Result<CommandOutput, ExecError> {
        let mut command = Command::new(&self.program);
        command.args(&self.args);
        if self.clear_env {
            command.env_clear();
        }
        command.envs(&self.envs);
        if let Some(dir) = &self.cwd {
            command.current_dir(dir);
        }

        tracing::debug!(command = %self.describe(), "running external command");

        let output = command.output().map_err(|source| ExecError::Spawn {
            command: self.describe(),
            source,
        })?;

        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    /// Run to completion; a non-zero exit is an error
    pub fn run(&self) -> Result<CommandOutput, ExecError> {
        let output = self.output()?;
        if output.success() {
            Ok(output)
        } else {
            Err(ExecError::Failed {
                command: self.describe(),
                code: output.code,
                stderr: output.stderr,
            })
        }
    }
}

/// Substitute `{key}` placeholders in `template` from `vars`.
///
/// Unknown placeholders are left untouched.
pub fn render_template(template: &str, vars: &BTreeMap<String, String>) -> String {
    let mut rendered = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        rendered.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        match after.find('}') {
            Some(close) => {
                let key = &after[..close];
                match vars.get(key) {
                    Some(value) => rendered.push_str(value),
                    None => {
                        rendered.push('{');
                        rendered.push_str(key);
                        rendered.push('}');
                    }
                }
                rest = &after[close + 1..];
            }
            None => {
                rendered.push_str(&rest[open..]);
                rest = "";
            }
        }
    }
    rendered.push_str(rest);
    rendered
}
