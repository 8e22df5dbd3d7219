//! Shell command execution
//!
//! Every external process the runner starts (git, the container engine,
//! build steps) goes through [`CommandRunner`]. Commands run on the tokio
//! runtime so a slow push or pull never blocks other runs.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tokio::process::Command;
use tracing::debug;

/// A command plus the environment it runs in
///
/// Commands built with [`CommandSpec::new`] are shell lines. Commands built
/// with [`CommandSpec::exec`] run the program directly; `line` is then only
/// their display form.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandSpec {
    pub line: String,
    /// Program and arguments, never interpreted by a shell
    pub argv: Option<Vec<String>>,
    pub cwd: Option<PathBuf>,
    pub env: BTreeMap<String, String>,
}

impl CommandSpec {
    pub fn new(line: impl Into<String>) -> Self {
        Self {
            line: line.into(),
            ..Default::default()
        }
    }

    pub fn exec<I, S>(program: &str, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut argv = vec![program.to_string()];
        argv.extend(args.into_iter().map(Into::into));

        Self {
            line: argv.join(" "),
            argv: Some(argv),
            ..Default::default()
        }
    }

    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn envs(mut self, vars: &BTreeMap<String, String>) -> Self {
        self.env
            .extend(vars.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }
}

/// Captured result of a finished command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Runs shell commands to completion
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Runs a command and captures its output
    ///
    /// A non-zero exit is reported through [`CommandOutput::exit_code`];
    /// `Err` means the process could not be started at all.
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput>;
}

/// Runs shell lines through `sh -c` and argument vectors directly
pub struct ShellRunner {
    shell: String,
}

impl ShellRunner {
    pub fn new() -> Self {
        Self {
            shell: "sh".to_string(),
        }
    }
}

impl Default for ShellRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CommandRunner for ShellRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        debug!("Running: {}", spec.line);

        let mut command = match spec.argv.as_deref() {
            Some([program, args @ ..]) => {
                let mut command = Command::new(program);
                command.args(args);
                command
            }
            Some([]) => anyhow::bail!("empty argument vector"),
            None => {
                let mut command = Command::new(&self.shell);
                command.arg("-c").arg(&spec.line);
                command
            }
        };
        command.envs(&spec.env).kill_on_drop(true);

        if let Some(dir) = &spec.cwd {
            command.current_dir(dir);
        }

        let output = command
            .output()
            .await
            .with_context(|| format!("Failed to execute `{}`", spec.line))?;

        let result = CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            exit_code: output.status.code().unwrap_or(-1),
        };

        if !result.success() {
            debug!(
                "Command failed: cmd={} exit_code={} stderr='{}'",
                spec.line,
                result.exit_code,
                result.stderr.trim()
            );
        }

        Ok(result)
    }
}
