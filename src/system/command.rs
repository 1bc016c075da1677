use crate::error::NetworkError;
use anyhow::{Context, Result};
use log::debug;
#[cfg(any(test, feature = "mock"))]
use mockall::automock;
use std::{fmt, time::Duration};
use tokio::{process::Command, time::timeout};
use trait_variant::make;

/// A program invocation, kept as argv so nothing goes through a shell
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandLine {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandLine {
    pub fn new<I, S>(program: &str, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.to_string(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// `None` if the process was terminated by a signal
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failure(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_code: Some(exit_code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Turn a non-zero exit into a `ServiceCommand` error
    pub fn into_checked(self, command: &CommandLine) -> Result<Self> {
        if self.is_success() {
            return Ok(self);
        }

        Err(NetworkError::ServiceCommand {
            command: command.to_string(),
            exit_code: self.exit_code,
            stderr: self.stderr.trim().to_string(),
        }
        .into())
    }
}

#[make(Send)]
#[cfg_attr(any(test, feature = "mock"), automock)]
pub trait CommandExecutor {
    /// Run a command to completion.
    ///
    /// A non-zero exit is not an error here, it is reported via
    /// `CommandOutput::exit_code`. Errors mean the command could not be run
    /// or did not finish in time.
    async fn execute(&self, command: CommandLine) -> Result<CommandOutput>;
}

/// Run `command` and fail unless it exits with 0
pub async fn execute_checked<C>(executor: &C, command: CommandLine) -> Result<CommandOutput>
where
    C: CommandExecutor,
{
    let output = executor.execute(command.clone()).await?;
    output.into_checked(&command)
}

/// Runs commands as child processes of this one
#[derive(Clone, Debug)]
pub struct ProcessExecutor {
    timeout: Duration,
    use_sudo: bool,
}

impl ProcessExecutor {
    pub fn new(timeout: Duration, use_sudo: bool) -> Self {
        Self { timeout, use_sudo }
    }

    fn build(&self, command: &CommandLine) -> Command {
        let mut cmd = if self.use_sudo {
            let mut cmd = Command::new("sudo");
            cmd.arg(&command.program);
            cmd
        } else {
            Command::new(&command.program)
        };

        // the child must not outlive a timed out or cancelled call
        cmd.args(&command.args).kill_on_drop(true);
        cmd
    }
}

impl CommandExecutor for ProcessExecutor {
    async fn execute(&self, command: CommandLine) -> Result<CommandOutput> {
        debug!("execute: {command}");

        let mut cmd = self.build(&command);

        let output = match timeout(self.timeout, cmd.output()).await {
            Ok(result) => result.context(format!("failed to run '{command}'"))?,
            Err(_) => {
                return Err(NetworkError::Timeout(format!(
                    "'{command}' did not finish within {}s",
                    self.timeout.as_secs()
                ))
                .into());
            }
        };

        let output = CommandOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };

        debug!("'{command}' exited with {:?}", output.exit_code);

        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::network_error;

    #[test]
    fn command_line_displays_as_shell_words() {
        let cmd = CommandLine::new("ip", ["link", "set", "wlan0", "up"]);
        assert_eq!(cmd.to_string(), "ip link set wlan0 up");
    }

    #[test]
    fn non_zero_exit_becomes_service_command_error() {
        let cmd = CommandLine::new("systemctl", ["start", "hostapd"]);
        let err = CommandOutput::failure(5, "Unit hostapd.service not found.\n")
            .into_checked(&cmd)
            .unwrap_err();

        match network_error(&err) {
            Some(NetworkError::ServiceCommand {
                command,
                exit_code,
                stderr,
            }) => {
                assert_eq!(command, "systemctl start hostapd");
                assert_eq!(*exit_code, Some(5));
                assert_eq!(stderr, "Unit hostapd.service not found.");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn process_executor_captures_output() {
        let executor = ProcessExecutor::new(Duration::from_secs(5), false);
        let output = executor
            .execute(CommandLine::new("sh", ["-c", "echo hello; exit 3"]))
            .await
            .expect("sh should run");

        assert_eq!(output.exit_code, Some(3));
        assert_eq!(output.stdout.trim(), "hello");
    }

    #[tokio::test]
    async fn process_executor_times_out() {
        let executor = ProcessExecutor::new(Duration::from_millis(100), false);
        let err = executor
            .execute(CommandLine::new("sleep", ["5"]))
            .await
            .unwrap_err();

        assert!(matches!(network_error(&err), Some(NetworkError::Timeout(_))));
    }

    #[tokio::test]
    async fn execute_checked_passes_successful_output_through() {
        let mut executor = MockCommandExecutor::new();
        executor
            .expect_execute()
            .withf(|cmd| cmd.program == "iwgetid")
            .returning(|_| Box::pin(async { Ok(CommandOutput::success("home\n")) }));

        let output = execute_checked(&executor, CommandLine::new("iwgetid", ["-r"]))
            .await
            .expect("should succeed");

        assert_eq!(output.stdout, "home\n");
    }
}
