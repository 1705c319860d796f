//! Host process spawning
//!
//! Splits a command line on whitespace and spawns it directly (no shell),
//! with all three standard streams piped.

use std::process::{ExitStatus, Stdio};

use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};

use crate::error::SessionError;

/// Spawns host processes for command lines
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner {
    /// Extra environment variables for every spawned process
    env: Vec<(String, String)>,
}

/// How a process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessOutcome {
    /// Exit code, if the process exited normally
    pub exit_code: Option<i32>,
    /// Whether the process was terminated by a signal
    pub signaled: bool,
}

impl ProcessOutcome {
    /// Process exited with status zero
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Turn a failed outcome into the matching error
    pub fn into_result(self) -> Result<(), SessionError> {
        match self.exit_code {
            Some(0) => Ok(()),
            Some(code) => Err(SessionError::NonZeroExit(code)),
            None => Err(SessionError::Signaled),
        }
    }
}

impl From<ExitStatus> for ProcessOutcome {
    fn from(status: ExitStatus) -> Self {
        let exit_code = status.code();
        Self {
            exit_code,
            signaled: exit_code.is_none(),
        }
    }
}

/// A spawned process with its standard streams
///
/// Streams are handed out once with the `take_*` methods. The process is
/// killed if this handle is dropped before it has been reaped.
pub struct ManagedProcess {
    /// Argument vector the process was started with
    pub argv: Vec<String>,
    child: Child,
    stdin: Option<ChildStdin>,
    stdout: Option<ChildStdout>,
    stderr: Option<ChildStderr>,
}

impl ProcessRunner {
    /// Create a runner that inherits the server environment
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of this runner with additional environment variables
    pub fn extended(&self, extra: Vec<(String, String)>) -> Self {
        let mut env = self.env.clone();
        env.extend(extra);
        Self { env }
    }

    /// Environment added to spawned processes
    pub fn env(&self) -> &[(String, String)] {
        &self.env
    }

    /// Spawn `command_line`
    ///
    /// Fails with `EmptyCommand` when the line has no words, and with `Spawn`
    /// when the executable cannot be located or started.
    pub fn run(&self, command_line: &str) -> Result<ManagedProcess, SessionError> {
        let argv: Vec<String> = command_line
            .split_whitespace()
            .map(str::to_string)
            .collect();

        let Some((program, args)) = argv.split_first() else {
            return Err(SessionError::EmptyCommand);
        };

        let mut command = Command::new(program);
        command
            .args(args)
            .envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|source| SessionError::Spawn {
            program: program.clone(),
            source,
        })?;

        tracing::debug!("Spawned {:?} with pid {:?}", argv, child.id());

        Ok(ManagedProcess {
            stdin: child.stdin.take(),
            stdout: child.stdout.take(),
            stderr: child.stderr.take(),
            argv,
            child,
        })
    }
}

impl ManagedProcess {
    /// Take the stdin sink
    pub fn take_stdin(&mut self) -> Option<ChildStdin> {
        self.stdin.take()
    }

    /// Take the stdout source
    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.stdout.take()
    }

    /// Take the stderr source
    pub fn take_stderr(&mut self) -> Option<ChildStderr> {
        self.stderr.take()
    }

    /// Wait for the process to terminate
    pub async fn wait(&mut self) -> Result<ProcessOutcome, SessionError> {
        let status = self.child.wait().await.map_err(SessionError::Wait)?;
        let outcome = ProcessOutcome::from(status);
        tracing::debug!("Process {:?} finished: {:?}", self.argv, outcome);
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[test]
    fn test_empty_command_line() {
        let runner = ProcessRunner::new();
        assert!(matches!(runner.run(""), Err(SessionError::EmptyCommand)));
        assert!(matches!(runner.run("  \t\n"), Err(SessionError::EmptyCommand)));
    }

    #[tokio::test]
    async fn test_missing_executable() {
        let runner = ProcessRunner::new();
        match runner.run("rsh-definitely-not-a-program --flag") {
            Err(SessionError::Spawn { program, .. }) => {
                assert_eq!(program, "rsh-definitely-not-a-program");
            }
            other => panic!("expected spawn error, got {:?}", other.map(|p| p.argv)),
        }
    }

    #[tokio::test]
    async fn test_splits_on_whitespace() {
        let runner = ProcessRunner::new();
        let mut process = runner.run("  echo   hello\tworld ").unwrap();
        assert_eq!(process.argv, vec!["echo", "hello", "world"]);

        let mut stdout = process.take_stdout().unwrap();
        let mut output = String::new();
        stdout.read_to_string(&mut output).await.unwrap();
        assert_eq!(output, "hello world\n");

        let outcome = process.wait().await.unwrap();
        assert!(outcome.success());
        assert!(!outcome.signaled);
    }

    #[tokio::test]
    async fn test_non_zero_exit() {
        let runner = ProcessRunner::new();
        let mut process = runner.run("false").unwrap();
        let outcome = process.wait().await.unwrap();
        assert_eq!(outcome.exit_code, Some(1));
        assert!(matches!(
            outcome.into_result(),
            Err(SessionError::NonZeroExit(1))
        ));
    }

    #[tokio::test]
    async fn test_runner_environment() {
        let runner = ProcessRunner::new()
            .extended(vec![("RSH_TEST".into(), "one".into())])
            .extended(vec![("RSH_OTHER".into(), "two".into())]);
        assert_eq!(runner.env().len(), 2);

        let mut process = runner.run("printenv RSH_OTHER").unwrap();
        let mut stdout = process.take_stdout().unwrap();
        let mut output = String::new();
        stdout.read_to_string(&mut output).await.unwrap();
        assert_eq!(output, "two\n");
        process.wait().await.unwrap();
    }
}
