//! One-shot command execution against a session stream

use tokio::io::{AsyncRead, AsyncWrite};

use crate::bridge::{self, BridgeResult, SharedWriter};
use crate::error::SessionError;
use crate::process::{ProcessOutcome, ProcessRunner};

/// Run `command_line` and forward its stdout and stderr into `sink`
///
/// Returns `Ok(None)` without spawning anything when the line is empty.
/// Both output bridges and the process wait run concurrently; the call
/// returns only once all three have finished.
pub async fn run_command<W>(
    runner: &ProcessRunner,
    command_line: &str,
    sink: &SharedWriter<W>,
) -> Result<Option<ProcessOutcome>, SessionError>
where
    W: AsyncWrite + Unpin,
{
    let mut process = match runner.run(command_line) {
        Ok(process) => process,
        Err(SessionError::EmptyCommand) => return Ok(None),
        Err(e) => return Err(e),
    };

    // No input is forwarded, so the process sees EOF on stdin right away.
    drop(process.take_stdin());

    let stdout = process.take_stdout();
    let stderr = process.take_stderr();

    let (out, err, outcome) = tokio::join!(
        forward(stdout, sink),
        forward(stderr, sink),
        process.wait(),
    );

    for (name, result) in [("stdout", out), ("stderr", err)] {
        match result.error {
            None => tracing::trace!(
                "{} of {:?} drained ({} bytes)",
                name,
                process.argv,
                result.bytes_copied
            ),
            Some(e) => tracing::warn!("{} bridge of {:?} failed: {}", name, process.argv, e),
        }
    }

    outcome.map(Some)
}

async fn forward<R, W>(source: Option<R>, sink: &SharedWriter<W>) -> BridgeResult
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    match source {
        Some(source) => bridge::copy_shared(source, sink).await,
        None => BridgeResult {
            bytes_copied: 0,
            error: None,
        },
    }
}

/// Echo an execution error into the session stream
pub(crate) async fn write_error<W>(
    sink: &SharedWriter<W>,
    err: &SessionError,
) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let message = format!("\r\nError executing command: {}\r\n", err);
    sink.write_chunk(message.as_bytes()).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, AsyncReadExt};

    async fn capture(command: &str) -> (Result<Option<ProcessOutcome>, SessionError>, Vec<u8>) {
        let (writer, mut reader) = duplex(64 * 1024);
        let sink = SharedWriter::new(writer);
        let result = run_command(&ProcessRunner::new(), command, &sink).await;
        drop(sink);

        let mut output = Vec::new();
        reader.read_to_end(&mut output).await.unwrap();
        (result, output)
    }

    #[tokio::test]
    async fn test_echo_output() {
        let (result, output) = capture("echo hello").await;
        assert!(result.unwrap().unwrap().success());
        assert_eq!(output, b"hello\n");
    }

    #[tokio::test]
    async fn test_empty_command_is_noop() {
        let (result, output) = capture("   ").await;
        assert!(result.unwrap().is_none());
        assert!(output.is_empty());
    }

    #[tokio::test]
    async fn test_matches_direct_execution() {
        for command in ["echo one two  three", "ls /", "ls /rsh-no-such-dir"] {
            let argv: Vec<&str> = command.split_whitespace().collect();
            let direct = std::process::Command::new(argv[0])
                .args(&argv[1..])
                .output()
                .unwrap();
            let mut expected = direct.stdout.clone();
            expected.extend_from_slice(&direct.stderr);

            let (result, output) = capture(command).await;
            let outcome = result.unwrap().unwrap();
            assert_eq!(outcome.exit_code, direct.status.code(), "{}", command);
            assert_eq!(output, expected, "{}", command);
        }
    }

    #[tokio::test]
    async fn test_spawn_failure() {
        let (result, output) = capture("rsh-no-such-program").await;
        assert!(matches!(result, Err(SessionError::Spawn { .. })));
        assert!(output.is_empty());
    }

    #[tokio::test]
    async fn test_write_error_format() {
        let (writer, mut reader) = duplex(256);
        let sink = SharedWriter::new(writer);
        write_error(&sink, &SessionError::NonZeroExit(3)).await.unwrap();
        drop(sink);

        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"\r\nError executing command: exit status 3\r\n");
    }
}
