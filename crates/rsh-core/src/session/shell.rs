//! Built-in interactive shell
//!
//! Each read from the session stream is treated as one command line; there
//! is no buffering of partial lines across reads.

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};

use super::exec::{run_command, write_error};
use crate::bridge::SharedWriter;
use crate::config::ShellConfig;
use crate::process::ProcessRunner;

/// Why the shell loop ended
#[derive(Debug)]
pub enum ShellExit {
    /// The user typed `exit`
    Exit,
    /// The session stream reached end-of-stream
    Eof,
    /// Reading or writing the session stream failed
    Error(io::Error),
}

/// Prompt/read/execute loop bound to one session stream
pub struct ShellLoop<R, W> {
    reader: R,
    writer: SharedWriter<W>,
    runner: ProcessRunner,
    config: ShellConfig,
}

impl<R, W> ShellLoop<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(
        reader: R,
        writer: SharedWriter<W>,
        runner: ProcessRunner,
        config: ShellConfig,
    ) -> Self {
        Self {
            reader,
            writer,
            runner,
            config,
        }
    }

    /// Run until `exit`, end-of-stream, or a stream error
    pub async fn run(mut self) -> ShellExit {
        if let Err(e) = write(&self.writer, &self.config.banner).await {
            return ShellExit::Error(e);
        }

        let mut buf = vec![0u8; self.config.read_buffer_size.max(1)];

        loop {
            if let Err(e) = write(&self.writer, &self.config.prompt).await {
                return ShellExit::Error(e);
            }

            let n = match self.reader.read(&mut buf).await {
                Ok(0) => return ShellExit::Eof,
                Ok(n) => n,
                Err(e) => {
                    tracing::warn!("Error reading from session: {}", e);
                    return ShellExit::Error(e);
                }
            };

            let line = String::from_utf8_lossy(&buf[..n]);
            let command = line.trim();

            if command == "exit" {
                return match write(&self.writer, &self.config.goodbye).await {
                    Ok(()) => ShellExit::Exit,
                    Err(e) => ShellExit::Error(e),
                };
            }

            tracing::debug!("Shell command: {:?}", command);

            let result = run_command(&self.runner, command, &self.writer)
                .await
                .and_then(|outcome| outcome.map_or(Ok(()), |o| o.into_result()));

            if let Err(err) = result {
                if let Err(e) = write_error(&self.writer, &err).await {
                    return ShellExit::Error(e);
                }
            }
        }
    }

}

async fn write<W>(writer: &SharedWriter<W>, text: &str) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_chunk(text.as_bytes()).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf};
    use tokio::task::JoinHandle;

    struct Harness {
        input: WriteHalf<DuplexStream>,
        output: ReadHalf<DuplexStream>,
        task: JoinHandle<ShellExit>,
    }

    impl Harness {
        fn start() -> Self {
            let config = ShellConfig {
                banner: "hi\n".to_string(),
                prompt: "$ ".to_string(),
                goodbye: "bye\n".to_string(),
                read_buffer_size: 1024,
            };

            let (client, server) = duplex(64 * 1024);
            let (reader, writer) = tokio::io::split(server);
            let (output, input) = tokio::io::split(client);

            let writer = SharedWriter::new(writer);
            let shell = ShellLoop::new(reader, writer, ProcessRunner::new(), config);
            Self {
                input,
                output,
                task: tokio::spawn(shell.run()),
            }
        }

        async fn send(&mut self, line: &str) {
            self.input.write_all(line.as_bytes()).await.unwrap();
        }

        async fn read_until(&mut self, marker: &str) -> String {
            let mut collected = Vec::new();
            let mut byte = [0u8; 1];
            while !collected.ends_with(marker.as_bytes()) {
                let n = self.output.read(&mut byte).await.unwrap();
                assert!(n > 0, "stream ended before {:?}", marker);
                collected.push(byte[0]);
            }
            String::from_utf8(collected).unwrap()
        }

        async fn finish(mut self) -> (ShellExit, String) {
            let exit = self.task.await.unwrap();
            let mut rest = Vec::new();
            self.output.read_to_end(&mut rest).await.unwrap();
            (exit, String::from_utf8(rest).unwrap())
        }
    }

    #[tokio::test]
    async fn test_exit_says_goodbye_once() {
        let mut shell = Harness::start();
        assert_eq!(shell.read_until("$ ").await, "hi\n$ ");

        shell.send("  exit \r\n").await;
        let (exit, rest) = shell.finish().await;
        assert!(matches!(exit, ShellExit::Exit));
        assert_eq!(rest, "bye\n");
    }

    #[tokio::test]
    async fn test_runs_command() {
        let mut shell = Harness::start();
        shell.read_until("$ ").await;

        shell.send("echo hello\n").await;
        assert_eq!(shell.read_until("$ ").await, "hello\n$ ");

        shell.send("exit\n").await;
        assert!(matches!(shell.finish().await.0, ShellExit::Exit));
    }

    #[tokio::test]
    async fn test_empty_line_is_noop() {
        let mut shell = Harness::start();
        shell.read_until("$ ").await;

        shell.send(" \r\n").await;
        assert_eq!(shell.read_until("$ ").await, "$ ");

        shell.send("exit").await;
        assert!(matches!(shell.finish().await.0, ShellExit::Exit));
    }

    #[tokio::test]
    async fn test_errors_are_echoed_inline() {
        let mut shell = Harness::start();
        shell.read_until("$ ").await;

        shell.send("rsh-no-such-program\n").await;
        let output = shell.read_until("$ ").await;
        assert!(output
            .starts_with("\r\nError executing command: failed to start rsh-no-such-program"));

        shell.send("false\n").await;
        assert_eq!(
            shell.read_until("$ ").await,
            "\r\nError executing command: exit status 1\r\n$ "
        );

        shell.send("exit\n").await;
        assert!(matches!(shell.finish().await.0, ShellExit::Exit));
    }

    #[tokio::test]
    async fn test_eof_ends_loop() {
        let mut shell = Harness::start();
        shell.read_until("$ ").await;

        shell.input.shutdown().await.unwrap();
        let (exit, rest) = shell.finish().await;
        assert!(matches!(exit, ShellExit::Eof));
        assert!(rest.is_empty());
    }
}
