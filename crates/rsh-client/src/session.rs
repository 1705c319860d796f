//! Client side of remote sessions
//!
//! One-shot commands each get their own session channel; interactive mode
//! holds a single channel with a terminal and a remote shell.

use std::io;

use russh::client::{Handle, Msg};
use russh::{Channel, ChannelMsg, Disconnect};
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt};

use rsh_core::bridge::{self, BRIDGE_BUFFER_SIZE};
use rsh_core::config::ClientConfig;

use crate::connector::ClientHandler;

/// Printed once before the first prompt
pub const GREETING: &str = "Connected to SSH. Enter commands to execute (type 'exit' to quit):";

/// Printed before each command line is read
pub const PROMPT: &str = "> ";

/// Printed when the user types `exit`
pub const FAREWELL: &str = "Exiting SSH session.";

/// Errors from a single remote command or shell
#[derive(Debug, Error)]
pub enum CommandError {
    /// The transport refused or lost the channel
    #[error("failed to create session: {0}")]
    Channel(#[from] russh::Error),

    /// The server answered a channel request with failure
    #[error("{0} request rejected by server")]
    RequestRejected(&'static str),

    /// The command reported a non-zero exit status
    #[error("command execution error: exit status {status}\nOutput: {output}")]
    NonZeroExit { status: u32, output: String },

    /// The remote process was killed by a signal
    #[error("remote process killed by signal {0}")]
    Signaled(String),

    /// The interactive shell ended with a status outside the allow-list
    #[error("shell exited with status {0}")]
    ShellExit(u32),

    /// Local terminal I/O failed
    #[error("terminal I/O failed: {0}")]
    Io(#[from] io::Error),
}

/// Combined output of a one-shot command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Stdout and stderr, in arrival order
    pub output: Vec<u8>,
    /// Exit status, when the server reported one
    pub exit_status: Option<u32>,
}

impl CommandOutput {
    /// Output decoded lossily as UTF-8
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.output).into_owned()
    }
}

/// Terminal parameters sent with `pty-req`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerminalRequest {
    /// Terminal name (the remote TERM)
    pub term: String,
    /// Width in characters
    pub cols: u32,
    /// Height in rows
    pub rows: u32,
}

/// Runs commands and shells over one authenticated connection
pub struct ClientSessionController {
    handle: Handle<ClientHandler>,
    config: ClientConfig,
}

impl ClientSessionController {
    pub(crate) fn new(handle: Handle<ClientHandler>, config: ClientConfig) -> Self {
        Self { handle, config }
    }

    /// Client configuration in effect
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Run one command in a fresh session and collect its output
    ///
    /// A reported non-zero exit status is an error carrying the output. A
    /// session that closes without reporting a status counts as success.
    pub async fn exec(&self, command: &str) -> Result<CommandOutput, CommandError> {
        let mut channel = self.handle.channel_open_session().await?;
        channel.exec(true, command).await?;
        tracing::debug!("exec {:?} on {:?}", command, channel.id());

        let mut result = CommandOutput::default();
        let mut signal = None;

        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::Data { data } => result.output.extend_from_slice(&data),
                ChannelMsg::ExtendedData { data, .. } => result.output.extend_from_slice(&data),
                ChannelMsg::ExitStatus { exit_status } => result.exit_status = Some(exit_status),
                ChannelMsg::ExitSignal { signal_name, .. } => {
                    signal = Some(format!("{:?}", signal_name))
                }
                ChannelMsg::Failure => return Err(CommandError::RequestRejected("exec")),
                ChannelMsg::Close => break,
                _ => {}
            }
        }

        if let Some(signal) = signal {
            return Err(CommandError::Signaled(signal));
        }
        match result.exit_status {
            Some(status) if status != 0 => Err(CommandError::NonZeroExit {
                status,
                output: result.text(),
            }),
            _ => Ok(result),
        }
    }

    /// Read command lines from `input` and run each in its own session
    ///
    /// Stops on `exit` or end of input. Failed commands are logged and
    /// the loop continues.
    pub async fn run_prompt_loop<R, W>(
        &self,
        mut input: R,
        mut output: W,
    ) -> Result<(), CommandError>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        output.write_all(format!("{}\n", GREETING).as_bytes()).await?;

        let mut line = String::new();
        loop {
            output.write_all(PROMPT.as_bytes()).await?;
            output.flush().await?;

            line.clear();
            if input.read_line(&mut line).await? == 0 {
                tracing::debug!("Input ended");
                break;
            }

            let command = line.trim_end_matches(['\r', '\n']);
            if command.trim() == "exit" {
                output.write_all(format!("{}\n", FAREWELL).as_bytes()).await?;
                break;
            }
            if command.trim().is_empty() {
                continue;
            }

            match self.exec(command).await {
                Ok(result) => output.write_all(&result.output).await?,
                Err(e) => tracing::error!("Error: {}", e),
            }
        }

        output.flush().await?;
        Ok(())
    }

    /// Attach a remote shell to local streams until the session ends
    ///
    /// `input` is forwarded to the session; session output and error data
    /// are forwarded to `output` and `error`. Returns the reported exit
    /// status. Statuses in `normal_exit_codes` count as a clean exit.
    pub async fn interactive<I, O, E>(
        &self,
        terminal: &TerminalRequest,
        input: I,
        output: O,
        error: E,
    ) -> Result<Option<u32>, CommandError>
    where
        I: AsyncRead + Send + Unpin + 'static,
        O: AsyncWrite + Send + Unpin + 'static,
        E: AsyncWrite + Send + Unpin + 'static,
    {
        let mut channel = self.handle.channel_open_session().await?;
        channel
            .request_pty(true, &terminal.term, terminal.cols, terminal.rows, 0, 0, &[])
            .await?;
        channel.request_shell(true).await?;
        tracing::info!(
            "Shell requested on {:?} ({} {}x{})",
            channel.id(),
            terminal.term,
            terminal.cols,
            terminal.rows
        );

        let (out_sink, out_source) = tokio::io::duplex(BRIDGE_BUFFER_SIZE);
        let (err_sink, err_source) = tokio::io::duplex(BRIDGE_BUFFER_SIZE);

        let mut remote_input = channel.make_writer();
        let input_task = tokio::spawn(async move {
            let result = bridge::copy(input, &mut remote_input).await;
            let _ = remote_input.shutdown().await;
            result
        });
        let output_task = tokio::spawn(bridge::copy(out_source, output));
        let error_task = tokio::spawn(bridge::copy(err_source, error));

        let status = demux(&mut channel, out_sink, err_sink).await;

        input_task.abort();
        for task in [output_task, error_task] {
            match task.await {
                Ok(result) if !result.is_clean() => {
                    tracing::warn!("Output bridge failed: {:?}", result.error)
                }
                Ok(result) => tracing::debug!("Output bridge copied {} bytes", result.bytes_copied),
                Err(e) => tracing::warn!("Output bridge task failed: {}", e),
            }
        }

        match status? {
            Some(status) if !self.config.is_normal_exit(status) => {
                Err(CommandError::ShellExit(status))
            }
            Some(status) => {
                tracing::debug!("Shell exited with status {}", status);
                Ok(Some(status))
            }
            None => Ok(None),
        }
    }

    /// Disconnect from the server
    pub async fn close(self) -> Result<(), CommandError> {
        self.handle
            .disconnect(Disconnect::ByApplication, "", "en")
            .await?;
        Ok(())
    }
}

/// Route channel data into the two output pipes until the channel closes
///
/// The first two replies answer `pty-req` and `shell`; a failure for either
/// ends the session.
async fn demux<O, E>(
    channel: &mut Channel<Msg>,
    mut output: O,
    mut error: E,
) -> Result<Option<u32>, CommandError>
where
    O: AsyncWrite + Unpin,
    E: AsyncWrite + Unpin,
{
    let mut pending = ["pty-req", "shell"].into_iter();
    let mut exit_status = None;

    while let Some(msg) = channel.wait().await {
        match msg {
            ChannelMsg::Data { data } => output.write_all(&data).await?,
            ChannelMsg::ExtendedData { data, .. } => error.write_all(&data).await?,
            ChannelMsg::Success => {
                pending.next();
            }
            ChannelMsg::Failure => {
                let request = pending.next().unwrap_or("channel");
                return Err(CommandError::RequestRejected(request));
            }
            ChannelMsg::ExitStatus { exit_status: status } => exit_status = Some(status),
            ChannelMsg::ExitSignal { signal_name, .. } => {
                return Err(CommandError::Signaled(format!("{:?}", signal_name)))
            }
            ChannelMsg::Close => break,
            _ => {}
        }
    }

    output.shutdown().await?;
    error.shutdown().await?;
    Ok(exit_status)
}
