//! Per-session request dispatch
//!
//! The dispatcher consumes a session's request queue in arrival order,
//! answers each request before starting any side effect it triggers, and
//! runs the selected shell or command as a task it owns. The session closes
//! when that task finishes, when the request queue ends, or when the
//! session is cancelled, whichever comes first.

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use super::exec::{run_command, write_error};
use super::request::{RequestEvent, SessionRequest};
use super::shell::{ShellExit, ShellLoop};
use super::{CloseHandle, SessionState};
use crate::bridge::SharedWriter;
use crate::config::ShellConfig;
use crate::error::{ProtocolError, SessionError};
use crate::process::{ProcessOutcome, ProcessRunner};
use crate::types::{PtyParams, SessionId};

/// Capacity of each session's request queue
pub const REQUEST_QUEUE_CAPACITY: usize = 16;

/// What a session needs to run commands
#[derive(Debug, Clone, Default)]
pub struct SessionContext {
    /// Spawns processes for `exec` and shell commands
    pub runner: ProcessRunner,
    /// Built-in shell settings
    pub shell: ShellConfig,
}

/// How the work task of a session ended
#[derive(Debug)]
enum WorkOutcome {
    Shell(ShellExit),
    Exec(Result<Option<ProcessOutcome>, SessionError>),
    Cancelled,
}

/// Report produced when a session closes
#[derive(Debug, Clone)]
pub struct SessionSummary {
    /// Session identifier
    pub id: SessionId,
    /// State the session was in when it started closing
    pub mode: SessionState,
    /// Terminal parameters, if a `pty-req` was accepted
    pub pty: Option<PtyParams>,
    /// Requests answered
    pub requests: usize,
    /// Requests answered with `true`
    pub accepted: usize,
}

/// Live view of a session, published as requests are handled
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    /// Current lifecycle state
    pub state: SessionState,
    /// Terminal parameters from the latest accepted `pty-req`
    pub pty: Option<PtyParams>,
}

/// State machine for one session
pub struct SessionDispatcher<S> {
    id: SessionId,
    state: SessionState,
    pty: Option<PtyParams>,
    status: watch::Sender<SessionSnapshot>,
    stream: Option<S>,
    close: CloseHandle,
    context: SessionContext,
    cancel: CancellationToken,
    requests: usize,
    accepted: usize,
}

impl<S> SessionDispatcher<S>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    /// Create a dispatcher for an accepted session
    pub fn new(
        id: SessionId,
        stream: S,
        close: CloseHandle,
        context: SessionContext,
        cancel: CancellationToken,
    ) -> Self {
        let (status, _) = watch::channel(SessionSnapshot {
            state: SessionState::Open,
            pty: None,
        });
        Self {
            id,
            state: SessionState::Open,
            pty: None,
            status,
            stream: Some(stream),
            close,
            context,
            cancel,
            requests: 0,
            accepted: 0,
        }
    }

    /// Follow the session's state and terminal parameters while it runs
    pub fn watch(&self) -> watch::Receiver<SessionSnapshot> {
        self.status.subscribe()
    }

    fn publish(&self) {
        self.status.send_replace(SessionSnapshot {
            state: self.state,
            pty: self.pty.clone(),
        });
    }

    /// Process requests until the session closes
    pub async fn run(mut self, mut requests: mpsc::Receiver<RequestEvent>) -> SessionSummary {
        let mut work: JoinSet<WorkOutcome> = JoinSet::new();

        loop {
            tokio::select! {
                event = requests.recv() => match event {
                    Some(event) => self.handle(event, &mut work),
                    None => {
                        tracing::debug!("{}: request stream ended", self.id);
                        break;
                    }
                },

                Some(finished) = work.join_next(), if !work.is_empty() => {
                    match finished {
                        Ok(outcome) => self.log_outcome(&outcome),
                        Err(e) => tracing::error!("{}: work task failed: {}", self.id, e),
                    }
                    break;
                }

                _ = self.cancel.cancelled() => {
                    tracing::debug!("{}: cancelled", self.id);
                    break;
                }
            }
        }

        let mode = self.state;

        // Stop whatever is still running and wait for it to unwind.
        self.cancel.cancel();
        while let Some(finished) = work.join_next().await {
            if let Ok(outcome) = finished {
                self.log_outcome(&outcome);
            }
        }

        // Anything still queued is answered before the channel goes away.
        requests.close();
        while let Ok(event) = requests.try_recv() {
            tracing::debug!("{}: rejecting {} after close", self.id, event.request.kind());
            self.requests += 1;
            event.reply.send(false);
        }

        self.finish().await;

        SessionSummary {
            id: self.id,
            mode,
            pty: self.pty.take(),
            requests: self.requests,
            accepted: self.accepted,
        }
    }

    /// Answer one request and start its side effect
    fn handle(&mut self, event: RequestEvent, work: &mut JoinSet<WorkOutcome>) {
        let RequestEvent { request, reply } = event;
        let kind = request.kind();
        self.requests += 1;

        let accepted = match request {
            SessionRequest::Pty(params) if self.state.accepts_setup() => {
                tracing::debug!(
                    "{}: pty-req term={:?} {}x{}",
                    self.id,
                    params.term,
                    params.cols,
                    params.rows
                );
                self.pty = Some(params);
                self.state = SessionState::PtyConfigured;
                reply.send(true);
                true
            }

            SessionRequest::Shell if self.state.accepts_setup() => match self.stream.take() {
                Some(stream) => {
                    tracing::info!("{}: shell requested", self.id);
                    reply.send(true);
                    self.state = SessionState::Shelling;
                    self.spawn_shell(stream, work);
                    true
                }
                None => {
                    reply.send(false);
                    false
                }
            },

            SessionRequest::Exec { command } if self.state.accepts_setup() => {
                match self.stream.take() {
                    Some(stream) => {
                        tracing::info!("{}: exec {:?}", self.id, command);
                        reply.send(true);
                        self.state = SessionState::Executing;
                        self.spawn_exec(stream, command, work);
                        true
                    }
                    None => {
                        reply.send(false);
                        false
                    }
                }
            }

            SessionRequest::Unknown { kind } => {
                tracing::info!("{}: {}", self.id, ProtocolError::UnsupportedRequest(kind));
                reply.send(false);
                false
            }

            _ => {
                tracing::warn!(
                    "{}: rejecting {} request in state {:?}",
                    self.id,
                    kind,
                    self.state
                );
                reply.send(false);
                false
            }
        };

        if accepted {
            self.accepted += 1;
            self.publish();
        }
    }

    /// Runner for this session, carrying the terminal environment if any
    fn runner(&self) -> ProcessRunner {
        match &self.pty {
            Some(pty) => self.context.runner.extended(pty.env()),
            None => self.context.runner.clone(),
        }
    }

    fn spawn_shell(&self, stream: S, work: &mut JoinSet<WorkOutcome>) {
        let (reader, writer) = tokio::io::split(stream);
        let writer = SharedWriter::new(writer);
        let shell = ShellLoop::new(
            reader,
            writer.clone(),
            self.runner(),
            self.context.shell.clone(),
        );
        let cancel = self.cancel.clone();

        work.spawn(async move {
            let exit = tokio::select! {
                _ = cancel.cancelled() => return WorkOutcome::Cancelled,
                exit = shell.run() => exit,
            };
            let _ = writer.shutdown().await;
            WorkOutcome::Shell(exit)
        });
    }

    fn spawn_exec(&self, stream: S, command: String, work: &mut JoinSet<WorkOutcome>) {
        let writer = SharedWriter::new(stream);
        let runner = self.runner();
        let cancel = self.cancel.clone();

        work.spawn(async move {
            let result = tokio::select! {
                _ = cancel.cancelled() => return WorkOutcome::Cancelled,
                result = run_command(&runner, &command, &writer) => result,
            };
            if let Err(err) = &result {
                let _ = write_error(&writer, err).await;
            }
            let _ = writer.shutdown().await;
            WorkOutcome::Exec(result)
        });
    }

    fn log_outcome(&self, outcome: &WorkOutcome) {
        match outcome {
            WorkOutcome::Shell(ShellExit::Exit) => {
                tracing::info!("{}: shell exited", self.id)
            }
            WorkOutcome::Shell(ShellExit::Eof) => {
                tracing::info!("{}: shell input ended", self.id)
            }
            WorkOutcome::Shell(ShellExit::Error(e)) => {
                tracing::warn!("{}: shell stream error: {}", self.id, e)
            }
            WorkOutcome::Exec(Ok(Some(outcome))) => {
                tracing::info!("{}: command finished: {:?}", self.id, outcome)
            }
            WorkOutcome::Exec(Ok(None)) => {
                tracing::debug!("{}: empty command", self.id)
            }
            WorkOutcome::Exec(Err(e)) => {
                tracing::warn!("{}: command failed: {}", self.id, e)
            }
            WorkOutcome::Cancelled => {
                tracing::debug!("{}: work cancelled", self.id)
            }
        }
    }

    /// Close the session exactly once
    async fn finish(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        // Dropping an unused stream before closing the channel.
        self.stream = None;
        self.close.close().await;
        self.state = SessionState::Closed;
        self.publish();
        tracing::info!("{}: closed", self.id);
    }
}
