//! rsh command-line client
//!
//! Runs commands typed at a local prompt on a remote server, or attaches
//! the terminal to a remote shell with `--shell`.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::BufReader;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rsh_client::terminal::{local_terminal, RawModeGuard};
use rsh_client::{ClientSessionController, CommandError, Connector};
use rsh_core::config::{self, ClientConfig};

#[derive(Parser)]
#[command(name = "rsh")]
#[command(about = "Run commands on a remote rsh or SSH server")]
#[command(version)]
struct Args {
    /// Path to the SSH private key file (password auth when omitted)
    #[arg(long)]
    key: Option<PathBuf>,

    /// Username for SSH login
    #[arg(long)]
    user: Option<String>,

    /// Host and port to connect to (port 22 when omitted)
    #[arg(long)]
    host: Option<String>,

    /// Attach an interactive remote shell instead of the command prompt
    #[arg(long)]
    shell: bool,

    /// Put the local terminal in raw mode while the shell is attached
    #[arg(long, requires = "shell")]
    raw: bool,

    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "warn")]
    log_level: String,
}

impl Args {
    /// Apply command-line overrides on top of the file configuration
    fn apply(&self, config: &mut ClientConfig) {
        if let Some(key) = &self.key {
            config.key_path = Some(key.clone());
        }
        if let Some(user) = &self.user {
            config.user = user.clone();
        }
        if let Some(host) = &self.host {
            config.host = host.clone();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| args.log_level.clone()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let mut config: ClientConfig = config::load_or_default(args.config.as_deref(), "client.toml")
        .context("Failed to load client configuration")?;
    args.apply(&mut config);

    let connector = Connector::new(config)?;
    let controller = connector
        .connect()
        .await
        .with_context(|| format!("Failed to connect to {}", connector.config().address()))?;

    if args.shell {
        let code = run_shell(&controller, args.raw).await;
        let _ = controller.close().await;
        // Blocking stdin reads would otherwise keep the runtime alive.
        std::process::exit(code);
    }

    controller
        .run_prompt_loop(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
        .await?;
    let _ = controller.close().await;
    Ok(())
}

/// Attach the local terminal to a remote shell, returning the process exit code
async fn run_shell(controller: &ClientSessionController, raw: bool) -> i32 {
    let terminal = local_terminal(&controller.config().term);

    let guard = if raw {
        match RawModeGuard::enter() {
            Ok(guard) => Some(guard),
            Err(e) => {
                tracing::warn!("{:#}", e);
                None
            }
        }
    } else {
        None
    };

    let result = controller
        .interactive(
            &terminal,
            tokio::io::stdin(),
            tokio::io::stdout(),
            tokio::io::stderr(),
        )
        .await;
    drop(guard);

    match result {
        Ok(_) => 0,
        Err(CommandError::ShellExit(status)) => {
            eprintln!("Remote shell exited with status {}", status);
            i32::try_from(status).unwrap_or(1)
        }
        Err(e) => {
            eprintln!("Failed to run shell: {}", e);
            1
        }
    }
}
