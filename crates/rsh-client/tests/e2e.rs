//! End-to-end tests: the real server on a loopback port driven by the real client

use std::io::Write;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use russh_keys::key::KeyPair;
use russh_keys::PublicKeyBase64;
use tempfile::NamedTempFile;
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;

use rsh_client::session::{FAREWELL, GREETING};
use rsh_client::{ConnectionError, Connector, TerminalRequest};
use rsh_core::config::{ClientConfig, ServerConfig};
use rsh_server::{Authenticator, SshServer};

struct TestServer {
    addr: SocketAddr,
    cancel: CancellationToken,
}

impl TestServer {
    async fn start(config: ServerConfig) -> Self {
        let config = ServerConfig {
            bind_address: "127.0.0.1:0".to_string(),
            auth_rejection_time_secs: 0,
            ..config
        };
        let host_key = KeyPair::generate_ed25519().unwrap();
        let authenticator = Authenticator::from_config(&config).unwrap();
        let server = SshServer::bind(&config, host_key, authenticator).await.unwrap();
        let addr = server.local_addr().unwrap();

        let cancel = CancellationToken::new();
        tokio::spawn(server.run(cancel.clone()));
        Self { addr, cancel }
    }

    fn client_config(&self) -> ClientConfig {
        ClientConfig {
            host: self.addr.to_string(),
            ..ClientConfig::default()
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn connect(server: &TestServer) -> rsh_client::ClientSessionController {
    Connector::new(server.client_config())
        .unwrap()
        .connect()
        .await
        .unwrap()
}

#[tokio::test]
async fn test_exec_echo() {
    let server = TestServer::start(ServerConfig::default()).await;
    let client = connect(&server).await;

    let result = client.exec("echo hello").await.unwrap();
    assert_eq!(result.text(), "hello\n");
    assert_eq!(result.exit_status, None);

    client.close().await.unwrap();
}

#[tokio::test]
async fn test_exec_failures_are_reported_in_output() {
    let server = TestServer::start(ServerConfig::default()).await;
    let client = connect(&server).await;

    let missing = client.exec("rsh-no-such-program --flag").await.unwrap();
    assert!(missing.text().starts_with("\r\nError executing command: "));

    // Exit status is not forwarded, so a failing command looks clean
    let failed = client.exec("false").await.unwrap();
    assert!(failed.output.is_empty());
    assert_eq!(failed.exit_status, None);
}

#[tokio::test]
async fn test_sessions_on_one_connection_run_concurrently() {
    let server = TestServer::start(ServerConfig::default()).await;
    let client = connect(&server).await;

    let started = Instant::now();
    let (slow, fast) = tokio::join!(client.exec("sleep 1"), async {
        let result = client.exec("echo B").await;
        (result, started.elapsed())
    });

    let (fast, fast_elapsed) = fast;
    assert_eq!(fast.unwrap().text(), "B\n");
    assert!(fast_elapsed < Duration::from_millis(900), "echo waited {:?}", fast_elapsed);

    assert!(slow.unwrap().output.is_empty());
    assert!(started.elapsed() >= Duration::from_secs(1));
}

#[tokio::test]
async fn test_heavy_stdout_and_stderr_arrive_intact() {
    const PER_STREAM: usize = 4_000_000;
    let server = TestServer::start(ServerConfig::default()).await;
    let client = connect(&server).await;

    let mut script = NamedTempFile::new().unwrap();
    writeln!(script, "head -c {} /dev/zero | tr '\\0' a &", PER_STREAM).unwrap();
    writeln!(script, "head -c {} /dev/zero | tr '\\0' b >&2", PER_STREAM).unwrap();
    writeln!(script, "wait").unwrap();

    let command = format!("sh {}", script.path().display());
    let result = tokio::time::timeout(Duration::from_secs(60), client.exec(&command))
        .await
        .expect("mixed output did not finish")
        .unwrap();

    let output = &result.output;
    assert_eq!(output.len(), 2 * PER_STREAM);
    assert_eq!(output.iter().filter(|&&byte| byte == b'a').count(), PER_STREAM);
    assert_eq!(output.iter().filter(|&&byte| byte == b'b').count(), PER_STREAM);
}

#[tokio::test]
async fn test_prompt_loop() {
    let server = TestServer::start(ServerConfig::default()).await;
    let client = connect(&server).await;

    let input: &[u8] = b"echo one\n\n   \nexit\necho never\n";
    let mut output = Vec::new();
    client.run_prompt_loop(input, &mut output).await.unwrap();

    let expected = format!("{}\n> one\n> > > {}\n", GREETING, FAREWELL);
    assert_eq!(String::from_utf8(output).unwrap(), expected);
}

#[tokio::test]
async fn test_prompt_loop_ends_on_eof() {
    let server = TestServer::start(ServerConfig::default()).await;
    let client = connect(&server).await;

    let input: &[u8] = b"echo last";
    let mut output = Vec::new();
    client.run_prompt_loop(input, &mut output).await.unwrap();

    let expected = format!("{}\n> last\n> ", GREETING);
    assert_eq!(String::from_utf8(output).unwrap(), expected);
}

#[tokio::test]
async fn test_shell_exit_prints_single_goodbye() {
    let server = TestServer::start(ServerConfig::default()).await;
    let client = connect(&server).await;

    let terminal = TerminalRequest {
        term: "xterm".to_string(),
        cols: 80,
        rows: 24,
    };
    let (output, mut output_reader) = tokio::io::duplex(64 * 1024);
    let input: &'static [u8] = b"exit\n";

    let status = tokio::time::timeout(
        Duration::from_secs(10),
        client.interactive(&terminal, input, output, tokio::io::sink()),
    )
    .await
    .expect("shell session did not end")
    .unwrap();
    assert_eq!(status, None);

    let mut transcript = String::new();
    output_reader.read_to_string(&mut transcript).await.unwrap();

    assert!(transcript.starts_with("\r\nWelcome to the SSH server!\r\n"));
    assert!(transcript.ends_with("\r\nGoodbye!\r\n"));
    assert_eq!(transcript.matches("Goodbye!").count(), 1);
    assert_eq!(transcript.matches("$ ").count(), 1);
}

#[tokio::test]
async fn test_wrong_password_is_rejected() {
    let server = TestServer::start(ServerConfig::default()).await;
    let config = ClientConfig {
        password: "not-the-password".to_string(),
        ..server.client_config()
    };

    match Connector::new(config).unwrap().connect().await {
        Err(ConnectionError::AuthRejected) => {}
        Err(e) => panic!("unexpected error: {}", e),
        Ok(_) => panic!("login accepted with a wrong password"),
    }
}

#[tokio::test]
async fn test_public_key_login() {
    let client_key = KeyPair::generate_ed25519().unwrap();
    let public = client_key.clone_public_key().unwrap();

    let mut authorized = NamedTempFile::new().unwrap();
    writeln!(authorized, "ssh-ed25519 {} e2e@test", public.public_key_base64()).unwrap();

    let server = TestServer::start(ServerConfig {
        password: None,
        authorized_keys: vec![authorized.path().to_path_buf()],
        ..ServerConfig::default()
    })
    .await;

    let client = Connector::with_key(server.client_config(), client_key)
        .connect()
        .await
        .unwrap();
    assert_eq!(client.exec("echo key").await.unwrap().text(), "key\n");
}

#[tokio::test]
async fn test_unexpected_host_key_is_refused() {
    let server = TestServer::start(ServerConfig::default()).await;
    let config = ClientConfig {
        expected_host_key: Some("SHA256:not-the-server".to_string()),
        ..server.client_config()
    };

    match Connector::new(config).unwrap().connect().await {
        Err(ConnectionError::HostKeyRejected { .. }) => {}
        Err(e) => panic!("unexpected error: {}", e),
        Ok(_) => panic!("connected despite a host key mismatch"),
    }
}
