use std::io::Write;
use std::net::SocketAddr;
use std::process::{ExitStatus, Stdio};

use futures_util::StreamExt;
use tempfile::NamedTempFile;
use tokio::net::TcpListener;
use tokio::process::Command;

/// Output of one run of the binary.
pub struct Run {
    pub status: ExitStatus,
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
}

/// Writes `yaml` to a temporary config file. Keep the file alive while the binary runs.
pub fn write_config(yaml: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("A temporary file should be created.");
    write!(file, "{}", yaml).expect("The config should be written.");
    file
}

/// Runs the binary against the given config file with additional arguments.
pub async fn run_check(config: &NamedTempFile, args: &[&str]) -> Run {
    let output = Command::new(env!("CARGO_BIN_EXE_clustercheck"))
        .arg("--config")
        .arg(config.path())
        .args(args)
        .env_remove("RUST_LOG")
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .expect("The command should run.");

    let lines = |bytes: &[u8]| {
        String::from_utf8_lossy(bytes)
            .lines()
            .map(str::to_string)
            .collect::<Vec<_>>()
    };
    Run {
        status: output.status,
        stdout: lines(&output.stdout),
        stderr: lines(&output.stderr),
    }
}

/// Asserts that every regex matches at least one of the captured lines.
pub fn check_output_regex(lines: &[String], regex_expected_lines: &[&str]) {
    for expected_line in regex_expected_lines {
        let re = regex::Regex::new(expected_line).expect("Failed to compile regex");
        let found = lines.iter().any(|line| re.is_match(line));
        assert!(
            found,
            "The output contains the line '{}'. Output: {:?}",
            expected_line, lines
        );
    }
}

/// Serves WebSocket connections on a local port, answering pings.
#[allow(dead_code)] // Not dead code, used in tests.
pub async fn start_websocket_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("The WebSocket server should bind.");
    let addr = listener.local_addr().expect("The listener should have an address.");
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                if let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await {
                    while let Some(Ok(_)) = ws.next().await {}
                }
            });
        }
    });
    addr
}

/// Returns a local port nothing listens on.
#[allow(dead_code)] // Not dead code, used in tests.
pub fn closed_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("A free port should exist.");
    listener
        .local_addr()
        .expect("The listener should have an address.")
        .port()
}
