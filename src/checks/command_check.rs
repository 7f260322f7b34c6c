use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use tokio::process::Command;
use tokio::time::timeout;

use crate::checks::{arg_timeout, Plugin};
use crate::config::Args;

/// Environment variable through which a command plugin receives the check's `args` as JSON.
pub const ARGS_ENV: &str = "CLUSTERCHECK_ARGS";

/// Runs an external command for each check. Exit status 0 passes.
///
/// The check URL is appended as the last argument.
#[derive(Debug)]
pub struct CommandCheck {
    name: String,
    program: PathBuf,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandCheck {
    pub fn new(name: String, program: PathBuf, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            name,
            program,
            args,
            timeout,
        }
    }
}

#[async_trait]
impl Plugin for CommandCheck {
    fn name(&self) -> &str {
        &self.name
    }

    async fn check(&self, url: &str, args: &Args) -> Result<(), String> {
        let json = serde_json::to_string(args).map_err(|e| e.to_string())?;
        let limit = arg_timeout(args, self.timeout);
        debug!("Running {} {:?} {}", self.program.display(), self.args, url);

        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(url)
            .env(ARGS_ENV, json)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();
        let output = match timeout(limit, output).await {
            Ok(result) => {
                result.map_err(|e| format!("Failed to run {}: {}", self.program.display(), e))?
            }
            Err(_) => return Err(format!("Timed out after {:?}", limit)),
        };

        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Err(if !stderr.is_empty() {
            stderr
        } else if !stdout.is_empty() {
            stdout
        } else {
            format!("exited with {}", output.status)
        })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn shell(name: &str, script: &str) -> CommandCheck {
        CommandCheck::new(
            name.to_string(),
            PathBuf::from("/bin/sh"),
            vec!["-c".to_string(), script.to_string(), "plugin".to_string()],
            Duration::from_secs(5),
        )
    }

    #[tokio::test]
    async fn test_exit_zero_passes() {
        let check = shell("Ok", "exit 0");
        assert_eq!(check.name(), "Ok");
        assert!(check.check("tcp://a:1", &Args::new()).await.is_ok());
    }

    #[tokio::test]
    async fn test_receives_url_and_args() {
        let check = shell(
            "Echo",
            r#"[ "$1" = "tcp://a:1" ] && echo "$CLUSTERCHECK_ARGS" | grep -q '"port":5' "#,
        );
        let mut args = Args::new();
        args.insert("port".to_string(), serde_json::json!(5));
        assert!(check.check("tcp://a:1", &args).await.is_ok());
    }

    #[tokio::test]
    async fn test_failure_reason_from_stderr() {
        let check = shell("Fail", "echo 'backend down' >&2; exit 3");
        assert_eq!(
            check.check("tcp://a:1", &Args::new()).await,
            Err("backend down".to_string())
        );
    }

    #[tokio::test]
    async fn test_failure_reason_from_exit_status() {
        let check = shell("Silent", "exit 4");
        let reason = check.check("tcp://a:1", &Args::new()).await.unwrap_err();
        assert!(reason.starts_with("exited with"));
    }

    #[tokio::test]
    async fn test_timeout() {
        let mut args = Args::new();
        args.insert("timeout".to_string(), serde_json::json!(0.2));
        let check = shell("Slow", "sleep 5");
        let reason = check.check("tcp://a:1", &args).await.unwrap_err();
        assert!(reason.starts_with("Timed out"));
    }

    #[tokio::test]
    async fn test_missing_program() {
        let check = CommandCheck::new(
            "Gone".to_string(),
            PathBuf::from("/does/not/exist"),
            vec![],
            Duration::from_secs(1),
        );
        let reason = check.check("tcp://a:1", &Args::new()).await.unwrap_err();
        assert!(reason.starts_with("Failed to run"));
    }
}
