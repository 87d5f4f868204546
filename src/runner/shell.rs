//! Shell step execution
//!
//! The invocation table is fixed; the whole script is always passed as one
//! argument after the flags. Steps publish outputs by appending `key=value`
//! lines to the file named by the injected `WEFT_OUTPUT` variable.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::builtin::Outputs;
use crate::workflow::Shell;

use super::trace::RunError;

/// Environment variable naming the step's output file.
pub const OUTPUT_ENV: &str = "WEFT_OUTPUT";

static OUTPUT_SEQ: AtomicU64 = AtomicU64::new(0);

/// The canonical invocation for each shell.
pub fn shell_invocation(shell: Shell, script: &str) -> (&'static str, Vec<String>) {
    match shell {
        Shell::Sh => ("sh", vec!["-e".into(), "-c".into(), script.into()]),
        Shell::Bash => (
            "bash",
            vec![
                "-e".into(),
                "-o".into(),
                "pipefail".into(),
                "-c".into(),
                script.into(),
            ],
        ),
        Shell::Pwsh => ("pwsh", powershell_args(script)),
        Shell::Powershell => ("powershell", powershell_args(script)),
    }
}

fn powershell_args(script: &str) -> Vec<String> {
    vec![
        "-Command".into(),
        format!(
            "$ErrorActionPreference='Stop'; {script}; \
             if ((Test-Path -LiteralPath variable:\\LASTEXITCODE)) {{ exit $LASTEXITCODE }}"
        ),
    ]
}

/// Run a script under the selected shell.
///
/// Stdout and stderr are piped and streamed line by line through the
/// logger unless muted. A non-zero exit becomes [`RunError::ExitCode`];
/// hitting the deadline kills the child and reports a timeout.
pub async fn exec_shell(
    cancel: &CancellationToken,
    deadline: Option<Instant>,
    timeout_label: &str,
    shell: Shell,
    script: &str,
    env: &BTreeMap<String, String>,
    dir: Option<&str>,
    mute: bool,
) -> Result<Outputs, RunError> {
    let output_path = output_file_path();
    let (program, args) = shell_invocation(shell, script);
    debug!(%shell, script, "running shell step");

    let mut command = tokio::process::Command::new(program);
    command
        .args(&args)
        .envs(env)
        .env(OUTPUT_ENV, &output_path)
        .kill_on_drop(true);
    if let Some(dir) = dir {
        command.current_dir(dir);
    }
    if mute {
        command.stdout(Stdio::null()).stderr(Stdio::null());
    } else {
        command.stdout(Stdio::piped()).stderr(Stdio::piped());
    }

    let mut child = command.spawn()?;
    let stdout_pump = child
        .stdout
        .take()
        .map(|out| tokio::spawn(pump_lines(out, false)));
    let stderr_pump = child
        .stderr
        .take()
        .map(|err| tokio::spawn(pump_lines(err, true)));

    let status = tokio::select! {
        _ = cancel.cancelled() => {
            let _ = child.kill().await;
            cleanup(&output_path);
            return Err(RunError::Cancelled);
        }
        _ = sleep_until(deadline), if deadline.is_some() => {
            let _ = child.kill().await;
            cleanup(&output_path);
            return Err(RunError::Timeout(timeout_label.to_string()));
        }
        status = child.wait() => status?,
    };

    // Drain the pumps so every line is logged before we report the step.
    if let Some(pump) = stdout_pump {
        let _ = pump.await;
    }
    if let Some(pump) = stderr_pump {
        let _ = pump.await;
    }

    if !status.success() {
        cleanup(&output_path);
        return Err(RunError::ExitCode(status.code().unwrap_or(1)));
    }

    let outputs = read_outputs(&output_path);
    cleanup(&output_path);
    Ok(outputs)
}

/// Forward child output through the logger, one line at a time.
async fn pump_lines<R: AsyncRead + Unpin>(reader: R, is_stderr: bool) {
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if is_stderr {
            warn!("{line}");
        } else {
            info!("{line}");
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn output_file_path() -> PathBuf {
    std::env::temp_dir().join(format!(
        "weft-output-{}-{}",
        std::process::id(),
        OUTPUT_SEQ.fetch_add(1, Ordering::Relaxed)
    ))
}

/// Parse `key=value` lines from the step's output file. Absent or empty
/// file means no outputs.
fn read_outputs(path: &PathBuf) -> Outputs {
    let mut outputs = Outputs::new();
    let Ok(text) = std::fs::read_to_string(path) else {
        return outputs;
    };
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            outputs.insert(
                key.trim().to_string(),
                serde_json::Value::String(value.to_string()),
            );
        }
    }
    outputs
}

fn cleanup(path: &PathBuf) {
    let _ = std::fs::remove_file(path);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_env() -> BTreeMap<String, String> {
        std::env::vars().collect()
    }

    #[test]
    fn test_invocation_table() {
        let (program, args) = shell_invocation(Shell::Sh, "echo hi");
        assert_eq!(program, "sh");
        assert_eq!(args, vec!["-e", "-c", "echo hi"]);

        let (program, args) = shell_invocation(Shell::Bash, "echo hi");
        assert_eq!(program, "bash");
        assert_eq!(args[..4], ["-e", "-o", "pipefail", "-c"]);

        let (program, args) = shell_invocation(Shell::Pwsh, "Get-Date");
        assert_eq!(program, "pwsh");
        assert!(args[1].starts_with("$ErrorActionPreference='Stop'; Get-Date;"));
        assert!(args[1].contains("LASTEXITCODE"));
    }

    #[tokio::test]
    async fn test_exec_success() {
        let cancel = CancellationToken::new();
        let outputs = exec_shell(&cancel, None, "none", Shell::Sh, "true", &no_env(), None, true)
            .await
            .unwrap();
        assert!(outputs.is_empty());
    }

    #[tokio::test]
    async fn test_exec_exit_code_preserved() {
        let cancel = CancellationToken::new();
        let err = exec_shell(&cancel, None, "none", Shell::Sh, "exit 3", &no_env(), None, true)
            .await
            .unwrap_err();
        assert!(matches!(err, RunError::ExitCode(3)));
    }

    #[tokio::test]
    async fn test_exec_outputs_file() {
        let cancel = CancellationToken::new();
        let outputs = exec_shell(
            &cancel,
            None,
            "none",
            Shell::Sh,
            "echo color=teal >> \"$WEFT_OUTPUT\"; echo size=9 >> \"$WEFT_OUTPUT\"",
            &no_env(),
            None,
            true,
        )
        .await
        .unwrap();
        assert_eq!(outputs["color"], serde_json::json!("teal"));
        assert_eq!(outputs["size"], serde_json::json!("9"));
    }

    #[tokio::test]
    async fn test_exec_timeout_kills_child() {
        let cancel = CancellationToken::new();
        let deadline = Some(Instant::now() + std::time::Duration::from_millis(100));
        let err = exec_shell(&cancel, deadline, "100ms", Shell::Sh, "sleep 5", &no_env(), None, true)
            .await
            .unwrap_err();
        assert!(matches!(err, RunError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_exec_cancelled() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = exec_shell(&cancel, None, "none", Shell::Sh, "sleep 5", &no_env(), None, true)
            .await
            .unwrap_err();
        assert!(matches!(err, RunError::Cancelled));
    }

    #[tokio::test]
    async fn test_exec_unmuted_drains_pipes() {
        // More output than a pipe buffer holds; the pumps must keep
        // reading while the child runs or wait() never returns.
        let cancel = CancellationToken::new();
        let outputs = exec_shell(
            &cancel,
            None,
            "none",
            Shell::Sh,
            "seq 1 20000; echo boundary 1>&2",
            &no_env(),
            None,
            false,
        )
        .await
        .unwrap();
        assert!(outputs.is_empty());
    }

    #[tokio::test]
    async fn test_exec_env_reaches_child() {
        let cancel = CancellationToken::new();
        let mut env = no_env();
        env.insert("WEFT_TEST_COLOR".to_string(), "teal".to_string());
        let outputs = exec_shell(
            &cancel,
            None,
            "none",
            Shell::Sh,
            "echo got=$WEFT_TEST_COLOR >> \"$WEFT_OUTPUT\"",
            &env,
            None,
            true,
        )
        .await
        .unwrap();
        assert_eq!(outputs["got"], serde_json::json!("teal"));
    }
}
