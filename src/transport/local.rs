//! SD-010: Local execution transport.

use super::ExecOutput;
use std::io::Write;
use std::path::Path;
use std::process::{Child, Command, Stdio};

fn bash(cwd: &Path, env: &[(&str, String)]) -> Command {
    let mut cmd = Command::new("bash");
    cmd.current_dir(cwd).stdin(Stdio::piped());
    for (key, value) in env {
        cmd.env(key, value);
    }
    cmd
}

/// Execute a shell script in `cwd` via `bash`, capturing its output.
pub fn exec_local(script: &str, cwd: &Path) -> Result<ExecOutput, String> {
    let mut child = bash(cwd, &[])
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| format!("failed to spawn bash: {}", e))?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin
            .write_all(script.as_bytes())
            .map_err(|e| format!("stdin write error: {}", e))?;
    }

    let output = child
        .wait_with_output()
        .map_err(|e| format!("wait error: {}", e))?;

    Ok(ExecOutput {
        exit_code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
    })
}

/// Start a shell script in `cwd` via `bash` without waiting for it.
/// Output is inherited so recipe logs stream to the terminal.
pub fn spawn_local(script: &str, cwd: &Path, env: &[(&str, String)]) -> std::io::Result<Child> {
    let mut child = bash(cwd, env)
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .spawn()?;

    // Dropping stdin closes it so bash sees EOF after the script
    if let Some(mut stdin) = child.stdin.take() {
        stdin.write_all(script.as_bytes())?;
    }
    Ok(child)
}
