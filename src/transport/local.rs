//! DR-010: Local execution of setup shell steps.

use super::{exit_code, ExecOutput};
use std::io::Write;
use std::path::Path;
use std::process::{Command, Stdio};

/// Execute a shell script locally via `bash`, fed on stdin, with extra
/// environment variables and working directory `cwd`.
pub fn exec_local(script: &str, env: &[(&str, &str)], cwd: &Path) -> Result<ExecOutput, String> {
    let mut child = Command::new("bash")
        .current_dir(cwd)
        .envs(env.iter().copied())
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| format!("failed to spawn bash: {}", e))?;

    if let Some(ref mut stdin) = child.stdin {
        stdin
            .write_all(script.as_bytes())
            .map_err(|e| format!("stdin write error: {}", e))?;
    }

    let output = child
        .wait_with_output()
        .map_err(|e| format!("wait error: {}", e))?;

    Ok(ExecOutput {
        exit_code: exit_code(output.status),
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
    })
}
