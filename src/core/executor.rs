//! DR-011: Executor that launches a recipe hook with forwarded arguments.
//!
//! The declared environment is layered over the caller's environment for the
//! child only. Exec-form commands are spawned directly (arguments reach the
//! program verbatim); script bodies go through `/bin/sh -c` with arguments as
//! positional parameters. The child's exit code is returned unchanged.
//!
//! `NotFound`/`NotExecutable` come only from spawning an exec-form program.
//! A script body is spawned through `/bin/sh`, so a missing command inside it
//! is the shell's own failure and surfaces as exit code 127 or 126.

use super::error::ExecutionError;
use super::types::{Hook, Recipe, RunCommand};
use crate::transport::{self, ExecOutput};
use std::io::ErrorKind;
use std::process::{Command, Stdio};
use tracing::debug;

/// `$0` for script bodies.
const SCRIPT_ARG0: &str = "defrun";

/// Build the child command for `hook` with `args` appended.
pub fn command(recipe: &Recipe, hook: Hook, args: &[String]) -> Command {
    // load() guarantees at least one hook; a hand-built recipe without one
    // falls through to an empty script.
    let fallback = RunCommand::Script {
        body: String::new(),
    };
    let run = recipe.command_for(hook).unwrap_or(&fallback);

    let mut cmd = match run {
        RunCommand::Exec {
            program,
            args: fixed,
            forward_args,
        } => {
            let mut cmd = Command::new(program);
            cmd.args(fixed);
            if *forward_args {
                cmd.args(args);
            }
            cmd
        }
        RunCommand::Script { body } => {
            let mut cmd = Command::new("/bin/sh");
            cmd.arg("-c").arg(body).arg(SCRIPT_ARG0).args(args);
            cmd
        }
    };
    cmd.envs(&recipe.environment);
    cmd
}

fn target(recipe: &Recipe, hook: Hook) -> String {
    recipe
        .command_for(hook)
        .and_then(RunCommand::program)
        .unwrap_or("/bin/sh")
        .to_string()
}

fn spawn_error(program: String, source: std::io::Error) -> ExecutionError {
    match source.kind() {
        ErrorKind::NotFound => ExecutionError::NotFound(program),
        ErrorKind::PermissionDenied => ExecutionError::NotExecutable(program),
        _ => ExecutionError::Spawn { program, source },
    }
}

/// Run a hook with inherited stdio. Returns the child's exit code.
pub fn run(recipe: &Recipe, hook: Hook, args: &[String]) -> Result<i32, ExecutionError> {
    let program = target(recipe, hook);
    debug!(%hook, %program, argc = args.len(), "launching");
    let status = command(recipe, hook, args)
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .status()
        .map_err(|e| spawn_error(program.clone(), e))?;
    let code = transport::exit_code(status);
    debug!(%hook, %program, code, "exited");
    Ok(code)
}

/// Run a hook capturing stdout and stderr.
pub fn run_captured(
    recipe: &Recipe,
    hook: Hook,
    args: &[String],
) -> Result<ExecOutput, ExecutionError> {
    let program = target(recipe, hook);
    let output = command(recipe, hook, args)
        .stdin(Stdio::null())
        .output()
        .map_err(|e| spawn_error(program, e))?;
    Ok(ExecOutput {
        exit_code: transport::exit_code(output.status),
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
    })
}
