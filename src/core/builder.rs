//! DR-006: Build, materializing a recipe into a root filesystem directory.
//!
//! Runs `%setup` steps in order, then writes the environment, hooks, and
//! labels under `.singularity.d`. Every write is content-deterministic, so a
//! second build over the same rootfs leaves it unchanged.

use super::codegen;
use super::error::BuildError;
use super::state;
use super::types::{Hook, Recipe, SetupStep};
use crate::transport;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Instant;
use tracing::{debug, info};

/// Rootfs variables recognized in setup steps.
pub const ROOTFS_VARS: [&str; 2] = ["SINGULARITY_ROOTFS", "APPTAINER_ROOTFS"];

static ROOTFS_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$(?:\{(?:SINGULARITY|APPTAINER)_ROOTFS\}|(?:SINGULARITY|APPTAINER)_ROOTFS\b)")
        .expect("constant regex pattern is valid")
});

/// Summary of a finished build.
#[derive(Debug, Clone)]
pub struct BuildReport {
    pub rootfs: PathBuf,
    pub dirs_created: usize,
    pub dirs_existing: usize,
    pub shell_steps: usize,
    pub digest: String,
    pub duration_seconds: f64,
}

/// Replace rootfs variable references with the rootfs path.
pub fn substitute_rootfs(text: &str, rootfs: &Path) -> String {
    let root = rootfs.to_string_lossy();
    ROOTFS_PATTERN
        .replace_all(text, regex::NoExpand(root.as_ref()))
        .into_owned()
}

/// Whether `path` holds no shell expansion besides the rootfs variables.
/// Anything else (`$HOME`, `${SINGULARITY_ROOTFS:-/x}`) needs a real shell.
pub fn expands_only_rootfs(path: &str) -> bool {
    !ROOTFS_PATTERN.replace_all(path, "").contains('$')
}

/// Resolve a declared directory: substitute rootfs variables, then anchor
/// relative paths under the rootfs.
pub fn resolve_dir(path: &str, rootfs: &Path) -> PathBuf {
    let substituted = PathBuf::from(substitute_rootfs(path, rootfs));
    if substituted.is_absolute() {
        substituted
    } else {
        rootfs.join(substituted)
    }
}

/// Build the recipe into `rootfs`, creating it if needed.
pub fn build(recipe: &Recipe, rootfs: &Path) -> Result<BuildReport, BuildError> {
    let start = Instant::now();

    std::fs::create_dir_all(rootfs).map_err(|source| BuildError::CreateDir {
        path: rootfs.to_path_buf(),
        source,
    })?;
    let rootfs = std::fs::canonicalize(rootfs).map_err(|source| BuildError::CreateDir {
        path: rootfs.to_path_buf(),
        source,
    })?;

    let mut report = BuildReport {
        rootfs: rootfs.clone(),
        dirs_created: 0,
        dirs_existing: 0,
        shell_steps: 0,
        digest: String::new(),
        duration_seconds: 0.0,
    };

    for (index, step) in recipe.setup.iter().enumerate() {
        info!(step = index + 1, total = recipe.setup.len(), %step, "setup");
        match step {
            SetupStep::CreateDirs { paths, mode } => {
                for path in paths {
                    let dir = resolve_dir(path, &rootfs);
                    if create_dir(&dir, *mode)? {
                        report.dirs_created += 1;
                    } else {
                        report.dirs_existing += 1;
                    }
                }
            }
            SetupStep::Shell { command } => {
                run_shell_step(index + 1, command, &rootfs)?;
                report.shell_steps += 1;
            }
        }
    }

    report.digest = write_metadata(recipe, &rootfs)?;
    report.duration_seconds = start.elapsed().as_secs_f64();
    info!(
        rootfs = %rootfs.display(),
        created = report.dirs_created,
        digest = %report.digest,
        "build complete"
    );
    Ok(report)
}

/// Create a directory with parents. Returns false if it already existed.
fn create_dir(dir: &Path, mode: Option<u32>) -> Result<bool, BuildError> {
    let existed = dir.is_dir();
    std::fs::create_dir_all(dir).map_err(|source| BuildError::CreateDir {
        path: dir.to_path_buf(),
        source,
    })?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Some(m) = mode {
            std::fs::set_permissions(dir, std::fs::Permissions::from_mode(m)).map_err(
                |source| BuildError::CreateDir {
                    path: dir.to_path_buf(),
                    source,
                },
            )?;
        }
    }
    #[cfg(not(unix))]
    let _ = mode;
    debug!(dir = %dir.display(), existed, "directory ready");
    Ok(!existed)
}

fn run_shell_step(index: usize, command: &str, rootfs: &Path) -> Result<(), BuildError> {
    let root = rootfs.to_string_lossy();
    let env: Vec<(&str, &str)> = ROOTFS_VARS.iter().map(|var| (*var, root.as_ref())).collect();
    let script = format!("set -euo pipefail\n{}\n", command);
    let out = transport::local::exec_local(&script, &env, rootfs)
        .map_err(|message| BuildError::StepSpawn { index, message })?;
    if !out.success() {
        return Err(BuildError::StepFailed {
            index,
            exit_code: out.exit_code,
            stderr: out.stderr.trim().to_string(),
        });
    }
    Ok(())
}

/// Write `.singularity.d` contents. Returns the recipe digest.
fn write_metadata(recipe: &Recipe, rootfs: &Path) -> Result<String, BuildError> {
    let write = |path: PathBuf, contents: &str, executable: bool| -> Result<(), BuildError> {
        state::write_atomic(&path, contents.as_bytes())
            .and_then(|()| {
                if executable {
                    state::make_executable(&path)
                } else {
                    Ok(())
                }
            })
            .map_err(|source| BuildError::Write { path, source })
    };

    write(
        state::environment_path(rootfs),
        &codegen::environment_script(recipe),
        true,
    )?;
    for hook in [Hook::Run, Hook::Start] {
        if let Some(script) = codegen::hook_script(recipe, hook) {
            write(state::hook_path(rootfs, hook), &script, true)?;
        }
    }

    let labels = state::Labels::for_recipe(recipe);
    let json = serde_json::to_string_pretty(&labels)?;
    write(state::labels_path(rootfs), &(json + "\n"), false)?;
    Ok(labels.recipe_digest)
}
