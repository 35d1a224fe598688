//! DR-009: Image metadata layout under `<rootfs>/.singularity.d`: paths,
//! labels, atomic writes.

use super::digest;
use super::types::{Hook, Recipe};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Metadata directory inside a built root filesystem.
pub const METADATA_DIR: &str = ".singularity.d";

pub fn metadata_dir(rootfs: &Path) -> PathBuf {
    rootfs.join(METADATA_DIR)
}

pub fn environment_path(rootfs: &Path) -> PathBuf {
    metadata_dir(rootfs).join("env").join("90-environment.sh")
}

pub fn hook_path(rootfs: &Path, hook: Hook) -> PathBuf {
    metadata_dir(rootfs).join(hook.section().name())
}

pub fn labels_path(rootfs: &Path) -> PathBuf {
    metadata_dir(rootfs).join("labels.json")
}

/// Labels recorded for a built image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Labels {
    #[serde(rename = "org.defrun.recipe.digest")]
    pub recipe_digest: String,
    #[serde(rename = "org.defrun.bootstrap")]
    pub bootstrap: String,
    #[serde(rename = "org.defrun.from", default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(rename = "org.defrun.generator")]
    pub generator: String,
}

impl Labels {
    pub fn for_recipe(recipe: &Recipe) -> Self {
        Labels {
            recipe_digest: digest::recipe_digest(recipe),
            bootstrap: recipe.header.bootstrap.clone(),
            from: recipe.header.from.clone(),
            generator: format!("defrun {}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Load labels from a built rootfs. Returns None if it was never built.
pub fn load_labels(rootfs: &Path) -> Result<Option<Labels>, String> {
    let path = labels_path(rootfs);
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(&path)
        .map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
    let labels = serde_json::from_str(&content)
        .map_err(|e| format!("invalid labels {}: {}", path.display(), e))?;
    Ok(Some(labels))
}

/// Write a file atomically (temp file + rename), creating parent directories.
pub fn write_atomic(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);
    std::fs::write(&tmp_path, contents)?;
    std::fs::rename(&tmp_path, path)
}

/// Mark a file executable (0755). No-op off unix.
pub fn make_executable(path: &Path) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))?;
    }
    #[cfg(not(unix))]
    let _ = path;
    Ok(())
}
