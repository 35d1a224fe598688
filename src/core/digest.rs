//! DR-008: BLAKE3 digests for recipes and built root filesystems.
//!
//! Digests use the `blake3:{hex}` form. The recipe digest hashes the canonical
//! dump, so formatting differences in the source file do not change it.

use super::codegen;
use super::types::Recipe;
use std::io::Read;
use std::path::Path;

const STREAM_BUF_SIZE: usize = 65536;

/// Hash a string. Returns `"blake3:{hex}"`.
pub fn hash_string(s: &str) -> String {
    format!("blake3:{}", blake3::hash(s.as_bytes()).to_hex())
}

/// Digest of a recipe's canonical text.
pub fn recipe_digest(recipe: &Recipe) -> String {
    hash_string(&codegen::dump(recipe))
}

/// Hash a file's contents, streaming.
pub fn hash_file(path: &Path) -> std::io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = blake3::Hasher::new();
    let mut buf = vec![0u8; STREAM_BUF_SIZE];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("blake3:{}", hasher.finalize().to_hex()))
}

/// Hash a directory tree: sorted walk over relative paths, covering empty
/// directories and file contents. Symlinks are skipped.
pub fn hash_directory(path: &Path) -> std::io::Result<String> {
    fn walk(base: &Path, current: &Path, hasher: &mut blake3::Hasher) -> std::io::Result<()> {
        let mut children: Vec<std::fs::DirEntry> =
            std::fs::read_dir(current)?.collect::<Result<_, _>>()?;
        children.sort_by_key(|e| e.file_name());

        for entry in children {
            let ft = entry.file_type()?;
            if ft.is_symlink() {
                continue;
            }
            let path = entry.path();
            let rel = path
                .strip_prefix(base)
                .map_err(std::io::Error::other)?
                .to_string_lossy()
                .to_string();
            if ft.is_file() {
                hasher.update(b"f\0");
                hasher.update(rel.as_bytes());
                hasher.update(b"\0");
                hasher.update(hash_file(&path)?.as_bytes());
                hasher.update(b"\n");
            } else if ft.is_dir() {
                hasher.update(b"d\0");
                hasher.update(rel.as_bytes());
                hasher.update(b"\n");
                walk(base, &path, hasher)?;
            }
        }
        Ok(())
    }

    let mut hasher = blake3::Hasher::new();
    walk(path, path, &mut hasher)?;
    Ok(format!("blake3:{}", hasher.finalize().to_hex()))
}
