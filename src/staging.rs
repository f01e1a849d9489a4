//! Atomic file primitives shared by every writer.
//!
//! Writes go to a temp file in the destination directory and are renamed into
//! place, so readers observe either the old content or the new content.
use anyhow::{anyhow, Context, Result};
use std::fs;
use std::io::Write;
use std::path::Path;

/// Replace `dest` atomically with `bytes`.
pub fn write_atomic_bytes(dest: &Path, bytes: &[u8]) -> Result<()> {
    let parent = dest
        .parent()
        .ok_or_else(|| anyhow!("{} has no parent directory", dest.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    let mut tmp = tempfile::NamedTempFile::new_in(parent)
        .with_context(|| format!("create temp file in {}", parent.display()))?;
    tmp.write_all(bytes)
        .with_context(|| format!("write {}", dest.display()))?;
    tmp.as_file()
        .sync_all()
        .with_context(|| format!("sync {}", dest.display()))?;
    tmp.persist(dest)
        .map_err(|err| err.error)
        .with_context(|| format!("publish {}", dest.display()))?;
    Ok(())
}

/// Replace `dest` atomically with pretty JSON.
pub fn write_json_atomic<T: serde::Serialize>(dest: &Path, value: &T) -> Result<()> {
    let mut bytes = serde_json::to_vec_pretty(value).context("serialize JSON")?;
    bytes.push(b'\n');
    write_atomic_bytes(dest, &bytes)
}

/// Create `dest` with pretty JSON, failing if it already exists.
///
/// Used for write-once artifacts (candidate manifests, run summaries).
pub fn write_json_new<T: serde::Serialize>(dest: &Path, value: &T) -> Result<()> {
    let parent = dest
        .parent()
        .ok_or_else(|| anyhow!("{} has no parent directory", dest.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    let mut bytes = serde_json::to_vec_pretty(value).context("serialize JSON")?;
    bytes.push(b'\n');
    let mut tmp = tempfile::NamedTempFile::new_in(parent)
        .with_context(|| format!("create temp file in {}", parent.display()))?;
    tmp.write_all(&bytes)
        .with_context(|| format!("write {}", dest.display()))?;
    tmp.as_file()
        .sync_all()
        .with_context(|| format!("sync {}", dest.display()))?;
    tmp.persist_noclobber(dest)
        .map_err(|err| err.error)
        .with_context(|| format!("create {} (refusing to overwrite)", dest.display()))?;
    Ok(())
}

/// Move a file without leaving a duplicate behind.
///
/// Falls back to copy-then-remove across filesystems; if the source cannot be
/// removed the copy is deleted again so the file exists in exactly one place.
pub fn move_file(source: &Path, dest: &Path) -> Result<()> {
    if dest.exists() {
        return Err(anyhow!("refusing to overwrite {}", dest.display()));
    }
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    }
    if fs::rename(source, dest).is_ok() {
        return Ok(());
    }
    fs::copy(source, dest)
        .with_context(|| format!("copy {} to {}", source.display(), dest.display()))?;
    if let Err(err) = fs::remove_file(source) {
        let _ = fs::remove_file(dest);
        return Err(err).with_context(|| format!("remove {}", source.display()));
    }
    Ok(())
}

/// List regular files (not directories, not dotfiles) directly inside `dir`.
pub fn list_visible_files(dir: &Path) -> Result<Vec<std::path::PathBuf>> {
    let mut files = Vec::new();
    if !dir.is_dir() {
        return Ok(files);
    }
    for entry in fs::read_dir(dir).with_context(|| format!("read {}", dir.display()))? {
        let entry = entry.with_context(|| format!("read {}", dir.display()))?;
        let path = entry.path();
        let hidden = entry.file_name().to_string_lossy().starts_with('.');
        if hidden || !path.is_file() {
            continue;
        }
        files.push(path);
    }
    files.sort();
    Ok(files)
}
