use anyhow::{Context, Result};
use jwalk::WalkDir;
use std::fs;
use std::path::{Component, Path, PathBuf};

use crate::error::{SyncError, SyncResult};

/// One item yielded by a recursive walk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalEntry {
    pub path: PathBuf,
    pub is_dir: bool,
}

pub struct LocalFs;

impl LocalFs {
    /// Walk `root` recursively in sorted order, hidden files included.
    ///
    /// The root itself is the first entry. Errors are yielded in place so the
    /// caller decides whether they are fatal.
    pub fn walk(root: &Path) -> impl Iterator<Item = Result<LocalEntry>> {
        WalkDir::new(root)
            .sort(true)
            .skip_hidden(false)
            .follow_links(false)
            .into_iter()
            .map(|entry| {
                let entry = entry.context("Failed to walk directory")?;
                Ok(LocalEntry {
                    path: entry.path(),
                    is_dir: entry.file_type().is_dir(),
                })
            })
    }

    /// Path relative to `root` with components joined by `/`.
    pub fn relative_key(root: &Path, file: &Path) -> Result<String> {
        let rel = file.strip_prefix(root).with_context(|| {
            format!(
                "{} is not inside {}",
                file.display(),
                root.display()
            )
        })?;

        let parts: Vec<String> = rel
            .components()
            .filter_map(|c| match c {
                Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
                _ => None,
            })
            .collect();
        Ok(parts.join("/"))
    }

    /// Local path mirroring `key` under `root`.
    ///
    /// The root and its ancestors are created when missing. Below the root
    /// every intermediate directory is created one component at a time, and
    /// an existing regular file where a directory is needed is a
    /// [`SyncError::PathConflict`]. Keys with `.` or `..` components are
    /// rejected so the result always stays inside `root`.
    pub async fn prepare_download_path(root: &Path, key: &str) -> SyncResult<PathBuf> {
        let parts = key_components(key)?;
        let Some((name, parents)) = parts.split_last() else {
            return Err(SyncError::UnsafeKey {
                key: key.to_string(),
            });
        };

        ensure_root(root).await?;
        let mut target = root.to_path_buf();
        for part in parents {
            target.push(part);
            ensure_dir(&target).await?;
        }
        target.push(name);
        Ok(target)
    }

    pub fn remove_file(path: &Path) -> Result<()> {
        fs::remove_file(path)
            .with_context(|| format!("Failed to delete file: {}", path.display()))
    }
}

/// Split a key into path components, refusing anything but plain names.
fn key_components(key: &str) -> SyncResult<Vec<&str>> {
    let mut parts = Vec::new();
    for part in key.split('/').filter(|p| !p.is_empty()) {
        let mut components = Path::new(part).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) => parts.push(part),
            _ => {
                return Err(SyncError::UnsafeKey {
                    key: key.to_string(),
                })
            }
        }
    }
    Ok(parts)
}

async fn ensure_root(root: &Path) -> SyncResult<()> {
    match tokio::fs::metadata(root).await {
        Ok(meta) if !meta.is_dir() => Err(SyncError::PathConflict {
            path: root.to_path_buf(),
        }),
        Ok(_) => Ok(()),
        Err(_) => tokio::fs::create_dir_all(root).await.map_err(|e| {
            SyncError::transfer(
                root.to_string_lossy(),
                format!("Failed to create directory: {}", e),
            )
        }),
    }
}

async fn ensure_dir(dir: &Path) -> SyncResult<()> {
    match tokio::fs::metadata(dir).await {
        Ok(meta) if !meta.is_dir() => Err(SyncError::PathConflict {
            path: dir.to_path_buf(),
        }),
        Ok(_) => Ok(()),
        Err(_) => match tokio::fs::create_dir(dir).await {
            Ok(()) => Ok(()),
            // Lost a race with a sibling job creating the same directory
            Err(_) if tokio::fs::metadata(dir).await.is_ok_and(|m| m.is_dir()) => Ok(()),
            Err(e) => Err(SyncError::transfer(
                dir.to_string_lossy(),
                format!("Failed to create directory: {}", e),
            )),
        },
    }
}

/// Render a path with `/` separators regardless of platform.
pub fn slash_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}
