//! Filesystem utilities for task outputs.
//!
//! Task outputs are written to a local temp root and then published to the
//! shared root, which is frequently a different filesystem.

use std::path::Path;
use tokio::fs;

use crate::error::{MediaError, MediaResult};

/// Permission bits of published part files.
pub const PART_FILE_MODE: u32 = 0o664;

/// Move a file from `src` to `dst`, handling cross-device moves.
///
/// Refuses to replace an existing `dst`. Tries a rename first and falls back
/// to copy-and-delete on EXDEV.
///
/// ```ignore
/// use encmesh_media::fs_utils::move_file;
///
/// move_file("/tmp/encmesh/job/0/part-0.ogg", "/mnt/shared/out/parts/0/part-0.ogg").await?;
/// ```
pub async fn move_file(src: impl AsRef<Path>, dst: impl AsRef<Path>) -> MediaResult<()> {
    let src = src.as_ref();
    let dst = dst.as_ref();

    if !fs::try_exists(src).await? {
        return Err(MediaError::FileNotFound(src.to_path_buf()));
    }
    if fs::try_exists(dst).await? {
        return Err(MediaError::OutputExists(dst.to_path_buf()));
    }

    ensure_parent(dst).await?;

    match fs::rename(src, dst).await {
        Ok(()) => Ok(()),
        Err(e) if is_cross_device_error(&e) => {
            tracing::debug!(
                "Cross-device rename detected, falling back to copy+delete: {} -> {}",
                src.display(),
                dst.display()
            );
            copy_and_delete(src, dst).await
        }
        Err(e) => Err(MediaError::from(e)),
    }
}

/// Create the parent directory of `path` if it is missing.
pub async fn ensure_parent(path: &Path) -> MediaResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).await?;
        }
    }
    Ok(())
}

/// Check if an IO error is EXDEV (cross-device link).
fn is_cross_device_error(e: &std::io::Error) -> bool {
    // EXDEV is error code 18 on Linux/macOS
    e.raw_os_error() == Some(18)
}

/// Copy file to destination (via temp file) then delete source.
async fn copy_and_delete(src: &Path, dst: &Path) -> MediaResult<()> {
    // Same directory as dst so the final rename stays on one filesystem
    let tmp_dst = dst.with_extension("tmp");

    fs::copy(src, &tmp_dst).await.map_err(|e| {
        tracing::error!(
            "Failed to copy file during cross-device move: {} -> {}: {}",
            src.display(),
            tmp_dst.display(),
            e
        );
        MediaError::from(e)
    })?;

    if let Err(e) = fs::rename(&tmp_dst, dst).await {
        let _ = fs::remove_file(&tmp_dst).await;
        tracing::error!(
            "Failed to rename temp file during cross-device move: {} -> {}: {}",
            tmp_dst.display(),
            dst.display(),
            e
        );
        return Err(MediaError::from(e));
    }

    // Best effort: the part is already published
    if let Err(e) = fs::remove_file(src).await {
        tracing::warn!(
            "Failed to remove source file after cross-device move: {}: {}",
            src.display(),
            e
        );
    }

    Ok(())
}

/// Set the permission bits of a published part file.
#[cfg(unix)]
pub async fn give_perms(path: impl AsRef<Path>) -> MediaResult<()> {
    use std::os::unix::fs::PermissionsExt;

    fs::set_permissions(path.as_ref(), std::fs::Permissions::from_mode(PART_FILE_MODE)).await?;
    Ok(())
}

#[cfg(not(unix))]
pub async fn give_perms(path: impl AsRef<Path>) -> MediaResult<()> {
    let mut perms = fs::metadata(path.as_ref()).await?.permissions();
    perms.set_readonly(false);
    fs::set_permissions(path.as_ref(), perms).await?;
    Ok(())
}

/// Create a task's temporary working directory.
pub async fn create_temp_dir(dir: impl AsRef<Path>) -> MediaResult<()> {
    fs::create_dir_all(dir.as_ref()).await?;
    Ok(())
}

/// Remove a task's temporary working directory and everything in it.
///
/// A missing directory is not an error.
pub async fn destroy_temp_dir(dir: impl AsRef<Path>) -> MediaResult<()> {
    match fs::remove_dir_all(dir.as_ref()).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(MediaError::from(e)),
    }
}
