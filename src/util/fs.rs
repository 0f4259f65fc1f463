use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::io::AsyncWriteExt;

/// Atomically replace `dst` with `contents` using write-to-temp-then-rename.
///
/// The destination is either the old file or the complete new one, never a
/// partial write. Parent directories are created as needed.
pub async fn atomic_write(dst: &Path, contents: &[u8]) -> io::Result<()> {
    if let Some(parent) = dst.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let temp_path = temp_path_for(dst);

    // create_new fails if something already sits at the temp path (symlink race)
    let mut temp_file = tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&temp_path)
        .await?;

    let written = async {
        temp_file.write_all(contents).await?;
        temp_file.sync_all().await
    }
    .await;

    if let Err(e) = written {
        drop(temp_file);
        let _ = tokio::fs::remove_file(&temp_path).await;
        return Err(e);
    }
    drop(temp_file);

    // On Windows, rename fails if destination exists
    #[cfg(windows)]
    if tokio::fs::try_exists(dst).await.unwrap_or(false) {
        if let Err(e) = tokio::fs::remove_file(dst).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(e);
        }
    }

    if let Err(e) = tokio::fs::rename(&temp_path, dst).await {
        let _ = tokio::fs::remove_file(&temp_path).await;
        return Err(e);
    }

    Ok(())
}

fn temp_path_for(dst: &Path) -> PathBuf {
    let random_suffix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let file_name = dst
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    dst.with_file_name(format!(".{file_name}.tmp.{random_suffix:016x}"))
}
