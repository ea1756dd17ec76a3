use std::{
    ffi::OsString,
    path::{Path, PathBuf},
    time::Duration,
};

use fs4::{lock_contended_error, tokio::AsyncFileExt};
use tokio::{
    fs::File,
    io::{self, AsyncWriteExt},
    time::Instant,
};
use tracing::{debug, warn};

/// How long [FileLock] waits for another process to let go of the log.
pub const LOCK_TIMEOUT: Duration = Duration::from_millis(500);
const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(25);

fn sibling_with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path
        .file_name()
        .map(OsString::from)
        .unwrap_or_else(|| OsString::from("doctime"));
    name.push(suffix);
    path.with_file_name(name)
}

/// Path of the advisory lock file guarding `path`.
pub fn lock_path(path: &Path) -> PathBuf {
    sibling_with_suffix(path, ".lock")
}

/// Replaces the content of `path` as a whole. The data goes into a temporary sibling first and
/// is renamed over the target, so readers only ever see the old file or the complete new one.
pub async fn write_atomically(path: &Path, data: &[u8]) -> Result<(), io::Error> {
    let temp_path = sibling_with_suffix(path, ".tmp");
    debug!("Writing {} bytes through {temp_path:?}", data.len());

    let mut file = File::create(&temp_path).await?;
    let written = async {
        file.write_all(data).await?;
        file.flush().await?;
        file.sync_all().await
    }
    .await;
    drop(file);

    if let Err(e) = written {
        let _ = tokio::fs::remove_file(&temp_path).await;
        return Err(e);
    }

    tokio::fs::rename(&temp_path, path).await
}

/// Holds an advisory lock on the sidecar lock file of some path until released.
pub struct FileLock {
    file: File,
}

impl FileLock {
    /// Exclusive lock, taken around writing the file.
    pub async fn exclusive(path: &Path) -> Result<Self, io::Error> {
        Self::acquire(path, LOCK_TIMEOUT, |file| file.try_lock_exclusive()).await
    }

    /// Shared lock, taken around plain reads.
    pub async fn shared(path: &Path) -> Result<Self, io::Error> {
        Self::acquire(path, LOCK_TIMEOUT, |file| file.try_lock_shared()).await
    }

    /// Polls `try_lock` until it succeeds or `timeout` passes. Never blocks the runtime thread.
    async fn acquire(
        path: &Path,
        timeout: Duration,
        try_lock: impl Fn(&File) -> Result<(), io::Error>,
    ) -> Result<Self, io::Error> {
        let file = Self::open(path).await?;
        let deadline = Instant::now() + timeout;
        loop {
            match try_lock(&file) {
                Ok(()) => return Ok(Self { file }),
                Err(e) if is_contended(&e) => {}
                Err(e) => return Err(e),
            }
            if Instant::now() >= deadline {
                warn!("Gave up waiting for the lock on {path:?}");
                return Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("{:?} is locked by another process", lock_path(path)),
                ));
            }
            tokio::time::sleep(LOCK_RETRY_INTERVAL).await;
        }
    }

    async fn open(path: &Path) -> Result<File, io::Error> {
        File::options()
            .write(true)
            .create(true)
            .read(true)
            .truncate(false)
            .open(lock_path(path))
            .await
    }

    pub async fn release(self) -> Result<(), io::Error> {
        self.file.unlock_async().await
    }
}

fn is_contended(error: &io::Error) -> bool {
    error.kind() == io::ErrorKind::WouldBlock
        || error.raw_os_error() == lock_contended_error().raw_os_error()
}

#[cfg(test)]
mod tests {
    use std::{io::ErrorKind, time::Duration};

    use anyhow::Result;
    use tempfile::tempdir;

    use super::{lock_path, write_atomically, FileLock, LOCK_TIMEOUT};

    #[tokio::test]
    async fn test_write_atomically_creates_file() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("log.json");

        write_atomically(&path, b"{}").await?;

        assert_eq!(tokio::fs::read_to_string(&path).await?, "{}");
        assert!(!dir.path().join("log.json.tmp").exists());
        Ok(())
    }

    #[tokio::test]
    async fn test_write_atomically_replaces_longer_content() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("log.json");
        tokio::fs::write(&path, "a much longer previous content").await?;

        write_atomically(&path, b"short").await?;

        assert_eq!(tokio::fs::read_to_string(&path).await?, "short");
        Ok(())
    }

    #[tokio::test]
    async fn test_write_atomically_fails_for_missing_dir() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("missing").join("log.json");

        assert!(write_atomically(&path, b"{}").await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn test_lock_uses_sidecar_file() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("log.json");

        let lock = FileLock::exclusive(&path).await?;
        assert!(lock_path(&path).exists());
        assert!(!path.exists());
        lock.release().await?;

        let lock = FileLock::shared(&path).await?;
        lock.release().await?;
        Ok(())
    }

    #[tokio::test]
    async fn test_contended_lock_times_out() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("log.json");
        let held = FileLock::exclusive(&path).await?;

        let attempt = tokio::time::timeout(LOCK_TIMEOUT * 4, FileLock::shared(&path)).await?;
        assert_eq!(attempt.err().map(|e| e.kind()), Some(ErrorKind::TimedOut));

        let attempt = tokio::time::timeout(LOCK_TIMEOUT * 4, FileLock::exclusive(&path)).await?;
        assert_eq!(attempt.err().map(|e| e.kind()), Some(ErrorKind::TimedOut));

        held.release().await?;
        let lock = FileLock::exclusive(&path).await?;
        lock.release().await?;
        Ok(())
    }

    #[tokio::test]
    async fn test_waits_for_a_short_lived_lock() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("log.json");
        let held = FileLock::exclusive(&path).await?;

        let release = async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            held.release().await
        };
        let (released, acquired) = tokio::join!(release, FileLock::shared(&path));
        released?;
        acquired?.release().await?;
        Ok(())
    }
}
