//! Persistence for per-stream watermarks.
//!
//! Stores hold an opaque [`Watermark`] per stream name and carry no business
//! logic. A stream without saved state loads as [`Watermark::zero`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;
use watchtower_model::Watermark;

use crate::error::{Result, WatchError};

#[async_trait]
pub trait WatermarkStore: Send + Sync {
    async fn load(&self, stream: &str) -> Result<Watermark>;

    async fn save(&self, stream: &str, watermark: &Watermark) -> Result<()>;
}

#[async_trait]
impl<T: WatermarkStore + ?Sized> WatermarkStore for Arc<T> {
    async fn load(&self, stream: &str) -> Result<Watermark> {
        (**self).load(stream).await
    }

    async fn save(&self, stream: &str, watermark: &Watermark) -> Result<()> {
        (**self).save(stream, watermark).await
    }
}

/// One JSON file per stream under a state directory.
#[derive(Clone, Debug)]
pub struct FileWatermarkStore {
    dir: PathBuf,
}

impl FileWatermarkStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, stream: &str) -> Result<PathBuf> {
        validate_stream_name(stream)?;
        Ok(self.dir.join(format!("{stream}.json")))
    }

    /// Forget a stream's progress. Missing state is not an error.
    pub async fn reset(&self, stream: &str) -> Result<bool> {
        let path = self.path_for(stream)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(WatchError::persistence(path, err)),
        }
    }

    #[cfg(unix)]
    async fn sync_dir(&self) -> Result<()> {
        let dir = tokio::fs::File::open(&self.dir)
            .await
            .map_err(|err| WatchError::persistence(&self.dir, err))?;
        dir.sync_all()
            .await
            .map_err(|err| WatchError::persistence(&self.dir, err))
    }

    // Directories cannot be opened as files here; the rename is all we get.
    #[cfg(not(unix))]
    async fn sync_dir(&self) -> Result<()> {
        Ok(())
    }

    async fn ensure_dir(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|err| WatchError::persistence(&self.dir, err))
    }
}

#[async_trait]
impl WatermarkStore for FileWatermarkStore {
    async fn load(&self, stream: &str) -> Result<Watermark> {
        let path = self.path_for(stream)?;
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(stream, path = %path.display(), "no saved watermark; starting from zero");
                return Ok(Watermark::zero());
            }
            Err(err) => return Err(WatchError::persistence(path, err)),
        };

        serde_json::from_slice(&bytes).map_err(|err| {
            WatchError::InvalidState(format!(
                "corrupt watermark file {}: {err}",
                path.display()
            ))
        })
    }

    /// Atomic write: temp file in the same directory, fsync, rename, then
    /// fsync the directory so the rename itself is durable.
    async fn save(&self, stream: &str, watermark: &Watermark) -> Result<()> {
        self.ensure_dir().await?;
        let path = self.path_for(stream)?;
        let tmp = self
            .dir
            .join(format!("{stream}.json.tmp-{}", Uuid::new_v4().simple()));

        let bytes = serde_json::to_vec_pretty(watermark)?;

        let write = async {
            let mut file = tokio::fs::File::create(&tmp).await?;
            file.write_all(&bytes).await?;
            file.flush().await?;
            file.sync_all().await?;
            drop(file);
            tokio::fs::rename(&tmp, &path).await
        };

        if let Err(err) = write.await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(WatchError::persistence(path, err));
        }
        self.sync_dir().await?;

        debug!(stream, watermark = %watermark, "watermark saved");
        Ok(())
    }
}

fn validate_stream_name(stream: &str) -> Result<()> {
    let valid = !stream.is_empty()
        && stream
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-');
    if valid {
        Ok(())
    } else {
        Err(WatchError::InvalidState(format!(
            "invalid stream name '{stream}'"
        )))
    }
}

/// In-process store. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryWatermarkStore {
    marks: Mutex<HashMap<String, Watermark>>,
    fail_saves: AtomicBool,
}

impl MemoryWatermarkStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_watermark(stream: &str, watermark: Watermark) -> Self {
        Self {
            marks: Mutex::new(HashMap::from([(stream.to_string(), watermark)])),
            fail_saves: AtomicBool::new(false),
        }
    }

    /// Make every following `save` fail until turned off again.
    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    pub async fn get(&self, stream: &str) -> Option<Watermark> {
        self.marks.lock().await.get(stream).copied()
    }
}

#[async_trait]
impl WatermarkStore for MemoryWatermarkStore {
    async fn load(&self, stream: &str) -> Result<Watermark> {
        Ok(self.get(stream).await.unwrap_or_else(Watermark::zero))
    }

    async fn save(&self, stream: &str, watermark: &Watermark) -> Result<()> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(WatchError::persistence(
                format!("memory://{stream}"),
                std::io::Error::other("saves disabled"),
            ));
        }
        self.marks
            .lock()
            .await
            .insert(stream.to_string(), *watermark);
        Ok(())
    }
}
