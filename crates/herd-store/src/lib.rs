//! Atomic JSON persistence.
//!
//! One logical JSON file per persisted set (`servers.json`, `bans.json`,
//! `metrics.json`, …). Writes go through write-temp → rename with an
//! N-deep rotating `.bak` set, so a crash mid-write can never leave a
//! half-written file in place. Reads are tolerant: a missing file is empty
//! state, a corrupt file is logged and treated as empty; startup never
//! aborts over persistence damage.
//!
//! Each file also gets a dedicated serialized writer task
//! ([`FileWriter`]): callers hand it snapshots, the task coalesces bursts
//! and writes the newest one.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("persistence io error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("persistence encode error on {path}: {source}")]
    Encode {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Store location and backup depth.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    pub dir: PathBuf,
    /// How many rotated `.bak` generations to keep.
    pub backups: usize,
}

impl StoreConfig {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            backups: 3,
        }
    }

    pub fn backups(mut self, backups: usize) -> Self {
        self.backups = backups;
        self
    }
}

/// The JSON file store.
#[derive(Debug, Clone)]
pub struct JsonStore {
    config: StoreConfig,
}

impl JsonStore {
    pub fn new(config: StoreConfig) -> Self {
        Self { config }
    }

    pub fn dir(&self) -> &Path {
        &self.config.dir
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.config.dir.join(name)
    }

    fn backup_path(path: &Path, generation: usize) -> PathBuf {
        let mut os = path.as_os_str().to_owned();
        os.push(format!(".bak{generation}"));
        PathBuf::from(os)
    }

    /// Loads one file, treating missing or corrupt content as `default`.
    pub async fn load<T>(&self, name: &str) -> T
    where
        T: DeserializeOwned + Default,
    {
        self.load_or(name, T::default).await
    }

    /// Loads one file with an explicit fallback.
    pub async fn load_or<T, F>(&self, name: &str, fallback: F) -> T
    where
        T: DeserializeOwned,
        F: FnOnce() -> T,
    {
        let path = self.path_for(name);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return fallback(),
            Err(_e) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(path = %path.display(), error = %_e, "persisted file unreadable, starting empty");
                return fallback();
            }
        };
        match serde_json::from_slice(&bytes) {
            Ok(value) => value,
            Err(_e) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(path = %path.display(), error = %_e, "persisted file corrupt, starting empty");

                #[cfg(feature = "metrics")]
                metrics::counter!("herd_store_corrupt_reads_total").increment(1);

                fallback()
            }
        }
    }

    /// Serializes and atomically replaces one file, rotating backups.
    pub async fn save<T>(&self, name: &str, value: &T) -> Result<(), StoreError>
    where
        T: Serialize,
    {
        let path = self.path_for(name);
        let json = serde_json::to_vec_pretty(value).map_err(|source| StoreError::Encode {
            path: path.display().to_string(),
            source,
        })?;

        tokio::fs::create_dir_all(&self.config.dir)
            .await
            .map_err(|source| StoreError::Io {
                path: self.config.dir.display().to_string(),
                source,
            })?;

        let tmp = {
            let mut os = path.as_os_str().to_owned();
            os.push(".tmp");
            PathBuf::from(os)
        };
        tokio::fs::write(&tmp, &json)
            .await
            .map_err(|source| StoreError::Io {
                path: tmp.display().to_string(),
                source,
            })?;

        self.rotate_backups(&path).await;

        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|source| StoreError::Io {
                path: path.display().to_string(),
                source,
            })?;

        #[cfg(feature = "metrics")]
        metrics::counter!("herd_store_writes_total", "file" => name.to_string()).increment(1);

        #[cfg(not(feature = "metrics"))]
        let _ = name;

        Ok(())
    }

    /// Shifts `file.bak(n)` → `file.bak(n+1)` and the live file → `.bak1`.
    /// Failures here are logged and ignored; a missing backup must never
    /// block the write itself.
    async fn rotate_backups(&self, path: &Path) {
        if self.config.backups == 0 {
            return;
        }
        for generation in (1..self.config.backups).rev() {
            let from = Self::backup_path(path, generation);
            let to = Self::backup_path(path, generation + 1);
            let _ = tokio::fs::rename(&from, &to).await;
        }
        if tokio::fs::try_exists(path).await.unwrap_or(false) {
            let _ = tokio::fs::rename(path, Self::backup_path(path, 1)).await;
        }
    }

    /// Spawns the dedicated serialized writer task for one file.
    pub fn writer(&self, name: &str) -> FileWriter {
        let (tx, mut rx) = mpsc::channel::<serde_json::Value>(16);
        let store = self.clone();
        let file = name.to_string();
        let task = tokio::spawn(async move {
            while let Some(mut value) = rx.recv().await {
                // Coalesce a burst of snapshots down to the newest.
                while let Ok(newer) = rx.try_recv() {
                    value = newer;
                }
                if let Err(_e) = store.save(&file, &value).await {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(file = %file, error = %_e, "persistence write failed");
                }
            }
        });
        FileWriter { tx, task }
    }
}

/// Handle to one file's serialized writer task.
pub struct FileWriter {
    tx: mpsc::Sender<serde_json::Value>,
    task: JoinHandle<()>,
}

impl FileWriter {
    /// Queues a snapshot for writing. Serialization errors surface here;
    /// write errors are logged by the task.
    pub fn submit<T: Serialize>(&self, value: &T) -> Result<(), StoreError> {
        let value = serde_json::to_value(value).map_err(|source| StoreError::Encode {
            path: "<writer>".to_string(),
            source,
        })?;
        // Best-effort on a full queue; the next periodic flush supersedes.
        let _ = self.tx.try_send(value);
        Ok(())
    }

    /// Stops the writer task after the queue drains.
    pub async fn shutdown(self) {
        drop(self.tx);
        let _ = self.task.await;
    }
}
