//! Snapshot persistence and the read queries served from the current snapshot.

use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;

use crate::model::{CityListing, CityRef, Company, DumpsterSize, Price, ServiceArea};
use crate::snapshot::Snapshot;

/// File name of the persisted snapshot inside the data directory.
pub const SNAPSHOT_FILE: &str = "dumpster_data.json";

#[derive(thiserror::Error, Debug)]
/// Errors raised while reading or writing the snapshot.
pub enum StoreError {
    /// Filesystem access failed.
    #[error("snapshot io failed for {path}: {source}")]
    Io {
        /// File being accessed.
        path: PathBuf,
        /// Underlying error.
        source: io::Error,
    },
    /// The snapshot could not be encoded or the stored document is malformed.
    #[error("snapshot serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[async_trait]
/// Holder of the current snapshot.
///
/// Exactly one snapshot is current; `save` replaces it wholesale.
pub trait SnapshotStore: Send + Sync {
    /// Stamp `last_updated` and make `snapshot` current.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] when the snapshot cannot be persisted; the previous
    /// snapshot then stays current.
    async fn save(&self, snapshot: Snapshot) -> Result<DateTime<Utc>, StoreError>;

    /// Current snapshot, or an empty one if nothing was saved yet.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] when a stored snapshot exists but cannot be read.
    async fn try_load(&self) -> Result<Arc<Snapshot>, StoreError>;

    /// Current snapshot; read failures are logged and yield an empty snapshot.
    async fn load(&self) -> Arc<Snapshot> {
        match self.try_load().await {
            Ok(snapshot) => snapshot,
            Err(error) => {
                tracing::error!(error = %error, "failed to load snapshot, serving empty data");
                Arc::new(Snapshot::default())
            }
        }
    }

    /// Areas of a city with the prices, companies, and sizes joined to them.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] when the snapshot cannot be read.
    async fn query_by_city(
        &self,
        city: &str,
        state: Option<&str>,
    ) -> Result<CityListing, StoreError> {
        Ok(self.try_load().await?.city_listing(city, state))
    }

    /// All companies.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] when the snapshot cannot be read.
    async fn list_companies(&self) -> Result<Vec<Company>, StoreError> {
        Ok(self.try_load().await?.companies.clone())
    }

    /// All service areas.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] when the snapshot cannot be read.
    async fn list_service_areas(&self) -> Result<Vec<ServiceArea>, StoreError> {
        Ok(self.try_load().await?.service_areas.clone())
    }

    /// All dumpster sizes.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] when the snapshot cannot be read.
    async fn list_sizes(&self) -> Result<Vec<DumpsterSize>, StoreError> {
        Ok(self.try_load().await?.dumpster_sizes.clone())
    }

    /// All prices.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] when the snapshot cannot be read.
    async fn list_prices(&self) -> Result<Vec<Price>, StoreError> {
        Ok(self.try_load().await?.prices.clone())
    }

    /// Distinct city/state pairs in first-seen order.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] when the snapshot cannot be read.
    async fn list_cities(&self) -> Result<Vec<CityRef>, StoreError> {
        Ok(self.try_load().await?.cities())
    }
}

/// Store keeping the snapshot as one pretty-printed JSON document.
pub struct JsonFileStore {
    path: PathBuf,
    cache: RwLock<Option<Arc<Snapshot>>>,
}

impl JsonFileStore {
    /// Store writing `dumpster_data.json` inside `data_dir`.
    #[must_use]
    pub fn new<P: Into<PathBuf>>(data_dir: P) -> Self {
        Self {
            path: data_dir.into().join(SNAPSHOT_FILE),
            cache: RwLock::new(None),
        }
    }

    /// Location of the snapshot document.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn tmp_path(&self) -> PathBuf {
        self.path.with_extension("json.tmp")
    }

    async fn read_file(&self) -> Result<Snapshot, StoreError> {
        match fs::read(&self.path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(source) if source.kind() == ErrorKind::NotFound => {
                tracing::debug!(path = %self.path.display(), "no snapshot on disk yet");
                Ok(Snapshot::default())
            }
            Err(source) => Err(StoreError::Io {
                path: self.path.clone(),
                source,
            }),
        }
    }

    async fn write_file(&self, body: &[u8]) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .map_err(|source| StoreError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }

        let tmp = self.tmp_path();
        write_synced(&tmp, body)
            .await
            .map_err(|source| StoreError::Io {
                path: tmp.clone(),
                source,
            })?;

        if let Err(source) = fs::rename(&tmp, &self.path).await {
            if let Err(cleanup) = fs::remove_file(&tmp).await {
                tracing::debug!(path = %tmp.display(), error = %cleanup, "failed to remove temp snapshot");
            }
            return Err(StoreError::Io {
                path: self.path.clone(),
                source,
            });
        }

        Ok(())
    }
}

/// Write `body` and flush it to disk before the caller renames the file into place.
async fn write_synced(path: &Path, body: &[u8]) -> io::Result<()> {
    let mut file = File::create(path).await?;
    file.write_all(body).await?;
    file.sync_all().await
}

#[async_trait]
impl SnapshotStore for JsonFileStore {
    async fn save(&self, mut snapshot: Snapshot) -> Result<DateTime<Utc>, StoreError> {
        let mut cache = self.cache.write().await;

        let saved_at = Utc::now();
        snapshot.last_updated = Some(saved_at);
        let body = serde_json::to_vec_pretty(&snapshot)?;
        self.write_file(&body).await?;

        tracing::info!(
            path = %self.path.display(),
            companies = snapshot.companies.len(),
            prices = snapshot.prices.len(),
            "snapshot saved"
        );
        *cache = Some(Arc::new(snapshot));
        Ok(saved_at)
    }

    async fn try_load(&self) -> Result<Arc<Snapshot>, StoreError> {
        if let Some(snapshot) = self.cache.read().await.as_ref() {
            return Ok(Arc::clone(snapshot));
        }

        let mut cache = self.cache.write().await;
        if let Some(snapshot) = cache.as_ref() {
            return Ok(Arc::clone(snapshot));
        }

        let snapshot = Arc::new(self.read_file().await?);
        *cache = Some(Arc::clone(&snapshot));
        Ok(snapshot)
    }
}

#[derive(Default)]
/// In-process store without persistence.
pub struct MemoryStore {
    current: RwLock<Arc<Snapshot>>,
}

impl MemoryStore {
    /// Store whose current snapshot is `snapshot`.
    #[must_use]
    pub fn with_snapshot(snapshot: Snapshot) -> Self {
        Self {
            current: RwLock::new(Arc::new(snapshot)),
        }
    }
}

#[async_trait]
impl SnapshotStore for MemoryStore {
    async fn save(&self, mut snapshot: Snapshot) -> Result<DateTime<Utc>, StoreError> {
        let saved_at = Utc::now();
        snapshot.last_updated = Some(saved_at);
        *self.current.write().await = Arc::new(snapshot);
        Ok(saved_at)
    }

    async fn try_load(&self) -> Result<Arc<Snapshot>, StoreError> {
        Ok(Arc::clone(&*self.current.read().await))
    }
}
