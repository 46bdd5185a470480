//! Durable store for moderation collections
//!
//! Each collection lives in its own YAML document and is rewritten whole on every
//! mutation. Writes go to a temporary sibling first and are renamed into place, so a
//! crash leaves either the previous or the new document behind. Unreadable or
//! unparseable documents degrade to an empty collection and are immediately
//! re-persisted as a valid baseline.

use crate::SCHEDULER_TARGET;
use crate::moderation::entry::{Collections, RestrictionKind};
use crate::moderation::{ModerationError, ModerationResult};
use dashmap::DashMap;
use derive_more::Display;
use std::io;
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// The independently persisted collections
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum CollectionKind {
    #[display("mutes")]
    Mutes,
    #[display("tempbans")]
    Tempbans,
    #[display("bottempbans")]
    BotTempbans,
    #[display("botbans")]
    BotBans,
    #[display("warns")]
    Warns,
}

impl CollectionKind {
    pub const ALL: [Self; 5] = [
        Self::Mutes,
        Self::Tempbans,
        Self::BotTempbans,
        Self::BotBans,
        Self::Warns,
    ];

    /// File name of the collection inside the data directory
    #[must_use]
    pub fn file_name(self) -> String {
        format!("{self}.yaml")
    }
}

impl From<RestrictionKind> for CollectionKind {
    fn from(kind: RestrictionKind) -> Self {
        match kind {
            RestrictionKind::Mute => Self::Mutes,
            RestrictionKind::Tempban => Self::Tempbans,
            RestrictionKind::BotTempban => Self::BotTempbans,
        }
    }
}

/// Raw document storage underneath the store
#[async_trait::async_trait]
pub trait StorageBackend: Send + Sync {
    /// Read a collection document; `None` if it has never been written
    async fn read(&self, collection: CollectionKind) -> io::Result<Option<String>>;

    /// Replace a collection document atomically
    async fn write(&self, collection: CollectionKind, contents: String) -> io::Result<()>;
}

/// One YAML file per collection inside a directory
#[derive(Debug, Clone)]
pub struct YamlDirBackend {
    dir: PathBuf,
}

impl YamlDirBackend {
    /// Open (and create if needed) a data directory
    ///
    /// Temporary files left behind by an interrupted write are removed.
    ///
    /// # Errors
    /// Returns an error if the directory cannot be created
    pub async fn open(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;

        let pattern = dir.join("*.tmp");
        if let Ok(paths) = glob::glob(&pattern.to_string_lossy()) {
            for path in paths.flatten() {
                debug!(target: SCHEDULER_TARGET, path = %path.display(), "Removing stale temporary file");
                if let Err(e) = tokio::fs::remove_file(&path).await {
                    warn!(target: SCHEDULER_TARGET, path = %path.display(), error = %e, "Could not remove stale temporary file");
                }
            }
        }

        Ok(Self { dir })
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, collection: CollectionKind) -> PathBuf {
        self.dir.join(collection.file_name())
    }
}

#[async_trait::async_trait]
impl StorageBackend for YamlDirBackend {
    async fn read(&self, collection: CollectionKind) -> io::Result<Option<String>> {
        match tokio::fs::read_to_string(self.path(collection)).await {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn write(&self, collection: CollectionKind, contents: String) -> io::Result<()> {
        let target = self.path(collection);
        let tmp = self
            .dir
            .join(format!("{}.{}.tmp", collection.file_name(), Uuid::new_v4()));

        let result = async {
            let mut file = tokio::fs::File::create(&tmp).await?;
            file.write_all(contents.as_bytes()).await?;
            file.sync_all().await?;
            drop(file);
            tokio::fs::rename(&tmp, &target).await
        }
        .await;

        if result.is_err() {
            let _ = tokio::fs::remove_file(&tmp).await;
        }
        result
    }
}

/// In-memory documents, shared between clones
///
/// Survives a dropped scheduler, which makes it useful for restart simulations.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    documents: Arc<DashMap<CollectionKind, String>>,
    fail_writes: Arc<AtomicBool>,
}

impl MemoryBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current document for a collection
    #[must_use]
    pub fn document(&self, collection: CollectionKind) -> Option<String> {
        self.documents.get(&collection).map(|d| d.value().clone())
    }

    /// Overwrite a document directly, bypassing the store
    pub fn put(&self, collection: CollectionKind, contents: impl Into<String>) {
        self.documents.insert(collection, contents.into());
    }

    /// Make every subsequent write fail
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl StorageBackend for MemoryBackend {
    async fn read(&self, collection: CollectionKind) -> io::Result<Option<String>> {
        Ok(self.document(collection))
    }

    async fn write(&self, collection: CollectionKind, contents: String) -> io::Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(io::Error::other("write rejected"));
        }
        self.documents.insert(collection, contents);
        Ok(())
    }
}

/// The shared moderation state and its durable backing
pub struct ModerationStore {
    backend: Arc<dyn StorageBackend>,
    state: Mutex<Collections>,
}

impl std::fmt::Debug for ModerationStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModerationStore").finish_non_exhaustive()
    }
}

impl ModerationStore {
    /// Load every collection from the backend
    ///
    /// Never fails: a collection that is missing, unreadable or corrupt starts
    /// empty and a fresh baseline is written for it. One bad collection does not
    /// affect the others.
    pub async fn load(backend: Arc<dyn StorageBackend>) -> Self {
        let mut collections = Collections::default();
        let mut baseline = Vec::new();

        for kind in CollectionKind::ALL {
            match backend.read(kind).await {
                Ok(Some(text)) if text.trim().is_empty() => {}
                Ok(Some(text)) => {
                    if let Err(e) = decode_into(&mut collections, kind, &text) {
                        warn!(
                            target: SCHEDULER_TARGET,
                            collection = %kind,
                            error = %e,
                            event = "collection_reset",
                            "Failed to parse collection, resetting to empty"
                        );
                        baseline.push(kind);
                    }
                }
                Ok(None) => {
                    info!(target: SCHEDULER_TARGET, collection = %kind, "Collection not found, creating baseline");
                    baseline.push(kind);
                }
                Err(e) => {
                    warn!(
                        target: SCHEDULER_TARGET,
                        collection = %kind,
                        error = %e,
                        event = "collection_reset",
                        "Failed to read collection, resetting to empty"
                    );
                    baseline.push(kind);
                }
            }
        }

        for kind in baseline {
            if let Err(e) = write_collection(backend.as_ref(), &collections, kind).await {
                error!(target: SCHEDULER_TARGET, collection = %kind, error = %e, "Failed to write baseline");
            }
        }

        Self {
            backend,
            state: Mutex::new(collections),
        }
    }

    /// Take exclusive access to the collections
    pub async fn lock(&self) -> StoreGuard<'_> {
        let guard = self.state.lock().await;
        let committed = guard.clone();
        StoreGuard {
            guard,
            committed,
            backend: self.backend.as_ref(),
        }
    }

    /// Copy of the current in-memory state
    pub async fn snapshot(&self) -> Collections {
        self.state.lock().await.clone()
    }
}

/// Exclusive access to the collections, with per-collection durable commits
///
/// A failed [`StoreGuard::save`] rolls the in-memory collection back to its last
/// durable value, so memory never runs ahead of disk.
pub struct StoreGuard<'a> {
    guard: MutexGuard<'a, Collections>,
    committed: Collections,
    backend: &'a dyn StorageBackend,
}

impl StoreGuard<'_> {
    /// Persist one collection
    ///
    /// # Errors
    /// Returns an error if encoding or writing fails; the collection is rolled back
    pub async fn save(&mut self, collection: CollectionKind) -> ModerationResult<()> {
        match write_collection(self.backend, &self.guard, collection).await {
            Ok(()) => {
                copy_collection(&self.guard, &mut self.committed, collection);
                Ok(())
            }
            Err(e) => {
                error!(
                    target: SCHEDULER_TARGET,
                    collection = %collection,
                    error = %e,
                    event = "save_failed",
                    "Failed to persist collection, rolling back"
                );
                copy_collection(&self.committed, &mut self.guard, collection);
                Err(e)
            }
        }
    }
}

impl Deref for StoreGuard<'_> {
    type Target = Collections;

    fn deref(&self) -> &Self::Target {
        &self.guard
    }
}

impl DerefMut for StoreGuard<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.guard
    }
}

async fn write_collection(
    backend: &dyn StorageBackend,
    collections: &Collections,
    kind: CollectionKind,
) -> ModerationResult<()> {
    let text = encode(collections, kind)?;
    backend.write(kind, text).await.map_err(ModerationError::from)
}

fn encode(collections: &Collections, kind: CollectionKind) -> Result<String, serde_yaml::Error> {
    match kind {
        CollectionKind::Mutes => serde_yaml::to_string(&collections.mutes),
        CollectionKind::Tempbans => serde_yaml::to_string(&collections.tempbans),
        CollectionKind::BotTempbans => serde_yaml::to_string(&collections.bot_tempbans),
        CollectionKind::BotBans => serde_yaml::to_string(&collections.bot_bans),
        CollectionKind::Warns => serde_yaml::to_string(&collections.warns),
    }
}

fn decode_into(
    collections: &mut Collections,
    kind: CollectionKind,
    text: &str,
) -> Result<(), serde_yaml::Error> {
    match kind {
        CollectionKind::Mutes => collections.mutes = serde_yaml::from_str(text)?,
        CollectionKind::Tempbans => collections.tempbans = serde_yaml::from_str(text)?,
        CollectionKind::BotTempbans => collections.bot_tempbans = serde_yaml::from_str(text)?,
        CollectionKind::BotBans => collections.bot_bans = serde_yaml::from_str(text)?,
        CollectionKind::Warns => collections.warns = serde_yaml::from_str(text)?,
    }
    Ok(())
}

fn copy_collection(from: &Collections, to: &mut Collections, kind: CollectionKind) {
    match kind {
        CollectionKind::Mutes => to.mutes.clone_from(&from.mutes),
        CollectionKind::Tempbans => to.tempbans.clone_from(&from.tempbans),
        CollectionKind::BotTempbans => to.bot_tempbans.clone_from(&from.bot_tempbans),
        CollectionKind::BotBans => to.bot_bans.clone_from(&from.bot_bans),
        CollectionKind::Warns => to.warns.clone_from(&from.warns),
    }
}
