//! Durable local storage for replica snapshots.
//!
//! Each entity type is stored as one JSON document holding its records and
//! its queue. Directory writes go to a temp file that is then renamed over the
//! previous snapshot, so a crash leaves either the old or the new state.

use dashmap::DashMap;
use harbor_engine::StoreSnapshot;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::Result;

/// Where snapshots live.
#[derive(Debug, Clone)]
pub enum Persistence {
    /// Kept in process memory only
    Memory(Arc<DashMap<String, String>>),
    /// One `<entity>.json` file per entity type
    Directory(PathBuf),
}

impl Persistence {
    pub fn memory() -> Self {
        Persistence::Memory(Arc::new(DashMap::new()))
    }

    pub fn directory(path: impl Into<PathBuf>) -> Self {
        Persistence::Directory(path.into())
    }

    fn file_path(dir: &Path, entity: &str) -> PathBuf {
        dir.join(format!("{entity}.json"))
    }

    /// Load the stored snapshot for an entity, if any.
    pub async fn load(&self, entity: &str) -> Result<Option<StoreSnapshot>> {
        let raw = match self {
            Persistence::Memory(map) => map.get(entity).map(|doc| doc.value().clone()),
            Persistence::Directory(dir) => {
                match tokio::fs::read_to_string(Self::file_path(dir, entity)).await {
                    Ok(contents) => Some(contents),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
                    Err(e) => return Err(e.into()),
                }
            }
        };

        match raw {
            Some(raw) => Ok(Some(StoreSnapshot::from_json(&raw)?)),
            None => Ok(None),
        }
    }

    /// Store a snapshot, replacing the previous one.
    pub async fn save(&self, entity: &str, snapshot: &StoreSnapshot) -> Result<()> {
        let contents = serde_json::to_string_pretty(snapshot)?;
        self.save_raw(entity, contents).await
    }

    /// Store a raw document. Used for snapshots written by other versions.
    pub async fn save_raw(&self, entity: &str, contents: String) -> Result<()> {
        match self {
            Persistence::Memory(map) => {
                map.insert(entity.to_string(), contents);
            }
            Persistence::Directory(dir) => {
                tokio::fs::create_dir_all(dir).await?;
                let tmp = dir.join(format!(".{}.{}.tmp", entity, uuid::Uuid::new_v4()));
                tokio::fs::write(&tmp, contents).await?;
                if let Err(e) = tokio::fs::rename(&tmp, Self::file_path(dir, entity)).await {
                    let _ = tokio::fs::remove_file(&tmp).await;
                    return Err(e.into());
                }
            }
        }
        Ok(())
    }
}
