/// Durable terminal metadata store
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::registry::RegistryError;

/// Metadata of one logical terminal
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerminalRecord {
    pub id: String,
    pub name: String,
    pub cwd: PathBuf,
    /// Milliseconds since the UNIX epoch
    pub created_at: u64,
}

impl TerminalRecord {
    /// New record stamped with the current time
    pub fn new(id: impl Into<String>, name: impl Into<String>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            cwd: cwd.into(),
            created_at: now_millis(),
        }
    }
}

/// On-disk shape of a record; the id is the document key
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredTerminal {
    name: String,
    cwd: PathBuf,
    #[serde(default)]
    created_at: u64,
}

type Document = BTreeMap<String, StoredTerminal>;

/// Session registry backed by a JSON document rewritten on every mutation.
///
/// The registry is the only writer of the document. Mutations are applied in
/// memory first, so a failed write still leaves the in-memory view updated.
#[derive(Debug)]
pub struct SessionRegistry {
    path: PathBuf,
    records: Mutex<Document>,
}

impl SessionRegistry {
    /// Open the registry at `path`. A missing file is an empty registry.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, RegistryError> {
        let path = path.into();
        let records = match std::fs::read_to_string(&path) {
            Ok(content) if content.trim().is_empty() => Document::new(),
            Ok(content) => serde_json::from_str(&content).map_err(|source| {
                RegistryError::Corrupt {
                    path: path.clone(),
                    source,
                }
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Terminal registry {:?} does not exist yet", path);
                Document::new()
            }
            Err(source) => {
                return Err(RegistryError::Read {
                    path: path.clone(),
                    source,
                });
            }
        };

        info!(
            "Loaded {} terminal records from {:?}",
            records.len(),
            path
        );
        Ok(Self {
            path,
            records: Mutex::new(records),
        })
    }

    /// Empty registry that will overwrite `path` on the first mutation
    pub fn empty(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            records: Mutex::new(Document::new()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, id: &str) -> Option<TerminalRecord> {
        self.lock()
            .get(id)
            .map(|stored| to_record(id, stored))
    }

    /// All records ordered by creation time, then id
    pub fn list(&self) -> Vec<TerminalRecord> {
        let mut records: Vec<TerminalRecord> = self
            .lock()
            .iter()
            .map(|(id, stored)| to_record(id, stored))
            .collect();
        records.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        records
    }

    /// Insert or update the record for `id`.
    ///
    /// `update` receives the current record, if any, and returns the new one.
    /// The id of the returned record is forced to `id`.
    pub fn upsert_with<F>(&self, id: &str, update: F) -> Result<TerminalRecord, RegistryError>
    where
        F: FnOnce(Option<TerminalRecord>) -> TerminalRecord,
    {
        let mut records = self.lock();
        let current = records.get(id).map(|stored| to_record(id, stored));
        let mut record = update(current);
        record.id = id.to_string();

        records.insert(
            id.to_string(),
            StoredTerminal {
                name: record.name.clone(),
                cwd: record.cwd.clone(),
                created_at: record.created_at,
            },
        );
        self.persist(&records)?;
        Ok(record)
    }

    /// Remove the record for `id`. Removing an absent id does not touch the document.
    pub fn delete(&self, id: &str) -> Result<Option<TerminalRecord>, RegistryError> {
        let mut records = self.lock();
        let Some(stored) = records.remove(id) else {
            return Ok(None);
        };
        self.persist(&records)?;
        Ok(Some(to_record(id, &stored)))
    }

    fn lock(&self) -> MutexGuard<'_, Document> {
        // A panic while holding the lock cannot leave the map half-updated
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Rewrite the whole document: temporary sibling file, then rename
    fn persist(&self, records: &Document) -> Result<(), RegistryError> {
        let write_error = |source| RegistryError::Write {
            path: self.path.clone(),
            source,
        };

        let content = serde_json::to_string_pretty(records).map_err(|e| {
            write_error(std::io::Error::new(std::io::ErrorKind::InvalidData, e))
        })?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(write_error)?;
        }

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        std::fs::write(&tmp, content).map_err(write_error)?;
        if let Err(e) = std::fs::rename(&tmp, &self.path) {
            warn!("Failed to move {:?} into place: {}", tmp, e);
            let _ = std::fs::remove_file(&tmp);
            return Err(write_error(e));
        }

        debug!("Persisted {} terminal records to {:?}", records.len(), self.path);
        Ok(())
    }
}

fn to_record(id: &str, stored: &StoredTerminal) -> TerminalRecord {
    TerminalRecord {
        id: id.to_string(),
        name: stored.name.clone(),
        cwd: stored.cwd.clone(),
        created_at: stored.created_at,
    }
}

/// Milliseconds since the UNIX epoch
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
