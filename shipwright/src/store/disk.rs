//! File-backed stores
//!
//! Events are kept as JSON lines, one file per build id, appended and synced
//! before `append` returns. Checkpoints are one JSON document per build id,
//! replaced atomically.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::errors::StoreError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;
use crate::models::event::DeploymentEvent;
use crate::models::request::BuildId;
use crate::status::Phase;
use crate::store::checkpoint::{CheckpointStore, WorkflowCheckpoint};
use crate::store::event_log::{judge, AppendOutcome, EventLog};

/// Map a caller-assigned build id onto a safe file stem
pub fn file_stem(build_id: &BuildId) -> String {
    let mut stem = String::with_capacity(build_id.as_str().len());
    for byte in build_id.as_str().bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
            stem.push(byte as char);
        } else {
            stem.push_str(&format!("%{:02x}", byte));
        }
    }
    stem
}

/// Event log stored as JSON lines on disk
pub struct DiskEventLog {
    dir: Dir,
    write_lock: Mutex<()>,
}

impl DiskEventLog {
    pub fn new(dir: Dir) -> Self {
        Self {
            dir,
            write_lock: Mutex::new(()),
        }
    }

    fn file_for(&self, build_id: &BuildId) -> File {
        self.dir.file(&format!("{}.jsonl", file_stem(build_id)))
    }

    /// Read a build's events, and how the file's tail must be fixed before
    /// the next append.
    async fn read(&self, file: &File) -> Result<(Vec<DeploymentEvent>, Tail), StoreError> {
        if !file.exists().await {
            return Ok((Vec::new(), Tail::Clean));
        }

        let contents = file.read_string().await?;
        let unterminated = !contents.is_empty() && !contents.ends_with('\n');
        let lines: Vec<&str> = contents.lines().filter(|l| !l.trim().is_empty()).collect();

        let mut tail = if unterminated { Tail::Unterminated } else { Tail::Clean };
        let mut events = Vec::with_capacity(lines.len());
        for (idx, line) in lines.iter().enumerate() {
            match serde_json::from_str::<DeploymentEvent>(line) {
                Ok(event) => events.push(event),
                // a crash mid-append leaves at most one partial trailing line
                Err(e) if idx + 1 == lines.len() && unterminated => {
                    warn!("Ignoring torn trailing record in {}: {}", file.path().display(), e);
                    let keep = contents.rfind('\n').map(|i| i + 1).unwrap_or(0);
                    tail = Tail::Torn { keep };
                }
                Err(e) => {
                    return Err(StoreError::Corrupt {
                        path: file.path().display().to_string(),
                        reason: format!("line {}: {}", idx + 1, e),
                    });
                }
            }
        }

        Ok((events, tail))
    }
}

/// State of the last line of an event file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tail {
    Clean,

    /// Complete record without its newline
    Unterminated,

    /// Partial record after byte `keep`
    Torn { keep: usize },
}

#[async_trait]
impl EventLog for DiskEventLog {
    async fn append(&self, event: DeploymentEvent) -> Result<AppendOutcome, StoreError> {
        let _guard = self.write_lock.lock().await;

        let file = self.file_for(&event.build_id);
        let (history, tail) = self.read(&file).await?;

        let outcome = judge(&history, &event);
        if outcome.is_applied() {
            let mut line = Vec::new();
            match tail {
                Tail::Clean => {}
                Tail::Unterminated => line.push(b'\n'),
                Tail::Torn { keep } => {
                    let contents = file.read_string().await?;
                    file.write_atomic(&contents.as_bytes()[..keep]).await?;
                }
            }
            line.extend(serde_json::to_vec(&event)?);
            file.append_line(&line).await?;
            debug!(
                "Recorded {} {} for build {}",
                event.phase, event.status, event.build_id
            );
        }

        Ok(outcome)
    }

    async fn events(&self, build_id: &BuildId) -> Result<Vec<DeploymentEvent>, StoreError> {
        let (events, _) = self.read(&self.file_for(build_id)).await?;
        Ok(events)
    }
}

/// Checkpoint store with one JSON document per build on disk
pub struct DiskCheckpointStore {
    dir: Dir,
    write_lock: Mutex<()>,
    external_ids: RwLock<HashMap<String, (BuildId, Phase)>>,
}

impl DiskCheckpointStore {
    /// Open the store and index the external ids of existing checkpoints
    pub async fn open(dir: Dir) -> Result<Self, StoreError> {
        dir.create().await?;

        let store = Self {
            dir,
            write_lock: Mutex::new(()),
            external_ids: RwLock::new(HashMap::new()),
        };

        for checkpoint in store.load_all().await? {
            store.index(&checkpoint);
        }

        Ok(store)
    }

    fn file_for(&self, build_id: &BuildId) -> File {
        self.dir.file(&format!("{}.json", file_stem(build_id)))
    }

    fn index(&self, checkpoint: &WorkflowCheckpoint) {
        let mut index = self.external_ids.write().unwrap_or_else(|e| e.into_inner());
        for phase in [Phase::Build, Phase::Deploy] {
            if let Some(external_id) = checkpoint.external_id(phase) {
                index.insert(external_id.to_string(), (checkpoint.build_id.clone(), phase));
            }
        }
    }

    async fn load_all(&self) -> Result<Vec<WorkflowCheckpoint>, StoreError> {
        let mut checkpoints = Vec::new();
        for path in self.dir.list_files("json").await? {
            checkpoints.push(File::new(path).read_json().await?);
        }
        Ok(checkpoints)
    }
}

#[async_trait]
impl CheckpointStore for DiskCheckpointStore {
    async fn load(&self, build_id: &BuildId) -> Result<Option<WorkflowCheckpoint>, StoreError> {
        let file = self.file_for(build_id);
        if !file.exists().await {
            return Ok(None);
        }
        Ok(Some(file.read_json().await?))
    }

    async fn save(&self, checkpoint: &WorkflowCheckpoint) -> Result<WorkflowCheckpoint, StoreError> {
        let _guard = self.write_lock.lock().await;

        let stored = match self.load(&checkpoint.build_id).await? {
            Some(mut existing) => {
                existing.merge(checkpoint);
                existing
            }
            None => checkpoint.clone(),
        };

        self.file_for(&stored.build_id).write_json(&stored).await?;
        self.index(&stored);
        Ok(stored)
    }

    async fn find_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<(BuildId, Phase)>, StoreError> {
        let index = self.external_ids.read().unwrap_or_else(|e| e.into_inner());
        Ok(index.get(external_id).cloned())
    }

    async fn list_unfinished(&self) -> Result<Vec<WorkflowCheckpoint>, StoreError> {
        Ok(self
            .load_all()
            .await?
            .into_iter()
            .filter(|cp| !cp.is_finished())
            .collect())
    }
}
