//! Storage layout configuration

use std::path::PathBuf;

use crate::errors::StoreError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;

/// On-disk layout of the orchestrator's durable state
#[derive(Debug, Clone)]
pub struct StorageLayout {
    /// Base directory for all storage
    pub base_dir: PathBuf,
}

impl StorageLayout {
    /// Create a new storage layout
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Get the settings file path
    pub fn settings_file(&self) -> File {
        File::new(self.base_dir.join("settings.json"))
    }

    /// Event log files, one per build id
    pub fn events_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("events"))
    }

    /// Workflow checkpoints, one per build id
    pub fn checkpoints_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("checkpoints"))
    }

    /// Get the logs directory
    pub fn logs_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("logs"))
    }

    /// Create the storage directories
    pub async fn setup(&self) -> Result<(), StoreError> {
        self.events_dir().create().await?;
        self.checkpoints_dir().create().await?;
        self.logs_dir().create().await?;
        Ok(())
    }
}

impl Default for StorageLayout {
    fn default() -> Self {
        #[cfg(target_os = "linux")]
        let base_dir = PathBuf::from("/var/lib/shipwright");

        #[cfg(not(target_os = "linux"))]
        let base_dir = std::env::var_os("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".shipwright");

        Self::new(base_dir)
    }
}
