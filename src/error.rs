use thiserror::Error;

use crate::cloud::CloudError;

#[derive(Error, Debug)]
pub enum CueClubError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid backup file: {0}")]
    InvalidImport(String),

    #[error("Backup error: {0}")]
    Backup(String),

    #[error("Backup not found: {0}")]
    BackupNotFound(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Cloud backup error: {0}")]
    Cloud(#[from] CloudError),
}
