//! Optional cloud backup: OAuth2 sign-in, token caching and backup files in
//! a dedicated remote folder. Independent of the local store; it only moves
//! export-shaped snapshots.

pub mod client;
pub mod consent;
pub mod error;
pub mod remote;
pub mod state;
pub mod token;

pub use client::{remote_backup_name, CloudBackup, BACKUP_FOLDER_NAME};
pub use consent::{ConsentFlow, LoopbackConsent};
pub use error::CloudError;
pub use remote::{DriveApi, RemoteBackupFile, RemoteStore};
pub use state::{CloudPhase, CloudState, Observers, Subscription};
pub use token::{CachedToken, TokenCache};
