pub mod backup;
pub mod bridge;
pub mod bucket;
pub mod cloud;
pub mod config;
pub mod error;
pub mod shell;
pub mod storage;
pub mod transfer;

pub use backup::BackupRotator;
pub use bridge::{Bridge, BridgeRequest, BridgeResponse};
pub use bucket::Bucket;
pub use cloud::{CloudBackup, CloudError, CloudPhase, CloudState};
pub use config::{AppConfig, CloudConfig};
pub use error::CueClubError;
pub use shell::Shell;
pub use storage::{Document, Storage};
pub use transfer::{ExportBundle, ImportPlan};

/// Re-export commonly used types
pub type Result<T> = std::result::Result<T, CueClubError>;

use once_cell::sync::OnceCell;

static TRACING_INIT: OnceCell<()> = OnceCell::new();

/// Installs the global tracing subscriber. Logs go to stderr because stdout
/// carries the bridge protocol.
pub fn init_tracing() {
    TRACING_INIT.get_or_init(|| {
        use tracing_subscriber::{fmt, EnvFilter};

        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("cueclub=info"));
        let _ = fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init();
    });
}
