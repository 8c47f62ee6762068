use std::path::PathBuf;

use once_cell::sync::OnceCell;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{error, info};

use crate::backup::BackupRotator;
use crate::bridge::Bridge;
use crate::config::AppConfig;
use crate::storage::Storage;

static FAULT_ROTATOR: OnceCell<BackupRotator> = OnceCell::new();

/// Snapshots the document from the panic hook. Only the first call installs
/// the hook; later calls return `false`.
pub fn install_fault_backup(rotator: BackupRotator) -> bool {
    if FAULT_ROTATOR.set(rotator).is_err() {
        return false;
    }
    let previous = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        if let Some(rotator) = FAULT_ROTATOR.get() {
            error!("Unhandled fault, snapshotting data: {}", panic_info);
            rotator.create_backup();
        }
        previous(panic_info);
    }));
    true
}

/// Hosts the UI bridge and runs the start/shutdown backup triggers.
pub struct Shell {
    bridge: Bridge,
    rotator: BackupRotator,
}

impl Shell {
    pub fn new(config: &AppConfig) -> Self {
        let storage = Storage::with_path(config.data_file());
        Self::from_parts(storage, BackupRotator::from_config(config))
    }

    pub fn from_parts(storage: Storage, rotator: BackupRotator) -> Self {
        Self {
            bridge: Bridge::new(storage, Some(rotator.clone())),
            rotator,
        }
    }

    pub fn bridge(&self) -> &Bridge {
        &self.bridge
    }

    pub fn rotator(&self) -> &BackupRotator {
        &self.rotator
    }

    pub fn start(&self) -> Option<PathBuf> {
        info!("Shell starting");
        self.rotator.create_backup()
    }

    pub fn shutdown(&self) -> Option<PathBuf> {
        info!("Shell shutting down");
        self.rotator.create_backup()
    }

    /// Answers newline-delimited requests until the reader is exhausted.
    /// Returns the number of requests served.
    pub async fn serve<R, W>(&self, mut reader: R, mut writer: W) -> crate::Result<usize>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut buf = Vec::new();
        let mut served = 0;
        loop {
            buf.clear();
            if reader.read_until(b'\n', &mut buf).await? == 0 {
                break;
            }
            let reply = match std::str::from_utf8(&buf) {
                Ok(line) if line.trim().is_empty() => continue,
                Ok(line) => self.bridge.handle_line(line.trim()),
                Err(e) => Bridge::reject(e),
            };
            writer.write_all(reply.as_bytes()).await?;
            writer.write_all(b"\n").await?;
            writer.flush().await?;
            served += 1;
        }
        Ok(served)
    }

    /// Full session: startup snapshot, bridge loop, shutdown snapshot.
    pub async fn run<R, W>(&self, reader: R, writer: W) -> crate::Result<usize>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        self.start();
        let served = self.serve(reader, writer).await;
        self.shutdown();
        served
    }
}
