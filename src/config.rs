use std::path::{Path, PathBuf};

pub const DATA_FILE_NAME: &str = "cueclub-data.json";
pub const CLOUD_SESSION_FILE_NAME: &str = "cloud-session.json";
pub const BACKUP_DIR_NAME: &str = "backups";
pub const BACKUP_PREFIX: &str = "cueclub";
pub const DEFAULT_RETENTION: usize = 10;

const DATA_DIR_ENV: &str = "CUECLUB_DATA_DIR";
const RETENTION_ENV: &str = "CUECLUB_BACKUP_RETENTION";
const CLIENT_ID_ENV: &str = "CUECLUB_GOOGLE_CLIENT_ID";
const API_KEY_ENV: &str = "CUECLUB_GOOGLE_API_KEY";
const CLIENT_SECRET_ENV: &str = "CUECLUB_GOOGLE_CLIENT_SECRET";

/// Where the shell keeps its document, snapshots and cloud session.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub data_dir: PathBuf,
    pub backup_prefix: String,
    pub retention: usize,
}

impl AppConfig {
    /// Resolves the configuration from an explicit directory, then
    /// `CUECLUB_DATA_DIR`, then the platform data directory.
    pub fn resolve(data_dir: Option<PathBuf>) -> Self {
        let data_dir = data_dir
            .or_else(|| non_empty_env(DATA_DIR_ENV).map(PathBuf::from))
            .unwrap_or_else(default_data_dir);
        let retention = non_empty_env(RETENTION_ENV)
            .and_then(|raw| raw.parse::<usize>().ok())
            .unwrap_or(DEFAULT_RETENTION)
            .max(1);
        Self {
            data_dir,
            backup_prefix: BACKUP_PREFIX.to_string(),
            retention,
        }
    }

    pub fn in_dir(data_dir: &Path) -> Self {
        Self {
            data_dir: data_dir.to_path_buf(),
            backup_prefix: BACKUP_PREFIX.to_string(),
            retention: DEFAULT_RETENTION,
        }
    }

    pub fn data_file(&self) -> PathBuf {
        self.data_dir.join(DATA_FILE_NAME)
    }

    pub fn backup_dir(&self) -> PathBuf {
        self.data_dir.join(BACKUP_DIR_NAME)
    }

    pub fn cloud_session_file(&self) -> PathBuf {
        self.data_dir.join(CLOUD_SESSION_FILE_NAME)
    }
}

/// Externally supplied credentials for the cloud backup integration.
#[derive(Debug, Clone, Default)]
pub struct CloudConfig {
    pub client_id: Option<String>,
    pub api_key: Option<String>,
    pub client_secret: Option<String>,
}

impl CloudConfig {
    pub fn from_env() -> Self {
        Self {
            client_id: non_empty_env(CLIENT_ID_ENV),
            api_key: non_empty_env(API_KEY_ENV),
            client_secret: non_empty_env(CLIENT_SECRET_ENV),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.client_id.is_some()
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn default_data_dir() -> PathBuf {
    if cfg!(target_os = "windows") {
        std::env::var("APPDATA")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("."))
            .join("cueclub")
    } else if cfg!(target_os = "macos") {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("."))
            .join("Library/Application Support/cueclub")
    } else {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(".local/share/cueclub")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    #[test]
    fn explicit_dir_wins() {
        let _guard = ENV_MUTEX.lock().unwrap();
        let config = AppConfig::resolve(Some(PathBuf::from("/srv/club")));
        assert_eq!(config.data_file(), PathBuf::from("/srv/club/cueclub-data.json"));
        assert_eq!(config.backup_dir(), PathBuf::from("/srv/club/backups"));
    }

    #[test]
    fn retention_env_is_clamped() {
        let _guard = ENV_MUTEX.lock().unwrap();
        let previous = std::env::var(RETENTION_ENV).ok();

        std::env::set_var(RETENTION_ENV, "0");
        assert_eq!(AppConfig::resolve(Some(PathBuf::from("x"))).retention, 1);
        std::env::set_var(RETENTION_ENV, "not-a-number");
        assert_eq!(
            AppConfig::resolve(Some(PathBuf::from("x"))).retention,
            DEFAULT_RETENTION
        );

        match previous {
            Some(value) => std::env::set_var(RETENTION_ENV, value),
            None => std::env::remove_var(RETENTION_ENV),
        }
    }

    #[test]
    fn blank_client_id_counts_as_missing() {
        let _guard = ENV_MUTEX.lock().unwrap();
        let previous = std::env::var(CLIENT_ID_ENV).ok();

        std::env::set_var(CLIENT_ID_ENV, "   ");
        assert!(!CloudConfig::from_env().is_configured());
        std::env::set_var(CLIENT_ID_ENV, "abc.apps.googleusercontent.com");
        assert!(CloudConfig::from_env().is_configured());

        match previous {
            Some(value) => std::env::set_var(CLIENT_ID_ENV, value),
            None => std::env::remove_var(CLIENT_ID_ENV),
        }
    }
}
