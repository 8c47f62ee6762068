use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::{error, info, warn};

use super::consent::ConsentFlow;
use super::error::CloudError;
use super::remote::{RemoteBackupFile, RemoteStore};
use super::state::{CloudPhase, CloudState, Observers, Subscription};
use super::token::{CachedToken, TokenCache};
use crate::config::CloudConfig;
use crate::storage::Storage;

/// Name of the dedicated remote folder holding backups.
pub const BACKUP_FOLDER_NAME: &str = "CueClub Backups";

const SESSION_EXPIRED: &str = "Session expired. Please sign in again.";

/// `backup-<YYYY-MM-DD>-<epoch millis>.json`
pub fn remote_backup_name(at: DateTime<Utc>) -> String {
    format!(
        "backup-{}-{}.json",
        at.format("%Y-%m-%d"),
        at.timestamp_millis()
    )
}

/// Cloud backup client.
///
/// Every operation needs the signed-in phase. Failures never escape: they
/// are logged, stored as `error` on the state, and turned into `false`,
/// `None` or an empty list. Authentication failures also demote the client
/// to signed-out.
pub struct CloudBackup {
    config: CloudConfig,
    remote: Arc<dyn RemoteStore>,
    consent: Arc<dyn ConsentFlow>,
    tokens: TokenCache,
    token: Option<CachedToken>,
    folder_id: Option<String>,
    state: CloudState,
    observers: Observers,
}

impl CloudBackup {
    /// `session` persists the cached token between runs.
    pub fn new(
        config: CloudConfig,
        remote: Arc<dyn RemoteStore>,
        consent: Arc<dyn ConsentFlow>,
        session: Storage,
    ) -> Self {
        Self {
            config,
            remote,
            consent,
            tokens: TokenCache::new(session),
            token: None,
            folder_id: None,
            state: CloudState::default(),
            observers: Observers::default(),
        }
    }

    pub fn state(&self) -> CloudState {
        self.state.clone()
    }

    /// Delivers the current state right away, then every later change.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&CloudState) + Send + Sync + 'static,
    {
        callback(&self.state);
        self.observers.register(callback)
    }

    fn update_state<F>(&mut self, f: F)
    where
        F: FnOnce(&mut CloudState),
    {
        let before = self.state.clone();
        f(&mut self.state);
        if self.state != before {
            let snapshot = self.state.clone();
            self.observers.notify(&snapshot);
        }
    }

    pub async fn initialize(&mut self) -> bool {
        match self.state.phase {
            CloudPhase::SignedIn | CloudPhase::SignedOut => return true,
            CloudPhase::Initializing => return false,
            CloudPhase::Uninitialized | CloudPhase::Error => {}
        }

        if !self.config.is_configured() {
            error!("Cloud backup disabled: no Google client ID configured");
            let message = CloudError::NotConfigured("missing Google client ID".to_string());
            self.update_state(|state| {
                state.enter(CloudPhase::Error);
                state.error = Some(message.to_string());
            });
            return false;
        }

        self.update_state(|state| {
            state.enter(CloudPhase::Initializing);
            state.error = None;
        });

        match self.tokens.load() {
            Some(token) if !token.is_expired_at(Utc::now()) => {
                let email = token.user_email.clone();
                self.token = Some(token);
                info!("Restored cloud backup session");
                self.update_state(|state| {
                    state.enter(CloudPhase::SignedIn);
                    state.user_email = email;
                });
            }
            Some(_) => {
                info!("Cached cloud token expired, signing out");
                self.tokens.purge();
                self.update_state(|state| state.enter(CloudPhase::SignedOut));
            }
            None => self.update_state(|state| state.enter(CloudPhase::SignedOut)),
        }
        true
    }

    /// Runs the interactive consent flow and caches the resulting token.
    pub async fn sign_in(&mut self) -> bool {
        if !self.state.is_initialized {
            self.update_state(|state| {
                state.error = Some("Cloud backup is not initialized".to_string())
            });
            return false;
        }

        let access_token = match self.consent.authorize(&self.config).await {
            Ok(token) => token,
            Err(e) => {
                error!("Cloud sign-in failed: {}", e);
                self.update_state(|state| state.error = Some(format!("Sign-in failed: {}", e)));
                return false;
            }
        };

        let mut token = CachedToken::issued_at(access_token, Utc::now());
        match self.remote.user_email(&token.access_token).await {
            Ok(email) => token.user_email = email,
            Err(e) => warn!("Could not fetch account email: {}", e),
        }
        if !self.tokens.store(&token) {
            warn!("Cloud token could not be cached; sign-in lasts for this run only");
        }

        let email = token.user_email.clone();
        self.token = Some(token);
        self.folder_id = None;
        info!("Signed in to cloud backup");
        self.update_state(|state| {
            state.enter(CloudPhase::SignedIn);
            state.user_email = email;
            state.error = None;
        });
        true
    }

    /// Drops the session. Revocation with the remote service is best-effort.
    pub async fn sign_out(&mut self) {
        if let Some(token) = self.token.take() {
            if let Err(e) = self.remote.revoke(&token.access_token).await {
                warn!("Token revocation failed: {}", e);
            }
        }
        self.tokens.purge();
        self.folder_id = None;
        self.update_state(|state| {
            state.enter(CloudPhase::SignedOut);
            state.error = None;
        });
    }

    // Current access token, demoting the session once it has expired.
    fn active_token(&mut self) -> Option<String> {
        if !self.state.is_signed_in {
            return None;
        }
        let expired = match &self.token {
            Some(token) => token.is_expired_at(Utc::now()),
            None => true,
        };
        if expired {
            self.demote(SESSION_EXPIRED.to_string());
            return None;
        }
        self.token.as_ref().map(|token| token.access_token.clone())
    }

    fn demote(&mut self, message: String) {
        self.token = None;
        self.folder_id = None;
        self.tokens.purge();
        self.update_state(|state| {
            state.enter(CloudPhase::SignedOut);
            state.error = Some(message);
        });
    }

    fn record_failure(&mut self, action: &str, e: CloudError) {
        error!("Cloud backup {} failed: {}", action, e);
        let message = format!("Failed to {}: {}", action, e);
        if let CloudError::Api { status: 404, .. } = &e {
            // The folder may have been deleted remotely; resolve it again.
            self.folder_id = None;
        }
        if e.is_auth_failure() {
            self.demote(message);
        } else {
            self.update_state(|state| state.error = Some(message));
        }
    }

    async fn find_folder(&mut self, token: &str) -> Result<Option<String>, CloudError> {
        if let Some(id) = &self.folder_id {
            return Ok(Some(id.clone()));
        }
        let found = self.remote.find_folder(token, BACKUP_FOLDER_NAME).await?;
        self.folder_id = found.clone();
        Ok(found)
    }

    async fn ensure_folder(&mut self, token: &str) -> Result<String, CloudError> {
        if let Some(id) = self.find_folder(token).await? {
            return Ok(id);
        }
        let id = self.remote.create_folder(token, BACKUP_FOLDER_NAME).await?;
        info!("Created remote backup folder {}", BACKUP_FOLDER_NAME);
        self.folder_id = Some(id.clone());
        Ok(id)
    }

    /// Uploads `snapshot` as JSON. `name` defaults to [`remote_backup_name`].
    pub async fn upload_backup<T>(&mut self, snapshot: &T, name: Option<&str>) -> bool
    where
        T: Serialize + ?Sized,
    {
        let Some(token) = self.active_token() else {
            return false;
        };
        let content = match serde_json::to_string_pretty(snapshot) {
            Ok(content) => content,
            Err(e) => {
                self.record_failure("upload backup", e.into());
                return false;
            }
        };
        let folder_id = match self.ensure_folder(&token).await {
            Ok(id) => id,
            Err(e) => {
                self.record_failure("upload backup", e);
                return false;
            }
        };

        let now = Utc::now();
        let name = name
            .map(str::to_string)
            .unwrap_or_else(|| remote_backup_name(now));
        match self.remote.upload(&token, &folder_id, &name, &content).await {
            Ok(file) => {
                info!("Uploaded cloud backup {} ({})", file.name, file.id);
                self.update_state(|state| {
                    state.last_sync_time = Some(now);
                    state.error = None;
                });
                true
            }
            Err(e) => {
                self.record_failure("upload backup", e);
                false
            }
        }
    }

    /// Backups in the dedicated folder, newest first. Empty when signed out
    /// or when the folder does not exist yet.
    pub async fn list_backups(&mut self) -> Vec<RemoteBackupFile> {
        let Some(token) = self.active_token() else {
            return Vec::new();
        };
        let folder_id = match self.find_folder(&token).await {
            Ok(Some(id)) => id,
            Ok(None) => return Vec::new(),
            Err(e) => {
                self.record_failure("list backups", e);
                return Vec::new();
            }
        };
        match self.remote.list(&token, &folder_id).await {
            Ok(mut files) => {
                files.sort_by(|a, b| b.created_time.cmp(&a.created_time));
                files
            }
            Err(e) => {
                self.record_failure("list backups", e);
                Vec::new()
            }
        }
    }

    pub async fn download_backup(&mut self, file_id: &str) -> Option<Value> {
        let token = self.active_token()?;
        match self.remote.download(&token, file_id).await {
            Ok(body) => match serde_json::from_str(&body) {
                Ok(value) => Some(value),
                Err(e) => {
                    self.record_failure("download backup", e.into());
                    None
                }
            },
            Err(e) => {
                self.record_failure("download backup", e);
                None
            }
        }
    }

    pub async fn delete_backup(&mut self, file_id: &str) -> bool {
        let Some(token) = self.active_token() else {
            return false;
        };
        match self.remote.delete(&token, file_id).await {
            Ok(()) => {
                info!("Deleted cloud backup {}", file_id);
                true
            }
            Err(e) => {
                self.record_failure("delete backup", e);
                false
            }
        }
    }
}
