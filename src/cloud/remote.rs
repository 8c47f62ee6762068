//! Remote object storage used for cloud backups.
//!
//! [`RemoteStore`] is the seam the client talks through; [`DriveApi`] is the
//! Google Drive v3 implementation used by the application.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use super::error::CloudError;

type Result<T> = std::result::Result<T, CloudError>;

const DEFAULT_TIMEOUT_SECS: u64 = 30;
const MAX_LOG_BODY_CHARS: usize = 512;
const DRIVE_FILES_URL: &str = "https://www.googleapis.com/drive/v3/files";
const DRIVE_UPLOAD_URL: &str = "https://www.googleapis.com/upload/drive/v3/files";
const DRIVE_ABOUT_URL: &str = "https://www.googleapis.com/drive/v3/about";
const REVOKE_URL: &str = "https://oauth2.googleapis.com/revoke";
const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";

/// Listing metadata for one backup file. Content is never cached.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteBackupFile {
    pub id: String,
    pub name: String,
    pub created_time: Option<DateTime<Utc>>,
    pub size: Option<u64>,
}

#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn find_folder(&self, token: &str, name: &str) -> Result<Option<String>>;
    async fn create_folder(&self, token: &str, name: &str) -> Result<String>;
    async fn upload(
        &self,
        token: &str,
        folder_id: &str,
        name: &str,
        content: &str,
    ) -> Result<RemoteBackupFile>;
    /// Files in the folder, newest first.
    async fn list(&self, token: &str, folder_id: &str) -> Result<Vec<RemoteBackupFile>>;
    async fn download(&self, token: &str, file_id: &str) -> Result<String>;
    async fn delete(&self, token: &str, file_id: &str) -> Result<()>;
    async fn user_email(&self, token: &str) -> Result<Option<String>>;
    async fn revoke(&self, token: &str) -> Result<()>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DriveFile {
    id: String,
    #[serde(default)]
    name: String,
    created_time: Option<DateTime<Utc>>,
    // Drive reports sizes as decimal strings.
    size: Option<String>,
}

impl From<DriveFile> for RemoteBackupFile {
    fn from(file: DriveFile) -> Self {
        Self {
            id: file.id,
            name: file.name,
            created_time: file.created_time,
            size: file.size.and_then(|raw| raw.parse().ok()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct DriveFileList {
    #[serde(default)]
    files: Vec<DriveFile>,
}

#[derive(Debug, Deserialize)]
struct DriveAbout {
    user: Option<DriveUser>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DriveUser {
    email_address: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GoogleErrorEnvelope {
    error: GoogleError,
}

#[derive(Debug, Deserialize)]
struct GoogleError {
    message: String,
}

/// Google Drive v3 client.
#[derive(Debug, Clone)]
pub struct DriveApi {
    client: reqwest::Client,
    api_key: Option<String>,
}

impl DriveApi {
    pub fn new(api_key: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()?;
        Ok(Self { client, api_key })
    }

    fn headers(&self, token: &str) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        let auth_value = HeaderValue::from_str(&format!("Bearer {}", token))
            .map_err(|_| CloudError::auth("Invalid access token format"))?;
        headers.insert(AUTHORIZATION, auth_value);
        headers.insert(USER_AGENT, HeaderValue::from_static("cueclub/cloud-backup"));
        Ok(headers)
    }

    fn key_param(&self) -> Vec<(&'static str, String)> {
        self.api_key
            .iter()
            .map(|key| ("key", key.clone()))
            .collect()
    }

    fn log_response(status: reqwest::StatusCode, body: &str) {
        if status.is_success() {
            debug!("Drive response status: {}", status);
            return;
        }
        let mut preview = body.chars().take(MAX_LOG_BODY_CHARS).collect::<String>();
        if body.chars().count() > MAX_LOG_BODY_CHARS {
            preview.push_str("...");
        }
        debug!("Drive response error ({}): {}", status, preview);
    }

    /// Reads the body, mapping non-success statuses to `CloudError::Api`.
    async fn read_body(response: reqwest::Response) -> Result<String> {
        let status = response.status();
        let body = response.text().await?;
        Self::log_response(status, &body);

        if !status.is_success() {
            let message = serde_json::from_str::<GoogleErrorEnvelope>(&body)
                .map(|envelope| envelope.error.message)
                .unwrap_or_else(|_| format!("Request failed: {}", body));
            return Err(CloudError::api(status.as_u16(), message));
        }
        Ok(body)
    }

    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T> {
        let body = Self::read_body(response).await?;
        Ok(serde_json::from_str(&body)?)
    }
}

fn escape_query_literal(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

fn multipart_related_body(boundary: &str, metadata: &str, content: &str) -> String {
    format!(
        "--{b}\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n{m}\r\n--{b}\r\nContent-Type: application/json\r\n\r\n{c}\r\n--{b}--",
        b = boundary,
        m = metadata,
        c = content
    )
}

#[async_trait]
impl RemoteStore for DriveApi {
    async fn find_folder(&self, token: &str, name: &str) -> Result<Option<String>> {
        let query = format!(
            "name = '{}' and mimeType = '{}' and trashed = false",
            escape_query_literal(name),
            FOLDER_MIME_TYPE
        );
        let response = self
            .client
            .get(DRIVE_FILES_URL)
            .headers(self.headers(token)?)
            .query(&[
                ("q", query.as_str()),
                ("fields", "files(id,name)"),
                ("spaces", "drive"),
            ])
            .query(&self.key_param())
            .send()
            .await?;
        let list: DriveFileList = Self::parse_response(response).await?;
        Ok(list.files.into_iter().next().map(|file| file.id))
    }

    async fn create_folder(&self, token: &str, name: &str) -> Result<String> {
        let response = self
            .client
            .post(DRIVE_FILES_URL)
            .headers(self.headers(token)?)
            .query(&[("fields", "id")])
            .query(&self.key_param())
            .json(&serde_json::json!({ "name": name, "mimeType": FOLDER_MIME_TYPE }))
            .send()
            .await?;
        let file: DriveFile = Self::parse_response(response).await?;
        debug!("Created backup folder {}", file.id);
        Ok(file.id)
    }

    async fn upload(
        &self,
        token: &str,
        folder_id: &str,
        name: &str,
        content: &str,
    ) -> Result<RemoteBackupFile> {
        let metadata = serde_json::json!({
            "name": name,
            "mimeType": "application/json",
            "parents": [folder_id],
        })
        .to_string();
        let boundary = format!("cueclub-{}", Uuid::new_v4().simple());
        let body = multipart_related_body(&boundary, &metadata, content);

        let mut headers = self.headers(token)?;
        let content_type = HeaderValue::from_str(&format!("multipart/related; boundary={}", boundary))
            .map_err(|_| CloudError::api(0, "Invalid multipart boundary"))?;
        headers.insert(CONTENT_TYPE, content_type);

        let response = self
            .client
            .post(DRIVE_UPLOAD_URL)
            .headers(headers)
            .query(&[
                ("uploadType", "multipart"),
                ("fields", "id,name,createdTime,size"),
            ])
            .query(&self.key_param())
            .body(body)
            .send()
            .await?;
        let file: DriveFile = Self::parse_response(response).await?;
        Ok(file.into())
    }

    async fn list(&self, token: &str, folder_id: &str) -> Result<Vec<RemoteBackupFile>> {
        let query = format!("'{}' in parents and trashed = false", escape_query_literal(folder_id));
        let response = self
            .client
            .get(DRIVE_FILES_URL)
            .headers(self.headers(token)?)
            .query(&[
                ("q", query.as_str()),
                ("orderBy", "createdTime desc"),
                ("fields", "files(id,name,createdTime,size)"),
            ])
            .query(&self.key_param())
            .send()
            .await?;
        let list: DriveFileList = Self::parse_response(response).await?;
        Ok(list.files.into_iter().map(RemoteBackupFile::from).collect())
    }

    async fn download(&self, token: &str, file_id: &str) -> Result<String> {
        let response = self
            .client
            .get(format!("{}/{}", DRIVE_FILES_URL, file_id))
            .headers(self.headers(token)?)
            .query(&[("alt", "media")])
            .query(&self.key_param())
            .send()
            .await?;
        Self::read_body(response).await
    }

    async fn delete(&self, token: &str, file_id: &str) -> Result<()> {
        let response = self
            .client
            .delete(format!("{}/{}", DRIVE_FILES_URL, file_id))
            .headers(self.headers(token)?)
            .query(&self.key_param())
            .send()
            .await?;
        Self::read_body(response).await?;
        Ok(())
    }

    async fn user_email(&self, token: &str) -> Result<Option<String>> {
        let response = self
            .client
            .get(DRIVE_ABOUT_URL)
            .headers(self.headers(token)?)
            .query(&[("fields", "user(emailAddress)")])
            .query(&self.key_param())
            .send()
            .await?;
        let about: DriveAbout = Self::parse_response(response).await?;
        Ok(about.user.and_then(|user| user.email_address))
    }

    async fn revoke(&self, token: &str) -> Result<()> {
        let response = self
            .client
            .post(REVOKE_URL)
            .form(&[("token", token)])
            .send()
            .await?;
        Self::read_body(response).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drive_file_size_is_parsed() {
        let file: DriveFile = serde_json::from_str(
            r#"{"id":"abc","name":"backup.json","createdTime":"2026-10-14T09:30:00.000Z","size":"2048"}"#,
        )
        .unwrap();
        let remote = RemoteBackupFile::from(file);
        assert_eq!(remote.size, Some(2048));
        assert!(remote.created_time.is_some());
    }

    #[test]
    fn query_literals_are_escaped() {
        assert_eq!(escape_query_literal("O'Neill's Club"), "O\\'Neill\\'s Club");
    }

    #[test]
    fn multipart_body_layout() {
        let body = multipart_related_body("b1", r#"{"name":"x"}"#, r#"{"version":"2.0"}"#);
        assert!(body.starts_with("--b1\r\nContent-Type: application/json; charset=UTF-8"));
        assert!(body.contains("\r\n\r\n{\"version\":\"2.0\"}\r\n"));
        assert!(body.ends_with("--b1--"));
    }

    #[test]
    fn google_error_message_is_extracted() {
        let envelope: GoogleErrorEnvelope = serde_json::from_str(
            r#"{"error":{"code":401,"message":"Invalid Credentials","errors":[]}}"#,
        )
        .unwrap();
        assert_eq!(envelope.error.message, "Invalid Credentials");
    }
}
