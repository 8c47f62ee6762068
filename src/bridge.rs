//! Request/response surface the shell exposes to the UI process.
//!
//! Each request is one JSON object tagged by `cmd`, optionally carrying an
//! `id` that is echoed back:
//!
//! ```text
//! {"id":1,"cmd":"set-one","key":"settings","value":{"clubName":"Ace Snooker"}}
//! {"id":1,"result":true}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::backup::BackupRotator;
use crate::storage::{Document, Storage};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "kebab-case")]
pub enum BridgeRequest {
    GetAll,
    SetAll { data: Document },
    GetOne { key: String },
    SetOne { key: String, value: Value },
    RemoveOne { key: String },
    ListKeys,
    ClearAll,
    CreateBackup,
    GetDataPath,
}

#[derive(Debug, Deserialize)]
struct RequestEnvelope {
    #[serde(default)]
    id: Value,
    #[serde(flatten)]
    request: BridgeRequest,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BridgeResponse {
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub struct Bridge {
    storage: Storage,
    rotator: Option<BackupRotator>,
}

impl Bridge {
    pub fn new(storage: Storage, rotator: Option<BackupRotator>) -> Self {
        Self { storage, rotator }
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn handle(&self, request: BridgeRequest) -> Value {
        debug!("Bridge request: {:?}", request);
        match request {
            BridgeRequest::GetAll => Value::Object(self.storage.get_all()),
            BridgeRequest::SetAll { data } => Value::Bool(self.storage.set_all(&data)),
            BridgeRequest::GetOne { key } => self.storage.get(&key).unwrap_or(Value::Null),
            BridgeRequest::SetOne { key, value } => Value::Bool(self.storage.set(&key, value)),
            BridgeRequest::RemoveOne { key } => Value::Bool(self.storage.remove(&key)),
            BridgeRequest::ListKeys => Value::from(self.storage.keys()),
            BridgeRequest::ClearAll => Value::Bool(self.storage.clear()),
            BridgeRequest::CreateBackup => self
                .rotator
                .as_ref()
                .and_then(BackupRotator::create_backup)
                .map(|path| Value::String(path.display().to_string()))
                .unwrap_or(Value::Null),
            BridgeRequest::GetDataPath => self
                .storage
                .data_path()
                .map(|path| Value::String(path.display().to_string()))
                .unwrap_or(Value::Null),
        }
    }

    /// Handles one serialized request line and returns the serialized reply.
    pub fn handle_line(&self, line: &str) -> String {
        let response = match serde_json::from_str::<RequestEnvelope>(line) {
            Ok(envelope) => BridgeResponse {
                id: envelope.id,
                result: Some(self.handle(envelope.request)),
                error: None,
            },
            Err(e) => return Self::reject(e),
        };
        encode(&response)
    }

    /// Error reply for input that could not be read as a request.
    pub fn reject(reason: impl std::fmt::Display) -> String {
        warn!("Rejected bridge request: {}", reason);
        encode(&BridgeResponse {
            id: Value::Null,
            result: None,
            error: Some(format!("invalid request: {}", reason)),
        })
    }
}

fn encode(response: &BridgeResponse) -> String {
    serde_json::to_string(response).unwrap_or_else(|e| {
        format!(r#"{{"id":null,"error":"failed to encode response: {}"}}"#, e)
    })
}
