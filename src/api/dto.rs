/// Data Transfer Objects (DTOs) for REST API endpoints
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::registry::TerminalRecord;
use crate::service::{CreatedTerminal, TerminalDetail, TerminalState};

/// Request DTO for creating a terminal
#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTerminalRequest {
    /// Optional id, generated when absent
    pub id: Option<String>,

    /// Optional working directory, clamped to the permitted root
    pub cwd: Option<PathBuf>,

    /// Optional display name
    pub name: Option<String>,
}

/// Request DTO for renaming a terminal
#[derive(Debug, Deserialize, Serialize)]
pub struct RenameTerminalRequest {
    pub name: String,
}

/// Request DTO for resizing a terminal
#[derive(Debug, Deserialize, Serialize)]
pub struct ResizeTerminalRequest {
    /// New terminal columns
    pub cols: u16,

    /// New terminal rows
    pub rows: u16,
}

/// Response DTO for a terminal in listings
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminalSummary {
    pub id: String,
    pub name: String,
    pub cwd: PathBuf,
    /// Milliseconds since the UNIX epoch, 0 when unknown
    pub created_at: u64,
}

impl From<TerminalRecord> for TerminalSummary {
    fn from(record: TerminalRecord) -> Self {
        Self {
            id: record.id,
            name: record.name,
            cwd: record.cwd,
            created_at: record.created_at,
        }
    }
}

/// Response DTO for a created terminal
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedTerminalResponse {
    pub id: String,
    pub session_name: String,
    pub name: String,
    pub cwd: PathBuf,

    /// Present only when the terminal runs without persistence
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub fallback: bool,
}

impl From<CreatedTerminal> for CreatedTerminalResponse {
    fn from(created: CreatedTerminal) -> Self {
        Self {
            id: created.record.id,
            session_name: created.session_name,
            name: created.record.name,
            cwd: created.record.cwd,
            fallback: created.fallback,
        }
    }
}

/// Response DTO for a single terminal with its live state
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminalDetailResponse {
    #[serde(flatten)]
    pub terminal: TerminalSummary,
    pub state: TerminalState,
    pub viewers: usize,
    pub persistent: bool,
}

impl From<TerminalDetail> for TerminalDetailResponse {
    fn from(detail: TerminalDetail) -> Self {
        Self {
            terminal: detail.record.into(),
            state: detail.state,
            viewers: detail.viewers,
            persistent: detail.persistent,
        }
    }
}

/// Generic success response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SuccessResponse {
    /// Success flag
    pub success: bool,

    /// Response message
    pub message: String,
}

impl SuccessResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }
}

/// Generic error response
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    /// Error flag
    pub error: bool,

    /// Error message
    pub message: String,

    /// HTTP status code
    pub code: u16,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn created(fallback: bool) -> CreatedTerminal {
        CreatedTerminal {
            record: TerminalRecord {
                id: "abc".to_string(),
                name: "Terminal abc".to_string(),
                cwd: PathBuf::from("/home/me"),
                created_at: 42,
            },
            session_name: "webfiles-abc".to_string(),
            fallback,
        }
    }

    #[test]
    fn fallback_is_only_serialized_when_set() {
        let body = serde_json::to_value(CreatedTerminalResponse::from(created(false))).unwrap();
        assert_eq!(
            body,
            json!({
                "id": "abc",
                "sessionName": "webfiles-abc",
                "name": "Terminal abc",
                "cwd": "/home/me",
            })
        );

        let body = serde_json::to_value(CreatedTerminalResponse::from(created(true))).unwrap();
        assert_eq!(body["fallback"], json!(true));
    }

    #[test]
    fn detail_flattens_the_record() {
        let detail = TerminalDetail {
            record: created(false).record,
            state: TerminalState::Active,
            viewers: 2,
            persistent: true,
        };
        let body = serde_json::to_value(TerminalDetailResponse::from(detail)).unwrap();
        assert_eq!(body["createdAt"], json!(42));
        assert_eq!(body["state"], json!("active"));
        assert_eq!(body["viewers"], json!(2));
    }
}
