//! Wire format shared with the remote agent.
//!
//! Every frame is one JSON object: `{"messageType": "...", "data": {...}}`.
//! When request-id correlation is enabled an extra `requestId` field rides
//! along; peers that do not know about it simply ignore it.

pub use async_lsp::lsp_types::{Position, Range};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ProtocolError;

pub const MESSAGE_TYPE_FIELD: &str = "messageType";
pub const DATA_FIELD: &str = "data";
pub const REQUEST_ID_FIELD: &str = "requestId";

// Server → client queries and actions
pub const WORKSPACE_DIRECTORY: &str = "workspaceDirectory";
pub const UNIQUE_ID: &str = "uniqueId";
pub const READ_FILE: &str = "readFile";
pub const VISIBLE_FILES: &str = "visibleFiles";
pub const SAVE_FILE: &str = "saveFile";
pub const SET_FILE_OPEN: &str = "setFileOpen";
pub const SHOW_VIRTUAL_FILE: &str = "showVirtualFile";
pub const SHOW_MESSAGE: &str = "showMessage";
pub const SHOW_DIFF: &str = "showDiff";
pub const HIGHLIGHT_CODE: &str = "highlightCode";
pub const CONNECTED: &str = "connected";

// Client → server
pub const GET_SESSION_ID: &str = "getSessionId";
pub const HIGHLIGHTED_CODE_PUSH: &str = "highlightedCodePush";

/// Event name used when a selection is forwarded to the local UI.
pub const HIGHLIGHTED_CODE_EVENT: &str = "highlightedCode";

/// One logical message on the connection.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub message_type: String,
    pub data: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<u64>,
}

impl Envelope {
    pub fn new(message_type: impl Into<String>, data: Map<String, Value>) -> Self {
        Self {
            message_type: message_type.into(),
            data,
            request_id: None,
        }
    }

    /// Build an envelope from a typed payload. The payload must serialize to
    /// a JSON object.
    pub fn with_payload(
        message_type: impl Into<String>,
        payload: &impl Serialize,
    ) -> Result<Self, ProtocolError> {
        let message_type = message_type.into();
        match serde_json::to_value(payload) {
            Ok(Value::Object(data)) => Ok(Self::new(message_type, data)),
            Ok(other) => Err(ProtocolError::InvalidPayload {
                message_type,
                reason: format!("payload is not a mapping: {other}"),
            }),
            Err(e) => Err(ProtocolError::InvalidPayload {
                message_type,
                reason: e.to_string(),
            }),
        }
    }

    #[must_use]
    pub const fn with_request_id(mut self, request_id: Option<u64>) -> Self {
        self.request_id = request_id;
        self
    }

    /// Deserialize `data` into the payload type expected for this envelope.
    pub fn payload<T: DeserializeOwned>(&self) -> Result<T, ProtocolError> {
        serde_json::from_value(Value::Object(self.data.clone())).map_err(|e| {
            ProtocolError::InvalidPayload {
                message_type: self.message_type.clone(),
                reason: e.to_string(),
            }
        })
    }
}

/// Serialize an envelope into a text frame.
pub fn encode(envelope: &Envelope) -> Result<String, serde_json::Error> {
    serde_json::to_string(envelope)
}

/// Parse a text frame into an envelope.
///
/// A missing `data` field is read as an empty mapping; any other non-object
/// payload is rejected. A `requestId` that is not a non-negative integer is
/// dropped and the frame kept.
pub fn decode(frame: &str) -> Result<Envelope, ProtocolError> {
    let value: Value = serde_json::from_str(frame)
        .map_err(|e| ProtocolError::MalformedEnvelope(format!("invalid JSON: {e}")))?;

    let Value::Object(mut fields) = value else {
        return Err(ProtocolError::MalformedEnvelope(
            "frame is not a JSON object".to_string(),
        ));
    };

    let message_type = match fields.remove(MESSAGE_TYPE_FIELD) {
        Some(Value::String(s)) if !s.is_empty() => s,
        Some(other) => {
            return Err(ProtocolError::MalformedEnvelope(format!(
                "{MESSAGE_TYPE_FIELD} must be a non-empty string, got {other}"
            )))
        }
        None => {
            return Err(ProtocolError::MalformedEnvelope(format!(
                "missing {MESSAGE_TYPE_FIELD}"
            )))
        }
    };

    let data = match fields.remove(DATA_FIELD) {
        Some(Value::Object(data)) => data,
        None => Map::new(),
        Some(other) => {
            return Err(ProtocolError::MalformedEnvelope(format!(
                "{DATA_FIELD} of {message_type} is not a mapping: {other}"
            )))
        }
    };

    // Ids we cannot have issued are treated as absent.
    let request_id = match fields.remove(REQUEST_ID_FIELD) {
        None | Some(Value::Null) => None,
        Some(id) => {
            let parsed = id.as_u64();
            if parsed.is_none() {
                tracing::debug!("Ignoring {REQUEST_ID_FIELD} {id} on {message_type}");
            }
            parsed
        }
    };

    Ok(Envelope {
        message_type,
        data,
        request_id,
    })
}

/// A range inside a file, as sent by `highlightCode`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeInFile {
    pub filepath: String,
    pub range: Range,
}

// Inbound payloads

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FilePathParams {
    pub filepath: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SetFileOpenParams {
    pub filepath: String,
    #[serde(default = "default_open")]
    pub open: bool,
}

const fn default_open() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ShowVirtualFileParams {
    pub name: String,
    pub contents: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ShowMessageParams {
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ShowDiffParams {
    pub filepath: String,
    pub replacement: String,
    pub step_index: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HighlightCodeParams {
    pub range_in_file: RangeInFile,
    pub color: String,
}

// Outbound replies

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceDirectoryReply {
    pub workspace_directory: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UniqueIdReply {
    pub unique_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReadFileReply {
    pub contents: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VisibleFilesReply {
    pub visible_files: Vec<String>,
}
