//! Routing of server-initiated messages to host capabilities.
//!
//! Each known discriminator decodes into one [`ServerRequest`] variant with a
//! typed payload. The table is built once and only read afterwards.

use std::collections::HashMap;

use super::protocol::{
    self, Envelope, FilePathParams, HighlightCodeParams, ReadFileReply, SetFileOpenParams,
    ShowDiffParams, ShowMessageParams, ShowVirtualFileParams, UniqueIdReply, VisibleFilesReply,
    WorkspaceDirectoryReply,
};
use crate::{error::ProtocolError, host::Host};

/// A decoded server push.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerRequest {
    WorkspaceDirectory,
    UniqueId,
    ReadFile(FilePathParams),
    VisibleFiles,
    SaveFile(FilePathParams),
    SetFileOpen(SetFileOpenParams),
    ShowVirtualFile(ShowVirtualFileParams),
    ShowMessage(ShowMessageParams),
    ShowDiff(ShowDiffParams),
    HighlightCode(HighlightCodeParams),
    /// Greeting sent by the agent right after the socket opens.
    Connected,
}

impl ServerRequest {
    pub const fn message_type(&self) -> &'static str {
        match self {
            Self::WorkspaceDirectory => protocol::WORKSPACE_DIRECTORY,
            Self::UniqueId => protocol::UNIQUE_ID,
            Self::ReadFile(_) => protocol::READ_FILE,
            Self::VisibleFiles => protocol::VISIBLE_FILES,
            Self::SaveFile(_) => protocol::SAVE_FILE,
            Self::SetFileOpen(_) => protocol::SET_FILE_OPEN,
            Self::ShowVirtualFile(_) => protocol::SHOW_VIRTUAL_FILE,
            Self::ShowMessage(_) => protocol::SHOW_MESSAGE,
            Self::ShowDiff(_) => protocol::SHOW_DIFF,
            Self::HighlightCode(_) => protocol::HIGHLIGHT_CODE,
            Self::Connected => protocol::CONNECTED,
        }
    }

    /// Whether handling only reads host identity and can run off the UI queue.
    pub const fn is_pure(&self) -> bool {
        matches!(
            self,
            Self::WorkspaceDirectory | Self::UniqueId | Self::Connected
        )
    }
}

type Decoder = fn(&Envelope) -> Result<ServerRequest, ProtocolError>;

pub struct DispatchTable {
    decoders: HashMap<&'static str, Decoder>,
}

impl DispatchTable {
    /// The table covering every push the agent is known to send.
    pub fn standard() -> Self {
        let entries: [(&'static str, Decoder); 11] = [
            (protocol::WORKSPACE_DIRECTORY, |_| {
                Ok(ServerRequest::WorkspaceDirectory)
            }),
            (protocol::UNIQUE_ID, |_| Ok(ServerRequest::UniqueId)),
            (protocol::READ_FILE, |e| e.payload().map(ServerRequest::ReadFile)),
            (protocol::VISIBLE_FILES, |_| Ok(ServerRequest::VisibleFiles)),
            (protocol::SAVE_FILE, |e| e.payload().map(ServerRequest::SaveFile)),
            (protocol::SET_FILE_OPEN, |e| {
                e.payload().map(ServerRequest::SetFileOpen)
            }),
            (protocol::SHOW_VIRTUAL_FILE, |e| {
                e.payload().map(ServerRequest::ShowVirtualFile)
            }),
            (protocol::SHOW_MESSAGE, |e| {
                e.payload().map(ServerRequest::ShowMessage)
            }),
            (protocol::SHOW_DIFF, |e| e.payload().map(ServerRequest::ShowDiff)),
            (protocol::HIGHLIGHT_CODE, |e| {
                e.payload().map(ServerRequest::HighlightCode)
            }),
            (protocol::CONNECTED, |_| Ok(ServerRequest::Connected)),
        ];
        Self {
            decoders: entries.into_iter().collect(),
        }
    }

    /// Decode `envelope` into the push it carries.
    pub fn decode(&self, envelope: &Envelope) -> Result<ServerRequest, ProtocolError> {
        let decoder = self
            .decoders
            .get(envelope.message_type.as_str())
            .ok_or_else(|| ProtocolError::UnknownDiscriminator(envelope.message_type.clone()))?;
        decoder(envelope)
    }
}

impl Default for DispatchTable {
    fn default() -> Self {
        Self::standard()
    }
}

/// Carry out `request` against `host`, returning the reply to send, if any.
///
/// The reply uses the request's discriminator.
pub fn handle(host: &dyn Host, request: &ServerRequest) -> Option<Envelope> {
    let message_type = request.message_type();
    let reply = match request {
        ServerRequest::WorkspaceDirectory => Envelope::with_payload(
            message_type,
            &WorkspaceDirectoryReply {
                workspace_directory: host.workspace_root(),
            },
        ),
        ServerRequest::UniqueId => Envelope::with_payload(
            message_type,
            &UniqueIdReply {
                unique_id: host.machine_id(),
            },
        ),
        ServerRequest::ReadFile(params) => Envelope::with_payload(
            message_type,
            &ReadFileReply {
                contents: host.read_file_text(&params.filepath).unwrap_or_default(),
            },
        ),
        ServerRequest::VisibleFiles => Envelope::with_payload(
            message_type,
            &VisibleFilesReply {
                visible_files: host.open_files(),
            },
        ),
        ServerRequest::SaveFile(params) => {
            host.save_file(&params.filepath);
            return None;
        }
        ServerRequest::SetFileOpen(params) => {
            host.set_file_open(&params.filepath, params.open);
            return None;
        }
        ServerRequest::ShowVirtualFile(params) => {
            host.open_virtual_file(&params.name, &params.contents);
            return None;
        }
        ServerRequest::ShowMessage(params) => {
            host.show_notification(&params.message);
            return None;
        }
        ServerRequest::ShowDiff(params) => {
            host.show_diff(&params.filepath, &params.replacement, params.step_index);
            return None;
        }
        ServerRequest::HighlightCode(params) => {
            host.set_file_open(&params.range_in_file.filepath, true);
            host.highlight_range(&params.range_in_file, &params.color);
            return None;
        }
        ServerRequest::Connected => {
            tracing::debug!("Agent greeted the connection");
            return None;
        }
    };

    match reply {
        Ok(envelope) => Some(envelope),
        Err(e) => {
            tracing::error!("Could not build reply to {message_type}: {e}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::*;
    use crate::{
        host::{HostCall, MemoryHost},
        ide_ipc::protocol::{decode, encode, Position, Range, RangeInFile},
    };

    fn run(host: &MemoryHost, frame: &str) -> Option<Value> {
        let request = DispatchTable::standard().decode(&decode(frame).unwrap()).unwrap();
        handle(host, &request).map(|reply| serde_json::from_str(&encode(&reply).unwrap()).unwrap())
    }

    #[test]
    fn test_read_file_returns_buffer() {
        let host = MemoryHost::new("/ws", "m").with_buffer("/f.txt", "hello");
        assert_eq!(
            run(&host, r#"{"messageType":"readFile","data":{"filepath":"/f.txt"}}"#),
            Some(json!({"messageType": "readFile", "data": {"contents": "hello"}}))
        );
    }

    #[test]
    fn test_read_file_without_buffer_returns_empty_contents() {
        let host = MemoryHost::new("/ws", "m");
        assert_eq!(
            run(&host, r#"{"messageType":"readFile","data":{"filepath":"/nope"}}"#),
            Some(json!({"messageType": "readFile", "data": {"contents": ""}}))
        );
    }

    #[test]
    fn test_identity_queries() {
        let host = MemoryHost::new("/home/me/project", "machine-42").with_buffer("/a", "");
        assert_eq!(
            run(&host, r#"{"messageType":"workspaceDirectory","data":{}}"#),
            Some(json!({
                "messageType": "workspaceDirectory",
                "data": {"workspaceDirectory": "/home/me/project"}
            }))
        );
        assert_eq!(
            run(&host, r#"{"messageType":"uniqueId","data":{}}"#),
            Some(json!({"messageType": "uniqueId", "data": {"uniqueId": "machine-42"}}))
        );
        assert_eq!(
            run(&host, r#"{"messageType":"visibleFiles","data":{}}"#),
            Some(json!({"messageType": "visibleFiles", "data": {"visibleFiles": ["/a"]}}))
        );
    }

    #[test]
    fn test_actions_produce_no_reply() {
        let host = MemoryHost::new("/ws", "m");
        for frame in [
            r#"{"messageType":"saveFile","data":{"filepath":"/a"}}"#,
            r#"{"messageType":"setFileOpen","data":{"filepath":"/b","open":false}}"#,
            r#"{"messageType":"showVirtualFile","data":{"name":"scratch","contents":"x"}}"#,
            r#"{"messageType":"showMessage","data":{"message":"hi"}}"#,
            r#"{"messageType":"showDiff","data":{"filepath":"/c","replacement":"y","step_index":3}}"#,
            r#"{"messageType":"connected","data":{}}"#,
        ] {
            assert_eq!(run(&host, frame), None, "{frame} should not reply");
        }

        assert_eq!(
            host.calls(),
            vec![
                HostCall::SaveFile("/a".to_string()),
                HostCall::SetFileOpen {
                    path: "/b".to_string(),
                    open: false
                },
                HostCall::OpenVirtualFile {
                    name: "scratch".to_string(),
                    contents: "x".to_string()
                },
                HostCall::ShowNotification("hi".to_string()),
                HostCall::ShowDiff {
                    path: "/c".to_string(),
                    replacement: "y".to_string(),
                    step_index: 3
                },
            ]
        );
    }

    #[test]
    fn test_highlight_opens_file_first() {
        let host = MemoryHost::new("/ws", "m");
        let frame = r##"{"messageType":"highlightCode","data":{"rangeInFile":{"filepath":"/f.ts","range":{"start":{"line":0,"character":0},"end":{"line":2,"character":5}}},"color":"#00ff00"}}"##;
        assert_eq!(run(&host, frame), None);

        let range = RangeInFile {
            filepath: "/f.ts".to_string(),
            range: Range::new(Position::new(0, 0), Position::new(2, 5)),
        };
        assert_eq!(
            host.calls(),
            vec![
                HostCall::SetFileOpen {
                    path: "/f.ts".to_string(),
                    open: true
                },
                HostCall::HighlightRange {
                    range,
                    color: "#00ff00".to_string()
                },
            ]
        );
    }

    #[test]
    fn test_unknown_discriminator_is_rejected() {
        let table = DispatchTable::standard();
        let envelope = decode(r#"{"messageType":"teleport","data":{}}"#).unwrap();
        assert_eq!(
            table.decode(&envelope),
            Err(ProtocolError::UnknownDiscriminator("teleport".to_string()))
        );
        let outbound = decode(r#"{"messageType":"getSessionId","data":{}}"#).unwrap();
        assert_eq!(
            table.decode(&outbound),
            Err(ProtocolError::UnknownDiscriminator("getSessionId".to_string()))
        );
    }

    #[test]
    fn test_wrong_payload_shape_is_invalid() {
        let table = DispatchTable::standard();
        let envelope = decode(r#"{"messageType":"readFile","data":{"path":"/a"}}"#).unwrap();
        assert!(matches!(
            table.decode(&envelope),
            Err(ProtocolError::InvalidPayload { .. })
        ));
    }

    #[test]
    fn test_purity_classification() {
        assert!(ServerRequest::UniqueId.is_pure());
        assert!(ServerRequest::Connected.is_pure());
        assert!(!ServerRequest::VisibleFiles.is_pure());
        assert!(!ServerRequest::ReadFile(FilePathParams {
            filepath: "/a".to_string()
        })
        .is_pure());
    }
}
