//! Editor capabilities the protocol client calls into.
//!
//! The client never touches editor state itself. Everything it needs from the
//! editor goes through [`Host`]; calls that touch editor state are made from
//! the UI task queue, never from the connection task.

use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    sync::{Mutex, PoisonError},
};

use serde_json::Value;

use crate::ide_ipc::RangeInFile;

/// File used to derive a stable installation identifier.
const MACHINE_ID_PATH: &str = "/etc/machine-id";
const UNKNOWN_MACHINE: &str = "unknown-machine";

pub trait Host: Send + Sync {
    /// Root directory of the open workspace.
    fn workspace_root(&self) -> String;

    /// Stable identifier of this machine or installation.
    fn machine_id(&self) -> String;

    /// Current editor text of `path`, or `None` if it is not open or missing.
    fn read_file_text(&self, path: &str) -> Option<String>;

    /// Paths of the open editors, in tab order.
    fn open_files(&self) -> Vec<String>;

    fn save_file(&self, path: &str);

    fn set_file_open(&self, path: &str, open: bool);

    /// Show an unsaved buffer that does not exist on disk.
    fn open_virtual_file(&self, name: &str, contents: &str);

    fn show_notification(&self, message: &str);

    /// Present `replacement` as a proposed change to `path`.
    fn show_diff(&self, path: &str, replacement: &str, step_index: u32);

    fn highlight_range(&self, range: &RangeInFile, color: &str);

    /// Forward an event to the embedded UI.
    fn dispatch_to_ui(&self, event: &str, payload: &Value);
}

/// A host without an editor: files come from disk, UI actions are logged.
pub struct HeadlessHost {
    workspace: PathBuf,
    machine_id: String,
    open: Mutex<Vec<String>>,
}

impl HeadlessHost {
    pub fn new(workspace: PathBuf) -> Self {
        let machine_id = fs::read_to_string(MACHINE_ID_PATH)
            .ok()
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| UNKNOWN_MACHINE.to_string());
        Self {
            workspace,
            machine_id,
            open: Mutex::new(Vec::new()),
        }
    }

    fn resolve(&self, path: &str) -> PathBuf {
        let path = Path::new(path);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.workspace.join(path)
        }
    }
}

impl Host for HeadlessHost {
    fn workspace_root(&self) -> String {
        self.workspace.display().to_string()
    }

    fn machine_id(&self) -> String {
        self.machine_id.clone()
    }

    fn read_file_text(&self, path: &str) -> Option<String> {
        fs::read_to_string(self.resolve(path)).ok()
    }

    fn open_files(&self) -> Vec<String> {
        self.open
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn save_file(&self, path: &str) {
        tracing::info!("[host] save {path} (nothing buffered, disk is already current)");
    }

    fn set_file_open(&self, path: &str, open: bool) {
        let mut files = self.open.lock().unwrap_or_else(PoisonError::into_inner);
        files.retain(|file| file != path);
        if open {
            files.push(path.to_string());
        }
        tracing::info!("[host] {} {path}", if open { "open" } else { "close" });
    }

    fn open_virtual_file(&self, name: &str, contents: &str) {
        tracing::info!("[host] virtual file {name} ({} bytes)", contents.len());
    }

    fn show_notification(&self, message: &str) {
        tracing::info!("[host] notification: {message}");
    }

    fn show_diff(&self, path: &str, replacement: &str, step_index: u32) {
        tracing::info!(
            "[host] diff for {path} at step {step_index} ({} bytes)",
            replacement.len()
        );
    }

    fn highlight_range(&self, range: &RangeInFile, color: &str) {
        tracing::info!(
            "[host] highlight {}:{}:{}-{}:{} in {color}",
            range.filepath,
            range.range.start.line,
            range.range.start.character,
            range.range.end.line,
            range.range.end.character
        );
    }

    fn dispatch_to_ui(&self, event: &str, payload: &Value) {
        tracing::info!("[host] ui event {event}: {payload}");
    }
}

/// A recorded call into [`MemoryHost`].
#[derive(Debug, Clone, PartialEq)]
pub enum HostCall {
    SaveFile(String),
    SetFileOpen { path: String, open: bool },
    OpenVirtualFile { name: String, contents: String },
    ShowNotification(String),
    ShowDiff {
        path: String,
        replacement: String,
        step_index: u32,
    },
    HighlightRange { range: RangeInFile, color: String },
    DispatchToUi { event: String, payload: Value },
}

/// Editor state kept in memory, recording every effectful call.
#[derive(Default)]
pub struct MemoryHost {
    workspace: String,
    machine_id: String,
    buffers: Mutex<HashMap<String, String>>,
    open: Mutex<Vec<String>>,
    calls: Mutex<Vec<HostCall>>,
}

impl MemoryHost {
    pub fn new(workspace: impl Into<String>, machine_id: impl Into<String>) -> Self {
        Self {
            workspace: workspace.into(),
            machine_id: machine_id.into(),
            ..Self::default()
        }
    }

    /// Open `path` with the given buffer contents.
    pub fn with_buffer(self, path: &str, contents: &str) -> Self {
        self.buffers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path.to_string(), contents.to_string());
        self.open
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(path.to_string());
        self
    }

    /// Every effectful call made so far, in order.
    pub fn calls(&self) -> Vec<HostCall> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn record(&self, call: HostCall) {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(call);
    }
}

impl Host for MemoryHost {
    fn workspace_root(&self) -> String {
        self.workspace.clone()
    }

    fn machine_id(&self) -> String {
        self.machine_id.clone()
    }

    fn read_file_text(&self, path: &str) -> Option<String> {
        self.buffers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
            .cloned()
    }

    fn open_files(&self) -> Vec<String> {
        self.open
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn save_file(&self, path: &str) {
        self.record(HostCall::SaveFile(path.to_string()));
    }

    fn set_file_open(&self, path: &str, open: bool) {
        {
            let mut files = self.open.lock().unwrap_or_else(PoisonError::into_inner);
            files.retain(|file| file != path);
            if open {
                files.push(path.to_string());
            }
        }
        self.record(HostCall::SetFileOpen {
            path: path.to_string(),
            open,
        });
    }

    fn open_virtual_file(&self, name: &str, contents: &str) {
        self.record(HostCall::OpenVirtualFile {
            name: name.to_string(),
            contents: contents.to_string(),
        });
    }

    fn show_notification(&self, message: &str) {
        self.record(HostCall::ShowNotification(message.to_string()));
    }

    fn show_diff(&self, path: &str, replacement: &str, step_index: u32) {
        self.record(HostCall::ShowDiff {
            path: path.to_string(),
            replacement: replacement.to_string(),
            step_index,
        });
    }

    fn highlight_range(&self, range: &RangeInFile, color: &str) {
        self.record(HostCall::HighlightRange {
            range: range.clone(),
            color: color.to_string(),
        });
    }

    fn dispatch_to_ui(&self, event: &str, payload: &Value) {
        self.record(HostCall::DispatchToUi {
            event: event.to_string(),
            payload: payload.clone(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_host_tracks_open_files() {
        let host = MemoryHost::new("/ws", "id").with_buffer("/ws/a.rs", "fn a() {}");
        host.set_file_open("/ws/b.rs", true);
        host.set_file_open("/ws/a.rs", false);

        assert_eq!(host.open_files(), vec!["/ws/b.rs".to_string()]);
        assert_eq!(host.read_file_text("/ws/a.rs").as_deref(), Some("fn a() {}"));
        assert_eq!(host.read_file_text("/ws/missing.rs"), None);
    }

    #[test]
    fn test_headless_host_resolves_relative_paths() {
        let dir = std::env::temp_dir().join(format!("ide-bridge-host-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("notes.txt"), "hello").unwrap();

        let host = HeadlessHost::new(dir.clone());
        assert_eq!(host.read_file_text("notes.txt").as_deref(), Some("hello"));
        assert_eq!(host.read_file_text("absent.txt"), None);
        assert!(!host.machine_id().is_empty());

        host.set_file_open("notes.txt", true);
        host.set_file_open("notes.txt", true);
        assert_eq!(host.open_files(), vec!["notes.txt".to_string()]);

        fs::remove_dir_all(dir).unwrap();
    }
}
