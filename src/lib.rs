//! Persistent WebSocket bridge between an editor and a remote agent process.

pub mod config;
pub mod error;
pub mod host;
pub mod ide_ipc;

pub use config::ClientConfig;
pub use error::{Error, ProtocolError, RequestError, Result, TransportError};
pub use host::{HeadlessHost, Host, HostCall, MemoryHost};
pub use ide_ipc::{ClientBuilder, CorrelationMode, ProtocolClient, TextSelection};
