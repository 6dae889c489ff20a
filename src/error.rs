use std::{error::Error as StdError, fmt, io, result::Result as StdResult};

/// Failures while turning a frame into something the client can route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Frame is not an envelope: bad JSON, missing discriminator, or a
    /// payload that is not a mapping.
    MalformedEnvelope(String),
    /// Envelope is well-formed but its payload does not match the shape
    /// expected for its discriminator.
    InvalidPayload {
        message_type: String,
        reason: String,
    },
    /// No dispatch handler is registered for the discriminator.
    UnknownDiscriminator(String),
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MalformedEnvelope(reason) => write!(f, "Malformed envelope: {reason}"),
            Self::InvalidPayload {
                message_type,
                reason,
            } => write!(f, "Invalid payload for {message_type}: {reason}"),
            Self::UnknownDiscriminator(message_type) => {
                write!(f, "Unknown message type: {message_type}")
            }
        }
    }
}

impl StdError for ProtocolError {}

/// Hard connection failures, fanned out to every connection listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    Connect { url: String, reason: String },
    Send(String),
    Receive(String),
    Closed { code: u16, reason: String },
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connect { url, reason } => write!(f, "Failed to connect to {url}: {reason}"),
            Self::Send(reason) => write!(f, "Send failed: {reason}"),
            Self::Receive(reason) => write!(f, "Receive failed: {reason}"),
            Self::Closed { code, reason } if reason.is_empty() => {
                write!(f, "Connection closed (code {code})")
            }
            Self::Closed { code, reason } => write!(f, "Connection closed (code {code}): {reason}"),
        }
    }
}

impl StdError for TransportError {}

/// Why a pending request resolved without a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestError {
    /// The caller's deadline elapsed before a reply arrived.
    Timeout,
    /// The wait was abandoned locally; the request may still be answered on
    /// the wire.
    Abandoned,
    /// The client shut down before the request could be resolved.
    Disconnected,
}

impl fmt::Display for RequestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "Request timed out"),
            Self::Abandoned => write!(f, "Request abandoned"),
            Self::Disconnected => write!(f, "Client disconnected before a reply arrived"),
        }
    }
}

impl StdError for RequestError {}

#[derive(Debug)]
pub enum Error {
    Io(io::Error),
    Json(serde_json::Error),
    Protocol(ProtocolError),
    Transport(TransportError),
    Request(RequestError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "IO error: {e}"),
            Self::Json(e) => write!(f, "JSON error: {e}"),
            Self::Protocol(e) => write!(f, "Protocol error: {e}"),
            Self::Transport(e) => write!(f, "Transport error: {e}"),
            Self::Request(e) => write!(f, "Request error: {e}"),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Json(e) => Some(e),
            Self::Protocol(e) => Some(e),
            Self::Transport(e) => Some(e),
            Self::Request(e) => Some(e),
        }
    }
}

impl From<ProtocolError> for Error {
    fn from(e: ProtocolError) -> Self {
        Self::Protocol(e)
    }
}

impl From<TransportError> for Error {
    fn from(e: TransportError) -> Self {
        Self::Transport(e)
    }
}

impl From<RequestError> for Error {
    fn from(e: RequestError) -> Self {
        Self::Request(e)
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Json(e)
    }
}

pub type Result<T> = StdResult<T, Error>;
