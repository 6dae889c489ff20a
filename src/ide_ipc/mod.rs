//! WebSocket protocol between the editor and the agent.
//!
//! - `protocol`: envelope codec and payload types
//! - `transport`: WebSocket and in-memory connections
//! - `pending`: requests waiting for their reply
//! - `dispatch`: server pushes routed to host capabilities
//! - `selection`: payloads for editor selections
//! - `client`: the client tying these together

mod client;
mod dispatch;
mod pending;
pub mod protocol;
mod selection;
pub mod transport;


pub use client::{ClientBuilder, ConnectionListener, PendingReply, ProtocolClient};
pub use dispatch::{handle, DispatchTable, ServerRequest};
pub use pending::{CorrelationKey, CorrelationMode, PendingTable, ReplyResult};
pub use protocol::{decode, encode, Envelope, Position, Range, RangeInFile};
pub use selection::{
    HighlightedCodeFormatter, RangeInFileFormatter, SelectionFormatter, TextSelection,
};
pub use transport::{connect, memory_pair, Connection, MemoryPeer, Outbox, TransportEvent};
