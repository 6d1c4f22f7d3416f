//! Plugin transport for capns.
//!
//! All host ↔ plugin communication travels as length-prefixed binary
//! packets over the plugin process's stdin/stdout:
//!
//! ```text
//! ┌──────────────────────────────────────┐
//! │ 4 bytes: u32 big-endian length       │
//! ├──────────────────────────────────────┤
//! │ N bytes: payload (≤ 16 MiB)          │
//! └──────────────────────────────────────┘
//! ```
//!
//! Payloads carry JSON [`Message`] envelopes correlated by request id.
//! One conversation per connection at a time: request, ack, progress
//! events, then a single response or a chunk stream, with errors allowed
//! at any point.

mod connection;
mod error;
mod message;
mod packet;

pub use connection::{CommandSpec, PluginConnection, PluginProcess, PluginResponse, ProgressEvent};
pub use error::TransportError;
pub use message::{ErrorPayload, Message, MessageType};
pub use packet::{read_packet, write_packet, PacketReader, PacketWriter, MAX_PACKET_SIZE};
