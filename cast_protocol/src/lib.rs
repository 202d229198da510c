//! # Cast Protocol
//!
//! Wire protocol and codec for roomcast audio distribution.
//!
//! This crate provides:
//! - The tagged message set shared by source and sink nodes
//! - The binary codec (a fixed MessagePack subset, normative for interop)
//! - A WebSocket connection wrapper carrying one message per binary frame
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use cast_protocol::{connect, Message};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut conn = connect("ws://127.0.0.1:8765")?;
//! conn.send(&Message::SyncRequest { t1: 0.0 })?;
//!
//! loop {
//!     if let Some(message) = conn.try_read()? {
//!         println!("received {}", message.tag());
//!         break;
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod connection;
pub mod message;
pub mod msgpack;

// Re-export commonly used types
pub use connection::{accept, connect, ClientStream, Connection};
pub use message::{Message, ProtocolError};
