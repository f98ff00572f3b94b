//! Network protocol handling
//!
//! Thin request/response transport in front of [`HeapService`](crate::service::HeapService).
//!
//! ## Protocol Flow
//!
//! 1. **Handshake**: client sends the `RCK1` magic, server confirms
//! 2. **Request/Response Loop**: length-prefixed JSON frames tagged with a
//!    client-chosen token
//!
//! Each connection runs on its own tokio task; the heap itself is shared
//! and serialised by the service lock.

pub mod client;
pub mod connection;
pub mod protocol;
pub mod server;

pub use client::RckClient;
pub use connection::{ConnectionHandler, Dispatcher};
pub use protocol::{Handshake, Request, Response, RCK_MAGIC};
pub use server::{ProtocolServer, ServerConfig};
