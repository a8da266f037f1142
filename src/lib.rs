//! LAN Group Chat Hub Library
//!
//! A small TCP chat hub: one process listens, participants connect, and every
//! message a participant sends is relayed to all the others. Text travels in
//! length-prefixed frames (4-byte big-endian length, then UTF-8 bytes).
//!
//! # Features
//! - Length-prefixed framing with a size cap checked before allocation
//! - Concurrent accept loop with a per-connection callback
//! - Broadcast room with sender exclusion and operator messages
//! - Bounded per-peer outbound queues, so a slow peer cannot stall the room
//! - Client-side session and in-memory chat history
//!
//! # Architecture
//! Uses the Actor pattern with `mpsc` channels:
//! - `RoomServer` is the central actor owning every connection handler
//! - `Room` is a cloneable handle that sends it commands
//! - Each `ConnectionHandler` runs a receive task and a write task and
//!   reports inbound frames as `HandlerEvent`s on the actor's event channel
//! - No locks around the registry; all access goes through message passing
//!
//! # Example
//! ```ignore
//! use lan_chat::{Listener, Room, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> lan_chat::AppResult<()> {
//!     let config = ServerConfig::default();
//!     let (room, _notices) = Room::spawn(&config);
//!
//!     let listener = Listener::bind(&config)?;
//!     let handle = listener.start(move |connection, peer| {
//!         let room = room.clone();
//!         async move {
//!             let _ = room.add(connection, peer).await;
//!         }
//!     });
//!
//!     tokio::signal::ctrl_c().await?;
//!     handle.stop().await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod connection;
pub mod connector;
pub mod error;
pub mod frame;
pub mod handler;
pub mod history;
pub mod listener;
pub mod message;
pub mod room;
pub mod server;
pub mod session;
pub mod types;

// Re-export main types for convenience
pub use config::{ChatConfig, ClientConfig, ServerConfig};
pub use connection::{CloseHandle, FramedConnection};
pub use connector::Connector;
pub use error::{AppError, AppResult, SendError};
pub use frame::{FrameReader, FrameWriter};
pub use handler::{ConnectionHandler, HandlerConfig, HandlerEvent};
pub use history::{ChatHistory, HistoryEntry};
pub use listener::{lan_addresses, Listener, ListenerHandle};
pub use message::Envelope;
pub use room::Room;
pub use server::{RoomCommand, RoomNotice, RoomServer};
pub use session::OutboundSession;
pub use types::{HandlerId, HandlerState, DEFAULT_PORT, MAX_FRAME_SIZE};
