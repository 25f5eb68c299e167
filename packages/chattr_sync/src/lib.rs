//! chattr_sync - live-session synchronization client for agentchattr
//!
//! Keeps a persistent WebSocket connection to an agentchattr server and
//! reduces its event stream (chat messages, agent roster, status, typing,
//! clears) into render-ready state. Presentation reads snapshots and sends
//! chat messages; everything else happens on a single driver task.
//!
//! # Example
//!
//! ```no_run
//! use chattr_sync::{ClientConfig, FileConfig, SyncClient};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ClientConfig::from_file(&FileConfig::default())?;
//!     let client = SyncClient::new(config).start();
//!
//!     let mut updates = client.subscribe();
//!     while updates.changed().await.is_ok() {
//!         let snapshot = updates.borrow_and_update().clone();
//!         println!("{} messages, {} agents", snapshot.messages.len(), snapshot.agents.len());
//!         if snapshot.messages.len() > 10 {
//!             break;
//!         }
//!     }
//!
//!     if let Err(e) = client.send_message("hello") {
//!         eprintln!("not sent: {e}");
//!     }
//!     client.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod config;
pub mod connection;
mod error;
pub mod gateway;
pub mod identity;
pub mod protocol;
pub mod store;

pub use client::{ClientHandle, SyncClient};
pub use config::{ClientConfig, FileConfig};
pub use connection::{Backoff, ConnectionMachine, ConnectionState, EndpointConfig};
pub use error::{ClientError, DecodeError, SendError};
pub use gateway::OutboundGateway;
pub use protocol::{InboundEvent, MessageKind, OutboundFrame, decode_frame};
pub use store::{Agent, AgentStatus, ChatMessage, SessionSettings, SessionSnapshot, SessionStore};
