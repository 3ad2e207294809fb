//! # pyro-net
//!
//! Networking for Pyro script execution.
//!
//! This crate connects Pyro processes to each other:
//! - Length-prefixed TCP framing and response pairing
//! - The peer table of inbound and outbound connections
//! - The server that executes received scripts and replies with the stack
//! - The `peer` and `server` objects scripts use to drive all of the above

pub mod client;
pub mod config;
pub mod events;
pub mod objects;
pub mod peer;
pub mod server;
pub mod tcp;
pub mod transport;
pub mod types;

pub use client::{Client, ConnectionId, Direction};
pub use config::{BootstrapConfig, CONFIG_ENV, ServerConfig, StackPolicy};
pub use events::{Listeners, RequestEvent, ResponseEvent, Subscription};
pub use objects::{PeerObject, ServerObject};
pub use peer::Peer;
pub use server::Server;
pub use tcp::{TcpReadWrapper, TcpWriteWrapper};
pub use transport::{AsyncReader, AsyncWriter, MAX_MESSAGE_LEN};
pub use types::{Vector3, register_types};
