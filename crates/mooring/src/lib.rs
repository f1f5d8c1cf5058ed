//! Session management and message routing over line-delimited JSON.
//!
//! Mooring turns raw stream sockets into addressable sessions and
//! routes [`mooring_wire::Message`]s between them:
//!
//! - [`Session`] wraps one connection with framed reads and writes and
//!   a close-once lifecycle.
//! - [`SessionCollection`] is the concurrency-safe registry of live
//!   sessions with ordered add/remove observers.
//! - [`MessageQueue`] fans all inbound traffic into one strictly
//!   serialized [`MessageHandler`].
//! - [`MessageBroker`] fans outbound traffic back out, unicasting
//!   responses and broadcasting events.
//! - [`serve`] accepts connections and assigns session IDs;
//!   [`run_client`] drives the client side of the same protocol.
//!
//! # Example
//!
//! A complete server wiring:
//!
//! ```ignore
//! use std::sync::Arc;
//! use mooring::{serve, MessageBroker, MessageQueue, QueueConfig, SessionCollection};
//!
//! let sessions = SessionCollection::new();
//! let queue = MessageQueue::new(Arc::clone(&sessions), QueueConfig::default());
//! let broker = Arc::new(MessageBroker::new(Arc::clone(&sessions)));
//! queue.start(my_handler, broker);
//!
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:7000").await?;
//! serve(listener, queue).await?;
//! ```

pub mod broker;
pub mod client;
pub mod collection;
pub mod config;
pub mod error;
pub mod handler;
pub mod queue;
pub mod server;
pub mod session;

// Re-exports for convenience
pub use broker::MessageBroker;
pub use client::run_client;
pub use collection::{SessionCollection, SessionObserver};
pub use config::{QueueConfig, SessionConfig};
pub use error::{CommsError, CommsResult, ErrorList};
pub use handler::{MessageContext, MessageHandler, MessageWriter, SessionHandler};
pub use queue::MessageQueue;
pub use server::{serve, serve_with_shutdown, Listener, SessionIds};
pub use session::{CloseObserver, Session, SessionId};
