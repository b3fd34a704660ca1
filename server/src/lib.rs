//! Multi-room chat relay server.
//!
//! A single [`Server`] polls the listening socket and every client socket,
//! reassembles frames per connection and hands each decoded command to the
//! [`Router`], which owns all membership changes.

pub mod channel;
pub mod config;
pub mod connection;
pub mod error;
pub mod router;
pub mod server;

pub use channel::{ChannelRegistry, JoinOutcome, LeaveOutcome};
pub use config::Config;
pub use connection::{Connection, ConnectionRegistry};
pub use error::{Result, ServerError};
pub use router::{Disposition, Router};
pub use server::{SHUTDOWN_NOTICE, Server, ShutdownHandle};
