//! Types and framing shared by the relay server and its client.

pub mod codec;
pub mod error;
pub mod message;

pub use codec::{FrameBuffer, decode, encode};
pub use error::ProtocolError;
pub use message::{Envelope, MAX_NAME_LEN, Opcode, Roster, valid_name};

/// Number of bytes requested from a socket per read.
pub const MESSAGE_SIZE: usize = 4096;

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 58900;
