//! Multisig message store (MMS)
//!
//! Coordinates the members of an M-of-M multisig coalition: key set
//! exchange, finalization, sync-data rounds and transaction passing, over a
//! pluggable transport. The store is owned by a single wallet thread,
//! persists itself encrypted after every mutation, and never trusts an
//! envelope it cannot authenticate.

mod message;
mod store;
mod transport;

pub use message::*;
pub use store::*;
pub use transport::*;

use std::path::PathBuf;
use thiserror::Error;

/// Message store errors
#[derive(Debug, Error)]
pub enum MmsError {
    #[error("invalid member index {0}")]
    InvalidMemberIndex(u32),
    #[error("invalid message id {0}")]
    InvalidMessageId(u32),
    #[error("the wallet cannot create messages of type \"{0}\"")]
    IllegalMessageType(MessageType),
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("message store file {0} has bad structure")]
    BadFile(PathBuf),
    #[error("message store I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("message store serialization error: {0}")]
    Serialization(#[from] bincode::Error),
}
