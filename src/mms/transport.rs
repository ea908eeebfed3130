//! Transport envelopes and the transporter capability
//!
//! The store never talks to the network itself: a `MessageTransporter`
//! implementation (a Bitmessage daemon client in production) is injected and
//! carries signed, encrypted envelopes between members. Members whose
//! transport address is a plain directory instead of a "BM-" address get the
//! debug file transport handled inline by the store.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::Message;
use crate::crypto::{AccountPublicKey, CipherIv, Hash, Signature};

/// Transporter configuration
#[derive(Debug, Clone)]
pub struct TransportOptions {
    /// URL of the PyBitmessage instance to use
    pub bitmessage_address: String,
    /// `username:password` for the PyBitmessage API
    pub bitmessage_login: String,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            bitmessage_address: "http://localhost:8442/".to_string(),
            bitmessage_login: "username:password".to_string(),
        }
    }
}

/// Transport layer errors
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("no transporter configured")]
    NotConfigured,
    #[error("transport failure: {0}")]
    Failed(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// The envelope carried over the real transport
///
/// The content is ciphertext; `hash` digests that ciphertext and `signature`
/// is the sender's view-key signature over the hash. Authenticity lives
/// here, not in the cipher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportMessage {
    pub source_address: AccountPublicKey,
    pub source_transport_address: String,
    pub destination_address: AccountPublicKey,
    pub destination_transport_address: String,
    pub iv: CipherIv,
    pub encryption_public_key: [u8; 32],
    pub timestamp: u64,
    pub message_type: u32,
    pub subject: String,
    pub content: Vec<u8>,
    pub hash: Hash,
    pub signature: Signature,
    /// Id assigned by the transport, used to delete the remote copy
    pub transport_id: String,
    pub round: u32,
    pub signature_count: u32,
}

/// The envelope written by the debug file transport
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileTransportMessage {
    pub sender_address: AccountPublicKey,
    pub iv: CipherIv,
    pub encryption_public_key: [u8; 32],
    pub internal_message: Message,
}

/// Capability interface to the message transport
///
/// `receive_messages` may block on network I/O; `stop` must unblock any
/// in-flight wait. Everything else is expected to return promptly.
pub trait MessageTransporter: Send {
    fn set_options(&mut self, _options: &TransportOptions) {}

    fn send_message(&self, message: &TransportMessage) -> Result<(), TransportError>;

    fn receive_messages(
        &self,
        destination: &AccountPublicKey,
        destination_transport_address: &str,
    ) -> Result<Vec<TransportMessage>, TransportError>;

    fn delete_message(&self, transport_id: &str) -> Result<(), TransportError>;

    fn stop(&self) {}
}
