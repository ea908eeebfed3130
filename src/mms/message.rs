//! Message and member types for the multisig message store

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::crypto::{AccountPublicKey, Hash};

/// What a message carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageType {
    KeySet,
    FinalizingKeySet,
    MultisigSyncData,
    PartiallySignedTx,
    FullySignedTx,
    Note,
}

impl MessageType {
    /// Numeric tag used in transport envelopes
    pub fn tag(self) -> u32 {
        match self {
            MessageType::KeySet => 0,
            MessageType::FinalizingKeySet => 1,
            MessageType::MultisigSyncData => 2,
            MessageType::PartiallySignedTx => 3,
            MessageType::FullySignedTx => 4,
            MessageType::Note => 5,
        }
    }

    /// Reverse of `tag`; None for unknown tags from hostile envelopes
    pub fn from_tag(tag: u32) -> Option<Self> {
        match tag {
            0 => Some(MessageType::KeySet),
            1 => Some(MessageType::FinalizingKeySet),
            2 => Some(MessageType::MultisigSyncData),
            3 => Some(MessageType::PartiallySignedTx),
            4 => Some(MessageType::FullySignedTx),
            5 => Some(MessageType::Note),
            _ => None,
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MessageType::KeySet => "key set",
            MessageType::FinalizingKeySet => "finalizing key set",
            MessageType::MultisigSyncData => "multisig sync data",
            MessageType::PartiallySignedTx => "partially signed tx",
            MessageType::FullySignedTx => "fully signed tx",
            MessageType::Note => "note",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageDirection {
    In,
    Out,
}

impl fmt::Display for MessageDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageDirection::In => write!(f, "in"),
            MessageDirection::Out => write!(f, "out"),
        }
    }
}

/// Lifecycle state of a message
///
/// Outbound messages move `ReadyToSend -> Sent`, inbound messages move
/// `Waiting -> Processed`; either may be cancelled instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageState {
    ReadyToSend,
    Sent,
    Waiting,
    Processed,
    Cancelled,
}

impl fmt::Display for MessageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MessageState::ReadyToSend => "ready to send",
            MessageState::Sent => "sent",
            MessageState::Waiting => "waiting",
            MessageState::Processed => "processed",
            MessageState::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

/// Wallet-side action a processing plan asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageProcessing {
    PrepareMultisig,
    MakeMultisig,
    FinalizeMultisig,
    CreateSyncData,
    ProcessSyncData,
    SignTx,
    SendTx,
    SubmitTx,
}

/// One stored message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Unique id, assigned from a per-store counter starting at 1
    pub id: u32,
    pub message_type: MessageType,
    pub direction: MessageDirection,
    pub content: Vec<u8>,
    /// Unix seconds
    pub created: u64,
    pub modified: u64,
    pub sent: u64,
    /// Index of the peer this message is from/for; 0 is always "me"
    pub member_index: u32,
    /// Content digest of the transport envelope; the replay/dedup key for
    /// inbound messages
    pub hash: Hash,
    pub state: MessageState,
    /// Number of wallet transfers at creation time; tags the sync round
    pub wallet_height: u32,
    pub round: u32,
    pub signature_count: u32,
    /// Id of the copy still held by the transport, if any
    pub transport_id: String,
}

/// A participant in the multisig coalition
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CoalitionMember {
    pub label: String,
    pub transport_address: String,
    pub address_known: bool,
    pub address: AccountPublicKey,
    pub me: bool,
    pub index: u32,
}

impl CoalitionMember {
    /// Render as `label: transport_address`, fitted to `max_width` columns
    pub fn summary(&self, max_width: usize) -> String {
        let label_len = self.label.chars().count();
        if label_len > max_width {
            let truncated: String = self.label.chars().take(max_width.saturating_sub(2)).collect();
            return truncated + "..";
        }

        let mut s = self.label.clone();
        let mut avail = max_width - label_len;
        let transport_len = self.transport_address.chars().count();
        if transport_len > 0 && avail > 10 {
            s.push_str(": ");
            avail -= 2;
            if transport_len <= avail {
                s.push_str(&self.transport_address);
            } else {
                let truncated: String = self
                    .transport_address
                    .chars()
                    .take(avail.saturating_sub(2))
                    .collect();
                s.push_str(&truncated);
                s.push_str("..");
            }
        }
        s
    }
}

/// One processable unit of work the planner hands back to the wallet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingData {
    pub processing: MessageProcessing,
    /// Ids of the messages consumed by this step
    pub message_ids: Vec<u32>,
    /// For send steps, which member receives the result
    pub receiving_member_index: u32,
}

impl ProcessingData {
    pub fn new(processing: MessageProcessing) -> Self {
        Self {
            processing,
            message_ids: Vec::new(),
            receiving_member_index: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_tag_roundtrip() {
        for message_type in [
            MessageType::KeySet,
            MessageType::FinalizingKeySet,
            MessageType::MultisigSyncData,
            MessageType::PartiallySignedTx,
            MessageType::FullySignedTx,
            MessageType::Note,
        ] {
            assert_eq!(MessageType::from_tag(message_type.tag()), Some(message_type));
        }
        assert_eq!(MessageType::from_tag(99), None);
    }

    #[test]
    fn test_member_summary_fits_width() {
        let member = CoalitionMember {
            label: "treasurer".to_string(),
            transport_address: "BM-2cUVEbbb3H6ojddYQziK3RafJ5GPcFQv7e".to_string(),
            ..Default::default()
        };

        assert_eq!(member.summary(80), format!("treasurer: {}", member.transport_address));

        let narrow = member.summary(20);
        assert!(narrow.chars().count() <= 20);
        assert!(narrow.starts_with("treasurer: "));
        assert!(narrow.ends_with(".."));
    }

    #[test]
    fn test_member_summary_long_label() {
        let member = CoalitionMember {
            label: "a-very-long-member-label".to_string(),
            ..Default::default()
        };
        assert_eq!(member.summary(10), "a-very-l..");
    }
}
