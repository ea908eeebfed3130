//! The multisig message store
//!
//! A single state machine drives a coalition wallet through multisig setup,
//! sync rounds and transaction signing by exchanging encrypted, signed
//! envelopes with the other members. The store itself never interprets the
//! payloads it carries; it only decides *what can be processed next* and
//! keeps everything on disk across restarts.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use super::{
    CoalitionMember, FileTransportMessage, Message, MessageDirection, MessageProcessing,
    MessageState, MessageTransporter, MessageType, MmsError, ProcessingData, TransportError,
    TransportMessage, TransportOptions,
};
use crate::crypto::{
    decrypt_from, derive_store_key, encrypt_to, hash_bytes, random_iv, stream_xor,
    AccountPublicKey, CipherIv, Hash, ViewSecretKey,
};
use crate::Network;

/// Magic string at the head of a store file
const FILE_MAGIC: &str = "MMS";
/// On-disk format version
const FILE_VERSION: u32 = 0;

/// Snapshot of the owning wallet's state, taken at call time
///
/// The store needs a handful of facts about the wallet for almost every
/// operation; passing them as one struct avoids a circular dependency on the
/// wallet itself. For a wallet that is already multisig, `address` and
/// `view_secret_key` are the *original* (pre-multisig) values.
#[derive(Debug, Clone)]
pub struct MultisigWalletState {
    pub address: AccountPublicKey,
    pub nettype: Network,
    pub view_secret_key: ViewSecretKey,
    pub multisig: bool,
    pub multisig_is_ready: bool,
    pub has_multisig_partial_key_images: bool,
    /// Number of transfers in the wallet; tags sync rounds
    pub num_transfer_details: u32,
    /// Path of the encrypted store file
    pub mms_file: PathBuf,
}

/// Outer structure of the store file; the payload is an encrypted
/// [`StoreSnapshot`]
#[derive(Serialize, Deserialize)]
struct FileData {
    magic_string: String,
    file_version: u32,
    iv: CipherIv,
    encrypted_data: Vec<u8>,
}

/// The serialized portion of the store
#[derive(Serialize, Deserialize)]
struct StoreSnapshot {
    active: bool,
    coalition_size: u32,
    nettype: Network,
    threshold: u32,
    members: Vec<CoalitionMember>,
    messages: Vec<Message>,
    next_message_id: u32,
    auto_send: bool,
}

/// The message store
pub struct MessageStore {
    active: bool,
    coalition_size: u32,
    threshold: u32,
    auto_send: bool,
    nettype: Network,
    members: Vec<CoalitionMember>,
    messages: Vec<Message>,
    next_message_id: u32,
    filename: Option<PathBuf>,
    transporter: Option<Box<dyn MessageTransporter>>,
    run: AtomicBool,
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn human_readable_timestamp(timestamp: u64) -> String {
    chrono::DateTime::<chrono::Utc>::from_timestamp(timestamp as i64, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_default()
}

impl Default for MessageStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageStore {
    /// Create an empty, inactive store without a transporter
    pub fn new() -> Self {
        MessageStore {
            active: false,
            coalition_size: 0,
            threshold: 0,
            auto_send: false,
            nettype: Network::Mainnet,
            members: Vec::new(),
            messages: Vec::new(),
            next_message_id: 1,
            filename: None,
            transporter: None,
            run: AtomicBool::new(true),
        }
    }

    /// Create an empty store wired to a transporter
    pub fn with_transporter(transporter: Box<dyn MessageTransporter>) -> Self {
        let mut store = Self::new();
        store.transporter = Some(transporter);
        store
    }

    /// Initialize and start to use the MMS, with this wallet as member 0
    ///
    /// Resets any members and messages already present.
    pub fn init(
        &mut self,
        state: &MultisigWalletState,
        own_label: &str,
        own_transport_address: &str,
        coalition_size: u32,
        threshold: u32,
    ) -> Result<(), MmsError> {
        self.coalition_size = coalition_size;
        self.threshold = threshold;
        self.members.clear();
        self.messages.clear();
        self.next_message_id = 1;

        for index in 0..coalition_size {
            self.members.push(CoalitionMember {
                // Simple convention for now: the very first member is "me"
                me: index == 0,
                index,
                ..Default::default()
            });
        }
        self.set_member(
            state,
            0,
            Some(own_label.to_string()),
            Some(own_transport_address.to_string()),
            Some(state.address),
        )?;

        self.nettype = state.nettype;
        self.set_active(true);
        self.filename = Some(state.mms_file.clone());
        self.save(state)
    }

    pub fn set_active(&mut self, active: bool) {
        self.active = active;
    }

    pub fn active(&self) -> bool {
        self.active
    }

    pub fn set_auto_send(&mut self, auto_send: bool) {
        self.auto_send = auto_send;
    }

    pub fn auto_send(&self) -> bool {
        self.auto_send
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    pub fn coalition_size(&self) -> u32 {
        self.coalition_size
    }

    pub fn next_message_id(&self) -> u32 {
        self.next_message_id
    }

    /// Forward transporter configuration
    pub fn set_options(&mut self, options: &TransportOptions) {
        if let Some(transporter) = &mut self.transporter {
            transporter.set_options(options);
        }
    }

    /// Partial update of one member; unspecified fields keep their value
    pub fn set_member(
        &mut self,
        state: &MultisigWalletState,
        index: u32,
        label: Option<String>,
        transport_address: Option<String>,
        address: Option<AccountPublicKey>,
    ) -> Result<(), MmsError> {
        let member = self
            .members
            .get_mut(index as usize)
            .ok_or(MmsError::InvalidMemberIndex(index))?;
        if let Some(label) = label {
            member.label = label;
        }
        if let Some(transport_address) = transport_address {
            member.transport_address = transport_address;
        }
        if let Some(address) = address {
            member.address_known = true;
            member.address = address;
        }
        // Save on every update to minimize the chance of losing member info
        self.save(state)
    }

    pub fn member(&self, index: u32) -> Option<&CoalitionMember> {
        self.members.get(index as usize)
    }

    pub fn members(&self) -> &[CoalitionMember] {
        &self.members
    }

    pub fn member_index_by_address(&self, address: &AccountPublicKey) -> Option<u32> {
        let found = self
            .members
            .iter()
            .find(|m| m.address_known && m.address == *address)
            .map(|m| m.index);
        if found.is_none() {
            tracing::warn!("no coalition member with address {}", address);
        }
        found
    }

    pub fn member_index_by_label(&self, label: &str) -> Option<u32> {
        let found = self
            .members
            .iter()
            .find(|m| m.label == label)
            .map(|m| m.index);
        if found.is_none() {
            tracing::warn!("no coalition member with label {}", label);
        }
        found
    }

    /// Are label, transport address and account address known for everybody?
    pub fn member_info_complete(&self) -> bool {
        self.members
            .iter()
            .all(|m| !m.label.is_empty() && !m.transport_address.is_empty() && m.address_known)
    }

    /// File data just produced by the own wallet into the store
    ///
    /// Key sets, finalizing key sets and sync data fan out as one outbound
    /// message per other member. Transactions become a single inbound
    /// message "from me to me" that acts as a container until they are sent
    /// onward or submitted.
    pub fn process_wallet_created_data(
        &mut self,
        state: &MultisigWalletState,
        message_type: MessageType,
        content: Vec<u8>,
    ) -> Result<(), MmsError> {
        match message_type {
            MessageType::KeySet
            | MessageType::FinalizingKeySet
            | MessageType::MultisigSyncData => {
                for index in 1..self.members.len() as u32 {
                    self.add_message(
                        state,
                        index,
                        message_type,
                        MessageDirection::Out,
                        content.clone(),
                    )?;
                }
                Ok(())
            }
            MessageType::PartiallySignedTx => {
                // Rare but possible: with a threshold of 1 the single
                // signature is already enough, correct the type here rather
                // than in every caller
                let message_type = if self.threshold == 1 {
                    MessageType::FullySignedTx
                } else {
                    MessageType::PartiallySignedTx
                };
                self.add_message(state, 0, message_type, MessageDirection::In, content)?;
                Ok(())
            }
            MessageType::FullySignedTx => {
                self.add_message(state, 0, message_type, MessageDirection::In, content)?;
                Ok(())
            }
            MessageType::Note => Err(MmsError::IllegalMessageType(message_type)),
        }
    }

    /// Store a new message and persist; returns the assigned id
    pub fn add_message(
        &mut self,
        state: &MultisigWalletState,
        member_index: u32,
        message_type: MessageType,
        direction: MessageDirection,
        content: Vec<u8>,
    ) -> Result<u32, MmsError> {
        let now = unix_now();
        let id = self.next_message_id;
        self.next_message_id += 1;
        self.messages.push(Message {
            id,
            message_type,
            direction,
            content,
            created: now,
            modified: now,
            sent: 0,
            member_index,
            hash: Hash::zero(),
            state: match direction {
                MessageDirection::Out => MessageState::ReadyToSend,
                MessageDirection::In => MessageState::Waiting,
            },
            wallet_height: state.num_transfer_details,
            // Reserved for fully generalized M/N signing
            round: 0,
            signature_count: 0,
            transport_id: String::new(),
        });
        self.save(state)?;
        tracing::info!(
            "added {} message {} for member {} of type {}",
            direction,
            id,
            member_index,
            message_type
        );
        Ok(id)
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    fn message_index_by_id(&self, id: u32) -> Option<usize> {
        self.messages.iter().position(|m| m.id == id)
    }

    pub fn message_by_id(&self, id: u32) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == id)
    }

    fn any_message_of_type(&self, message_type: MessageType, direction: MessageDirection) -> bool {
        self.messages
            .iter()
            .any(|m| m.message_type == message_type && m.direction == direction)
    }

    fn any_message_with_hash(&self, hash: &Hash) -> bool {
        self.messages.iter().any(|m| m.hash == *hash)
    }

    /// Is there a message id in every slot except index 0 (me)?
    fn message_ids_complete(ids: &[u32]) -> bool {
        ids.iter().skip(1).all(|&id| id != 0)
    }

    /// Delete a message, including any copy still held by the transport
    pub fn delete_message(&mut self, state: &MultisigWalletState, id: u32) -> Result<(), MmsError> {
        self.delete_transport_message(id)?;
        let index = self
            .message_index_by_id(id)
            .ok_or(MmsError::InvalidMessageId(id))?;
        self.messages.remove(index);
        self.save(state)
    }

    pub fn delete_all_messages(&mut self, state: &MultisigWalletState) -> Result<(), MmsError> {
        let ids: Vec<u32> = self.messages.iter().map(|m| m.id).collect();
        for id in ids {
            self.delete_transport_message(id)?;
        }
        self.messages.clear();
        self.save(state)
    }

    /// Move a pending message to `Cancelled`
    ///
    /// Only `ReadyToSend` and `Waiting` messages can be cancelled; anything
    /// already sent or processed stays as it is.
    pub fn cancel_message(&mut self, state: &MultisigWalletState, id: u32) -> Result<(), MmsError> {
        let index = self
            .message_index_by_id(id)
            .ok_or(MmsError::InvalidMessageId(id))?;
        let message = &mut self.messages[index];
        if matches!(
            message.state,
            MessageState::ReadyToSend | MessageState::Waiting
        ) {
            message.state = MessageState::Cancelled;
            message.modified = unix_now();
        }
        self.save(state)
    }

    /// Work out what the wallet can process next
    ///
    /// Returns the processable plans plus a wait reason; the reason is only
    /// set when the plan list is empty. Multiple plans mean the user picks
    /// one (e.g. submit a fully signed tx locally, or send it to one member
    /// for submission).
    ///
    /// Message arrival order is deliberately ignored: messages may be
    /// delayed or carry wrong timestamps, so ordering decisions rest on the
    /// store's own state instead.
    pub fn get_processable_messages(
        &self,
        state: &MultisigWalletState,
        force_sync: bool,
    ) -> (Vec<ProcessingData>, String) {
        let wallet_height = state.num_transfer_details;

        if (self.members.len() as u32) < self.coalition_size {
            // Unless ALL members are known we can't do anything
            return (
                Vec::new(),
                "The list of coalition members is not complete.".to_string(),
            );
        }

        if !state.multisig {
            if !self.any_message_of_type(MessageType::KeySet, MessageDirection::Out) {
                // Without our own key set nothing else may proceed: if key
                // sets from other members were processed now the wallet
                // would go multisig too early to ever produce ours
                return (
                    vec![ProcessingData::new(MessageProcessing::PrepareMultisig)],
                    String::new(),
                );
            }

            // First waiting key set per member index; duplicates from the
            // same member are ignored
            let mut key_set_messages = vec![0u32; self.coalition_size as usize];
            for m in &self.messages {
                if m.message_type == MessageType::KeySet && m.state == MessageState::Waiting {
                    if let Some(slot) = key_set_messages.get_mut(m.member_index as usize) {
                        if *slot == 0 {
                            *slot = m.id;
                        }
                    }
                }
            }

            if Self::message_ids_complete(&key_set_messages) {
                // Nothing can be ready to process earlier than this
                let mut data = ProcessingData::new(MessageProcessing::MakeMultisig);
                data.message_ids = key_set_messages[1..].to_vec();
                return (vec![data], String::new());
            }
            return (
                Vec::new(),
                "Wallet can't go multisig because key sets from other members missing or not complete."
                    .to_string(),
            );
        }

        if state.multisig && !state.multisig_is_ready {
            // For N-1/N multisig the wallet reports "multisig but not ready"
            // between make_multisig and finalize_multisig; insist on the
            // complete set of finalizing key sets here as well
            let mut finalizing_messages = vec![0u32; self.coalition_size as usize];
            for m in &self.messages {
                if m.message_type == MessageType::FinalizingKeySet
                    && m.state == MessageState::Waiting
                {
                    if let Some(slot) = finalizing_messages.get_mut(m.member_index as usize) {
                        if *slot == 0 {
                            *slot = m.id;
                        }
                    }
                }
            }

            if Self::message_ids_complete(&finalizing_messages) {
                let mut data = ProcessingData::new(MessageProcessing::FinalizeMultisig);
                data.message_ids = finalizing_messages[1..].to_vec();
                return (vec![data], String::new());
            }
            return (
                Vec::new(),
                "Wallet can't finalize multisig because key sets from other members missing or not complete."
                    .to_string(),
            );
        }

        if state.has_multisig_partial_key_images || force_sync {
            // Sync is necessary and not yet completed; transactions only
            // become processable again once properly synced.
            //
            // Exchanging sync data is most transparent when the wallet sends
            // its own data first and only then processes what the other
            // members sent, so that order is enforced here. Sync messages
            // are matched to the current round through the wallet height
            // recorded at creation time.
            let mut own_sync_data_created = false;
            let mut sync_messages = vec![0u32; self.coalition_size as usize];
            for m in &self.messages {
                if m.message_type == MessageType::MultisigSyncData
                    && (force_sync || m.wallet_height == wallet_height)
                {
                    if m.direction == MessageDirection::Out {
                        // Ignore whether sent already or not
                        own_sync_data_created = true;
                    } else if m.direction == MessageDirection::In
                        && m.state == MessageState::Waiting
                    {
                        if let Some(slot) = sync_messages.get_mut(m.member_index as usize) {
                            if *slot == 0 {
                                *slot = m.id;
                            }
                        }
                    }
                }
            }

            if !own_sync_data_created {
                return (
                    vec![ProcessingData::new(MessageProcessing::CreateSyncData)],
                    String::new(),
                );
            }
            if Self::message_ids_complete(&sync_messages) {
                let mut data = ProcessingData::new(MessageProcessing::ProcessSyncData);
                data.message_ids = sync_messages[1..].to_vec();
                return (vec![data], String::new());
            }
            return (
                Vec::new(),
                "Syncing not possible because multisig sync data from other members missing or not complete."
                    .to_string(),
            );
        }

        let mut waiting_found = false;
        for m in &self.messages {
            if m.state != MessageState::Waiting {
                continue;
            }
            waiting_found = true;
            match m.message_type {
                MessageType::FullySignedTx => {
                    // Either submit it ourselves, or send it to any other
                    // member for submission
                    let mut submit = ProcessingData::new(MessageProcessing::SubmitTx);
                    submit.message_ids.push(m.id);
                    let mut plans = vec![submit];
                    for peer in 1..self.coalition_size {
                        let mut send = ProcessingData::new(MessageProcessing::SendTx);
                        send.message_ids.push(m.id);
                        send.receiving_member_index = peer;
                        plans.push(send);
                    }
                    return (plans, String::new());
                }
                MessageType::PartiallySignedTx if m.member_index == 0 => {
                    // We started this ourselves, or signed it with
                    // signatures still missing: send to any other member for
                    // further signing. (No bookkeeping yet about who signed
                    // already, so members that did sign remain candidates.)
                    let mut plans = Vec::new();
                    for peer in 1..self.coalition_size {
                        let mut send = ProcessingData::new(MessageProcessing::SendTx);
                        send.message_ids.push(m.id);
                        send.receiving_member_index = peer;
                        plans.push(send);
                    }
                    return (plans, String::new());
                }
                MessageType::PartiallySignedTx => {
                    // Somebody else sent this to us: we can sign it
                    let mut sign = ProcessingData::new(MessageProcessing::SignTx);
                    sign.message_ids.push(m.id);
                    return (vec![sign], String::new());
                }
                _ => {}
            }
        }

        let reason = if waiting_found {
            "Waiting message is not a tx and thus not processable now."
        } else {
            "There is no message waiting to be processed."
        };
        (Vec::new(), reason.to_string())
    }

    /// Mark every message referenced by a plan as consumed
    pub fn set_messages_processed(
        &mut self,
        state: &MultisigWalletState,
        data: &ProcessingData,
    ) -> Result<(), MmsError> {
        for &id in &data.message_ids {
            self.set_message_processed_or_sent(state, id)?;
        }
        Ok(())
    }

    /// Advance one message out of its pending state
    ///
    /// `Waiting` becomes `Processed` (and the transport-side copy is deleted
    /// only now, not already on reception); `ReadyToSend` becomes `Sent`.
    pub fn set_message_processed_or_sent(
        &mut self,
        state: &MultisigWalletState,
        id: u32,
    ) -> Result<(), MmsError> {
        let index = self
            .message_index_by_id(id)
            .ok_or(MmsError::InvalidMessageId(id))?;
        match self.messages[index].state {
            MessageState::Waiting => {
                self.delete_transport_message(id)?;
                self.messages[index].state = MessageState::Processed;
            }
            MessageState::ReadyToSend => {
                self.messages[index].state = MessageState::Sent;
            }
            _ => {}
        }
        self.messages[index].modified = unix_now();
        self.save(state)
    }

    fn encrypt(
        &self,
        member_index: u32,
        plaintext: &[u8],
    ) -> Result<(Vec<u8>, [u8; 32], CipherIv), MmsError> {
        let member = self
            .members
            .get(member_index as usize)
            .ok_or(MmsError::InvalidMemberIndex(member_index))?;
        Ok(encrypt_to(&member.address.exchange_key, plaintext))
    }

    /// Encrypt and dispatch an outbound message
    ///
    /// "BM-" transport addresses go through the transporter; anything else
    /// is treated as a directory and served by the debug file transport.
    pub fn send_message(&mut self, state: &MultisigWalletState, id: u32) -> Result<(), MmsError> {
        let index = self
            .message_index_by_id(id)
            .ok_or(MmsError::InvalidMessageId(id))?;
        let message = self.messages[index].clone();
        let (ciphertext, encryption_public_key, iv) =
            self.encrypt(message.member_index, &message.content)?;

        let destination = &self.members[message.member_index as usize];
        let timestamp = unix_now();
        if destination.transport_address.starts_with("BM-") {
            let hash = hash_bytes(&ciphertext);
            let envelope = TransportMessage {
                source_address: self.members[0].address,
                source_transport_address: self.members[0].transport_address.clone(),
                destination_address: destination.address,
                destination_transport_address: destination.transport_address.clone(),
                iv,
                encryption_public_key,
                timestamp,
                message_type: message.message_type.tag(),
                subject: format!("MMS V0 {}", human_readable_timestamp(timestamp)),
                content: ciphertext,
                hash,
                signature: state.view_secret_key.sign(&hash),
                transport_id: String::new(),
                round: message.round,
                signature_count: message.signature_count,
            };
            let transporter = self
                .transporter
                .as_ref()
                .ok_or(TransportError::NotConfigured)?;
            transporter.send_message(&envelope)?;
        } else {
            // Write the message as file "debug_message" into the member's
            // transport directory
            let mut file_message = FileTransportMessage {
                sender_address: self.members[0].address,
                iv,
                encryption_public_key,
                internal_message: message,
            };
            file_message.internal_message.content = ciphertext;
            let path = Path::new(&destination.transport_address).join("debug_message");
            let bytes = bincode::serialize(&file_message)?;
            std::fs::write(path, bytes)?;
        }

        self.messages[index].state = MessageState::Sent;
        self.messages[index].sent = timestamp;
        self.save(state)
    }

    /// Poll the transport and take in new messages
    ///
    /// Returns the messages stored by this poll. Envelopes already seen
    /// (matching content hash) are dropped silently; envelopes from unknown
    /// senders, with wrong content hashes or bad signatures are dropped with
    /// a warning. A `stop` call is honored between the (possibly blocking)
    /// receive and processing, but never mid-batch: partially persisted
    /// polls would be worse than a slightly delayed shutdown.
    pub fn check_for_messages(
        &mut self,
        state: &MultisigWalletState,
    ) -> Result<Vec<Message>, MmsError> {
        self.run.store(true, Ordering::Relaxed);
        let own = match self.members.first() {
            Some(member) => member.clone(),
            None => return Ok(Vec::new()),
        };

        let mut new_messages = Vec::new();
        if own.transport_address.starts_with("BM-") {
            let transporter = self
                .transporter
                .as_ref()
                .ok_or(TransportError::NotConfigured)?;
            let envelopes = transporter.receive_messages(&own.address, &own.transport_address)?;
            if !self.run.load(Ordering::Relaxed) {
                // Stop was called, don't waste time processing the batch
                return Ok(Vec::new());
            }

            for envelope in envelopes {
                if self.any_message_with_hash(&envelope.hash) {
                    // Already seen, do not take again
                    continue;
                }
                let Some(sender_index) = self.member_index_by_address(&envelope.source_address)
                else {
                    continue;
                };
                let actual_hash = hash_bytes(&envelope.content);
                if actual_hash != envelope.hash {
                    tracing::warn!("dropping envelope with mismatched content hash");
                    continue;
                }
                if !envelope.source_address.verify(&actual_hash, &envelope.signature) {
                    tracing::warn!("dropping envelope with invalid signature");
                    continue;
                }
                let message_type = MessageType::from_tag(envelope.message_type).ok_or_else(|| {
                    MmsError::MalformedEnvelope(format!(
                        "unknown message type tag {}",
                        envelope.message_type
                    ))
                })?;

                let plaintext = decrypt_from(
                    &state.view_secret_key,
                    &envelope.encryption_public_key,
                    &envelope.iv,
                    &envelope.content,
                );
                let id = self.add_message(
                    state,
                    sender_index,
                    message_type,
                    MessageDirection::In,
                    plaintext,
                )?;
                let index = self
                    .message_index_by_id(id)
                    .ok_or(MmsError::InvalidMessageId(id))?;
                let message = &mut self.messages[index];
                message.hash = envelope.hash;
                message.transport_id = envelope.transport_id;
                message.sent = envelope.timestamp;
                message.round = envelope.round;
                message.signature_count = envelope.signature_count;
                new_messages.push(message.clone());
            }
            if !new_messages.is_empty() {
                // The replay keys were stamped after add_message persisted
                self.save(state)?;
            }
        } else {
            // Debug file transport: a single new message as file
            // "debug_message" in the own transport directory
            let path = Path::new(&own.transport_address).join("debug_message");
            if !path.exists() {
                return Ok(Vec::new());
            }
            let bytes = std::fs::read(&path)?;
            let file_message: FileTransportMessage = bincode::deserialize(&bytes)?;

            let ciphertext_hash = hash_bytes(&file_message.internal_message.content);
            let Some(sender_index) = self.member_index_by_address(&file_message.sender_address)
            else {
                std::fs::remove_file(&path)?;
                return Ok(Vec::new());
            };
            let plaintext = decrypt_from(
                &state.view_secret_key,
                &file_message.encryption_public_key,
                &file_message.iv,
                &file_message.internal_message.content,
            );
            let id = self.add_message(
                state,
                sender_index,
                file_message.internal_message.message_type,
                MessageDirection::In,
                plaintext,
            )?;
            let index = self
                .message_index_by_id(id)
                .ok_or(MmsError::InvalidMessageId(id))?;
            let message = &mut self.messages[index];
            message.hash = ciphertext_hash;
            new_messages.push(message.clone());
            self.save(state)?;
            std::fs::remove_file(&path)?;
        }
        Ok(new_messages)
    }

    /// Cancel any in-flight receive and refuse further processing
    pub fn stop(&self) {
        self.run.store(false, Ordering::Relaxed);
        if let Some(transporter) = &self.transporter {
            transporter.stop();
        }
    }

    fn delete_transport_message(&self, id: u32) -> Result<(), MmsError> {
        let index = self
            .message_index_by_id(id)
            .ok_or(MmsError::InvalidMessageId(id))?;
        let message = &self.messages[index];
        if !message.transport_id.is_empty() {
            let transporter = self
                .transporter
                .as_ref()
                .ok_or(TransportError::NotConfigured)?;
            transporter.delete_message(&message.transport_id)?;
        }
        Ok(())
    }

    fn snapshot(&self) -> StoreSnapshot {
        StoreSnapshot {
            active: self.active,
            coalition_size: self.coalition_size,
            nettype: self.nettype,
            threshold: self.threshold,
            members: self.members.clone(),
            messages: self.messages.clone(),
            next_message_id: self.next_message_id,
            auto_send: self.auto_send,
        }
    }

    fn apply_snapshot(&mut self, snapshot: StoreSnapshot) {
        self.active = snapshot.active;
        self.coalition_size = snapshot.coalition_size;
        self.nettype = snapshot.nettype;
        self.threshold = snapshot.threshold;
        self.members = snapshot.members;
        self.messages = snapshot.messages;
        self.next_message_id = snapshot.next_message_id;
        self.auto_send = snapshot.auto_send;
    }

    /// Write the full store, encrypted, to `path`
    ///
    /// The store key is derived from the wallet's view secret key. The write
    /// goes to a temp file first so a crash cannot truncate the previous
    /// good copy.
    pub fn write_to_file(
        &self,
        state: &MultisigWalletState,
        path: &Path,
    ) -> Result<(), MmsError> {
        let snapshot = bincode::serialize(&self.snapshot())?;
        let key = derive_store_key(&state.view_secret_key);
        let iv = random_iv();
        let file_data = FileData {
            magic_string: FILE_MAGIC.to_string(),
            file_version: FILE_VERSION,
            iv,
            encrypted_data: stream_xor(&key, &iv, &snapshot),
        };
        let bytes = bincode::serialize(&file_data)?;

        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, bytes)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Load the store from `path`, replacing the in-memory state
    ///
    /// A missing file is a no-op: deleting the file is the supported way to
    /// recover from a broken store.
    pub fn read_from_file(
        &mut self,
        state: &MultisigWalletState,
        path: &Path,
    ) -> Result<(), MmsError> {
        if !path.exists() {
            tracing::warn!("no message store file found: {}", path.display());
            return Ok(());
        }
        let bytes = std::fs::read(path)?;
        let file_data: FileData =
            bincode::deserialize(&bytes).map_err(|_| MmsError::BadFile(path.to_path_buf()))?;
        if file_data.magic_string != FILE_MAGIC || file_data.file_version != FILE_VERSION {
            return Err(MmsError::BadFile(path.to_path_buf()));
        }

        let key = derive_store_key(&state.view_secret_key);
        let decrypted = stream_xor(&key, &file_data.iv, &file_data.encrypted_data);
        let snapshot: StoreSnapshot =
            bincode::deserialize(&decrypted).map_err(|_| MmsError::BadFile(path.to_path_buf()))?;
        self.apply_snapshot(snapshot);
        self.filename = Some(path.to_path_buf());
        Ok(())
    }

    /// Save to the file this store was initialized from or loaded from
    fn save(&self, state: &MultisigWalletState) -> Result<(), MmsError> {
        if let Some(filename) = &self.filename {
            self.write_to_file(state, filename)?;
        }
        Ok(())
    }
}
