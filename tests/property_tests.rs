//! Property-based and adversarial tests for ONYX core
//!
//! These tests verify consensus and coordination invariants under random
//! inputs and attack scenarios.

use proptest::prelude::*;

use onyx_core::consensus::{
    check_hash, next_difficulty, schedule_is_monotonic, Checkpoints, Difficulty,
    MAINNET_HARD_FORKS, STAGENET_HARD_FORKS, TESTNET_HARD_FORKS,
};
use onyx_core::consensus::active_version;
use onyx_core::crypto::{encrypt_to, hash_bytes, AccountPublicKey, Hash, ViewSecretKey};
use onyx_core::mms::{
    MessageProcessing, MessageStore, MessageTransporter, MessageType, MultisigWalletState,
    TransportError, TransportMessage,
};
use onyx_core::Network;

// ============================================================================
// PROPERTY-BASED TESTS
// ============================================================================

proptest! {
    /// PoW monotonicity: passing a harder target implies passing any easier one
    #[test]
    fn prop_pow_monotonic(
        bytes in any::<[u8; 32]>(),
        da in 1u128..u128::MAX,
        db in 1u128..u128::MAX,
    ) {
        let hash = Hash::from_bytes(bytes);
        let (easier, harder) = if da <= db { (da, db) } else { (db, da) };
        if check_hash(&hash, harder) {
            prop_assert!(check_hash(&hash, easier));
        }
    }

    /// PoW boundary: difficulty 1 accepts every hash
    #[test]
    fn prop_pow_difficulty_one_accepts(bytes in any::<[u8; 32]>()) {
        prop_assert!(check_hash(&Hash::from_bytes(bytes), 1));
    }

    /// The v1 retarget returns 0 exactly when the wide product overflows
    /// 64 bits or the round-up adjustment wraps
    #[test]
    fn prop_v1_zero_signals_overflow(
        work in 1u64..u64::MAX,
        target in 1u64..u64::MAX,
        span in 1u64..1_000_000u64,
    ) {
        let result = next_difficulty(&[0, span], &[0, work as Difficulty], target);

        let product = work as u128 * target as u128;
        let expected = if product >> 64 != 0 {
            0
        } else {
            match (product as u64).checked_add(span - 1) {
                None => 0,
                Some(rounded) => (rounded / span) as Difficulty,
            }
        };
        prop_assert_eq!(result, expected);
    }

    /// Checkpoint insertion is idempotent for equal hashes and rejected for
    /// conflicting ones, leaving the registry unchanged either way
    #[test]
    fn prop_checkpoint_idempotence(
        height in 0u64..10_000_000u64,
        first in any::<[u8; 32]>(),
        second in any::<[u8; 32]>(),
    ) {
        let mut checkpoints = Checkpoints::new();
        let first_hex = hex::encode(first);

        prop_assert!(checkpoints.add_checkpoint(height, &first_hex).is_ok());
        prop_assert!(checkpoints.add_checkpoint(height, &first_hex).is_ok());
        prop_assert_eq!(checkpoints.points().len(), 1);

        if second != first {
            prop_assert!(checkpoints.add_checkpoint(height, &hex::encode(second)).is_err());
            prop_assert_eq!(checkpoints.points()[&height], Hash::from_bytes(first));
        }
    }

    /// Reorg barrier: a buried checkpoint at C forbids alternative blocks at
    /// any height b <= C once the chain reaches B >= C
    #[test]
    fn prop_reorg_barrier(
        checkpoint in 1u64..1_000_000u64,
        below in 1u64..1_000_000u64,
        above in 0u64..1_000_000u64,
    ) {
        let mut checkpoints = Checkpoints::new();
        let hex = hex::encode([7u8; 32]);
        checkpoints.add_checkpoint(checkpoint, &hex).unwrap();

        let block_height = below.min(checkpoint);
        let blockchain_height = checkpoint + above;
        prop_assert!(!checkpoints.is_alternative_block_allowed(blockchain_height, block_height));
        // Strictly above the checkpoint is always allowed
        prop_assert!(checkpoints.is_alternative_block_allowed(blockchain_height, checkpoint + 1));
    }

    /// The active hard-fork version never decreases with height
    #[test]
    fn prop_active_version_monotone(
        ha in 0u64..2_000_000u64,
        hb in 0u64..2_000_000u64,
    ) {
        let (lo, hi) = if ha <= hb { (ha, hb) } else { (hb, ha) };
        for network in [Network::Mainnet, Network::Testnet, Network::Stagenet] {
            prop_assert!(active_version(network, lo) <= active_version(network, hi));
        }
    }
}

// ============================================================================
// ADVERSARIAL / SCENARIO TESTS
// ============================================================================

/// Hard-fork schedules must strictly increase in both height and version
#[test]
fn test_hardfork_schedules_monotonic() {
    assert!(schedule_is_monotonic(MAINNET_HARD_FORKS));
    assert!(schedule_is_monotonic(TESTNET_HARD_FORKS));
    assert!(schedule_is_monotonic(STAGENET_HARD_FORKS));
}

/// The mainnet checkpoint table and the hardfork schedule agree: every fork
/// height at or below the checkpoint ceiling is itself checkpointed
#[test]
fn test_fork_heights_are_checkpointed() {
    let mut checkpoints = Checkpoints::new();
    checkpoints.init_defaults(Network::Mainnet).unwrap();

    for entry in MAINNET_HARD_FORKS {
        if entry.height > 1 && entry.height <= checkpoints.max_height() {
            assert!(
                checkpoints.points().contains_key(&entry.height),
                "fork height {} not checkpointed",
                entry.height
            );
        }
    }
}

struct ReplayingTransporter {
    envelopes: Vec<TransportMessage>,
}

impl MessageTransporter for ReplayingTransporter {
    fn send_message(&self, _message: &TransportMessage) -> Result<(), TransportError> {
        Ok(())
    }

    fn receive_messages(
        &self,
        _destination: &AccountPublicKey,
        _destination_transport_address: &str,
    ) -> Result<Vec<TransportMessage>, TransportError> {
        Ok(self.envelopes.clone())
    }

    fn delete_message(&self, _transport_id: &str) -> Result<(), TransportError> {
        Ok(())
    }
}

fn test_state(dir: &std::path::Path, secret: &ViewSecretKey) -> MultisigWalletState {
    MultisigWalletState {
        address: secret.public(),
        nettype: Network::Testnet,
        view_secret_key: secret.clone(),
        multisig: false,
        multisig_is_ready: false,
        has_multisig_partial_key_images: false,
        num_transfer_details: 0,
        mms_file: dir.join("wallet.mms"),
    }
}

/// A fresh store plans exactly one `prepare_multisig` step
#[test]
fn test_mms_prepare_flow() {
    let dir = tempfile::tempdir().unwrap();
    let secret = ViewSecretKey::generate();
    let state = test_state(dir.path(), &secret);

    let mut store = MessageStore::new();
    store.init(&state, "me", "BM-X", 3, 2).unwrap();

    let (plans, reason) = store.get_processable_messages(&state, false);
    assert_eq!(plans.len(), 1);
    assert_eq!(plans[0].processing, MessageProcessing::PrepareMultisig);
    assert!(plans[0].message_ids.is_empty());
    assert!(reason.is_empty());
}

/// Attack: the same signed envelope delivered in duplicate within one poll
/// must be stored exactly once
#[test]
fn test_mms_replay_within_single_batch() {
    let dir = tempfile::tempdir().unwrap();
    let me = ViewSecretKey::generate();
    let peer = ViewSecretKey::generate();
    let state = test_state(dir.path(), &me);

    let (content, encryption_public_key, iv) =
        encrypt_to(&me.public().exchange_key, b"peer key set");
    let hash = hash_bytes(&content);
    let envelope = TransportMessage {
        source_address: peer.public(),
        source_transport_address: "BM-peer".to_string(),
        destination_address: me.public(),
        destination_transport_address: "BM-me".to_string(),
        iv,
        encryption_public_key,
        timestamp: 1_700_000_000,
        message_type: MessageType::KeySet.tag(),
        subject: "MMS V0 2023-11-14 22:13:20".to_string(),
        content,
        hash,
        signature: peer.sign(&hash),
        transport_id: "dup".to_string(),
        round: 0,
        signature_count: 0,
    };

    let transporter = ReplayingTransporter {
        envelopes: vec![envelope.clone(), envelope],
    };
    let mut store = MessageStore::with_transporter(Box::new(transporter));
    store.init(&state, "me", "BM-me", 2, 2).unwrap();
    store
        .set_member(
            &state,
            1,
            Some("peer".to_string()),
            Some("BM-peer".to_string()),
            Some(peer.public()),
        )
        .unwrap();

    let received = store.check_for_messages(&state).unwrap();
    assert_eq!(received.len(), 1);
    assert_eq!(store.messages().len(), 1);
}

/// Planner liveness: with all members known and one waiting key set per
/// peer, exactly one `make_multisig` plan covering every peer is produced
#[test]
fn test_mms_planner_liveness() {
    let dir = tempfile::tempdir().unwrap();
    let me = ViewSecretKey::generate();
    let state = test_state(dir.path(), &me);

    let coalition_size = 4u32;
    let mut store = MessageStore::new();
    store.init(&state, "me", "BM-me", coalition_size, 3).unwrap();
    for i in 1..coalition_size {
        store
            .set_member(
                &state,
                i,
                Some(format!("member-{}", i)),
                Some(format!("BM-{}", i)),
                Some(ViewSecretKey::generate().public()),
            )
            .unwrap();
    }

    // Our own key set exists, plus one waiting key set from every peer
    store
        .process_wallet_created_data(&state, MessageType::KeySet, b"mine".to_vec())
        .unwrap();
    for i in 1..coalition_size {
        store
            .add_message(
                &state,
                i,
                MessageType::KeySet,
                onyx_core::mms::MessageDirection::In,
                format!("peer-{}", i).into_bytes(),
            )
            .unwrap();
    }

    let (plans, reason) = store.get_processable_messages(&state, false);
    assert!(reason.is_empty());
    assert_eq!(plans.len(), 1);
    assert_eq!(plans[0].processing, MessageProcessing::MakeMultisig);
    assert_eq!(plans[0].message_ids.len(), (coalition_size - 1) as usize);
    for id in &plans[0].message_ids {
        assert_ne!(store.message_by_id(*id).unwrap().member_index, 0);
    }
}

/// Write-read round trip preserves members, messages and counters exactly
#[test]
fn test_mms_file_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let me = ViewSecretKey::generate();
    let state = test_state(dir.path(), &me);

    let mut store = MessageStore::new();
    store.init(&state, "me", "BM-me", 2, 2).unwrap();
    store
        .process_wallet_created_data(&state, MessageType::KeySet, b"key set".to_vec())
        .unwrap();

    let path = dir.path().join("copy.mms");
    store.write_to_file(&state, &path).unwrap();

    let mut restored = MessageStore::new();
    restored.read_from_file(&state, &path).unwrap();
    assert_eq!(restored.messages(), store.messages());
    assert_eq!(restored.members(), store.members());
    assert_eq!(restored.next_message_id(), store.next_message_id());
}
