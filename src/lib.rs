//! ONYX (OX) Blockchain Core Library
//!
//! Consensus and coordination primitives for the ONYX CryptoNote-family
//! chain: difficulty retargeting, hard-fork scheduling, checkpoint
//! enforcement, and the multisig message store (MMS) that coordinates
//! coalition wallets over a pluggable transport.
//!
//! OX is the short form used in addresses, logos, and protocol identifiers.

use serde::{Deserialize, Serialize};

pub mod consensus;
pub mod crypto;
pub mod mms;
pub mod net;

/// The network a node or wallet operates on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Network {
    Mainnet,
    Testnet,
    Stagenet,
}

/// Protocol constants - HARD-CODED, NEVER CONFIGURABLE
pub mod constants {
    /// Target block time in seconds (from hard fork v8 onward)
    pub const DIFFICULTY_TARGET_V2: u64 = 300;

    /// Classic retarget window in blocks (v7 era)
    pub const DIFFICULTY_WINDOW: usize = 720;

    /// Outliers trimmed from each tail of the classic window
    pub const DIFFICULTY_CUT: usize = 60;

    /// LWMA retarget window in blocks (v8 era onward)
    pub const DIFFICULTY_WINDOW_V2: usize = 60;

    /// Hard floor for the LWMA difficulty algorithms
    pub const DIFFICULTY_MINIMUM: u64 = 100_000;

    /// Height of the difficulty reset that came with the LWMA-4 switch
    pub const DIFFICULTY_HEIGHT: u64 = 81_769;

    /// Seed difficulty returned while the post-reset window refills
    pub const DIFFICULTY_GUESS: u64 = 100_000_069;

    /// Chain name (short form for addresses/logos)
    pub const CHAIN_NAME: &str = "OX";

    /// Full chain name
    pub const CHAIN_FULL_NAME: &str = "ONYX";
}
