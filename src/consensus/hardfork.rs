//! Hard-fork schedules
//!
//! Static per-network tables mapping protocol versions to their activation
//! heights. Consumers pick the difficulty algorithm and validation rules
//! from the active version; the tables themselves never change at runtime.

use crate::Network;

/// One scheduled protocol version change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HardforkEntry {
    /// Protocol version activated by this fork
    pub version: u8,
    /// First height governed by this version
    pub height: u64,
    /// Voting threshold (unused on this chain, kept for table compatibility)
    pub threshold: u8,
    /// Approximate activation time (unix seconds)
    pub time: u64,
}

const fn fork(version: u8, height: u64, threshold: u8, time: u64) -> HardforkEntry {
    HardforkEntry {
        version,
        height,
        threshold,
        time,
    }
}

pub const MAINNET_HARD_FORKS: &[HardforkEntry] = &[
    fork(7, 1, 0, 1519605000),
    fork(8, 6969, 0, 1524214739),
    fork(9, 53666, 0, 1538689773),
    fork(10, 63469, 0, 1541700352),
    fork(11, 81769, 0, 1549238400),
    fork(12, 82069, 0, 1549318761),
    fork(13, 114969, 0, 1559292691),
    fork(14, 115257, 0, 1559292774),
    fork(15, 160777, 0, 1573280497),
];

pub const TESTNET_HARD_FORKS: &[HardforkEntry] = &[
    fork(7, 1, 0, 1519605000),
    fork(8, 5, 0, 1524214739),
    fork(9, 10, 0, 1538689773),
    fork(10, 15, 0, 1541700352),
    fork(11, 20, 0, 1549238400),
    fork(12, 25, 0, 1549318761),
    fork(13, 30, 0, 1559292691),
    fork(14, 35, 0, 1559292774),
    fork(15, 40, 0, 1573280497),
    fork(16, 45, 0, 1589210508),
];

pub const STAGENET_HARD_FORKS: &[HardforkEntry] = &[
    // version 1 from the start of the chain
    fork(1, 1, 0, 1341378000),
    // versions 2-7 in rapid succession from March 13th, 2018
    fork(2, 32000, 0, 1521000000),
    fork(3, 33000, 0, 1521120000),
    fork(4, 34000, 0, 1521240000),
    fork(5, 35000, 0, 1521360000),
    fork(6, 36000, 0, 1521480000),
    fork(7, 37000, 0, 1521600000),
    fork(8, 176456, 0, 1537821770),
    fork(9, 177176, 0, 1537821771),
    fork(10, 269000, 0, 1550153694),
    fork(11, 269720, 0, 1550225678),
    fork(12, 454721, 0, 1571419280),
];

/// The schedule for a network
pub fn hard_forks(network: Network) -> &'static [HardforkEntry] {
    match network {
        Network::Mainnet => MAINNET_HARD_FORKS,
        Network::Testnet => TESTNET_HARD_FORKS,
        Network::Stagenet => STAGENET_HARD_FORKS,
    }
}

/// The protocol version active at `height`
///
/// Returns the greatest scheduled version whose activation height is at or
/// below `height`, or 1 before the first scheduled fork.
pub fn active_version(network: Network, height: u64) -> u8 {
    hard_forks(network)
        .iter()
        .take_while(|entry| entry.height <= height)
        .last()
        .map(|entry| entry.version)
        .unwrap_or(1)
}

/// Heights and versions must both strictly increase through a schedule
pub fn schedule_is_monotonic(schedule: &[HardforkEntry]) -> bool {
    schedule
        .windows(2)
        .all(|pair| pair[0].height < pair[1].height && pair[0].version < pair[1].version)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_schedules_monotonic() {
        assert!(schedule_is_monotonic(MAINNET_HARD_FORKS));
        assert!(schedule_is_monotonic(TESTNET_HARD_FORKS));
        assert!(schedule_is_monotonic(STAGENET_HARD_FORKS));
    }

    #[test]
    fn test_active_version_lookup() {
        assert_eq!(active_version(Network::Mainnet, 0), 1);
        assert_eq!(active_version(Network::Mainnet, 1), 7);
        assert_eq!(active_version(Network::Mainnet, 6968), 7);
        assert_eq!(active_version(Network::Mainnet, 6969), 8);
        assert_eq!(active_version(Network::Mainnet, 82069), 12);
        assert_eq!(active_version(Network::Mainnet, 10_000_000), 15);
    }

    #[test]
    fn test_networks_have_distinct_schedules() {
        assert_eq!(active_version(Network::Testnet, 45), 16);
        assert_eq!(active_version(Network::Stagenet, 45), 1);
        assert_eq!(active_version(Network::Stagenet, 454721), 12);
    }
}
