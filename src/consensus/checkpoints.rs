//! Checkpoint registry
//!
//! An ordered map from block height to the canonical block hash at that
//! height. Checkpoints pin the chain: blocks at checkpointed heights must
//! match, and no reorganisation may replace a block at or below the highest
//! checkpoint buried in the current chain. The registry is populated once at
//! startup (hard-coded defaults, then an optional JSON file, then advisory
//! DNS records) and read-only afterwards.

use std::collections::BTreeMap;
use std::path::Path;

use thiserror::Error;

use crate::crypto::Hash;
use crate::Network;

/// Checkpoint errors
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("failed to parse checkpoint hash: {0}")]
    InvalidHash(String),
    #[error("conflicting checkpoint at height {0}")]
    Conflict(u64),
    #[error("failed to read checkpoint file: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed checkpoint file: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Source of DNS TXT records, DNSSEC validation included
///
/// The node wires in a real resolver; tests use a canned list. Record format
/// is `"<decimal_height>:<64_hex_hash>"`.
pub trait TxtRecordSource {
    fn fetch_txt(&self, hostnames: &[&str]) -> Result<Vec<String>, String>;
}

/// Outcome of checking one block against the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckpointCheck {
    /// False only when a checkpoint exists at this height and disagrees
    pub valid: bool,
    /// Whether a checkpoint exists at this height at all
    pub is_checkpoint: bool,
}

/// Hostnames serving checkpoint TXT records, per network
///
/// Currently empty; operators run without the DNS layer.
const MAINNET_DNS_URLS: &[&str] = &[];
const TESTNET_DNS_URLS: &[&str] = &[];
const STAGENET_DNS_URLS: &[&str] = &[];

/// Hard-coded mainnet checkpoints - (height, block_hash_hex)
///
/// Updated at milestones and after every hard fork. Testnet and stagenet
/// intentionally carry none.
const MAINNET_CHECKPOINTS: &[(u64, &str)] = &[
    (1, "97f4ce4d7879b3bea54dcec738cd2ebb7952b4e9bb9743262310cd5fec749340"),
    (10, "305472c87ff86d8afb3ec42634828462b0ed3d929fc05fa1ae668c3bee04837a"),
    (100, "a92b9deae26e19322041cbc2f850fa905748ae1e5bf69b35ca90b247c5cbfc04"),
    (1000, "62921e13030b29264439cafaf8320cf8aa039ee6ba7ba29c72f11b50a079269a"),
    (2000, "b3e1d73e3d0243239481aa76cb075cf2428556f5dc4f2e30428ea2ba36693e97"),
    (3000, "83a6e1ab394e80b8442b7b70b0e4c3a9fa0143e0ca51a33e829537ef5dd1bf13"),
    (4000, "7c70722d8cb8106b4bec67e1790614cc6e98db7afd0843b96cdff6960a0e0073"),
    (5000, "331ee74008e174e5fd1956f64c52793961b321a1366f7c6f7d324e8265df34f6"),
    // Hard fork to v8
    (6969, "aa7b66e8c461065139b55c29538a39c33ceda93e587f84d490ed573d80511c87"),
    (7000, "2711bd33b107f744ad8bf98c1acefa18658780079496bd2f3a36f2e20b261f8e"),
    (7500, "5975967c4624f13f058acafe7adf9355e03e8e802eeadc84ccb22ea588bc0762"),
    (7900, "d9bc18cb35feb6b26bc5a19bbdbf7c852d9cc02883acb5bbce2e87d8b2c86069"),
    (10000, "bc5bfbf1b26c8f976d1d792ece4c6a7e93064bec62b72f1d5beae74c3f273b3b"),
    (20000, "52cc7edcb49eb02f28a653b824089a726f4050eb210263ee6f4180d388a1e5cc"),
    (30000, "d22fde5dd240ade16d3250eb0aa5d1c16dc7cb51c20484e05eb274911032b3fa"),
    (40000, "aee0d642322542ba069cb1c58ab2acd3560f108d4682c3dc3cb15a54d442d91f"),
    (50000, "5286ac2a0f39b3aefcba363cd71f2760bd1e0d763cbc81026ebdc3f80a86541f"),
    // Hard fork to v9
    (53666, "3f43f56f66ef0c43cf2fd14d0d28fa2aae0ef8f40716773511345750770f1255"),
    (54500, "8ed3078b389c2b44add007803d741b58d3fbed2e1ba4139bda702152d8773c9b"),
    (55000, "4b662ceccefc3247edb4d654dd610b8fb496e85b88a5de43cc2bdd28171b15ff"),
    (57000, "08a79f09f12bb5d230b63963356a760d51618e526cfc636047a6f3798217c177"),
    (59000, "180b51ee2c5fbcd4362eb7a29df9422481310dd77d10bccdf8930724c31e007e"),
    (59900, "18cc0653ef39cb304c68045dba5eb6b885f936281cd939dea04d0e6c9cd4ae2e"),
    (60000, "0f02aa57a63f79f63dafed9063abe228a37cb19f00430dc3168b8a8f4ae8016c"),
    (61000, "509aca8c54eb5fe44623768757b6e890ae39d512478c75f614cbff3d91809350"),
    (62000, "7fe91ad256c08dbd961e04738968be22fb481093fbfa7959bde7796ccceba0e2"),
    (62150, "1a7c75f8ebeda0e20eb5877181eafd7db0fc887e3fed43e0b27ab2e7bccafd10"),
    (62269, "4969555d60742afb93925fd96d83ac28f45e6e3c0e583c9fb3c92d9b2100d38f"),
    (62405, "4d0ae890cf9f875f231c7069508ad28dc429d14814b52db114dfab7519a27584"),
    (62419, "bd8bf5ac4c4fb07ab4d0d492bd1699def5c095ab6943ad3b63a89d1d8b1ce748"),
    (62425, "41a922dba6f3906871b2ccaf31ec9c91033470c503959093dae796deda8940ea"),
    (62479, "a2e8ff4205ba2980eb70921b0b21b5fc656ee273664ea94b860c68ca069b60dd"),
    (62503, "25fa115962988b4b8f8cfd22744a3e653b22ead8c8468e64caf334fc75a97d08"),
    (62550, "bde522a8a81c392c98c979434aa1dd9d20b4ca52230ba6ae0362872757808a48"),
    (62629, "8368e1ce1d421f1fc969364558433e2b2363d0ffcb5f2d946633095e3e6734f5"),
    (62720, "f871cddd75951e2fe24c282d2bd28396fc922ea519b354ace992a0162cb333ff"),
    (62733, "8331dbeeaf23173d2235a062373a437befadb6492cceb7640127bf18653a9e61"),
    (62877, "62d44adc05d7d4fd9d15239c5575612207beab0bcf2da49158bf89e365441ca1"),
    // Hard fork to v10
    (63469, "4e33a9343fc5b86661ec0affaeb5b5a065290602c02d817337e4a979fe5747d8"),
    (63950, "155b61475985ac3f48fda10091d732bdc8087a55554504959e88d29962c91b72"),
    (70000, "f49a0c916f4a9ef02eea45b8c5c561124ef84b7a1e51ec4e3cbbb1f204ce4c5b"),
    (75000, "c73e49e9dee8980b5fbf96b9565e5e1c1787e459b7e51d8bdbf145d8d3f0e4a7"),
    // Hard fork to v11, difficulty reset
    (81769, "29fc1903b782b3b0b3bb75f0db2ec9f2b198fd4258b3e61fb71d2b6417e49f8a"),
    // Hard fork to v12
    (82069, "6e0b6c3a49f0b843a0ad263268fe6ec56eb330efcc9f09e2985e4ce703d9b67d"),
    (90000, "d29e31cb8e9b58e818e01b0b22b1a7d5ac0a8b7e1f2c19d14f6a5b3c7f08e1d2"),
    (100000, "8f1cc8445dd13ab79c63f34b0888f9f2c5c8f31a9b5e6daa477ee1bdf4b1cda6"),
    (110000, "3be217cdb0e612f3c183271cf573ea1a12f1dcae8d8f03a4f56a8b3e92440c6e"),
    // Hard fork to v13
    (114969, "b652b7a69c8b5d3e3f0e1b41b1c6a5276bb75e85ccd6a90e7cdb7440a1b36de9"),
    // Hard fork to v14
    (115257, "04e4026f3bd0f5171dd4376d791ab9ab9ff9bc7c63bea1c2a4c24e8e54914d22"),
    (125000, "f7ec8e0c63a32ae4a38b5fbabfbff28a27dd04dba680a107dbc61e4b271de01a"),
    (140000, "9a6a7bb3c9f4e3c5d9a9a00b42e96d1c7ed0a7bd7e4f2ba84917b0c4d1e8e6f3"),
    // Hard fork to v15
    (160777, "1c65c82a4d44e19fa3e1e0845ee9ed8e96c71cb4115b8bfa53d7d48fe3b6ff29"),
    (175000, "7d63ef3302e5e14dd1aab21a86e1b6cfed6bcf0c55f0efbd6cbbf2b1efa1c044"),
    (190000, "e03f02d9e54da5c2de9e1c62f3e9e0ef2cfcf90ccbcbc5e1e2db35a71e42eb28"),
    (205000, "2b1f6e5e4e40a0d55b41bd13ba0f6a0bca2f9b2e53e5e8dfa80b88b67a3f2d0c"),
    (211300, "aff4b0b49bcbd993c1c2b1f5b8d2a857e0bf0a55bab7a5e7948f0a66d1e84c31"),
];

/// Ordered checkpoint registry
#[derive(Debug, Clone, Default)]
pub struct Checkpoints {
    points: BTreeMap<u64, Hash>,
}

impl Checkpoints {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a checkpoint, given as a 64-character hex hash
    ///
    /// Adding the same (height, hash) pair again is a no-op; adding a
    /// different hash at an existing height fails and leaves the registry
    /// unchanged.
    pub fn add_checkpoint(&mut self, height: u64, hash_str: &str) -> Result<(), CheckpointError> {
        let hash = Hash::from_hex(hash_str)
            .map_err(|_| CheckpointError::InvalidHash(hash_str.to_string()))?;

        if let Some(existing) = self.points.get(&height) {
            if *existing != hash {
                tracing::warn!(
                    "checkpoint at height {} already exists with a different hash",
                    height
                );
                return Err(CheckpointError::Conflict(height));
            }
        }
        self.points.insert(height, hash);
        Ok(())
    }

    /// Is there a checkpoint at exactly this height?
    pub fn contains_height(&self, height: u64) -> bool {
        self.points.contains_key(&height)
    }

    /// Is `height` at or below the highest checkpoint?
    pub fn is_in_checkpoint_zone(&self, height: u64) -> bool {
        match self.points.keys().next_back() {
            Some(&max) => height <= max,
            None => false,
        }
    }

    /// Check a block hash against the registry
    ///
    /// Heights without a checkpoint always pass.
    pub fn check_block(&self, height: u64, hash: &Hash) -> CheckpointCheck {
        match self.points.get(&height) {
            None => CheckpointCheck {
                valid: true,
                is_checkpoint: false,
            },
            Some(expected) if expected == hash => {
                tracing::info!("CHECKPOINT PASSED FOR HEIGHT {} {}", height, hash);
                CheckpointCheck {
                    valid: true,
                    is_checkpoint: true,
                }
            }
            Some(expected) => {
                tracing::warn!(
                    "CHECKPOINT FAILED FOR HEIGHT {}. EXPECTED HASH: {}, FETCHED HASH: {}",
                    height,
                    expected,
                    hash
                );
                CheckpointCheck {
                    valid: false,
                    is_checkpoint: true,
                }
            }
        }
    }

    /// May an alternative block at `block_height` still attach to a chain
    /// currently at `blockchain_height`?
    ///
    /// Once a checkpoint is buried in the chain, alternative blocks at or
    /// below it must not reorganise it away.
    pub fn is_alternative_block_allowed(&self, blockchain_height: u64, block_height: u64) -> bool {
        if block_height == 0 {
            return false;
        }
        match self.points.range(..=blockchain_height).next_back() {
            // The chain has not reached the first checkpoint yet
            None => true,
            Some((&checkpoint_height, _)) => checkpoint_height < block_height,
        }
    }

    /// Highest checkpointed height, or 0 when empty
    pub fn max_height(&self) -> u64 {
        self.points.keys().next_back().copied().unwrap_or(0)
    }

    /// The underlying height -> hash map
    pub fn points(&self) -> &BTreeMap<u64, Hash> {
        &self.points
    }

    /// True iff no height present in both registries disagrees
    pub fn check_for_conflicts(&self, other: &Checkpoints) -> bool {
        other.points.iter().all(|(height, hash)| {
            self.points
                .get(height)
                .map(|ours| ours == hash)
                .unwrap_or(true)
        })
    }

    /// Populate from the hard-coded table for `network`
    pub fn init_defaults(&mut self, network: Network) -> Result<(), CheckpointError> {
        if network != Network::Mainnet {
            return Ok(());
        }
        for (height, hash) in MAINNET_CHECKPOINTS {
            self.add_checkpoint(*height, hash)?;
        }
        Ok(())
    }

    /// Load additional checkpoints from a JSON hash file
    ///
    /// A missing file is not an error. Entries at or below the current
    /// maximum height are ignored; checkpoints are never demoted.
    ///
    /// Expected format:
    /// `{ "hashlines": [ { "height": <u64>, "hash": "<64 hex>" }, ... ] }`
    pub fn load_from_json(&mut self, path: &Path) -> Result<(), CheckpointError> {
        if !path.exists() {
            tracing::info!("blockchain checkpoints file not found");
            return Ok(());
        }

        tracing::info!("adding checkpoints from blockchain hashfile");
        let prev_max_height = self.max_height();
        tracing::info!("hard-coded max checkpoint height is {}", prev_max_height);

        let contents = std::fs::read_to_string(path)?;
        let hashes: HashFile = serde_json::from_str(&contents)?;
        for line in &hashes.hashlines {
            if line.height <= prev_max_height {
                tracing::info!("ignoring checkpoint height {}", line.height);
            } else {
                tracing::info!("adding checkpoint height {}, hash={}", line.height, line.hash);
                self.add_checkpoint(line.height, &line.hash)?;
            }
        }
        Ok(())
    }

    /// Load advisory checkpoints from DNS TXT records
    ///
    /// Malformed records are skipped silently. A failed fetch is not an
    /// error: DNS checkpoints are advisory and many operators run without
    /// them.
    pub fn load_from_dns(
        &mut self,
        network: Network,
        source: &dyn TxtRecordSource,
    ) -> Result<(), CheckpointError> {
        let hostnames = match network {
            Network::Mainnet => MAINNET_DNS_URLS,
            Network::Testnet => TESTNET_DNS_URLS,
            Network::Stagenet => STAGENET_DNS_URLS,
        };

        let records = match source.fetch_txt(hostnames) {
            Ok(records) => records,
            Err(err) => {
                tracing::warn!("checkpoint TXT record fetch failed: {}", err);
                return Ok(());
            }
        };

        for record in &records {
            let Some((height_str, hash_str)) = record.split_once(':') else {
                continue;
            };
            let Ok(height) = height_str.parse::<u64>() else {
                continue;
            };
            if Hash::from_hex(hash_str).is_err() {
                continue;
            }
            self.add_checkpoint(height, hash_str)?;
        }
        Ok(())
    }

    /// Combined bootstrap: JSON file, then (optionally) DNS
    pub fn load_new_checkpoints(
        &mut self,
        json_path: &Path,
        network: Network,
        dns: Option<&dyn TxtRecordSource>,
    ) -> Result<(), CheckpointError> {
        self.load_from_json(json_path)?;
        if let Some(source) = dns {
            self.load_from_dns(network, source)?;
        }
        Ok(())
    }
}

#[derive(serde::Deserialize)]
struct HashLine {
    height: u64,
    hash: String,
}

#[derive(serde::Deserialize)]
struct HashFile {
    hashlines: Vec<HashLine>,
}
