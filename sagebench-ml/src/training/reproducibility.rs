//! Seed management for reproducible runs.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Derives stable per-component seeds from the run's global seed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedManager {
    pub global_seed: u64,
    pub component_seeds: BTreeMap<String, u64>,
}

impl SeedManager {
    pub fn new(global_seed: u64) -> Self {
        Self {
            global_seed,
            component_seeds: BTreeMap::new(),
        }
    }

    /// Seed for a named component (`"model"`, `"loader.train"`, ...).
    ///
    /// Computed as the first eight bytes of `SHA-256(global_seed || component)`,
    /// so it does not depend on the order components ask for seeds.
    pub fn get_seed(&mut self, component: &str) -> u64 {
        let global_seed = self.global_seed;
        *self
            .component_seeds
            .entry(component.to_string())
            .or_insert_with(|| derive_seed(global_seed, component))
    }
}

fn derive_seed(global_seed: u64, component: &str) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(global_seed.to_le_bytes());
    hasher.update(b":");
    hasher.update(component.as_bytes());
    let digest = hasher.finalize();
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(bytes)
}

/// Mix a base seed with a sequence of counters (epoch, batch index, ...).
pub fn mix_seed(base: u64, parts: &[u64]) -> u64 {
    parts.iter().fold(splitmix64(base), |acc, &p| splitmix64(acc ^ splitmix64(p)))
}

fn splitmix64(mut z: u64) -> u64 {
    z = z.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}
