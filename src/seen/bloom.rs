//! Scalable Bloom filter.
//!
//! The filter is a chain of fixed-size Bloom filters ("stages"). When the
//! newest stage reaches its capacity a larger stage with a tighter error rate
//! is appended, which keeps the compound false-positive rate below the
//! configured bound no matter how many identities are added.
//!
//! Bit positions come from SHA-256 using double hashing, so a persisted filter
//! answers identically after a restart.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{FeedhookError, Result};

/// Current persistence format version.
pub const FORMAT_VERSION: u32 = 1;

/// Capacity multiplier between consecutive stages.
const GROWTH_FACTOR: usize = 2;

/// Error-rate multiplier between consecutive stages.
const TIGHTENING_RATIO: f64 = 0.9;

/// A single fixed-capacity Bloom filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Stage {
    capacity: usize,
    error_rate: f64,
    num_bits: u64,
    num_hashes: u32,
    count: usize,
    bits: Vec<u64>,
}

impl Stage {
    fn new(capacity: usize, error_rate: f64) -> Self {
        let capacity = capacity.max(1);
        let ln2 = std::f64::consts::LN_2;
        let num_bits = (-(capacity as f64) * error_rate.ln() / (ln2 * ln2)).ceil() as u64;
        let num_bits = num_bits.max(64);
        let num_hashes = ((num_bits as f64 / capacity as f64) * ln2).ceil() as u32;
        let words = num_bits.div_ceil(64) as usize;

        Self {
            capacity,
            error_rate,
            num_bits,
            num_hashes: num_hashes.max(1),
            count: 0,
            bits: vec![0; words],
        }
    }

    fn positions(&self, hashes: (u64, u64)) -> impl Iterator<Item = u64> + '_ {
        let (h1, h2) = hashes;
        (0..self.num_hashes as u64)
            .map(move |i| h1.wrapping_add(i.wrapping_mul(h2)) % self.num_bits)
    }

    fn contains(&self, hashes: (u64, u64)) -> bool {
        self.positions(hashes)
            .all(|bit| self.bits[(bit / 64) as usize] & (1 << (bit % 64)) != 0)
    }

    fn insert(&mut self, hashes: (u64, u64)) {
        let positions: Vec<u64> = self.positions(hashes).collect();
        for bit in positions {
            self.bits[(bit / 64) as usize] |= 1 << (bit % 64);
        }
        self.count += 1;
    }

    fn is_full(&self) -> bool {
        self.count >= self.capacity
    }

    fn is_consistent(&self) -> bool {
        self.num_bits > 0
            && self.num_hashes > 0
            && self.bits.len() as u64 == self.num_bits.div_ceil(64)
    }
}

/// Serialized form of a [`ScalableBloomFilter`].
#[derive(Debug, Serialize, Deserialize)]
struct FilterDocument {
    version: u32,
    initial_capacity: usize,
    error_rate: f64,
    stages: Vec<Stage>,
}

/// Probabilistic set with a bounded false-positive rate and no false
/// negatives.
#[derive(Debug, Clone, PartialEq)]
pub struct ScalableBloomFilter {
    initial_capacity: usize,
    error_rate: f64,
    stages: Vec<Stage>,
}

impl ScalableBloomFilter {
    /// Create an empty filter.
    ///
    /// `error_rate` bounds the compound false-positive probability and must
    /// be in `(0, 1)`.
    pub fn new(initial_capacity: usize, error_rate: f64) -> Self {
        Self {
            initial_capacity: initial_capacity.max(1),
            error_rate,
            stages: Vec::new(),
        }
    }

    /// Whether `key` may have been inserted.
    pub fn contains(&self, key: &str) -> bool {
        let hashes = hash_pair(key);
        self.stages.iter().any(|stage| stage.contains(hashes))
    }

    /// Insert `key`.
    ///
    /// Returns `false` if the key (or a false positive) was already present.
    pub fn insert(&mut self, key: &str) -> bool {
        let hashes = hash_pair(key);
        if self.stages.iter().any(|stage| stage.contains(hashes)) {
            return false;
        }

        if self.stages.last().map_or(true, Stage::is_full) {
            self.add_stage();
        }
        if let Some(stage) = self.stages.last_mut() {
            stage.insert(hashes);
        }
        true
    }

    /// Number of inserted keys.
    pub fn len(&self) -> usize {
        self.stages.iter().map(|stage| stage.count).sum()
    }

    /// Whether nothing has been inserted.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total capacity of the current stages.
    pub fn capacity(&self) -> usize {
        self.stages.iter().map(|stage| stage.capacity).sum()
    }

    /// Number of stages.
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    fn add_stage(&mut self) {
        let stage = match self.stages.last() {
            Some(last) => Stage::new(
                last.capacity * GROWTH_FACTOR,
                last.error_rate * TIGHTENING_RATIO,
            ),
            None => Stage::new(
                self.initial_capacity,
                self.error_rate * (1.0 - TIGHTENING_RATIO),
            ),
        };
        self.stages.push(stage);
    }

    /// Serialize to the versioned JSON format.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let document = FilterDocument {
            version: FORMAT_VERSION,
            initial_capacity: self.initial_capacity,
            error_rate: self.error_rate,
            stages: self.stages.clone(),
        };
        serde_json::to_vec(&document)
            .map_err(|e| FeedhookError::Registry(format!("failed to encode seen filter: {e}")))
    }

    /// Deserialize from the versioned JSON format.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let document: FilterDocument = serde_json::from_slice(data)
            .map_err(|e| FeedhookError::Registry(format!("failed to decode seen filter: {e}")))?;

        if document.version != FORMAT_VERSION {
            return Err(FeedhookError::Registry(format!(
                "unsupported seen filter format version {}",
                document.version
            )));
        }
        if !document.stages.iter().all(Stage::is_consistent) {
            return Err(FeedhookError::Registry(
                "corrupt seen filter stage".to_string(),
            ));
        }

        Ok(Self {
            initial_capacity: document.initial_capacity.max(1),
            error_rate: document.error_rate,
            stages: document.stages,
        })
    }
}

/// Two independent 64-bit hashes of `key` taken from its SHA-256 digest.
fn hash_pair(key: &str) -> (u64, u64) {
    let digest = Sha256::digest(key.as_bytes());
    let mut first = [0u8; 8];
    let mut second = [0u8; 8];
    first.copy_from_slice(&digest[0..8]);
    second.copy_from_slice(&digest[8..16]);
    // An odd step never collapses the bit positions onto a single bit.
    (u64::from_le_bytes(first), u64::from_le_bytes(second) | 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_false_negatives() {
        let mut filter = ScalableBloomFilter::new(100, 0.001);
        for i in 0..500 {
            filter.insert(&format!("http://x/{i}"));
        }
        for i in 0..500 {
            assert!(filter.contains(&format!("http://x/{i}")));
        }
    }

    #[test]
    fn test_insert_reports_new_keys() {
        let mut filter = ScalableBloomFilter::new(10, 0.001);
        assert!(filter.is_empty());
        assert!(filter.insert("http://x/1"));
        assert!(!filter.insert("http://x/1"));
        assert_eq!(filter.len(), 1);
    }

    #[test]
    fn test_grows_in_stages() {
        let mut filter = ScalableBloomFilter::new(10, 0.001);
        for i in 0..10 {
            filter.insert(&format!("k{i}"));
        }
        assert_eq!(filter.stage_count(), 1);

        filter.insert("k10");
        assert_eq!(filter.stage_count(), 2);
        assert_eq!(filter.capacity(), 30);
    }

    #[test]
    fn test_false_positive_rate_is_bounded() {
        let mut filter = ScalableBloomFilter::new(100, 0.01);
        for i in 0..1000 {
            filter.insert(&format!("present-{i}"));
        }
        let false_positives = (0..10_000)
            .filter(|i| filter.contains(&format!("absent-{i}")))
            .count();
        // 1% bound on 10k lookups with generous slack.
        assert!(false_positives < 200, "{false_positives} false positives");
    }

    #[test]
    fn test_roundtrip_preserves_membership() {
        let mut filter = ScalableBloomFilter::new(5, 0.001);
        for i in 0..12 {
            filter.insert(&format!("http://x/{i}"));
        }

        let bytes = filter.to_bytes().unwrap();
        let restored = ScalableBloomFilter::from_bytes(&bytes).unwrap();
        assert_eq!(restored, filter);
        assert!(restored.contains("http://x/11"));
    }

    #[test]
    fn test_format_is_versioned() {
        let filter = ScalableBloomFilter::new(5, 0.001);
        let json: serde_json::Value =
            serde_json::from_slice(&filter.to_bytes().unwrap()).unwrap();
        assert_eq!(json["version"], FORMAT_VERSION);
        assert!(json["stages"].is_array());
    }

    #[test]
    fn test_rejects_unknown_version() {
        let data = br#"{"version":99,"initial_capacity":5,"error_rate":0.001,"stages":[]}"#;
        assert!(matches!(
            ScalableBloomFilter::from_bytes(data),
            Err(FeedhookError::Registry(_))
        ));
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(ScalableBloomFilter::from_bytes(b"not json").is_err());
    }
}
