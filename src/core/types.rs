//! Common types used across tandem modules.

use serde::{Deserialize, Serialize};

/// A 256-bit hash value (SHA3-256).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Hash256(pub [u8; 32]);

impl Hash256 {
    /// Create a zero hash.
    pub fn zero() -> Self {
        Self([0u8; 32])
    }

    /// Convert to hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl std::fmt::Display for Hash256 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl Default for Hash256 {
    fn default() -> Self {
        Self::zero()
    }
}

/// SHA3-256 over a sequence of byte slices.
pub fn sha3_256_multi(parts: &[&[u8]]) -> Hash256 {
    use sha3::{Digest, Sha3_256};
    let mut hasher = Sha3_256::new();
    for part in parts {
        hasher.update(part);
    }
    Hash256(hasher.finalize().into())
}

/// Timestamp wrapper for consistent serialization.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Get current UTC timestamp.
pub fn now() -> Timestamp {
    chrono::Utc::now()
}

/// One of the two regions of an active-passive pair.
///
/// The declaration order is the fixed region priority used to break
/// last-writer-wins ties: `A` outranks `B`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RegionId {
    /// Designated primary
    A,
    /// Standby
    B,
}

impl RegionId {
    /// Both regions, in priority order.
    pub const ALL: [RegionId; 2] = [RegionId::A, RegionId::B];

    /// The other region of the pair.
    pub fn peer(self) -> RegionId {
        match self {
            RegionId::A => RegionId::B,
            RegionId::B => RegionId::A,
        }
    }

    /// Slot index for per-region arrays.
    pub fn index(self) -> usize {
        match self {
            RegionId::A => 0,
            RegionId::B => 1,
        }
    }

    /// True if this region wins a timestamp tie against `other`.
    pub fn outranks(self, other: RegionId) -> bool {
        self < other
    }
}

impl std::fmt::Display for RegionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegionId::A => write!(f, "A"),
            RegionId::B => write!(f, "B"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash256_zero() {
        let hash = Hash256::zero();
        assert_eq!(hash.0, [0u8; 32]);
    }

    #[test]
    fn test_hash256_display() {
        let hash = sha3_256_multi(&[b"tandem"]);
        let display = format!("{}", hash);
        assert_eq!(display.len(), 64);
    }

    #[test]
    fn test_sha3_multi_is_concatenation() {
        assert_eq!(sha3_256_multi(&[b"ab", b"c"]), sha3_256_multi(&[b"abc"]));
    }

    #[test]
    fn test_region_peer() {
        assert_eq!(RegionId::A.peer(), RegionId::B);
        assert_eq!(RegionId::B.peer(), RegionId::A);
    }

    #[test]
    fn test_region_priority() {
        assert!(RegionId::A.outranks(RegionId::B));
        assert!(!RegionId::B.outranks(RegionId::A));
        assert!(!RegionId::A.outranks(RegionId::A));
    }

    #[test]
    fn test_region_serde() {
        let json = serde_json::to_string(&RegionId::B).unwrap();
        assert_eq!(json, "\"B\"");
        let parsed: RegionId = serde_json::from_str("\"A\"").unwrap();
        assert_eq!(parsed, RegionId::A);
    }
}
