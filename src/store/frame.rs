//! Wire encoding for replicated writes.
//!
//! A frame is one bincode-encoded `ReplicationFrame` behind a one-byte header
//! saying whether the body is LZ4-compressed.

use crate::core::{Error, RegionId, Result};
use crate::store::item::Item;
use lz4_flex::{compress_prepend_size, decompress_size_prepended};
use serde::{Deserialize, Serialize};

const RAW: u8 = 0;
const LZ4: u8 = 1;

/// A replicated write in transit between regions.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicationFrame {
    /// Region whose outbox produced the frame
    pub source: RegionId,
    /// Per-source sequence number, for tracing only; delivery order is not guaranteed
    pub sequence: u64,
    /// The write being propagated
    pub item: Item,
}

impl ReplicationFrame {
    /// Serialize, compressing bodies larger than `compression_threshold` bytes.
    pub fn encode(&self, compression_threshold: usize) -> Result<Vec<u8>> {
        let body = bincode::serialize(self)?;

        let mut out = Vec::with_capacity(body.len() + 1);
        if body.len() > compression_threshold {
            out.push(LZ4);
            out.extend_from_slice(&compress_prepend_size(&body));
        } else {
            out.push(RAW);
            out.extend_from_slice(&body);
        }
        Ok(out)
    }

    /// Parse a frame produced by `encode`.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let (header, body) = bytes
            .split_first()
            .ok_or_else(|| Error::Frame("empty frame".into()))?;

        match *header {
            RAW => Ok(bincode::deserialize(body)?),
            LZ4 => {
                let body = decompress_size_prepended(body)
                    .map_err(|e| Error::Frame(format!("decompression failed: {}", e)))?;
                Ok(bincode::deserialize(&body)?)
            }
            other => Err(Error::Frame(format!("unknown frame header {:#04x}", other))),
        }
    }

    /// True if an encoded frame carries a compressed body.
    pub fn is_compressed(bytes: &[u8]) -> bool {
        bytes.first() == Some(&LZ4)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(payload: Vec<u8>) -> ReplicationFrame {
        ReplicationFrame {
            source: RegionId::A,
            sequence: 7,
            item: Item::new("x1", payload, 42, RegionId::A),
        }
    }

    #[test]
    fn test_small_frame_is_raw() {
        let original = frame(b"v1".to_vec());
        let bytes = original.encode(1024).unwrap();

        assert!(!ReplicationFrame::is_compressed(&bytes));
        assert_eq!(ReplicationFrame::decode(&bytes).unwrap(), original);
    }

    #[test]
    fn test_large_frame_is_compressed() {
        let original = frame(vec![b'z'; 8192]);
        let bytes = original.encode(1024).unwrap();

        assert!(ReplicationFrame::is_compressed(&bytes));
        assert!(bytes.len() < 8192);
        assert_eq!(ReplicationFrame::decode(&bytes).unwrap(), original);
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(matches!(ReplicationFrame::decode(&[]), Err(Error::Frame(_))));
        assert!(matches!(ReplicationFrame::decode(&[9, 1, 2]), Err(Error::Frame(_))));
        assert!(ReplicationFrame::decode(&[LZ4, 1, 2]).is_err());
    }
}
