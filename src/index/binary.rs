//! Binary encoding/decoding for f32 embedding vectors.
//!
//! Embeddings are stored as flat little-endian f32 bytes
//! (384 dims × 4 bytes = 1,536 bytes) instead of JSON text.

use anyhow::{bail, Result};

use super::embeddings::EMBEDDING_DIM;

/// Expected binary blob size: 384 × 4 bytes.
const BINARY_BLOB_SIZE: usize = EMBEDDING_DIM * 4;

/// Encode an f32 embedding vector as flat little-endian bytes.
pub fn encode_embedding(vec: &[f32]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(vec.len() * 4);
    for &val in vec {
        buf.extend_from_slice(&val.to_le_bytes());
    }
    buf
}

/// Decode an embedding blob, auto-detecting format:
/// - If length == 1,536 → binary little-endian f32
/// - If starts with `[` → legacy JSON
/// - Otherwise → error
pub fn decode_embedding(blob: &[u8]) -> Result<Vec<f32>> {
    if blob.len() == BINARY_BLOB_SIZE {
        let mut vec = Vec::with_capacity(EMBEDDING_DIM);
        for chunk in blob.chunks_exact(4) {
            vec.push(f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]));
        }
        Ok(vec)
    } else if blob.first() == Some(&b'[') {
        let vec: Vec<f32> = serde_json::from_slice(blob)?;
        Ok(vec)
    } else {
        bail!(
            "Unknown embedding format: length={}, first byte={:?}",
            blob.len(),
            blob.first()
        )
    }
}

/// Squared L2 distance between two vectors. Ranking by squared distance
/// orders the same as ranking by distance, so the sqrt is skipped.
pub fn l2_distance_sq(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_binary() {
        let original: Vec<f32> = (0..384).map(|i| i as f32 * 0.001).collect();
        let encoded = encode_embedding(&original);
        assert_eq!(encoded.len(), 1536);
        let decoded = decode_embedding(&encoded).unwrap();
        assert_eq!(original, decoded);
    }

    #[test]
    fn decodes_legacy_json() {
        let original: Vec<f32> = vec![0.25, -1.5, 3.0];
        let json = serde_json::to_vec(&original).unwrap();
        let decoded = decode_embedding(&json).unwrap();
        assert_eq!(original, decoded);
    }

    #[test]
    fn rejects_garbage() {
        assert!(decode_embedding(&[0u8; 7]).is_err());
    }

    #[test]
    fn distance_is_zero_for_identical() {
        let v: Vec<f32> = (0..384).map(|i| i as f32).collect();
        assert_eq!(l2_distance_sq(&v, &v), 0.0);
    }

    #[test]
    fn distance_orders_by_similarity() {
        let origin = vec![0.0_f32; 4];
        let near = vec![0.1_f32; 4];
        let far = vec![2.0_f32; 4];
        assert!(l2_distance_sq(&origin, &near) < l2_distance_sq(&origin, &far));
    }
}
