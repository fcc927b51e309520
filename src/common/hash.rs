//! Hashing utilities for branchkv
//!
//! Every server must compute identical routing, so the key hash is pinned
//! to BLAKE3 rather than anything process-seeded. A key's 32-bit bucket
//! doubles as the high half of the locations minted for it, which is what
//! lets ownership be read straight off a location.

/// Compute a stable 64-bit hash of a byte string
pub fn hash64(data: &[u8]) -> u64 {
    let hash = blake3::hash(data);
    u64::from_le_bytes(hash.as_bytes()[0..8].try_into().unwrap())
}

/// Compute the 32-bit routing bucket for a key
pub fn hash32(key: &str) -> u32 {
    hash64(key.as_bytes()) as u32
}

/// Extract the routing bucket from a node location (its high 32 bits)
pub fn location_bucket(location: u64) -> u32 {
    (location >> 32) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash64_deterministic() {
        assert_eq!(hash64(b"some-key"), hash64(b"some-key"));
        assert_ne!(hash64(b"some-key"), hash64(b"other-key"));
    }

    #[test]
    fn test_hash32_truncates_hash64() {
        let key = "versioned";
        assert_eq!(hash32(key), hash64(key.as_bytes()) as u32);
    }

    #[test]
    fn test_location_bucket_reads_high_bits() {
        let bucket = hash32("a");
        let location = ((bucket as u64) << 32) | 0x1234_5678;
        assert_eq!(location_bucket(location), bucket);
    }

    #[test]
    fn test_buckets_spread() {
        // A handful of distinct keys should not all collapse into one
        // half of the bucket space.
        let low = (0..32)
            .filter(|i| hash32(&format!("key-{}", i)) < u32::MAX / 2)
            .count();
        assert!(low > 0 && low < 32);
    }
}
