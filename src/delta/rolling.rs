use std::collections::HashMap;

use sha1::{Digest, Sha1};

/// adler-style weak rolling checksum over a fixed-size window
///
/// updates in O(1) when the window slides one byte.
#[derive(Clone, Debug)]
pub struct RollingSum {
    a: u32,
    b: u32,
    len: u32,
}

const MOD: u32 = 1 << 16;

impl RollingSum {
    /// checksum of an initial window
    pub fn new(window: &[u8]) -> Self {
        let mut a = 0u32;
        let mut b = 0u32;
        let len = window.len() as u32;
        for (i, &byte) in window.iter().enumerate() {
            a = (a + byte as u32) % MOD;
            b = (b + (len - i as u32) * byte as u32) % MOD;
        }
        Self { a, b, len }
    }

    /// slide the window: drop `out`, append `inn`
    pub fn roll(&mut self, out: u8, inn: u8) {
        let out = out as u32;
        let inn = inn as u32;
        self.a = (self.a + MOD + inn - out) % MOD;
        self.b = (self.b + MOD * self.len + self.a - self.len * out) % MOD;
    }

    /// combined 32-bit digest
    pub fn digest(&self) -> u32 {
        (self.b << 16) | self.a
    }
}

/// strong block checksum: leading bytes of the block's SHA-1
pub fn strong_checksum(block: &[u8]) -> [u8; 8] {
    let digest = Sha1::digest(block);
    let mut out = [0u8; 8];
    out.copy_from_slice(&digest[..8]);
    out
}

/// index of every block-aligned window of a base buffer, keyed by
/// weak checksum with strong confirmation
pub struct BlockIndex {
    block_size: usize,
    map: HashMap<u32, Vec<(usize, [u8; 8])>>,
}

impl BlockIndex {
    pub fn build(base: &[u8], block_size: usize) -> Self {
        assert!(block_size > 0);
        let mut map: HashMap<u32, Vec<(usize, [u8; 8])>> = HashMap::new();

        let mut pos = 0;
        while pos + block_size <= base.len() {
            let block = &base[pos..pos + block_size];
            let weak = RollingSum::new(block).digest();
            map.entry(weak).or_default().push((pos, strong_checksum(block)));
            pos += block_size;
        }

        Self { block_size, map }
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// candidate base positions whose weak checksum matches
    pub fn candidates(&self, weak: u32) -> &[(usize, [u8; 8])] {
        self.map.get(&weak).map(Vec::as_slice).unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rolling_matches_fresh() {
        let data = b"abcdefghijklmnop";
        let mut rolling = RollingSum::new(&data[0..8]);
        for i in 1..=8 {
            rolling.roll(data[i - 1], data[i + 7]);
            let fresh = RollingSum::new(&data[i..i + 8]);
            assert_eq!(rolling.digest(), fresh.digest(), "window at {}", i);
        }
    }

    #[test]
    fn test_rolling_distinguishes() {
        let h1 = RollingSum::new(b"aaaaaaaa").digest();
        let h2 = RollingSum::new(b"aaaaaaab").digest();
        assert_ne!(h1, h2);
    }

    #[test]
    fn test_strong_checksum_distinguishes() {
        assert_ne!(strong_checksum(b"block one"), strong_checksum(b"block two"));
        assert_eq!(strong_checksum(b"same"), strong_checksum(b"same"));
    }

    #[test]
    fn test_block_index_finds_aligned_blocks() {
        let base = b"0123456789abcdef0123456789abcdef";
        let index = BlockIndex::build(base, 16);

        let weak = RollingSum::new(&base[0..16]).digest();
        let candidates = index.candidates(weak);
        // identical halves: both aligned positions share the checksum
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].0, 0);
        assert_eq!(candidates[1].0, 16);
    }

    #[test]
    fn test_block_index_ignores_tail() {
        // 20 bytes with block 16: one aligned block, the tail is not indexed
        let base = b"0123456789abcdefXYZW";
        let index = BlockIndex::build(base, 16);

        let weak = RollingSum::new(&base[0..16]).digest();
        assert_eq!(index.candidates(weak).len(), 1);

        let tail_weak = RollingSum::new(&base[4..20]).digest();
        assert!(index.candidates(tail_weak).is_empty());
    }
}
