//! Hash functions for ring placement and key lookup.
//!
//! Placement must be identical on every client instance, so both algorithms
//! are fixed, seedless functions of the input bytes.

use std::hash::Hasher;
use twox_hash::XxHash64;

/// Hash used for ring points and key positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum HashAlgorithm {
    /// MD5 digests sliced into four little-endian 32-bit points.
    #[default]
    KetamaMd5,
    /// xxHash64 folded to 32 bits, one point per repetition.
    Xxh64,
}

impl HashAlgorithm {
    /// Ring position of a key.
    pub fn hash_key(&self, key: &[u8]) -> u32 {
        match self {
            HashAlgorithm::KetamaMd5 => ketama_slice(&md5::compute(key).0, 0),
            HashAlgorithm::Xxh64 => xxh64_folded(key),
        }
    }

    /// Ring positions for `routing_key`, hashing `"{routing_key}-{rep}"`.
    pub fn ring_points(&self, routing_key: &str, repetitions: usize) -> Vec<u32> {
        let mut points = Vec::with_capacity(repetitions);
        match self {
            HashAlgorithm::KetamaMd5 => {
                for rep in 0..repetitions / 4 {
                    let digest = md5::compute(format!("{}-{}", routing_key, rep)).0;
                    for slice in 0..4 {
                        points.push(ketama_slice(&digest, slice));
                    }
                }
            }
            HashAlgorithm::Xxh64 => {
                for rep in 0..repetitions {
                    points.push(xxh64_folded(format!("{}-{}", routing_key, rep).as_bytes()));
                }
            }
        }
        points
    }
}

fn ketama_slice(digest: &[u8; 16], slice: usize) -> u32 {
    let base = slice * 4;
    (u32::from(digest[base + 3]) << 24)
        | (u32::from(digest[base + 2]) << 16)
        | (u32::from(digest[base + 1]) << 8)
        | u32::from(digest[base])
}

fn xxh64_folded(bytes: &[u8]) -> u32 {
    let mut hasher = XxHash64::with_seed(0);
    hasher.write(bytes);
    let hash = hasher.finish();
    (hash ^ (hash >> 32)) as u32
}
