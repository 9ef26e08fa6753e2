//! Provider content hash: a tree hash combining 4 MiB block SHA-1 digests
//! into a single identifier, the documented algorithm family the source
//! CLI's `CheckHash` compares against.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use sha1::{Digest, Sha1};

/// Block size the tree hash splits input into.
pub const BLOCK_SIZE: usize = 4 * 1024 * 1024;

const SINGLE_BLOCK_PREFIX: u8 = 0x16;
const MULTI_BLOCK_PREFIX: u8 = 0x96;

/// Computes the tree hash over `data`, base64url-encoded with its
/// single/multi-block prefix byte, matching the server's own reported
/// content hash for the same bytes.
#[must_use]
pub fn tree_hash(data: &[u8]) -> String {
    let block_digests: Vec<[u8; 20]> = data
        .chunks(BLOCK_SIZE)
        .map(|block| Sha1::digest(block).into())
        .collect();

    let (prefix, digest) = if block_digests.len() <= 1 {
        let digest = block_digests.first().copied().unwrap_or_else(|| Sha1::digest([]).into());
        (SINGLE_BLOCK_PREFIX, digest)
    } else {
        let mut hasher = Sha1::new();
        for block_digest in &block_digests {
            hasher.update(block_digest);
        }
        (MULTI_BLOCK_PREFIX, hasher.finalize().into())
    };

    let mut encoded = Vec::with_capacity(21);
    encoded.push(prefix);
    encoded.extend_from_slice(&digest);
    URL_SAFE_NO_PAD.encode(encoded)
}

/// Per-block SHA-1 digests only, used by the chunked upload state machine
/// to compute a part's digest without re-hashing the whole file.
#[must_use]
pub fn block_digest(block: &[u8]) -> [u8; 20] {
    Sha1::digest(block).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_hashes_as_a_single_block() {
        let hash = tree_hash(&[]);
        assert!(!hash.is_empty());
    }

    #[test]
    fn same_input_hashes_identically() {
        let data = vec![7u8; BLOCK_SIZE + 100];
        assert_eq!(tree_hash(&data), tree_hash(&data));
    }

    #[test]
    fn multi_block_input_differs_from_its_first_block_alone() {
        let mut data = vec![1u8; BLOCK_SIZE];
        data.extend(vec![2u8; 10]);
        let full = tree_hash(&data);
        let first_block_only = tree_hash(&data[..BLOCK_SIZE]);
        assert_ne!(full, first_block_only);
    }

    #[test]
    fn single_vs_multi_block_boundary_changes_the_prefix_byte() {
        let one_block = tree_hash(&vec![3u8; BLOCK_SIZE]);
        let two_blocks = tree_hash(&vec![3u8; BLOCK_SIZE + 1]);
        assert_ne!(one_block, two_blocks);
    }
}
