use std::collections::HashMap;

use serde::{Deserialize, Serialize};

pub use crate::common::block::Header;
use crate::common::{Address, Word};

/// Transaction-wide values shared by every frame of one run.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TxContext {
    pub origin: Address,
    #[serde(rename = "gasPrice", default)]
    pub gas_price: Word,
    pub header: Header,
    #[serde(rename = "chainId", default = "default_chain_id")]
    pub chain_id: u64,
    #[serde(rename = "blobVersionedHashes", default)]
    pub blob_hashes: Vec<Word>,
}

fn default_chain_id() -> u64 {
    1
}

impl TxContext {
    pub fn new(origin: Address, header: Header) -> Self {
        Self {
            origin,
            header,
            chain_id: default_chain_id(),
            ..Default::default()
        }
    }
}

/// Lookup of historical block hashes for BLOCKHASH.
pub trait BlockHashProvider {
    fn block_hash(&self, number: u64) -> Option<Word>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NoBlockHashes;

impl BlockHashProvider for NoBlockHashes {
    fn block_hash(&self, _number: u64) -> Option<Word> {
        None
    }
}

impl BlockHashProvider for HashMap<u64, Word> {
    fn block_hash(&self, number: u64) -> Option<Word> {
        self.get(&number).copied()
    }
}

/// BLOCKHASH result: only the 256 most recent complete blocks are visible.
pub fn visible_block_hash(provider: &dyn BlockHashProvider, current: u64, requested: &Word) -> Word {
    let Some(number) = requested.to_u64() else {
        return Word::zero();
    };
    if number >= current || current - number > 256 {
        return Word::zero();
    }
    provider.block_hash(number).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_block_hash_window() {
        let hashes = (0..=300u64)
            .map(|n| (n, Word::from(n + 1000)))
            .collect::<HashMap<_, _>>();
        assert_eq!(visible_block_hash(&hashes, 300, &Word::from(299u64)), Word::from(1299u64));
        assert_eq!(visible_block_hash(&hashes, 300, &Word::from(44u64)), Word::from(1044u64));
        assert_eq!(visible_block_hash(&hashes, 300, &Word::from(43u64)), Word::zero());
        assert_eq!(visible_block_hash(&hashes, 300, &Word::from(300u64)), Word::zero());
        assert_eq!(visible_block_hash(&NoBlockHashes, 300, &Word::from(299u64)), Word::zero());
        assert_eq!(visible_block_hash(&hashes, 300, &Word::max()), Word::zero());
    }

    #[test]
    fn test_context_from_json() {
        let json = r#"{
            "origin": "0x00000000000000000000000000000000000000aa",
            "gasPrice": "0x7",
            "header": {"number": 5, "timestamp": 10, "gasLimit": 30000000, "miner": "0x00000000000000000000000000000000000000bb"}
        }"#;
        let ctx: TxContext = serde_json::from_str(json).unwrap();
        assert_eq!(ctx.origin, Address::from_low_u64(0xaa));
        assert_eq!(ctx.gas_price, Word::from(7u64));
        assert_eq!(ctx.chain_id, 1);
        assert_eq!(ctx.header.number, 5);
        assert!(ctx.blob_hashes.is_empty());
    }
}
