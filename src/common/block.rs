use serde::{Deserialize, Serialize};

use crate::common::{address::Address, word::Word};

const MIN_BLOB_BASE_FEE: u128 = 1;
const BLOB_BASE_FEE_UPDATE_FRACTION: u128 = 3338477;

/// Block fields visible to bytecode.
#[derive(Clone, Default, Debug, Serialize, Deserialize)]
pub struct Header {
    pub number: u64,
    pub timestamp: u64,
    #[serde(rename = "baseFeePerGas", default)]
    pub base_fee: Word,
    #[serde(rename = "gasLimit")]
    pub gas_limit: u64,
    #[serde(rename = "miner")]
    pub beneficiary: Address,
    #[serde(default)]
    pub difficulty: Word,
    /// Post-merge randomness beacon output, surfaced by PREVRANDAO.
    #[serde(rename = "mixHash", default)]
    pub prev_randao: Word,
    #[serde(rename = "excessBlobGas", default)]
    pub excess_blob_gas: u64,
}

impl Header {
    /// EIP-4844 blob base fee derived from the excess blob gas.
    pub fn blob_base_fee(&self) -> Word {
        fake_exponential(
            MIN_BLOB_BASE_FEE,
            self.excess_blob_gas as u128,
            BLOB_BASE_FEE_UPDATE_FRACTION,
        )
    }
}

/// Integer approximation of `factor * e^(numerator / denominator)`.
fn fake_exponential(factor: u128, numerator: u128, denominator: u128) -> Word {
    let mut output: u128 = 0;
    let mut accumulator = factor.saturating_mul(denominator);
    let mut i = 1u128;

    while accumulator > 0 {
        output = output.saturating_add(accumulator);
        accumulator = accumulator.saturating_mul(numerator) / denominator.saturating_mul(i);
        i += 1;
    }
    Word::from(output / denominator)
}
