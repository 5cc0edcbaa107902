//! Gas cost table. Pure functions of the operation, its operands and the active [`Spec`].

use crate::{
    common::Word,
    error::ExceptionType,
    fork::{Spec, StorageMetering},
    opcodes::Instruction,
};

pub mod cost {
    pub const ZERO: i64 = 0;
    pub const BASE: i64 = 2;
    pub const VERY_LOW: i64 = 3;
    pub const LOW: i64 = 5;
    pub const MID: i64 = 8;
    pub const HIGH: i64 = 10;
    pub const JUMPDEST: i64 = 1;

    pub const EXP: i64 = 10;
    pub const SHA3: i64 = 30;
    pub const SHA3_WORD: i64 = 6;
    pub const COPY_WORD: i64 = 3;
    pub const MEMORY: i64 = 3;
    pub const QUAD_COEFF_DIV: i64 = 512;
    pub const BLOCKHASH: i64 = 20;
    pub const SELF_BALANCE: i64 = 5;
    pub const BLOB_HASH: i64 = 3;

    pub const LOG: i64 = 375;
    pub const LOG_TOPIC: i64 = 375;
    pub const LOG_DATA: i64 = 8;

    pub const SLOAD_FRONTIER: i64 = 50;
    pub const SLOAD_EIP150: i64 = 200;
    pub const SLOAD_EIP1884: i64 = 800;
    pub const SSTORE_NET_METERED_EIP1283: i64 = 200;
    pub const SSET: i64 = 20000;
    pub const SRESET: i64 = 5000;
    pub const SCLEAR_REFUND: i64 = 15000;
    pub const SCLEAR_REFUND_EIP3529: i64 = 4800;
    pub const SSTORE_STIPEND: i64 = 2300;

    pub const BALANCE_FRONTIER: i64 = 20;
    pub const BALANCE_EIP150: i64 = 400;
    pub const BALANCE_EIP1884: i64 = 700;
    pub const EXTCODE_FRONTIER: i64 = 20;
    pub const EXTCODE_EIP150: i64 = 700;
    pub const EXTCODEHASH: i64 = 400;
    pub const EXTCODEHASH_EIP1884: i64 = 700;

    pub const COLD_ACCOUNT_ACCESS: i64 = 2600;
    pub const COLD_SLOAD: i64 = 2100;
    pub const WARM_STATE_READ: i64 = 100;
    pub const TLOAD: i64 = 100;
    pub const TSTORE: i64 = 100;

    pub const CALL_FRONTIER: i64 = 40;
    pub const CALL_EIP150: i64 = 700;
    pub const CALL_VALUE: i64 = 9000;
    pub const CALL_STIPEND: i64 = 2300;
    pub const NEW_ACCOUNT: i64 = 25000;

    pub const CREATE: i64 = 32000;
    pub const INIT_CODE_WORD: i64 = 2;
    pub const CODE_DEPOSIT: i64 = 200;
    pub const SELF_DESTRUCT_EIP150: i64 = 5000;
    pub const SELF_DESTRUCT_REFUND: i64 = 24000;

    pub const TRANSACTION: i64 = 21000;
    pub const TX_CREATE: i64 = 32000;
    pub const TX_DATA_ZERO: i64 = 4;
    pub const TX_DATA_NON_ZERO: i64 = 68;
    pub const TX_DATA_NON_ZERO_EIP2028: i64 = 16;
    pub const ACCESS_LIST_ADDRESS: i64 = 2400;
    pub const ACCESS_LIST_STORAGE_KEY: i64 = 1900;
}

/// Cost charged before an instruction executes. Dynamic parts are charged by the instruction itself.
pub fn static_cost(op: Instruction, spec: &Spec) -> i64 {
    use Instruction::*;
    match op {
        Stop | Return | Revert | Invalid => cost::ZERO,
        JumpDest => cost::JUMPDEST,
        Address | Origin | Caller | CallValue | CallDataSize | CodeSize | GasPrice
        | Coinbase | Timestamp | Number | PrevRandao | GasLimit | ChainId | BaseFee
        | BlobBaseFee | ReturnDataSize | Pop | Pc | MSize | Gas | Push0 => cost::BASE,
        Add | Sub | Not | Lt | Gt | Slt | Sgt | Eq | IsZero | And | Or | Xor | Byte | Shl
        | Shr | Sar | CallDataLoad | MLoad | MStore | MStore8 | CallDataCopy | CodeCopy
        | ReturnDataCopy | MCopy | BlobHash => cost::VERY_LOW,
        Mul | Div | SDiv | Mod | SMod | SignExtend | SelfBalance => cost::LOW,
        AddMod | MulMod | Jump => cost::MID,
        JumpI => cost::HIGH,
        Exp => cost::EXP,
        Sha3 => cost::SHA3,
        BlockHash => cost::BLOCKHASH,
        Balance => spec.balance_cost(),
        ExtCodeSize | ExtCodeCopy => spec.extcode_cost(),
        ExtCodeHash => spec.extcodehash_cost(),
        SLoad => spec.sload_cost(),
        SStore => cost::ZERO,
        TLoad => cost::TLOAD,
        TStore => cost::TSTORE,
        Log0 | Log1 | Log2 | Log3 | Log4 => cost::LOG,
        Create | Create2 => cost::CREATE,
        Call | CallCode | DelegateCall | StaticCall => spec.call_cost(),
        SelfDestruct => spec.selfdestruct_cost(),
        BeginSub => cost::BASE,
        ReturnSub => cost::LOW,
        JumpSub => cost::HIGH,
        _ if op.is_push() || op.dup_depth().is_some() || op.swap_depth().is_some() => {
            cost::VERY_LOW
        }
        _ => cost::ZERO,
    }
}

impl Spec {
    pub fn sload_cost(&self) -> i64 {
        if self.hot_cold_access {
            cost::ZERO
        } else if self.eip1884 {
            cost::SLOAD_EIP1884
        } else if self.eip150 {
            cost::SLOAD_EIP150
        } else {
            cost::SLOAD_FRONTIER
        }
    }

    pub fn balance_cost(&self) -> i64 {
        if self.hot_cold_access {
            cost::ZERO
        } else if self.eip1884 {
            cost::BALANCE_EIP1884
        } else if self.eip150 {
            cost::BALANCE_EIP150
        } else {
            cost::BALANCE_FRONTIER
        }
    }

    pub fn extcode_cost(&self) -> i64 {
        if self.hot_cold_access {
            cost::ZERO
        } else if self.eip150 {
            cost::EXTCODE_EIP150
        } else {
            cost::EXTCODE_FRONTIER
        }
    }

    pub fn extcodehash_cost(&self) -> i64 {
        if self.hot_cold_access {
            cost::ZERO
        } else if self.eip1884 {
            cost::EXTCODEHASH_EIP1884
        } else {
            cost::EXTCODEHASH
        }
    }

    pub fn call_cost(&self) -> i64 {
        if self.hot_cold_access {
            cost::ZERO
        } else if self.eip150 {
            cost::CALL_EIP150
        } else {
            cost::CALL_FRONTIER
        }
    }

    pub fn selfdestruct_cost(&self) -> i64 {
        if self.eip150 {
            cost::SELF_DESTRUCT_EIP150
        } else {
            cost::ZERO
        }
    }

    /// Cost of a net-metered SSTORE that leaves the slot dirty or unchanged.
    pub fn net_metered_sstore_cost(&self) -> i64 {
        if self.hot_cold_access {
            cost::WARM_STATE_READ
        } else if self.storage_metering == StorageMetering::Eip2200 {
            cost::SLOAD_EIP1884
        } else {
            cost::SSTORE_NET_METERED_EIP1283
        }
    }

    pub fn sstore_reset_cost(&self) -> i64 {
        if self.hot_cold_access {
            cost::SRESET - cost::COLD_SLOAD
        } else {
            cost::SRESET
        }
    }

    pub fn sclear_refund(&self) -> i64 {
        if self.reduced_refunds {
            cost::SCLEAR_REFUND_EIP3529
        } else {
            cost::SCLEAR_REFUND
        }
    }

    /// Refund when a slot that started at zero is written back to zero.
    pub fn set_reversal_refund(&self) -> i64 {
        cost::SSET - self.net_metered_sstore_cost()
    }

    /// Refund when a slot that started non-zero is written back to its original value.
    pub fn clear_reversal_refund(&self) -> i64 {
        if self.hot_cold_access {
            cost::SRESET - cost::COLD_SLOAD - cost::WARM_STATE_READ
        } else {
            cost::SRESET - self.net_metered_sstore_cost()
        }
    }

    pub fn max_refund_quotient(&self) -> i64 {
        if self.reduced_refunds { 5 } else { 2 }
    }
}

/// Gas and refund delta of one SSTORE, excluding the cold-slot surcharge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageCharge {
    pub cost: i64,
    pub refund: i64,
}

pub fn sstore_charge(spec: &Spec, original: &Word, current: &Word, new: &Word) -> StorageCharge {
    if spec.storage_metering == StorageMetering::Legacy {
        let cost = if current.is_zero() && !new.is_zero() {
            cost::SSET
        } else {
            spec.sstore_reset_cost()
        };
        let refund = if !current.is_zero() && new.is_zero() {
            spec.sclear_refund()
        } else {
            0
        };
        return StorageCharge { cost, refund };
    }

    if current == new {
        return StorageCharge {
            cost: spec.net_metered_sstore_cost(),
            refund: 0,
        };
    }

    if original == current {
        if original.is_zero() {
            return StorageCharge {
                cost: cost::SSET,
                refund: 0,
            };
        }
        let refund = if new.is_zero() {
            spec.sclear_refund()
        } else {
            0
        };
        return StorageCharge {
            cost: spec.sstore_reset_cost(),
            refund,
        };
    }

    // dirty slot
    let mut refund = 0;
    if !original.is_zero() {
        if current.is_zero() {
            refund -= spec.sclear_refund();
        } else if new.is_zero() {
            refund += spec.sclear_refund();
        }
    }
    if original == new {
        refund += if original.is_zero() {
            spec.set_reversal_refund()
        } else {
            spec.clear_reversal_refund()
        };
    }
    StorageCharge {
        cost: spec.net_metered_sstore_cost(),
        refund,
    }
}

pub fn words(len: u64) -> u64 {
    len.div_ceil(32)
}

/// Total cost of a memory of `words` words: `3 * words + words^2 / 512`.
pub fn memory_cost(words: u64) -> i64 {
    let words = words as i128;
    let cost = cost::MEMORY as i128 * words + words * words / cost::QUAD_COEFF_DIV as i128;
    i64::try_from(cost).unwrap_or(i64::MAX)
}

pub fn copy_cost(len: u64) -> i64 {
    per_word(cost::COPY_WORD, len)
}

pub fn sha3_cost(len: u64) -> i64 {
    per_word(cost::SHA3_WORD, len)
}

pub fn init_code_cost(len: u64) -> i64 {
    per_word(cost::INIT_CODE_WORD, len)
}

pub fn log_cost(topics: usize, len: u64) -> i64 {
    let data = (len as i128) * cost::LOG_DATA as i128;
    let total = data + (topics as i128) * cost::LOG_TOPIC as i128;
    i64::try_from(total).unwrap_or(i64::MAX)
}

pub fn exp_cost(spec: &Spec, exponent: &Word) -> i64 {
    spec.exp_byte_cost * exponent.byte_len() as i64
}

/// Cost of depositing `len` bytes of runtime code; unpayable above the code size limit.
pub fn code_deposit_cost(spec: &Spec, len: usize) -> i64 {
    if spec.limit_code_size && len > spec.max_code_size {
        return i64::MAX;
    }
    cost::CODE_DEPOSIT.saturating_mul(len as i64)
}

fn per_word(price: i64, len: u64) -> i64 {
    price.saturating_mul(i64::try_from(words(len)).unwrap_or(i64::MAX))
}

/// Gas forwarded to a child frame. Under EIP-150 the request is capped at all but 1/64 of what is left.
pub fn call_gas(spec: &Spec, requested: &Word, available: i64) -> Result<i64, ExceptionType> {
    let requested = requested.to_u64().map(|gas| gas.min(i64::MAX as u64) as i64);
    if spec.eip150 {
        let cap = available - available / 64;
        Ok(requested.map_or(cap, |gas| gas.min(cap)))
    } else {
        match requested {
            Some(gas) if gas <= available => Ok(gas),
            _ => Err(ExceptionType::OutOfGas),
        }
    }
}

/// Gas charged before the first instruction of a transaction.
pub fn intrinsic_gas(
    spec: &Spec,
    data: &[u8],
    is_create: bool,
    access_list: &[(crate::common::Address, Vec<Word>)],
) -> i64 {
    let mut gas = cost::TRANSACTION;
    if is_create && spec.is_at_least(crate::fork::Fork::Homestead) {
        gas += cost::TX_CREATE;
    }
    let non_zero_price = if spec.is_at_least(crate::fork::Fork::Istanbul) {
        cost::TX_DATA_NON_ZERO_EIP2028
    } else {
        cost::TX_DATA_NON_ZERO
    };
    let zeros = data.iter().filter(|byte| **byte == 0).count() as i64;
    let non_zeros = data.len() as i64 - zeros;
    gas += zeros * cost::TX_DATA_ZERO + non_zeros * non_zero_price;
    if is_create && spec.limit_init_code_size {
        gas += init_code_cost(data.len() as u64);
    }
    for (_, keys) in access_list {
        gas += cost::ACCESS_LIST_ADDRESS + keys.len() as i64 * cost::ACCESS_LIST_STORAGE_KEY;
    }
    gas
}
