use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Named network upgrades, oldest first.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Fork {
    Frontier,
    Homestead,
    #[serde(alias = "eip150")]
    TangerineWhistle,
    #[serde(alias = "eip158")]
    SpuriousDragon,
    Byzantium,
    Constantinople,
    Petersburg,
    Istanbul,
    Berlin,
    London,
    #[serde(alias = "merge")]
    Paris,
    Shanghai,
    #[default]
    Cancun,
}

impl Fork {
    pub const ALL: [Fork; 13] = [
        Fork::Frontier,
        Fork::Homestead,
        Fork::TangerineWhistle,
        Fork::SpuriousDragon,
        Fork::Byzantium,
        Fork::Constantinople,
        Fork::Petersburg,
        Fork::Istanbul,
        Fork::Berlin,
        Fork::London,
        Fork::Paris,
        Fork::Shanghai,
        Fork::Cancun,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Fork::Frontier => "frontier",
            Fork::Homestead => "homestead",
            Fork::TangerineWhistle => "tangerinewhistle",
            Fork::SpuriousDragon => "spuriousdragon",
            Fork::Byzantium => "byzantium",
            Fork::Constantinople => "constantinople",
            Fork::Petersburg => "petersburg",
            Fork::Istanbul => "istanbul",
            Fork::Berlin => "berlin",
            Fork::London => "london",
            Fork::Paris => "paris",
            Fork::Shanghai => "shanghai",
            Fork::Cancun => "cancun",
        }
    }
}

impl FromStr for Fork {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.to_ascii_lowercase().replace(['_', '-', ' '], "");
        match name.as_str() {
            "eip150" => return Ok(Fork::TangerineWhistle),
            "eip158" => return Ok(Fork::SpuriousDragon),
            "merge" => return Ok(Fork::Paris),
            _ => (),
        }
        Fork::ALL
            .into_iter()
            .find(|fork| fork.name() == name)
            .ok_or_else(|| EngineError::Config(format!("unknown fork '{s}'")))
    }
}

/// How SSTORE is priced.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageMetering {
    /// Flat set/reset pricing.
    #[default]
    Legacy,
    /// EIP-1283 net metering.
    Eip1283,
    /// EIP-2200 net metering with the stipend guard.
    Eip2200,
}

/// Protocol flags for one network upgrade. Everything the interpreter varies on lives here.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Spec {
    pub fork: Fork,
    /// EIP-2: fail the creation when the code deposit cannot be paid.
    pub fail_on_out_of_gas_code_deposit: bool,
    /// EIP-7
    pub delegatecall: bool,
    /// EIP-150: access repricing and the 63/64 forwarding rule.
    pub eip150: bool,
    /// EIP-160
    pub exp_byte_cost: i64,
    /// EIP-158/161: untouched empty accounts are not created, new contracts start at nonce 1.
    pub clear_empty_accounts: bool,
    /// EIP-170
    pub limit_code_size: bool,
    pub max_code_size: usize,
    /// EIP-140
    pub revert: bool,
    /// EIP-211
    pub return_data: bool,
    /// EIP-214
    pub static_call: bool,
    /// EIP-196/197 precompiles, EIP-198 modexp.
    pub byzantium_precompiles: bool,
    /// EIP-145
    pub bitwise_shifts: bool,
    /// EIP-1014
    pub create2: bool,
    /// EIP-1052
    pub extcodehash: bool,
    pub storage_metering: StorageMetering,
    /// EIP-1344
    pub chain_id: bool,
    /// EIP-1884 repricing plus SELFBALANCE.
    pub eip1884: bool,
    /// EIP-1108 cheaper BN254 precompiles.
    pub eip1108: bool,
    /// EIP-152
    pub blake2f: bool,
    /// EIP-2929 cold/warm access pricing.
    pub hot_cold_access: bool,
    /// EIP-2565
    pub modexp_eip2565: bool,
    /// EIP-3198
    pub base_fee: bool,
    /// EIP-3529
    pub reduced_refunds: bool,
    /// EIP-3541
    pub reject_ef_code: bool,
    /// EIP-4399
    pub prev_randao: bool,
    /// EIP-3651
    pub warm_coinbase: bool,
    /// EIP-3855
    pub push0: bool,
    /// EIP-3860
    pub limit_init_code_size: bool,
    pub max_init_code_size: usize,
    /// EIP-1153
    pub transient_storage: bool,
    /// EIP-5656
    pub mcopy: bool,
    /// EIP-4844
    pub blob_hash: bool,
    /// EIP-7516
    pub blob_base_fee: bool,
    /// EIP-6780
    pub selfdestruct_only_same_tx: bool,
    /// EIP-2315. When set, 0x5c..0x5e are subroutine opcodes instead of TLOAD/TSTORE/MCOPY.
    pub subroutines: bool,
}

impl Spec {
    pub const MAX_CODE_SIZE: usize = 24576;
    pub const MAX_INIT_CODE_SIZE: usize = 2 * Self::MAX_CODE_SIZE;

    pub fn frontier() -> Self {
        Self {
            fork: Fork::Frontier,
            fail_on_out_of_gas_code_deposit: false,
            delegatecall: false,
            eip150: false,
            exp_byte_cost: 10,
            clear_empty_accounts: false,
            limit_code_size: false,
            max_code_size: Self::MAX_CODE_SIZE,
            revert: false,
            return_data: false,
            static_call: false,
            byzantium_precompiles: false,
            bitwise_shifts: false,
            create2: false,
            extcodehash: false,
            storage_metering: StorageMetering::Legacy,
            chain_id: false,
            eip1884: false,
            eip1108: false,
            blake2f: false,
            hot_cold_access: false,
            modexp_eip2565: false,
            base_fee: false,
            reduced_refunds: false,
            reject_ef_code: false,
            prev_randao: false,
            warm_coinbase: false,
            push0: false,
            limit_init_code_size: false,
            max_init_code_size: Self::MAX_INIT_CODE_SIZE,
            transient_storage: false,
            mcopy: false,
            blob_hash: false,
            blob_base_fee: false,
            selfdestruct_only_same_tx: false,
            subroutines: false,
        }
    }

    pub fn is_at_least(&self, fork: Fork) -> bool {
        self.fork >= fork
    }
}

impl Default for Spec {
    fn default() -> Self {
        Spec::from(Fork::default())
    }
}

impl From<Fork> for Spec {
    fn from(fork: Fork) -> Self {
        let mut spec = Spec::frontier();
        spec.fork = fork;
        let at = |f: Fork| fork >= f;

        spec.fail_on_out_of_gas_code_deposit = at(Fork::Homestead);
        spec.delegatecall = at(Fork::Homestead);
        spec.eip150 = at(Fork::TangerineWhistle);
        if at(Fork::SpuriousDragon) {
            spec.exp_byte_cost = 50;
            spec.clear_empty_accounts = true;
            spec.limit_code_size = true;
        }
        if at(Fork::Byzantium) {
            spec.revert = true;
            spec.return_data = true;
            spec.static_call = true;
            spec.byzantium_precompiles = true;
        }
        if at(Fork::Constantinople) {
            spec.bitwise_shifts = true;
            spec.create2 = true;
            spec.extcodehash = true;
        }
        spec.storage_metering = match fork {
            Fork::Constantinople => StorageMetering::Eip1283,
            _ if at(Fork::Istanbul) => StorageMetering::Eip2200,
            _ => StorageMetering::Legacy,
        };
        if at(Fork::Istanbul) {
            spec.chain_id = true;
            spec.eip1884 = true;
            spec.eip1108 = true;
            spec.blake2f = true;
        }
        if at(Fork::Berlin) {
            spec.hot_cold_access = true;
            spec.modexp_eip2565 = true;
        }
        if at(Fork::London) {
            spec.base_fee = true;
            spec.reduced_refunds = true;
            spec.reject_ef_code = true;
        }
        spec.prev_randao = at(Fork::Paris);
        if at(Fork::Shanghai) {
            spec.warm_coinbase = true;
            spec.push0 = true;
            spec.limit_init_code_size = true;
        }
        if at(Fork::Cancun) {
            spec.transient_storage = true;
            spec.mcopy = true;
            spec.blob_hash = true;
            spec.blob_base_fee = true;
            spec.selfdestruct_only_same_tx = true;
        }
        spec
    }
}

/// Engine settings: the protocol version plus the few knobs that are not part of it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub fork: Fork,
    /// Overrides the fork's code-deposit failure policy.
    pub fail_on_out_of_gas_code_deposit: Option<bool>,
    pub subroutines: bool,
    /// Zero disables the code analysis cache.
    pub code_cache_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            fork: Fork::default(),
            fail_on_out_of_gas_code_deposit: None,
            subroutines: false,
            code_cache_capacity: 4096,
        }
    }
}

impl EngineConfig {
    pub fn from_json(json: &str) -> Result<Self, EngineError> {
        serde_json::from_str(json).map_err(|e| EngineError::Config(e.to_string()))
    }

    pub fn spec(&self) -> Spec {
        let mut spec = Spec::from(self.fork);
        if let Some(fail) = self.fail_on_out_of_gas_code_deposit {
            spec.fail_on_out_of_gas_code_deposit = fail;
        }
        spec.subroutines = self.subroutines;
        spec
    }
}
