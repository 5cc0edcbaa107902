//! Transaction-level convenience layer: builds the outermost frame, runs it and settles the result.

use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use crate::{
    analysis::CodeInfo,
    common::{
        Address, Word,
        hash::{EMPTY_CODE_HASH, keccak256},
        word::decode_error_string,
    },
    context::TxContext,
    error::{EngineError, ExceptionType},
    executor::Engine,
    frame::{AccessSets, ExecutionEnvironment, ExecutionType, Frame, Log},
    gas::{self, cost},
    precompiles::Precompile,
    state::WorldState,
    tracer::{EventTracer, NoopTracer},
};

#[derive(Default)]
pub struct Armature {}

impl Armature {
    pub fn new() -> Self {
        Self {}
    }

    pub fn create(&self, code: Vec<u8>) -> CreateBuilder {
        CreateBuilder(Transaction {
            data: code,
            ..Default::default()
        })
    }

    /// Message call with raw calldata.
    pub fn call(&self, to: Address, data: Vec<u8>) -> CallBuilder {
        CallBuilder(Transaction {
            to: Some(to),
            data,
            ..Default::default()
        })
    }

    /// Message call to `method`: the 4-byte selector of the signature followed by `args`.
    pub fn execute(&self, to: Address, method: &str, args: &[u8]) -> CallBuilder {
        let mut data = Vec::with_capacity(args.len() + 4);
        let hash = keccak256(method.as_bytes());
        data.extend_from_slice(&hash[..4]);
        data.extend_from_slice(args);
        self.call(to, data)
    }

    pub fn transfer(&self, to: Address, value: Word) -> TransferBuilder {
        TransferBuilder(Transaction {
            to: Some(to),
            value,
            ..Default::default()
        })
    }
}

pub trait Builder {
    fn with_sender(self, sender: Address) -> Self;
    fn with_value(self, value: Word) -> Self;
    fn with_gas(self, gas: i64) -> Self;
    fn with_context(self, context: TxContext) -> Self;
    fn with_access_list(self, access_list: Vec<(Address, Vec<Word>)>) -> Self;
    fn ready(self) -> Runner;
}

#[derive(Clone, Debug, Default)]
struct Transaction {
    from: Address,
    /// `None` for contract creation.
    to: Option<Address>,
    value: Word,
    gas: i64,
    data: Vec<u8>,
    access_list: Vec<(Address, Vec<Word>)>,
    context: TxContext,
}

macro_rules! builders {
    ($($name:ident),*) => {
        $(
            #[derive(Clone, Debug)]
            pub struct $name(Transaction);

            impl Builder for $name {
                fn with_sender(mut self, sender: Address) -> Self {
                    self.0.from = sender;
                    self
                }

                fn with_value(mut self, value: Word) -> Self {
                    self.0.value = value;
                    self
                }

                fn with_gas(mut self, gas: i64) -> Self {
                    self.0.gas = gas;
                    self
                }

                fn with_context(mut self, context: TxContext) -> Self {
                    self.0.context = context;
                    self
                }

                fn with_access_list(mut self, access_list: Vec<(Address, Vec<Word>)>) -> Self {
                    self.0.access_list = access_list;
                    self
                }

                fn ready(self) -> Runner {
                    Runner { tx: self.0 }
                }
            }
        )*
    };
}

builders!(CreateBuilder, CallBuilder, TransferBuilder);

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Status {
    Success,
    Revert,
    Failure(ExceptionType),
}

/// Settled result of one transaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Receipt {
    pub status: Status,
    /// Gas consumed after the refund.
    pub gas_used: i64,
    pub refund: i64,
    pub output: Vec<u8>,
    pub logs: Vec<Log>,
    pub created: Option<Address>,
}

impl Receipt {
    pub fn is_success(&self) -> bool {
        self.status == Status::Success
    }

    /// Message of a Solidity `Error(string)` revert, if the output carries one.
    pub fn revert_reason(&self) -> Option<String> {
        match self.status {
            Status::Revert => decode_error_string(&self.output),
            _ => None,
        }
    }

    fn failed(error: ExceptionType, gas_used: i64) -> Self {
        Self {
            status: Status::Failure(error),
            gas_used,
            refund: 0,
            output: Vec::new(),
            logs: Vec::new(),
            created: None,
        }
    }
}

pub struct Runner {
    tx: Transaction,
}

impl Runner {
    pub fn apply<S: WorldState + ?Sized>(self, engine: &Engine, state: &mut S) -> Result<Receipt, EngineError> {
        self.apply_traced(engine, state, &mut NoopTracer)
    }

    pub fn apply_traced<S, T>(self, engine: &Engine, state: &mut S, tracer: &mut T) -> Result<Receipt, EngineError>
    where
        S: WorldState + ?Sized,
        T: EventTracer + ?Sized,
    {
        let spec = *engine.spec();
        let Transaction {
            from,
            to,
            value,
            gas,
            data,
            access_list,
            mut context,
        } = self.tx;
        let is_create = to.is_none();

        state.begin_transaction();
        let intrinsic = gas::intrinsic_gas(&spec, &data, is_create, &access_list);
        if gas < intrinsic {
            return Err(EngineError::InvalidTransaction(format!(
                "intrinsic gas {intrinsic} exceeds gas limit {gas}"
            )));
        }
        if is_create && spec.limit_init_code_size && data.len() > spec.max_init_code_size {
            return Err(EngineError::InvalidTransaction(format!(
                "init code of {} bytes exceeds the limit",
                data.len()
            )));
        }
        if state.get_balance(&from) < value {
            return Err(EngineError::InvalidTransaction(format!(
                "sender {from} cannot transfer {value}"
            )));
        }

        let nonce = state.get_nonce(&from);
        state.increment_nonce(&from);
        let target = to.unwrap_or_else(|| from.create(nonce));

        let mut access = AccessSets::new();
        if spec.hot_cold_access {
            access.warm_address(&from);
            access.warm_address(&target);
            for precompile in Precompile::all(&spec) {
                access.warm_address(&precompile.address());
            }
            for (address, keys) in &access_list {
                access.warm_address(address);
                for key in keys {
                    access.warm_cell(address, key);
                }
            }
            if spec.warm_coinbase {
                access.warm_address(&context.header.beneficiary);
            }
        }

        let snapshot = state.take_snapshot();
        let checkpoint = access.checkpoint();
        let exists = state.account_exists(&target);
        if is_create {
            let hash = state.get_code_hash(&target);
            let has_code = !hash.is_zero() && hash != *EMPTY_CODE_HASH;
            if exists && (state.get_nonce(&target) != 0 || has_code) {
                debug!(address = %target, "create collision");
                return Ok(Receipt::failed(ExceptionType::InvalidCode, gas));
            }
            access.mark_created(&target);
            if exists {
                state.clear_storage(&target);
            }
        }
        state.subtract_from_balance(&from, &value);

        context.origin = from;
        let (kind, code, input) = if is_create {
            (ExecutionType::TransactionCreate, Arc::new(CodeInfo::new(data)), Vec::new())
        } else {
            (ExecutionType::Transaction, engine.code_info(state, &target), data)
        };
        let env = ExecutionEnvironment {
            executing_account: target,
            caller: from,
            code_source: target,
            transfer_value: value,
            value,
            input,
            code,
            depth: 0,
            tx: Arc::new(context),
        };
        let mut frame = Frame::new(env, kind, gas - intrinsic, snapshot, checkpoint);
        frame.is_create_on_preexisting_account = exists;

        let substate = engine.run(frame, &mut access, state, tracer)?;
        if let Some(error) = substate.error {
            return Ok(Receipt::failed(error, gas));
        }
        let mut gas_left = substate.gas_left;
        if substate.should_revert {
            return Ok(Receipt {
                status: Status::Revert,
                gas_used: gas - gas_left,
                refund: 0,
                output: substate.output,
                logs: Vec::new(),
                created: None,
            });
        }

        let mut created = None;
        if is_create {
            let code = substate.output.clone();
            let deposit = gas::code_deposit_cost(&spec, code.len());
            let invalid = spec.reject_ef_code && code.first() == Some(&0xef);
            if gas_left >= deposit && !invalid {
                gas_left -= deposit;
                state.set_code(&target, code);
            } else if spec.fail_on_out_of_gas_code_deposit || invalid {
                debug!(address = %target, deposit, gas_left, invalid, "code deposit failed");
                state.restore(snapshot);
                let error = if invalid {
                    ExceptionType::InvalidCode
                } else {
                    ExceptionType::OutOfGas
                };
                return Ok(Receipt::failed(error, gas));
            }
            created = Some(target);
        }

        let mut refund = substate.refund;
        if !spec.reduced_refunds {
            refund += cost::SELF_DESTRUCT_REFUND * substate.destroy_list.len() as i64;
        }
        let gas_used = gas - gas_left;
        let refund = refund.clamp(0, gas_used / spec.max_refund_quotient());
        for address in &substate.destroy_list {
            state.delete_account(address);
        }

        Ok(Receipt {
            status: Status::Success,
            gas_used: gas_used - refund,
            refund,
            output: substate.output,
            logs: substate.logs,
            created,
        })
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{fork::Spec, state::InMemoryState};

    fn sender() -> Address {
        Address::from_low_u64(0xa11ce)
    }

    #[test]
    fn test_transfer() -> eyre::Result<()> {
        let bob = Address::from_low_u64(0xb0b);
        let mut state = InMemoryState::new().with_account(sender(), Word::from(1000u64));
        let receipt = Armature::new()
            .transfer(bob, Word::from(400u64))
            .with_sender(sender())
            .with_gas(21_000)
            .ready()
            .apply(&Engine::default(), &mut state)?;

        assert!(receipt.is_success());
        assert_eq!(receipt.gas_used, 21_000);
        assert_eq!(state.get_balance(&bob), Word::from(400u64));
        assert_eq!(state.get_balance(&sender()), Word::from(600u64));
        assert_eq!(state.get_nonce(&sender()), 1);
        Ok(())
    }

    #[test]
    fn test_intrinsic_gas_is_enforced() {
        let mut state = InMemoryState::new();
        let result = Armature::new()
            .call(Address::from_low_u64(1), vec![1, 2, 3])
            .with_gas(21_000)
            .ready()
            .apply(&Engine::default(), &mut state);
        assert!(matches!(result, Err(EngineError::InvalidTransaction(_))));
    }

    #[test]
    fn test_insufficient_balance_is_rejected() {
        let mut state = InMemoryState::new().with_account(sender(), Word::from(1u64));
        let result = Armature::new()
            .transfer(Address::from_low_u64(2), Word::from(2u64))
            .with_sender(sender())
            .with_gas(21_000)
            .ready()
            .apply(&Engine::default(), &mut state);
        assert!(matches!(result, Err(EngineError::InvalidTransaction(_))));
        assert_eq!(state.get_nonce(&sender()), 0);
    }

    #[test]
    fn test_revert_reason() -> eyre::Result<()> {
        let contract = Address::from_low_u64(0xc0de);
        // CODECOPY(0, 12, 100); REVERT(0, 100) followed by an Error("nope") payload
        let code = hex::decode(concat!(
            "6064600c6000396064",
            "6000fd",
            "08c379a0",
            "0000000000000000000000000000000000000000000000000000000000000020",
            "0000000000000000000000000000000000000000000000000000000000000004",
            "6e6f706500000000000000000000000000000000000000000000000000000000",
        ))?;
        let mut state = InMemoryState::new().with_code(contract, code);
        let receipt = Armature::new()
            .execute(contract, "fail()", &[])
            .with_sender(sender())
            .with_gas(100_000)
            .ready()
            .apply(&Engine::default(), &mut state)?;

        assert_eq!(receipt.status, Status::Revert);
        assert_eq!(receipt.revert_reason().as_deref(), Some("nope"));
        assert!(receipt.gas_used < 100_000);
        Ok(())
    }

    #[test]
    fn test_create_deploys_runtime_code() -> eyre::Result<()> {
        // returns the single byte 0x00 as runtime code: PUSH1 1 PUSH1 0 RETURN
        let init = vec![0x60, 0x01, 0x60, 0x00, 0xf3];
        let mut state = InMemoryState::new().with_account(sender(), Word::zero());
        let receipt = Armature::new()
            .create(init)
            .with_sender(sender())
            .with_gas(100_000)
            .ready()
            .apply(&Engine::new(Spec::default()), &mut state)?;

        let address = sender().create(0);
        assert_eq!(receipt.created, Some(address));
        assert_eq!(state.get_code(&address), vec![0x00]);
        assert_eq!(state.get_nonce(&address), 1);
        // intrinsic with 4 non-zero bytes, 1 zero byte and 1 init code word; 9 executing; 200 deposit
        assert_eq!(receipt.gas_used, 53_000 + 4 * 16 + 4 + 2 + 9 + 200);
        Ok(())
    }
}
