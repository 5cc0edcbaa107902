//! Instructions that reach outside the frame: calls, creations, self-destruction and storage.

use std::sync::Arc;

use tracing::debug;

use crate::{
    analysis::CodeInfo,
    common::{Address, Word, hash::EMPTY_CODE_HASH},
    error::ExceptionType,
    executor::Machine,
    fork::StorageMetering,
    frame::{ExecutionEnvironment, ExecutionType, Frame},
    gas::{self, cost},
    opcodes::Instruction as Op,
    precompiles::Precompile,
    state::WorldState,
    tracer::{EventData, EventTracer},
};

/// Deepest frame that may still spawn a child.
pub const MAX_CALL_DEPTH: usize = 1024;

impl<S, T> Machine<'_, S, T>
where
    S: WorldState + ?Sized,
    T: EventTracer + ?Sized,
{
    /// Cold accounts always pay the access surcharge, warm ones only when `charge_warm`.
    /// Precompiles are always warm.
    pub(crate) fn charge_account_access(
        &mut self,
        frame: &mut Frame,
        address: &Address,
        charge_warm: bool,
    ) -> Result<(), ExceptionType> {
        if !self.spec.hot_cold_access {
            return Ok(());
        }
        let cold = self.access.warm_address(address)
            && Precompile::from_address(address, self.spec).is_none();
        if cold {
            frame.charge(cost::COLD_ACCOUNT_ACCESS)
        } else if charge_warm {
            frame.charge(cost::WARM_STATE_READ)
        } else {
            Ok(())
        }
    }

    fn charge_storage_access(
        &mut self,
        frame: &mut Frame,
        address: &Address,
        key: &Word,
        charge_warm: bool,
    ) -> Result<(), ExceptionType> {
        if !self.spec.hot_cold_access {
            return Ok(());
        }
        if self.access.warm_cell(address, key) {
            frame.charge(cost::COLD_SLOAD)
        } else if charge_warm {
            frame.charge(cost::WARM_STATE_READ)
        } else {
            Ok(())
        }
    }

    pub(crate) fn sload(&mut self, frame: &mut Frame) -> Result<(), ExceptionType> {
        let key = frame.stack.pop()?;
        let address = frame.env.executing_account;
        self.charge_storage_access(frame, &address, &key, true)?;
        frame.stack.push(self.state.get_storage(&address, &key))
    }

    pub(crate) fn sstore(&mut self, frame: &mut Frame) -> Result<(), ExceptionType> {
        if self.spec.storage_metering == StorageMetering::Eip2200
            && frame.gas_available <= cost::SSTORE_STIPEND
        {
            return Err(ExceptionType::OutOfGas);
        }
        let [key, value] = frame.stack.pop_n::<2>()?;
        let address = frame.env.executing_account;
        self.charge_storage_access(frame, &address, &key, false)?;

        let current = self.state.get_storage(&address, &key);
        let original = self.state.get_original_storage(&address, &key);
        let charge = gas::sstore_charge(self.spec, &original, &current, &value);
        frame.charge(charge.cost)?;

        let depth = frame.env.depth;
        if charge.refund != 0 {
            frame.refund += charge.refund;
            let refund = frame.refund;
            self.trace_action(depth, || EventData::Refund { refund });
        }
        if current != value {
            self.state.set_storage(&address, &key, value);
            self.trace_action(depth, || EventData::Storage { address, key, value });
        }
        Ok(())
    }

    pub(crate) fn tload(&mut self, frame: &mut Frame) -> Result<(), ExceptionType> {
        let key = frame.stack.pop()?;
        let value = self
            .state
            .get_transient_storage(&frame.env.executing_account, &key);
        frame.stack.push(value)
    }

    pub(crate) fn tstore(&mut self, frame: &mut Frame) -> Result<(), ExceptionType> {
        let [key, value] = frame.stack.pop_n::<2>()?;
        self.state
            .set_transient_storage(&frame.env.executing_account, &key, value);
        Ok(())
    }

    /// CREATE and CREATE2. Returns the init-code frame, or `None` when the creation failed
    /// early and a zero was pushed instead.
    pub(crate) fn create(&mut self, frame: &mut Frame, op: Op) -> Result<Option<Box<Frame>>, ExceptionType> {
        let [value, offset, len] = frame.stack.pop_n::<3>()?;
        let salt = match op {
            Op::Create2 => Some(frame.stack.pop()?),
            _ => None,
        };

        let size = len.to_u64().ok_or(ExceptionType::OutOfGas)?;
        if self.spec.limit_init_code_size && size > self.spec.max_init_code_size as u64 {
            return Err(ExceptionType::OutOfGas);
        }
        let mut cost = 0;
        if self.spec.limit_init_code_size {
            cost += gas::init_code_cost(size);
        }
        if salt.is_some() {
            cost += gas::sha3_cost(size);
        }
        frame.charge(cost)?;
        let offset = frame.update_memory(&offset, &len)?;

        let creator = frame.env.executing_account;
        if frame.env.depth >= MAX_CALL_DEPTH {
            debug!(depth = frame.env.depth, "create depth limit reached");
            return self.fail_early(frame);
        }
        if self.state.get_balance(&creator) < value {
            debug!(%creator, %value, "create value exceeds balance");
            return self.fail_early(frame);
        }
        let nonce = self.state.get_nonce(&creator);
        if nonce == u64::MAX {
            return self.fail_early(frame);
        }

        let init_code = frame.memory.load(offset, size as usize);
        let call_gas = if self.spec.eip150 {
            frame.gas_available - frame.gas_available / 64
        } else {
            frame.gas_available
        };
        frame.charge(call_gas)?;

        let address = match salt {
            Some(salt) => creator.create2(&salt, &init_code),
            None => creator.create(nonce),
        };
        if self.spec.hot_cold_access {
            self.access.warm_address(&address);
        }
        self.state.increment_nonce(&creator);

        let exists = self.state.account_exists(&address);
        if exists && (self.state.get_nonce(&address) != 0 || has_code(&*self.state, &address)) {
            debug!(%address, "create collision");
            self.return_data.clear();
            frame.stack.push(Word::zero())?;
            return Ok(None);
        }

        let snapshot = self.state.take_snapshot();
        let checkpoint = self.access.checkpoint();
        self.access.mark_created(&address);
        if exists {
            self.state.clear_storage(&address);
        }
        self.state.subtract_from_balance(&creator, &value);

        let env = ExecutionEnvironment {
            executing_account: address,
            caller: creator,
            code_source: address,
            transfer_value: value,
            value,
            input: Vec::new(),
            code: Arc::new(CodeInfo::new(init_code)),
            depth: frame.env.depth + 1,
            tx: Arc::clone(&frame.env.tx),
        };
        let kind = match op {
            Op::Create2 => ExecutionType::Create2,
            _ => ExecutionType::Create,
        };
        let mut child = Frame::new(env, kind, call_gas, snapshot, checkpoint).with_static(frame.is_static);
        child.is_create_on_preexisting_account = exists;
        Ok(Some(Box::new(child)))
    }

    /// CALL, CALLCODE, DELEGATECALL and STATICCALL.
    pub(crate) fn call(&mut self, frame: &mut Frame, op: Op) -> Result<Option<Box<Frame>>, ExceptionType> {
        let [requested, code_source] = frame.stack.pop_n::<2>()?;
        let code_source = Address::from(&code_source);
        self.charge_account_access(frame, &code_source, true)?;

        let (value, transfer) = match op {
            Op::StaticCall => (Word::zero(), Word::zero()),
            Op::DelegateCall => (frame.env.value, Word::zero()),
            _ => {
                let value = frame.stack.pop()?;
                (value, value)
            }
        };
        let [in_offset, in_len, out_offset, out_len] = frame.stack.pop_n::<4>()?;
        if frame.is_static && !transfer.is_zero() && op != Op::CallCode {
            return Err(ExceptionType::StaticCallViolation);
        }

        let caller = match op {
            Op::DelegateCall => frame.env.caller,
            _ => frame.env.executing_account,
        };
        let target = match op {
            Op::Call | Op::StaticCall => code_source,
            _ => frame.env.executing_account,
        };

        let mut extra = 0;
        if !transfer.is_zero() {
            extra += cost::CALL_VALUE;
        }
        let new_account = if self.spec.clear_empty_accounts {
            !transfer.is_zero() && self.state.is_dead_account(&target)
        } else {
            !self.state.account_exists(&target)
        };
        if new_account {
            extra += cost::NEW_ACCOUNT;
        }

        let in_offset = frame.update_memory(&in_offset, &in_len)?;
        let out_offset = frame.update_memory(&out_offset, &out_len)?;
        frame.charge(extra)?;

        let mut gas_limit = gas::call_gas(self.spec, &requested, frame.gas_available)?;
        frame.charge(gas_limit)?;
        if !transfer.is_zero() {
            gas_limit += cost::CALL_STIPEND;
        }

        if frame.env.depth >= MAX_CALL_DEPTH {
            debug!(depth = frame.env.depth, "call depth limit reached");
            frame.gas_available += gas_limit;
            return self.fail_early(frame);
        }
        if !transfer.is_zero() && self.state.get_balance(&caller) < transfer {
            debug!(%caller, %transfer, "call value exceeds balance");
            frame.gas_available += gas_limit;
            return self.fail_early(frame);
        }

        let input = frame.memory.load(in_offset, in_len.saturating_usize());
        let snapshot = self.state.take_snapshot();
        let checkpoint = self.access.checkpoint();
        self.state.subtract_from_balance(&caller, &transfer);

        let env = ExecutionEnvironment {
            executing_account: target,
            caller,
            code_source,
            transfer_value: transfer,
            value,
            input,
            code: self.engine.code_info(&*self.state, &code_source),
            depth: frame.env.depth + 1,
            tx: Arc::clone(&frame.env.tx),
        };
        let kind = match op {
            Op::CallCode => ExecutionType::CallCode,
            Op::DelegateCall => ExecutionType::DelegateCall,
            Op::StaticCall => ExecutionType::StaticCall,
            _ => ExecutionType::Call,
        };
        let child = Frame::new(env, kind, gas_limit, snapshot, checkpoint)
            .with_static(frame.is_static || op == Op::StaticCall)
            .with_output(out_offset, out_len.saturating_usize());
        Ok(Some(Box::new(child)))
    }

    /// Moves the balance to the inheritor and schedules the account for removal.
    pub(crate) fn self_destruct(&mut self, frame: &mut Frame) -> Result<(), ExceptionType> {
        let inheritor = Address::from(&frame.stack.pop()?);
        self.charge_account_access(frame, &inheritor, false)?;

        let address = frame.env.executing_account;
        let balance = self.state.get_balance(&address);
        let new_account = if self.spec.clear_empty_accounts {
            !balance.is_zero() && self.state.is_dead_account(&inheritor)
        } else {
            self.spec.eip150 && !self.state.account_exists(&inheritor)
        };
        if new_account {
            frame.charge(cost::NEW_ACCOUNT)?;
        }

        // only contracts created by this transaction are removed once EIP-6780 is active
        let destroyed = !self.spec.selfdestruct_only_same_tx || self.access.was_created(&address);
        if destroyed {
            frame.destroy_list.insert(address);
        }

        if !self.state.account_exists(&inheritor) {
            if !balance.is_zero() || !self.spec.clear_empty_accounts {
                self.state.create_account(&inheritor, balance);
            }
        } else if inheritor != address {
            self.state.add_to_balance(&inheritor, &balance);
        }
        if destroyed || inheritor != address {
            self.state.subtract_from_balance(&address, &balance);
        }

        self.trace_action(frame.env.depth, || EventData::SelfDestruct {
            address,
            beneficiary: inheritor,
            balance,
        });
        Ok(())
    }

    /// A guard failed before any child was built: empty return data, zero status.
    fn fail_early(&mut self, frame: &mut Frame) -> Result<Option<Box<Frame>>, ExceptionType> {
        self.return_data.clear();
        frame.stack.push(Word::zero())?;
        Ok(None)
    }
}

fn has_code<S: WorldState + ?Sized>(state: &S, address: &Address) -> bool {
    let hash = state.get_code_hash(address);
    !hash.is_zero() && hash != *EMPTY_CODE_HASH
}
