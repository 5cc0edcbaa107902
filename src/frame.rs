use std::{
    collections::{BTreeSet, HashSet},
    sync::Arc,
};

use serde::Serialize;

use crate::{
    analysis::CodeInfo,
    common::{Address, Hex, Word},
    context::TxContext,
    error::ExceptionType,
    gas,
    memory::Memory,
    stack::Stack,
    state::Snapshot,
};

/// Immutable inputs of one frame.
#[derive(Clone, Debug)]
pub struct ExecutionEnvironment {
    /// Account whose storage and balance the code acts on.
    pub executing_account: Address,
    pub caller: Address,
    /// Account the code was loaded from; differs from `executing_account` for CALLCODE and DELEGATECALL.
    pub code_source: Address,
    /// Value moved into `executing_account` when the frame starts.
    pub transfer_value: Word,
    /// Value reported by CALLVALUE.
    pub value: Word,
    pub input: Vec<u8>,
    pub code: Arc<CodeInfo>,
    pub depth: usize,
    pub tx: Arc<TxContext>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ExecutionType {
    Transaction,
    TransactionCreate,
    Call,
    StaticCall,
    CallCode,
    DelegateCall,
    Create,
    Create2,
}

impl ExecutionType {
    pub fn is_any_create(&self) -> bool {
        matches!(
            self,
            ExecutionType::TransactionCreate | ExecutionType::Create | ExecutionType::Create2
        )
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Log {
    pub address: Address,
    pub topics: Vec<Word>,
    pub data: Hex,
}

/// Position in the [`AccessSets`] journal.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Checkpoint(usize);

#[derive(Clone, Debug)]
enum Access {
    Address(Address),
    Cell(Address, Word),
    Created(Address),
}

/// Transaction-scoped warm addresses, warm storage cells and contracts created so far.
/// Owned by the run and lent to whichever frame executes; additions roll back with the frame that made them.
#[derive(Clone, Debug, Default)]
pub struct AccessSets {
    addresses: HashSet<Address>,
    cells: HashSet<(Address, Word)>,
    created: HashSet<Address>,
    journal: Vec<Access>,
}

impl AccessSets {
    pub fn new() -> Self {
        Self::default()
    }

    /// Warms `address`, returning true if it was cold.
    pub fn warm_address(&mut self, address: &Address) -> bool {
        let cold = self.addresses.insert(*address);
        if cold {
            self.journal.push(Access::Address(*address));
        }
        cold
    }

    /// Warms the storage cell, returning true if it was cold.
    pub fn warm_cell(&mut self, address: &Address, key: &Word) -> bool {
        let cold = self.cells.insert((*address, *key));
        if cold {
            self.journal.push(Access::Cell(*address, *key));
        }
        cold
    }

    pub fn is_warm_address(&self, address: &Address) -> bool {
        self.addresses.contains(address)
    }

    pub fn is_warm_cell(&self, address: &Address, key: &Word) -> bool {
        self.cells.contains(&(*address, *key))
    }

    pub fn mark_created(&mut self, address: &Address) {
        if self.created.insert(*address) {
            self.journal.push(Access::Created(*address));
        }
    }

    pub fn was_created(&self, address: &Address) -> bool {
        self.created.contains(address)
    }

    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint(self.journal.len())
    }

    pub fn rollback(&mut self, checkpoint: Checkpoint) {
        while self.journal.len() > checkpoint.0 {
            match self.journal.pop() {
                Some(Access::Address(address)) => {
                    self.addresses.remove(&address);
                }
                Some(Access::Cell(address, key)) => {
                    self.cells.remove(&(address, key));
                }
                Some(Access::Created(address)) => {
                    self.created.remove(&address);
                }
                None => break,
            }
        }
    }
}

/// One activation record: program counter, gas, stack, memory and the substate accumulated so far.
#[derive(Debug)]
pub struct Frame {
    pub env: ExecutionEnvironment,
    pub execution_type: ExecutionType,
    pub gas_available: i64,
    pub pc: usize,
    pub stack: Stack,
    pub memory: Memory,
    pub return_stack: Vec<usize>,
    pub logs: Vec<Log>,
    pub refund: i64,
    pub destroy_list: BTreeSet<Address>,
    pub is_static: bool,
    pub snapshot: Snapshot,
    pub access_checkpoint: Checkpoint,
    pub output_destination: usize,
    pub output_length: usize,
    pub is_continuation: bool,
    pub is_create_on_preexisting_account: bool,
}

impl Frame {
    pub fn new(
        env: ExecutionEnvironment,
        execution_type: ExecutionType,
        gas: i64,
        snapshot: Snapshot,
        access_checkpoint: Checkpoint,
    ) -> Self {
        Self {
            env,
            execution_type,
            gas_available: gas,
            pc: 0,
            stack: Stack::new(),
            memory: Memory::new(),
            return_stack: Vec::new(),
            logs: Vec::new(),
            refund: 0,
            destroy_list: BTreeSet::new(),
            is_static: false,
            snapshot,
            access_checkpoint,
            output_destination: 0,
            output_length: 0,
            is_continuation: false,
            is_create_on_preexisting_account: false,
        }
    }

    pub fn with_static(self, is_static: bool) -> Self {
        Self { is_static, ..self }
    }

    pub fn with_output(self, destination: usize, length: usize) -> Self {
        Self {
            output_destination: destination,
            output_length: length,
            ..self
        }
    }

    pub fn is_precompile(&self) -> bool {
        self.env.code.precompile.is_some()
    }

    /// Deducts `cost` if affordable. On failure the counter is left untouched.
    pub fn charge(&mut self, cost: i64) -> Result<(), ExceptionType> {
        if cost < 0 || self.gas_available < cost {
            return Err(ExceptionType::OutOfGas);
        }
        self.gas_available -= cost;
        Ok(())
    }

    /// Charges the expansion needed to touch `[offset, offset + len)` and grows memory.
    /// A zero length touches nothing. Returns the offset as `usize`.
    pub fn update_memory(&mut self, offset: &Word, len: &Word) -> Result<usize, ExceptionType> {
        if len.is_zero() {
            return Ok(0);
        }
        let (Some(offset), Some(len)) = (offset.to_u64(), len.to_u64()) else {
            return Err(ExceptionType::OutOfGas);
        };
        let end = offset.checked_add(len).ok_or(ExceptionType::OutOfGas)?;
        // 4 GiB of memory is never affordable in practice
        if end > u32::MAX as u64 {
            return Err(ExceptionType::OutOfGas);
        }
        let words = gas::words(end);
        let current = self.memory.words();
        if words > current {
            self.charge(gas::memory_cost(words) - gas::memory_cost(current))?;
            self.memory.expand(end as usize);
        }
        Ok(offset as usize)
    }

    /// Folds a successful child's substate into this frame.
    pub fn absorb(&mut self, child: Frame) {
        self.logs.extend(child.logs);
        self.refund += child.refund;
        self.destroy_list.extend(child.destroy_list);
    }
}

/// Terminal result of a frame.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Outcome {
    pub output: Vec<u8>,
    /// Set only for precompile frames.
    pub precompile_success: Option<bool>,
    pub should_revert: bool,
    pub exception: Option<ExceptionType>,
}

impl Outcome {
    pub fn success(output: Vec<u8>) -> Self {
        Self {
            output,
            ..Default::default()
        }
    }

    pub fn revert(output: Vec<u8>) -> Self {
        Self {
            output,
            should_revert: true,
            ..Default::default()
        }
    }

    pub fn exception(kind: ExceptionType) -> Self {
        Self {
            exception: Some(kind),
            ..Default::default()
        }
    }

    pub fn precompile(output: Vec<u8>, success: bool) -> Self {
        Self {
            output,
            precompile_success: Some(success),
            should_revert: !success,
            exception: None,
        }
    }
}

/// What one pass over a frame produced: a child to run next, or the frame's end.
#[derive(Debug)]
pub enum CallResult {
    Child(Box<Frame>),
    Done(Outcome),
}

/// Result of the outermost frame.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TransactionSubstate {
    pub output: Vec<u8>,
    pub refund: i64,
    pub destroy_list: Vec<Address>,
    pub logs: Vec<Log>,
    pub should_revert: bool,
    pub is_tracer_connected: bool,
    /// Fault of the outermost frame, if any.
    pub error: Option<ExceptionType>,
    pub gas_left: i64,
}

impl TransactionSubstate {
    pub fn failed(error: ExceptionType, is_tracer_connected: bool) -> Self {
        Self {
            error: Some(error),
            is_tracer_connected,
            ..Default::default()
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none() && !self.should_revert
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn frame(gas: i64) -> Frame {
        let env = ExecutionEnvironment {
            executing_account: Address::from_low_u64(1),
            caller: Address::zero(),
            code_source: Address::from_low_u64(1),
            transfer_value: Word::zero(),
            value: Word::zero(),
            input: vec![],
            code: CodeInfo::empty(),
            depth: 0,
            tx: Arc::new(TxContext::default()),
        };
        Frame::new(env, ExecutionType::Call, gas, Snapshot::default(), Checkpoint::default())
    }

    #[test]
    fn test_charge_is_all_or_nothing() {
        let mut frame = frame(10);
        assert_eq!(frame.charge(11), Err(ExceptionType::OutOfGas));
        assert_eq!(frame.gas_available, 10);
        assert_eq!(frame.charge(10), Ok(()));
        assert_eq!(frame.gas_available, 0);
    }

    #[test]
    fn test_memory_charging_is_idempotent() {
        let mut frame = frame(1000);
        frame.update_memory(&Word::zero(), &Word::from(64u64)).unwrap();
        assert_eq!(frame.gas_available, 1000 - 6);
        frame.update_memory(&Word::zero(), &Word::from(64u64)).unwrap();
        frame.update_memory(&Word::from(10u64), &Word::from(20u64)).unwrap();
        assert_eq!(frame.gas_available, 1000 - 6);
        assert_eq!(frame.memory.len(), 64);

        assert_eq!(frame.update_memory(&Word::max(), &Word::zero()), Ok(0));
        assert_eq!(
            frame.update_memory(&Word::max(), &Word::one()),
            Err(ExceptionType::OutOfGas)
        );
        assert_eq!(frame.gas_available, 1000 - 6);
    }

    #[test]
    fn test_access_sets_rollback() {
        let mut access = AccessSets::new();
        let a = Address::from_low_u64(1);
        let b = Address::from_low_u64(2);
        assert!(access.warm_address(&a));
        let checkpoint = access.checkpoint();
        assert!(!access.warm_address(&a));
        assert!(access.warm_address(&b));
        assert!(access.warm_cell(&a, &Word::one()));
        access.mark_created(&b);

        access.rollback(checkpoint);
        assert!(access.is_warm_address(&a));
        assert!(!access.is_warm_address(&b));
        assert!(!access.is_warm_cell(&a, &Word::one()));
        assert!(!access.was_created(&b));
    }
}
