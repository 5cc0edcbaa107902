//! Engine entry point and the frame-stack run loop.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use tracing::{debug, trace, warn};

use crate::{
    analysis::{CodeCache, CodeInfo},
    common::{Address, Hex, Word, hash::EMPTY_CODE_HASH},
    context::{BlockHashProvider, NoBlockHashes},
    error::{EngineError, ExceptionType},
    fork::{EngineConfig, Spec},
    frame::{AccessSets, CallResult, Frame, Outcome, TransactionSubstate},
    gas,
    precompiles::Precompile,
    state::WorldState,
    tracer::{Event, EventData, EventTracer},
};

/// Cooperative cancellation flag, checked between frame steps.
#[derive(Clone, Debug, Default)]
pub struct Interrupt(Arc<AtomicBool>);

impl Interrupt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Shareable part of the virtual machine: protocol flags, the code analysis cache and
/// the block hash source. One engine can serve many transactions on many threads.
pub struct Engine {
    spec: Spec,
    cache: CodeCache,
    block_hashes: Arc<dyn BlockHashProvider + Send + Sync>,
}

impl Engine {
    pub fn new(spec: Spec) -> Self {
        Self {
            spec,
            cache: CodeCache::default(),
            block_hashes: Arc::new(NoBlockHashes),
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            spec: config.spec(),
            cache: CodeCache::new(config.code_cache_capacity),
            block_hashes: Arc::new(NoBlockHashes),
        }
    }

    pub fn with_block_hashes(self, provider: impl BlockHashProvider + Send + Sync + 'static) -> Self {
        Self {
            block_hashes: Arc::new(provider),
            ..self
        }
    }

    pub fn spec(&self) -> &Spec {
        &self.spec
    }

    pub fn cache(&self) -> &CodeCache {
        &self.cache
    }

    pub(crate) fn block_hashes(&self) -> &dyn BlockHashProvider {
        self.block_hashes.as_ref()
    }

    /// Analysed code of `address`: a precompile tag, the shared empty code, or a cached analysis.
    pub fn code_info<S: WorldState + ?Sized>(&self, state: &S, address: &Address) -> Arc<CodeInfo> {
        if let Some(precompile) = Precompile::from_address(address, &self.spec) {
            return Arc::new(CodeInfo::precompile(precompile));
        }
        let hash = state.get_code_hash(address);
        if hash.is_zero() || hash == *EMPTY_CODE_HASH {
            return CodeInfo::empty();
        }
        self.cache.get_or_analyse(&hash, || state.get_code(address))
    }

    /// Runs `frame` and every frame it spawns to completion.
    pub fn run<S, T>(
        &self,
        frame: Frame,
        access: &mut AccessSets,
        state: &mut S,
        tracer: &mut T,
    ) -> Result<TransactionSubstate, EngineError>
    where
        S: WorldState + ?Sized,
        T: EventTracer + ?Sized,
    {
        Machine::new(self, access, state, tracer).run(frame, None)
    }

    /// Like [`Engine::run`], aborting with [`EngineError::Cancelled`] once `interrupt` is set.
    pub fn run_with_interrupt<S, T>(
        &self,
        frame: Frame,
        access: &mut AccessSets,
        state: &mut S,
        tracer: &mut T,
        interrupt: &Interrupt,
    ) -> Result<TransactionSubstate, EngineError>
    where
        S: WorldState + ?Sized,
        T: EventTracer + ?Sized,
    {
        Machine::new(self, access, state, tracer).run(frame, Some(interrupt))
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(Spec::default())
    }
}

/// Per-run state: everything a frame borrows while it executes.
pub(crate) struct Machine<'a, S: ?Sized, T: ?Sized> {
    pub(crate) engine: &'a Engine,
    pub(crate) spec: &'a Spec,
    pub(crate) state: &'a mut S,
    pub(crate) tracer: &'a mut T,
    pub(crate) access: &'a mut AccessSets,
    /// Output of the most recent child frame, read by RETURNDATASIZE/RETURNDATACOPY.
    pub(crate) return_data: Vec<u8>,
}

impl<'a, S, T> Machine<'a, S, T>
where
    S: WorldState + ?Sized,
    T: EventTracer + ?Sized,
{
    fn new(engine: &'a Engine, access: &'a mut AccessSets, state: &'a mut S, tracer: &'a mut T) -> Self {
        Self {
            engine,
            spec: &engine.spec,
            state,
            tracer,
            access,
            return_data: Vec::new(),
        }
    }

    fn run(&mut self, frame: Frame, interrupt: Option<&Interrupt>) -> Result<TransactionSubstate, EngineError> {
        let mut frames: Vec<Frame> = Vec::new();
        let mut current = frame;

        loop {
            if interrupt.is_some_and(Interrupt::is_set) {
                let outermost = frames.first().unwrap_or(&current);
                self.state.restore(outermost.snapshot);
                self.access.rollback(outermost.access_checkpoint);
                warn!(depth = current.env.depth, "execution cancelled");
                return Err(EngineError::Cancelled);
            }

            if !current.is_continuation {
                self.return_data.clear();
                self.enter(&current);
            }

            let result = match current.env.code.precompile {
                Some(precompile) => {
                    CallResult::Done(self.execute_precompile(&mut current, precompile, frames.is_empty()))
                }
                None => self.execute_frame(&mut current),
            };
            let outcome = match result {
                CallResult::Child(child) => {
                    current.is_continuation = true;
                    frames.push(current);
                    current = *child;
                    continue;
                }
                CallResult::Done(outcome) => outcome,
            };

            if let Some(error) = outcome.exception {
                debug!(depth = current.env.depth, %error, "frame failed, restoring snapshot");
                self.state.restore(current.snapshot);
                self.access.rollback(current.access_checkpoint);
                self.trace_action(current.env.depth, || EventData::Error { error });
                let Some(mut parent) = frames.pop() else {
                    return Ok(TransactionSubstate::failed(error, self.tracer.is_connected()));
                };
                self.return_data.clear();
                // the call popped its arguments, so there is room for the status word
                let _ = parent.stack.push(Word::zero());
                current = parent;
                continue;
            }

            match frames.pop() {
                Some(mut parent) => {
                    self.return_to(&mut parent, current, outcome);
                    current = parent;
                }
                None => return Ok(self.finish(current, outcome)),
            }
        }
    }

    /// Moves the transferred value into the executing account before the first instruction.
    fn enter(&mut self, frame: &Frame) {
        let env = &frame.env;
        let address = env.executing_account;
        let is_create = frame.execution_type.is_any_create();

        if self.state.account_exists(&address) {
            if !env.transfer_value.is_zero() {
                self.state.add_to_balance(&address, &env.transfer_value);
            }
        } else if is_create || !env.transfer_value.is_zero() || !self.spec.clear_empty_accounts {
            self.state.create_account(&address, env.transfer_value);
        }
        if is_create && self.spec.clear_empty_accounts {
            self.state.increment_nonce(&address);
        }

        trace!(
            depth = env.depth,
            kind = ?frame.execution_type,
            to = %address,
            gas = frame.gas_available,
            "frame start"
        );
        self.trace_action(env.depth, || EventData::Call {
            kind: frame.execution_type,
            from: env.caller,
            to: address,
            value: env.value,
            gas: frame.gas_available,
            input: Hex::from(env.input.as_slice()),
            precompile: frame.is_precompile(),
        });
    }

    fn execute_precompile(&mut self, frame: &mut Frame, precompile: Precompile, top_level: bool) -> Outcome {
        let cost = precompile.gas_cost(self.spec, &frame.env.input);
        if let Err(kind) = frame.charge(cost) {
            return Outcome::exception(kind);
        }
        match precompile.run(&frame.env.input) {
            Ok(output) => Outcome::precompile(output, true),
            Err(e) if top_level => {
                debug!(?precompile, error = %e, "precompile failed");
                Outcome::exception(ExceptionType::PrecompileFailure)
            }
            Err(e) => {
                debug!(?precompile, error = %e, "precompile failed");
                frame.gas_available = 0;
                Outcome::precompile(Vec::new(), false)
            }
        }
    }

    /// Hands a finished child's result to its parent: status word, output window, gas and substate.
    fn return_to(&mut self, parent: &mut Frame, child: Frame, outcome: Outcome) {
        let depth = child.env.depth;
        let output = Hex::from(outcome.output.as_slice());
        let gas_left = child.gas_available;
        let reverted = outcome.should_revert;
        self.trace_action(depth, || {
            if reverted {
                EventData::Revert { output, gas_left }
            } else {
                EventData::Return { output, gas_left }
            }
        });

        if outcome.should_revert {
            self.state.restore(child.snapshot);
            self.access.rollback(child.access_checkpoint);
            parent.gas_available += child.gas_available;
            let _ = parent.stack.push(Word::zero());
            copy_output(parent, &child, &outcome.output);
            self.return_data = outcome.output;
            return;
        }

        if child.execution_type.is_any_create() {
            self.deposit_code(parent, child, outcome.output);
            return;
        }

        let status = outcome.precompile_success.unwrap_or(true);
        let _ = parent.stack.push(Word::from(status));
        copy_output(parent, &child, &outcome.output);
        self.return_data = outcome.output;
        parent.gas_available += child.gas_available;
        parent.absorb(child);
    }

    /// Stores the runtime code a create frame returned, or unwinds the creation when it cannot be paid for.
    fn deposit_code(&mut self, parent: &mut Frame, mut child: Frame, code: Vec<u8>) {
        let address = child.env.executing_account;
        let cost = gas::code_deposit_cost(self.spec, code.len());
        let invalid = self.spec.reject_ef_code && code.first() == Some(&0xef);
        self.return_data.clear();

        if child.gas_available >= cost && !invalid {
            child.gas_available -= cost;
            self.state.set_code(&address, code);
        } else if self.spec.fail_on_out_of_gas_code_deposit || invalid {
            debug!(%address, cost, gas = child.gas_available, invalid, "code deposit failed");
            self.state.restore(child.snapshot);
            self.access.rollback(child.access_checkpoint);
            if !child.is_create_on_preexisting_account {
                self.state.delete_account(&address);
            }
            let _ = parent.stack.push(Word::zero());
            return;
        } else {
            debug!(%address, cost, "code deposit unaffordable, keeping empty account");
        }

        let _ = parent.stack.push(address.as_word());
        parent.gas_available += child.gas_available;
        parent.absorb(child);
    }

    fn finish(&mut self, mut frame: Frame, outcome: Outcome) -> TransactionSubstate {
        let is_tracer_connected = self.tracer.is_connected();
        let depth = frame.env.depth;
        let output = Hex::from(outcome.output.as_slice());
        let gas_left = frame.gas_available;
        let reverted = outcome.should_revert;
        self.trace_action(depth, || {
            if reverted {
                EventData::Revert { output, gas_left }
            } else {
                EventData::Return { output, gas_left }
            }
        });

        if outcome.should_revert {
            self.state.restore(frame.snapshot);
            self.access.rollback(frame.access_checkpoint);
            return TransactionSubstate {
                output: outcome.output,
                should_revert: true,
                is_tracer_connected,
                gas_left,
                ..Default::default()
            };
        }

        TransactionSubstate {
            output: outcome.output,
            refund: frame.refund,
            destroy_list: std::mem::take(&mut frame.destroy_list).into_iter().collect(),
            logs: std::mem::take(&mut frame.logs),
            should_revert: false,
            is_tracer_connected,
            error: None,
            gas_left,
        }
    }

    /// Records a call-level event; the event is only built when actions are traced.
    pub(crate) fn trace_action(&mut self, depth: usize, data: impl FnOnce() -> EventData) {
        if self.tracer.is_tracing_actions() {
            self.tracer.add(Event { data: data(), depth });
        }
    }
}

/// Copies as much of `output` as fits into the output window the call asked for, which the child carries.
fn copy_output(parent: &mut Frame, child: &Frame, output: &[u8]) {
    let len = output.len().min(child.output_length);
    if len > 0 {
        parent.memory.store(child.output_destination, &output[..len]);
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        common::Address,
        context::TxContext,
        fork::Fork,
        frame::{ExecutionEnvironment, ExecutionType},
        state::InMemoryState,
        tracer::{LoggingTracer, NoopTracer},
    };

    fn run(code: Vec<u8>, gas: i64) -> (TransactionSubstate, InMemoryState) {
        let contract = Address::from_low_u64(0xc0de);
        let mut state = InMemoryState::new().with_code(contract, code);
        let engine = Engine::new(Spec::from(Fork::Cancun));
        let mut access = AccessSets::new();
        let env = ExecutionEnvironment {
            executing_account: contract,
            caller: Address::from_low_u64(0xca11),
            code_source: contract,
            transfer_value: Word::zero(),
            value: Word::zero(),
            input: Vec::new(),
            code: engine.code_info(&state, &contract),
            depth: 0,
            tx: Arc::new(TxContext::default()),
        };
        let frame = Frame::new(
            env,
            ExecutionType::Transaction,
            gas,
            state.take_snapshot(),
            access.checkpoint(),
        );
        let substate = engine
            .run(frame, &mut access, &mut state, &mut NoopTracer)
            .unwrap();
        (substate, state)
    }

    #[test]
    fn test_return_empty() {
        // PUSH1 0 PUSH1 0 RETURN
        let (substate, _) = run(vec![0x60, 0x00, 0x60, 0x00, 0xf3], 100_000);
        assert!(substate.is_success());
        assert_eq!(substate.output, Vec::<u8>::new());
        assert_eq!(substate.gas_left, 100_000 - 6);
    }

    #[test]
    fn test_top_level_exception_restores_state() {
        // PUSH1 1 PUSH1 0 SSTORE INVALID
        let (substate, state) = run(vec![0x60, 0x01, 0x60, 0x00, 0x55, 0xfe], 100_000);
        assert_eq!(substate.error, Some(ExceptionType::BadInstruction));
        assert_eq!(substate.gas_left, 0);
        assert!(state.storage_of(&Address::from_low_u64(0xc0de)).is_empty());
    }

    #[test]
    fn test_top_level_revert_keeps_output() {
        // PUSH1 0xab PUSH1 0 MSTORE8 PUSH1 1 PUSH1 0 REVERT
        let code = vec![0x60, 0xab, 0x60, 0x00, 0x53, 0x60, 0x01, 0x60, 0x00, 0xfd];
        let (substate, _) = run(code, 100_000);
        assert!(substate.should_revert);
        assert!(!substate.is_error());
        assert_eq!(substate.output, vec![0xab]);
        assert!(substate.gas_left > 0);
    }

    #[test]
    fn test_cancelled_before_first_step() {
        let contract = Address::from_low_u64(0xc0de);
        let mut state = InMemoryState::new().with_code(contract, vec![0x00]);
        let engine = Engine::default();
        let mut access = AccessSets::new();
        let env = ExecutionEnvironment {
            executing_account: contract,
            caller: Address::zero(),
            code_source: contract,
            transfer_value: Word::from(5u64),
            value: Word::from(5u64),
            input: Vec::new(),
            code: engine.code_info(&state, &contract),
            depth: 0,
            tx: Arc::new(TxContext::default()),
        };
        let frame = Frame::new(env, ExecutionType::Call, 1000, state.take_snapshot(), access.checkpoint());
        let interrupt = Interrupt::new();
        interrupt.trigger();

        let mut tracer = LoggingTracer::actions();
        let result = engine.run_with_interrupt(frame, &mut access, &mut state, &mut tracer, &interrupt);
        assert!(matches!(result, Err(EngineError::Cancelled)));
        assert_eq!(state.get_balance(&contract), Word::zero());
        assert!(tracer.events().is_empty());
    }

    #[test]
    fn test_code_info_is_cached_by_hash() {
        let a = Address::from_low_u64(0xa);
        let b = Address::from_low_u64(0xb);
        let state = InMemoryState::new()
            .with_code(a, vec![0x5b, 0x00])
            .with_code(b, vec![0x5b, 0x00]);
        let engine = Engine::default();
        let first = engine.code_info(&state, &a);
        let second = engine.code_info(&state, &b);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(engine.cache().len(), 1);
        assert!(engine.code_info(&state, &Address::from_low_u64(0xdead)).is_empty());
        assert!(engine.code_info(&state, &Address::from_low_u64(2)).precompile.is_some());
    }
}
