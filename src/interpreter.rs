//! Instruction dispatch for a single frame.

use std::sync::Arc;

use crate::{
    analysis::CodeInfo,
    common::{Hex, Word, hash::keccak256},
    context::visible_block_hash,
    error::ExceptionType,
    executor::Machine,
    frame::{CallResult, Frame, Log, Outcome},
    gas,
    opcodes::Instruction as Op,
    stack::Stack,
    state::WorldState,
    tracer::{Event, EventData, EventTracer},
};

/// Subroutine return stack limit.
const RETURN_STACK_LIMIT: usize = 1023;

/// What one instruction left the frame with.
pub(crate) enum Step {
    Continue,
    Halt(Outcome),
    Call(Box<Frame>),
}

impl<S, T> Machine<'_, S, T>
where
    S: WorldState + ?Sized,
    T: EventTracer + ?Sized,
{
    /// Runs instructions until the frame halts, faults or spawns a child.
    pub(crate) fn execute_frame(&mut self, frame: &mut Frame) -> CallResult {
        let code = Arc::clone(&frame.env.code);
        if code.is_empty() {
            return CallResult::Done(Outcome::success(Vec::new()));
        }
        loop {
            let pc = frame.pc;
            match self.step(frame, &code) {
                Ok(Step::Continue) => (),
                Ok(Step::Halt(outcome)) => return CallResult::Done(outcome),
                Ok(Step::Call(child)) => return CallResult::Child(child),
                Err(error) => {
                    if self.tracer.is_tracing_instructions() {
                        self.tracer.add(Event {
                            data: EventData::OpcodeError { pc, error },
                            depth: frame.env.depth,
                        });
                    }
                    return CallResult::Done(Outcome::exception(error));
                }
            }
        }
    }

    fn step(&mut self, frame: &mut Frame, code: &CodeInfo) -> Result<Step, ExceptionType> {
        let pc = frame.pc;
        let Some(&byte) = code.code.get(pc) else {
            return Ok(Step::Halt(Outcome::success(Vec::new())));
        };
        let op = Op::decode(byte, self.spec)
            .filter(|op| op.is_enabled(self.spec))
            .ok_or(ExceptionType::BadInstruction)?;

        if self.tracer.is_tracing_instructions() {
            self.trace_opcode(frame, op);
        }
        if frame.is_static && op.is_state_modifying() {
            return Err(ExceptionType::StaticCallViolation);
        }
        frame.charge(gas::static_cost(op, self.spec))?;
        frame.pc = pc + 1;

        let env = &frame.env;
        match op {
            Op::Stop => return Ok(Step::Halt(Outcome::success(Vec::new()))),

            Op::Add => binary(&mut frame.stack, |a, b| a + b)?,
            Op::Mul => binary(&mut frame.stack, |a, b| a * b)?,
            Op::Sub => binary(&mut frame.stack, |a, b| a - b)?,
            Op::Div => binary(&mut frame.stack, |a, b| a.checked_div(b))?,
            Op::SDiv => binary(&mut frame.stack, |a, b| a.sdiv(b))?,
            Op::Mod => binary(&mut frame.stack, |a, b| a.checked_rem(b))?,
            Op::SMod => binary(&mut frame.stack, |a, b| a.smod(b))?,
            Op::AddMod => {
                let [a, b, n] = frame.stack.pop_n::<3>()?;
                frame.stack.push(a.add_modulo(&b, &n))?;
            }
            Op::MulMod => {
                let [a, b, n] = frame.stack.pop_n::<3>()?;
                frame.stack.push(a.mul_modulo(&b, &n))?;
            }
            Op::Exp => {
                let [base, exponent] = frame.stack.pop_n::<2>()?;
                frame.charge(gas::exp_cost(self.spec, &exponent))?;
                frame.stack.push(base.pow(exponent))?;
            }
            Op::SignExtend => binary(&mut frame.stack, |size, value| value.sign_extend(&size))?,

            Op::Lt => binary(&mut frame.stack, |a, b| Word::from(a < b))?,
            Op::Gt => binary(&mut frame.stack, |a, b| Word::from(a > b))?,
            Op::Slt => binary(&mut frame.stack, |a, b| Word::from(a.slt(&b)))?,
            Op::Sgt => binary(&mut frame.stack, |a, b| Word::from(a.sgt(&b)))?,
            Op::Eq => binary(&mut frame.stack, |a, b| Word::from(a == b))?,
            Op::IsZero => unary(&mut frame.stack, |a| Word::from(a.is_zero()))?,
            Op::And => binary(&mut frame.stack, |a, b| a & b)?,
            Op::Or => binary(&mut frame.stack, |a, b| a | b)?,
            Op::Xor => binary(&mut frame.stack, |a, b| a ^ b)?,
            Op::Not => unary(&mut frame.stack, |a| !a)?,
            Op::Byte => binary(&mut frame.stack, |index, value| value.byte(&index))?,
            Op::Shl => binary(&mut frame.stack, |shift, value| value.shl(&shift))?,
            Op::Shr => binary(&mut frame.stack, |shift, value| value.shr(&shift))?,
            Op::Sar => binary(&mut frame.stack, |shift, value| value.sar(&shift))?,

            Op::Sha3 => {
                let [offset, len] = frame.stack.pop_n::<2>()?;
                let size = len.to_u64().ok_or(ExceptionType::OutOfGas)?;
                frame.charge(gas::sha3_cost(size))?;
                let offset = frame.update_memory(&offset, &len)?;
                let hash = keccak256(&frame.memory.load(offset, size as usize));
                frame.stack.push(Word::from(hash))?;
            }

            Op::Address => {
                let address = env.executing_account.as_word();
                frame.stack.push(address)?;
            }
            Op::Balance => {
                let address = (&frame.stack.pop()?).into();
                self.charge_account_access(frame, &address, true)?;
                frame.stack.push(self.state.get_balance(&address))?;
            }
            Op::Origin => {
                let origin = env.tx.origin.as_word();
                frame.stack.push(origin)?;
            }
            Op::Caller => {
                let caller = env.caller.as_word();
                frame.stack.push(caller)?;
            }
            Op::CallValue => {
                let value = env.value;
                frame.stack.push(value)?;
            }
            Op::CallDataLoad => {
                let offset = frame.stack.pop()?;
                let data = padded(&frame.env.input, offset.saturating_usize(), 32);
                frame.stack.push_bytes(&data)?;
            }
            Op::CallDataSize => {
                let len = env.input.len();
                frame.stack.push(Word::from(len))?;
            }
            Op::CallDataCopy => {
                let [dest, offset, len] = frame.stack.pop_n::<3>()?;
                let (dest, size) = prepare_copy(frame, &dest, &len)?;
                frame
                    .memory
                    .store_padded(dest, &frame.env.input, offset.saturating_usize(), size);
            }
            Op::CodeSize => frame.stack.push(Word::from(code.code.len()))?,
            Op::CodeCopy => {
                let [dest, offset, len] = frame.stack.pop_n::<3>()?;
                let (dest, size) = prepare_copy(frame, &dest, &len)?;
                frame
                    .memory
                    .store_padded(dest, &code.code, offset.saturating_usize(), size);
            }
            Op::GasPrice => {
                let price = env.tx.gas_price;
                frame.stack.push(price)?;
            }
            Op::ExtCodeSize => {
                let address = (&frame.stack.pop()?).into();
                self.charge_account_access(frame, &address, true)?;
                let len = self.engine.code_info(&*self.state, &address).code.len();
                frame.stack.push(Word::from(len))?;
            }
            Op::ExtCodeCopy => {
                let [address, dest, offset, len] = frame.stack.pop_n::<4>()?;
                let address = (&address).into();
                let (dest, size) = prepare_copy(frame, &dest, &len)?;
                self.charge_account_access(frame, &address, true)?;
                if size > 0 {
                    let external = self.engine.code_info(&*self.state, &address);
                    frame
                        .memory
                        .store_padded(dest, &external.code, offset.saturating_usize(), size);
                }
            }
            Op::ReturnDataSize => frame.stack.push(Word::from(self.return_data.len()))?,
            Op::ReturnDataCopy => {
                let [dest, offset, len] = frame.stack.pop_n::<3>()?;
                let size = len.to_u64().ok_or(ExceptionType::OutOfGas)?;
                frame.charge(gas::copy_cost(size))?;
                let (end, overflow) = offset.overflowing_add(len);
                if overflow || end > Word::from(self.return_data.len()) {
                    return Err(ExceptionType::AccessViolation);
                }
                let dest = frame.update_memory(&dest, &len)?;
                frame
                    .memory
                    .store_padded(dest, &self.return_data, offset.saturating_usize(), size as usize);
            }
            Op::ExtCodeHash => {
                let address = (&frame.stack.pop()?).into();
                self.charge_account_access(frame, &address, true)?;
                let hash = if self.state.is_dead_account(&address) {
                    Word::zero()
                } else {
                    self.state.get_code_hash(&address)
                };
                frame.stack.push(hash)?;
            }

            Op::BlockHash => {
                let number = frame.stack.pop()?;
                let current = frame.env.tx.header.number;
                let hash = visible_block_hash(self.engine.block_hashes(), current, &number);
                frame.stack.push(hash)?;
            }
            Op::Coinbase => {
                let beneficiary = env.tx.header.beneficiary.as_word();
                frame.stack.push(beneficiary)?;
            }
            Op::Timestamp => {
                let timestamp = env.tx.header.timestamp;
                frame.stack.push(Word::from(timestamp))?;
            }
            Op::Number => {
                let number = env.tx.header.number;
                frame.stack.push(Word::from(number))?;
            }
            Op::PrevRandao => {
                let header = &env.tx.header;
                let value = if self.spec.prev_randao {
                    header.prev_randao
                } else {
                    header.difficulty
                };
                frame.stack.push(value)?;
            }
            Op::GasLimit => {
                let limit = env.tx.header.gas_limit;
                frame.stack.push(Word::from(limit))?;
            }
            Op::ChainId => {
                let chain_id = env.tx.chain_id;
                frame.stack.push(Word::from(chain_id))?;
            }
            Op::SelfBalance => {
                let balance = self.state.get_balance(&env.executing_account);
                frame.stack.push(balance)?;
            }
            Op::BaseFee => {
                let base_fee = env.tx.header.base_fee;
                frame.stack.push(base_fee)?;
            }
            Op::BlobHash => {
                let index = frame.stack.pop()?;
                let hash = index
                    .to_usize()
                    .and_then(|index| frame.env.tx.blob_hashes.get(index))
                    .copied()
                    .unwrap_or_default();
                frame.stack.push(hash)?;
            }
            Op::BlobBaseFee => {
                let fee = env.tx.header.blob_base_fee();
                frame.stack.push(fee)?;
            }

            Op::Pop => {
                frame.stack.pop()?;
            }
            Op::MLoad => {
                let offset = frame.stack.pop()?;
                let offset = frame.update_memory(&offset, &Word::from(32u64))?;
                let value = frame.memory.load_word(offset);
                frame.stack.push(value)?;
            }
            Op::MStore => {
                let [offset, value] = frame.stack.pop_n::<2>()?;
                let offset = frame.update_memory(&offset, &Word::from(32u64))?;
                frame.memory.store_word(offset, &value);
            }
            Op::MStore8 => {
                let [offset, value] = frame.stack.pop_n::<2>()?;
                let offset = frame.update_memory(&offset, &Word::one())?;
                frame.memory.store(offset, &value.into_bytes()[31..]);
            }
            Op::SLoad => self.sload(frame)?,
            Op::SStore => self.sstore(frame)?,
            Op::Jump => {
                let dest = frame.stack.pop()?;
                frame.pc = jump_target(code, &dest, false)?;
            }
            Op::JumpI => {
                let [dest, condition] = frame.stack.pop_n::<2>()?;
                if !condition.is_zero() {
                    frame.pc = jump_target(code, &dest, false)?;
                }
            }
            Op::Pc => frame.stack.push(Word::from(pc))?,
            Op::MSize => frame.stack.push(Word::from(frame.memory.len()))?,
            Op::Gas => frame.stack.push(Word::from(frame.gas_available as u64))?,
            Op::JumpDest => (),
            Op::TLoad => self.tload(frame)?,
            Op::TStore => self.tstore(frame)?,
            Op::MCopy => {
                let [dest, src, len] = frame.stack.pop_n::<3>()?;
                let size = len.to_u64().ok_or(ExceptionType::OutOfGas)?;
                frame.charge(gas::copy_cost(size))?;
                let src = frame.update_memory(&src, &len)?;
                let dest = frame.update_memory(&dest, &len)?;
                frame.memory.copy_within(dest, src, size as usize);
            }

            Op::Push0 => frame.stack.push(Word::zero())?,
            Op::Push1 | Op::Push2 | Op::Push3 | Op::Push4 | Op::Push5 | Op::Push6 | Op::Push7
            | Op::Push8 | Op::Push9 | Op::Push10 | Op::Push11 | Op::Push12 | Op::Push13
            | Op::Push14 | Op::Push15 | Op::Push16 | Op::Push17 | Op::Push18 | Op::Push19
            | Op::Push20 | Op::Push21 | Op::Push22 | Op::Push23 | Op::Push24 | Op::Push25
            | Op::Push26 | Op::Push27 | Op::Push28 | Op::Push29 | Op::Push30 | Op::Push31
            | Op::Push32 => {
                let width = op.push_width();
                // immediates cut off by the end of code are zero-filled on the right
                frame.stack.push_bytes(&padded(&code.code, pc + 1, width))?;
                frame.pc = pc + 1 + width;
            }

            Op::Dup1 | Op::Dup2 | Op::Dup3 | Op::Dup4 | Op::Dup5 | Op::Dup6 | Op::Dup7
            | Op::Dup8 | Op::Dup9 | Op::Dup10 | Op::Dup11 | Op::Dup12 | Op::Dup13 | Op::Dup14
            | Op::Dup15 | Op::Dup16 => {
                let depth = op.dup_depth().unwrap_or(1);
                frame.stack.dup(depth)?;
            }

            Op::Swap1 | Op::Swap2 | Op::Swap3 | Op::Swap4 | Op::Swap5 | Op::Swap6 | Op::Swap7
            | Op::Swap8 | Op::Swap9 | Op::Swap10 | Op::Swap11 | Op::Swap12 | Op::Swap13
            | Op::Swap14 | Op::Swap15 | Op::Swap16 => {
                let depth = op.swap_depth().unwrap_or(1);
                frame.stack.swap(depth)?;
            }

            Op::Log0 | Op::Log1 | Op::Log2 | Op::Log3 | Op::Log4 => {
                let topics = op.log_topics().unwrap_or_default();
                let [offset, len] = frame.stack.pop_n::<2>()?;
                let size = len.to_u64().ok_or(ExceptionType::OutOfGas)?;
                frame.charge(gas::log_cost(topics, size))?;
                let offset = frame.update_memory(&offset, &len)?;
                let topics = (0..topics)
                    .map(|_| frame.stack.pop())
                    .collect::<Result<Vec<_>, _>>()?;
                let log = Log {
                    address: frame.env.executing_account,
                    topics,
                    data: Hex::from(frame.memory.load(offset, size as usize)),
                };
                self.trace_action(frame.env.depth, || EventData::Log {
                    address: log.address,
                    topics: log.topics.clone(),
                    data: log.data.clone(),
                });
                frame.logs.push(log);
            }

            Op::Create | Op::Create2 => {
                if let Some(child) = self.create(frame, op)? {
                    return Ok(Step::Call(child));
                }
            }
            Op::Call | Op::CallCode | Op::DelegateCall | Op::StaticCall => {
                if let Some(child) = self.call(frame, op)? {
                    return Ok(Step::Call(child));
                }
            }
            Op::Return | Op::Revert => {
                let [offset, len] = frame.stack.pop_n::<2>()?;
                let offset = frame.update_memory(&offset, &len)?;
                let output = frame.memory.load(offset, len.saturating_usize());
                let outcome = if op == Op::Revert {
                    Outcome::revert(output)
                } else {
                    Outcome::success(output)
                };
                return Ok(Step::Halt(outcome));
            }
            Op::Invalid => return Err(ExceptionType::BadInstruction),
            Op::SelfDestruct => {
                self.self_destruct(frame)?;
                return Ok(Step::Halt(Outcome::success(Vec::new())));
            }

            Op::BeginSub => return Err(ExceptionType::InvalidSubroutineEntry),
            Op::JumpSub => {
                let dest = frame.stack.pop()?;
                if !code.is_valid_jump(&dest, true) {
                    return Err(ExceptionType::InvalidSubroutineEntry);
                }
                if frame.return_stack.len() >= RETURN_STACK_LIMIT {
                    return Err(ExceptionType::StackOverflow);
                }
                frame.return_stack.push(frame.pc);
                // execution resumes after the BEGINSUB
                frame.pc = dest.saturating_usize() + 1;
            }
            Op::ReturnSub => {
                frame.pc = frame
                    .return_stack
                    .pop()
                    .ok_or(ExceptionType::InvalidSubroutineReturn)?;
            }
        }
        Ok(Step::Continue)
    }

    fn trace_opcode(&mut self, frame: &Frame, op: Op) {
        let stack = self
            .tracer
            .is_tracing_stack()
            .then(|| frame.stack.as_slice().to_vec());
        let memory = self
            .tracer
            .is_tracing_memory()
            .then(|| Hex::from(frame.memory.as_slice()));
        self.tracer.add(Event {
            data: EventData::Opcode {
                pc: frame.pc,
                op: op.byte(),
                name: op.name(),
                gas: frame.gas_available,
                stack,
                memory,
            },
            depth: frame.env.depth,
        });
    }
}

fn unary(stack: &mut Stack, f: impl FnOnce(Word) -> Word) -> Result<(), ExceptionType> {
    let a = stack.pop()?;
    stack.push(f(a))
}

fn binary(stack: &mut Stack, f: impl FnOnce(Word, Word) -> Word) -> Result<(), ExceptionType> {
    let [a, b] = stack.pop_n::<2>()?;
    stack.push(f(a, b))
}

/// Charges copy gas and memory growth for a copy of `len` bytes to `dest`.
fn prepare_copy(frame: &mut Frame, dest: &Word, len: &Word) -> Result<(usize, usize), ExceptionType> {
    let size = len.to_u64().ok_or(ExceptionType::OutOfGas)?;
    frame.charge(gas::copy_cost(size))?;
    let dest = frame.update_memory(dest, len)?;
    Ok((dest, size as usize))
}

fn jump_target(code: &CodeInfo, dest: &Word, subroutine: bool) -> Result<usize, ExceptionType> {
    if !code.is_valid_jump(dest, subroutine) {
        return Err(ExceptionType::InvalidJumpDestination);
    }
    Ok(dest.saturating_usize())
}

/// `len` bytes of `data` from `offset`, zero-filled past its end.
fn padded(data: &[u8], offset: usize, len: usize) -> Vec<u8> {
    let mut ret = vec![0u8; len];
    if offset < data.len() {
        let available = (data.len() - offset).min(len);
        ret[..available].copy_from_slice(&data[offset..offset + available]);
    }
    ret
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_padded() {
        assert_eq!(padded(&[1, 2, 3], 1, 4), vec![2, 3, 0, 0]);
        assert_eq!(padded(&[1, 2, 3], 5, 2), vec![0, 0]);
        assert_eq!(padded(&[1, 2, 3], usize::MAX, 1), vec![0]);
    }

    #[test]
    fn test_jump_target() {
        // JUMPDEST PUSH1 0x5b
        let code = CodeInfo::new(vec![0x5b, 0x60, 0x5b]);
        assert_eq!(jump_target(&code, &Word::zero(), false), Ok(0));
        assert_eq!(
            jump_target(&code, &Word::from(2u64), false),
            Err(ExceptionType::InvalidJumpDestination)
        );
        assert_eq!(
            jump_target(&code, &Word::max(), false),
            Err(ExceptionType::InvalidJumpDestination)
        );
    }
}
