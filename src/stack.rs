use crate::{common::Word, error::ExceptionType};

pub const STACK_LIMIT: usize = 1024;

/// Operand stack of one frame, top at the end.
#[derive(Debug, Default, Clone)]
pub struct Stack {
    data: Vec<Word>,
}

impl Stack {
    pub fn new() -> Self {
        Self {
            data: Vec::with_capacity(32),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[Word] {
        &self.data
    }

    pub fn push(&mut self, value: Word) -> Result<(), ExceptionType> {
        if self.data.len() >= STACK_LIMIT {
            return Err(ExceptionType::StackOverflow);
        }
        self.data.push(value);
        Ok(())
    }

    pub fn push_bytes(&mut self, bytes: &[u8]) -> Result<(), ExceptionType> {
        self.push(Word::from_bytes(bytes))
    }

    pub fn pop(&mut self) -> Result<Word, ExceptionType> {
        self.data.pop().ok_or(ExceptionType::StackUnderflow)
    }

    pub fn pop_n<const N: usize>(&mut self) -> Result<[Word; N], ExceptionType> {
        if self.data.len() < N {
            return Err(ExceptionType::StackUnderflow);
        }
        let mut ret = [Word::zero(); N];
        for slot in ret.iter_mut() {
            *slot = self.pop()?;
        }
        Ok(ret)
    }

    /// Item `depth` positions below the top (0 is the top).
    pub fn peek(&self, depth: usize) -> Result<&Word, ExceptionType> {
        self.data
            .len()
            .checked_sub(depth + 1)
            .and_then(|index| self.data.get(index))
            .ok_or(ExceptionType::StackUnderflow)
    }

    pub fn dup(&mut self, depth: usize) -> Result<(), ExceptionType> {
        let value = *self.peek(depth - 1)?;
        self.push(value)
    }

    pub fn swap(&mut self, depth: usize) -> Result<(), ExceptionType> {
        let len = self.data.len();
        if len <= depth {
            return Err(ExceptionType::StackUnderflow);
        }
        self.data.swap(len - 1, len - 1 - depth);
        Ok(())
    }
}
