use serde::Serialize;
use thiserror::Error;

/// Faults raised while executing a frame. Everything except `Revert` consumes all gas of the frame.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ExceptionType {
    #[error("Out of gas")]
    OutOfGas,
    #[error("Bad instruction")]
    BadInstruction,
    #[error("State modification inside static call")]
    StaticCallViolation,
    #[error("Stack overflow")]
    StackOverflow,
    #[error("Stack underflow")]
    StackUnderflow,
    #[error("Invalid jump destination")]
    InvalidJumpDestination,
    #[error("Access violation")]
    AccessViolation,
    #[error("Invalid code")]
    InvalidCode,
    #[error("Invalid subroutine entry")]
    InvalidSubroutineEntry,
    #[error("Invalid subroutine return")]
    InvalidSubroutineReturn,
    #[error("Precompile execution failed")]
    PrecompileFailure,
    #[error("Revert")]
    Revert,
}

/// Failures that abort a run instead of being folded into its result.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Execution cancelled")]
    Cancelled,
    #[error("Invalid configuration: {0}")]
    Config(String),
    #[error("Invalid transaction: {0}")]
    InvalidTransaction(String),
    #[error("{0}")]
    Eyre(#[from] eyre::ErrReport),
}
