pub mod analysis;
pub mod common;
pub mod context;
pub mod error;
pub mod executor;
pub mod fork;
pub mod frame;
pub mod gas;
pub mod interpreter;
pub mod memory;
pub mod opcodes;
pub mod precompiles;
pub mod runner;
pub mod stack;
pub mod state;
pub mod system;
pub mod tracer;

pub use common::{Address, Word};
pub use error::{EngineError, ExceptionType};
pub use executor::{Engine, Interrupt};
pub use fork::{EngineConfig, Fork, Spec};
pub use frame::{AccessSets, ExecutionEnvironment, ExecutionType, Frame, TransactionSubstate};
pub use runner::{Armature, Builder, Receipt, Status};
pub use state::{InMemoryState, WorldState};
