use serde::Serialize;

use crate::{
    common::{Address, Hex, Word},
    error::ExceptionType,
    frame::ExecutionType,
};

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum EventData {
    Opcode {
        pc: usize,
        op: u8,
        name: &'static str,
        gas: i64,
        #[serde(skip_serializing_if = "Option::is_none")]
        stack: Option<Vec<Word>>,
        #[serde(skip_serializing_if = "Option::is_none")]
        memory: Option<Hex>,
    },
    OpcodeError {
        pc: usize,
        error: ExceptionType,
    },
    Call {
        kind: ExecutionType,
        from: Address,
        to: Address,
        value: Word,
        gas: i64,
        input: Hex,
        precompile: bool,
    },
    Return {
        output: Hex,
        #[serde(rename = "gasLeft")]
        gas_left: i64,
    },
    Revert {
        output: Hex,
        #[serde(rename = "gasLeft")]
        gas_left: i64,
    },
    Error {
        error: ExceptionType,
    },
    SelfDestruct {
        address: Address,
        beneficiary: Address,
        balance: Word,
    },
    Storage {
        address: Address,
        key: Word,
        value: Word,
    },
    Log {
        address: Address,
        topics: Vec<Word>,
        data: Hex,
    },
    Refund {
        refund: i64,
    },
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Event {
    #[serde(flatten)]
    pub data: EventData,
    pub depth: usize,
}

/// Read-only observer of a run. Every hook defaults to a no-op, and events are only
/// built when the matching `is_tracing_*` switch is on.
#[allow(unused_variables)] // default impl ignores all arguments
pub trait EventTracer {
    fn is_tracing_instructions(&self) -> bool {
        false
    }
    fn is_tracing_actions(&self) -> bool {
        false
    }
    fn is_tracing_stack(&self) -> bool {
        false
    }
    fn is_tracing_memory(&self) -> bool {
        false
    }
    fn is_connected(&self) -> bool {
        self.is_tracing_instructions() || self.is_tracing_actions()
    }
    fn add(&mut self, event: Event) {}
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NoopTracer;

impl EventTracer for NoopTracer {}

/// Records every event in order.
#[derive(Clone, Debug)]
pub struct LoggingTracer {
    events: Vec<Event>,
    instructions: bool,
    stack: bool,
    memory: bool,
}

impl Default for LoggingTracer {
    fn default() -> Self {
        Self {
            events: Vec::new(),
            instructions: true,
            stack: false,
            memory: false,
        }
    }
}

impl LoggingTracer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Calls and results only.
    pub fn actions() -> Self {
        Self {
            instructions: false,
            ..Self::default()
        }
    }

    pub fn with_stack(self) -> Self {
        Self { stack: true, ..self }
    }

    pub fn with_memory(self) -> Self {
        Self { memory: true, ..self }
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn take(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.events)
    }

    pub fn to_json(&self) -> eyre::Result<String> {
        Ok(serde_json::to_string(&self.events)?)
    }
}

impl EventTracer for LoggingTracer {
    fn is_tracing_instructions(&self) -> bool {
        self.instructions
    }
    fn is_tracing_actions(&self) -> bool {
        true
    }
    fn is_tracing_stack(&self) -> bool {
        self.stack
    }
    fn is_tracing_memory(&self) -> bool {
        self.memory
    }
    fn add(&mut self, event: Event) {
        self.events.push(event);
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_noop_tracer_is_disconnected() {
        let tracer = NoopTracer;
        assert!(!tracer.is_connected());
        assert!(LoggingTracer::actions().is_connected());
    }

    #[test]
    fn test_events_to_json() {
        let mut tracer = LoggingTracer::new();
        tracer.add(Event {
            data: EventData::Return {
                output: Hex::from(vec![0xab]),
                gas_left: 21,
            },
            depth: 1,
        });
        tracer.add(Event {
            data: EventData::Error {
                error: ExceptionType::OutOfGas,
            },
            depth: 0,
        });
        assert_eq!(
            tracer.to_json().unwrap(),
            r#"[{"type":"return","output":"0xab","gasLeft":21,"depth":1},{"type":"error","error":"OutOfGas","depth":0}]"#
        );
        assert_eq!(tracer.take().len(), 2);
        assert!(tracer.events().is_empty());
    }
}
