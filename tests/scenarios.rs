mod common;

use std::sync::Arc;

use armature::{
    AccessSets, Address, Engine, ExecutionEnvironment, ExecutionType, Fork, Frame, InMemoryState,
    Spec, Word, WorldState, context::TxContext, tracer::NoopTracer,
};
use pretty_assertions::assert_eq;

use common::{call, code, init_tracing, slot, store_status, transact};

#[test]
fn test_push_push_return() -> eyre::Result<()> {
    init_tracing();
    let contract = Address::from_low_u64(0xc0de);
    // PUSH1 0 PUSH1 0 RETURN
    let mut state = InMemoryState::new().with_code(contract, code("60006000f3"));
    let engine = Engine::default();
    let mut access = AccessSets::new();
    let env = ExecutionEnvironment {
        executing_account: contract,
        caller: common::sender(),
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
        100_000,
        state.take_snapshot(),
        access.checkpoint(),
    );

    let substate = engine.run(frame, &mut access, &mut state, &mut NoopTracer)?;
    assert!(substate.is_success());
    assert_eq!(substate.output, Vec::<u8>::new());
    assert_eq!(substate.gas_left, 100_000 - 3 - 3);
    Ok(())
}

#[test]
fn test_zero_gas_call_to_missing_account() -> eyre::Result<()> {
    init_tracing();
    let contract = Address::from_low_u64(0xc0de);
    let missing = Address::from_low_u64(0xdead);
    // CALL(gas 0, 0xdead, value 0) then store the status
    let program = format!("{}{}00", call(0xdead).replace("5af1", "6000f1"), store_status(0));

    let mut state = InMemoryState::new().with_code(contract, code(&program));
    let receipt = transact(&Engine::default(), &mut state, contract, vec![], 100_000)?;
    assert!(receipt.is_success());
    assert_eq!(slot(&state, &contract, 0), Word::from(2u64));
    assert!(state.account(&missing).is_none());

    // before EIP-161 even an empty touch creates the account
    let mut state = InMemoryState::new().with_code(contract, code(&program));
    let homestead = Engine::new(Spec::from(Fork::Homestead));
    let receipt = transact(&homestead, &mut state, contract, vec![], 100_000)?;
    assert!(receipt.is_success());
    assert_eq!(slot(&state, &contract, 0), Word::from(2u64));
    assert!(state.account(&missing).is_some());
    Ok(())
}

#[test]
fn test_nested_revert_keeps_sibling_effects() -> eyre::Result<()> {
    init_tracing();
    let parent = Address::from_low_u64(0x0f0f);
    let a = Address::from_low_u64(0x0a0a);
    let b = Address::from_low_u64(0x0b0b);
    let c = Address::from_low_u64(0x0c0c);

    // SSTORE(0, 1)
    let write = "6001600055";
    let a_code = format!("{write}00");
    let b_code = format!("{write}{}{}00", call(0x0c0c), store_status(1));
    let c_code = format!("{write}60006000fd");
    let parent_code = format!("{}{}{}{}00", call(0x0a0a), store_status(0), call(0x0b0b), store_status(1));

    let mut state = InMemoryState::new()
        .with_code(parent, code(&parent_code))
        .with_code(a, code(&a_code))
        .with_code(b, code(&b_code))
        .with_code(c, code(&c_code));
    let receipt = transact(&Engine::default(), &mut state, parent, vec![], 1_000_000)?;
    assert!(receipt.is_success());

    assert_eq!(slot(&state, &parent, 0), Word::from(2u64));
    assert_eq!(slot(&state, &parent, 1), Word::from(2u64));
    assert_eq!(slot(&state, &a, 0), Word::one());
    assert_eq!(slot(&state, &b, 0), Word::one());
    assert_eq!(slot(&state, &b, 1), Word::one());
    assert!(state.storage_of(&c).is_empty());
    Ok(())
}

#[test]
fn test_revert_discards_the_whole_subtree() -> eyre::Result<()> {
    init_tracing();
    let parent = Address::from_low_u64(0x0f0f);
    let a = Address::from_low_u64(0x0a0a);
    let b = Address::from_low_u64(0x0b0b);
    let c = Address::from_low_u64(0x0c0c);

    let write = "6001600055";
    let a_code = format!("{write}00");
    // B calls C successfully, then reverts itself
    let b_code = format!("{write}{}5060006000fd", call(0x0c0c));
    let c_code = format!("{write}00");
    let parent_code = format!("{}{}{}{}00", call(0x0a0a), store_status(0), call(0x0b0b), store_status(1));

    let mut state = InMemoryState::new()
        .with_code(parent, code(&parent_code))
        .with_code(a, code(&a_code))
        .with_code(b, code(&b_code))
        .with_code(c, code(&c_code));
    let receipt = transact(&Engine::default(), &mut state, parent, vec![], 1_000_000)?;
    assert!(receipt.is_success());

    assert_eq!(slot(&state, &parent, 0), Word::from(2u64));
    assert_eq!(slot(&state, &parent, 1), Word::one());
    assert_eq!(slot(&state, &a, 0), Word::one());
    assert!(state.storage_of(&b).is_empty());
    assert!(state.storage_of(&c).is_empty());
    Ok(())
}

#[test]
fn test_call_depth_limit() -> eyre::Result<()> {
    init_tracing();
    let contract = Address::from_low_u64(0xdee9);
    // d = CALLDATALOAD(0); MSTORE(0, d + 1); CALL(GAS, ADDRESS, 0, 0, 32, 0, 0); SSTORE(d, status + 1)
    let program = [
        "600035", "600101", "600052", "60006000", "60206000", "6000", "30", "5a", "f1", "600101",
        "600035", "55", "00",
    ]
    .concat();
    let mut state = InMemoryState::new().with_code(contract, code(&program));

    // each level keeps 1/64 of what it forwards, so reaching depth 1024 needs about 2e13 up front
    let receipt = transact(&Engine::default(), &mut state, contract, vec![], 20_000_000_000_000)?;
    assert!(receipt.is_success());

    let storage = state.storage_of(&contract);
    assert_eq!(storage.len(), 1025);
    for depth in 0..1024u64 {
        assert_eq!(storage.get(&Word::from(depth)), Some(&Word::from(2u64)), "depth {depth}");
    }
    // the frame at depth 1024 could not spawn a child
    assert_eq!(storage.get(&Word::from(1024u64)), Some(&Word::one()));
    Ok(())
}

#[test]
fn test_memory_expansion_is_charged_once() -> eyre::Result<()> {
    init_tracing();
    let once = Address::from_low_u64(0x01_0000);
    let twice = Address::from_low_u64(0x02_0000);
    // PUSH1 0 MLOAD POP
    let mut state = InMemoryState::new()
        .with_code(once, code("6000515000"))
        .with_code(twice, code("600051506000515000"));
    let engine = Engine::default();

    let first = transact(&engine, &mut state, once, vec![], 100_000)?;
    let second = transact(&engine, &mut state, twice, vec![], 100_000)?;
    assert_eq!(second.gas_used - first.gas_used, 3 + 3 + 2);
    Ok(())
}
