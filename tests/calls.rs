mod common;

use armature::{
    Address, Armature, Builder, Engine, ExceptionType, ExecutionType, Fork, InMemoryState, Spec,
    Status, Word, WorldState,
    tracer::{EventData, LoggingTracer},
};
use pretty_assertions::assert_eq;

use common::{call, code, init_tracing, sender, slot, store_status, transact};

#[test]
fn test_delegatecall_keeps_caller_and_value() -> eyre::Result<()> {
    init_tracing();
    let proxy = Address::from_low_u64(0x9999);
    let library = Address::from_low_u64(0x1111);
    // SSTORE(0, CALLER); SSTORE(1, CALLVALUE)
    let library_code = "336000553460015500";
    // DELEGATECALL(GAS, 0x1111, 0, 0, 0, 0); SSTORE(2, status)
    let proxy_code = "60006000600060006111115af4600255".to_owned() + "00";

    let mut state = InMemoryState::new()
        .with_account(sender(), Word::from(7u64))
        .with_code(proxy, code(&proxy_code))
        .with_code(library, code(library_code));
    let receipt = Armature::new()
        .call(proxy, vec![])
        .with_sender(sender())
        .with_value(Word::from(7u64))
        .with_gas(100_000)
        .ready()
        .apply(&Engine::default(), &mut state)?;
    assert!(receipt.is_success());

    assert_eq!(slot(&state, &proxy, 0), sender().as_word());
    assert_eq!(slot(&state, &proxy, 1), Word::from(7u64));
    assert_eq!(slot(&state, &proxy, 2), Word::one());
    assert!(state.storage_of(&library).is_empty());
    assert_eq!(state.get_balance(&proxy), Word::from(7u64));
    Ok(())
}

#[test]
fn test_staticcall_rejects_state_changes() -> eyre::Result<()> {
    init_tracing();
    let caller = Address::from_low_u64(0x0f0f);
    let callee = Address::from_low_u64(0x0c0c);
    // STATICCALL(10000, 0x0c0c, 0, 0, 0, 0); the faulting callee burns what it was given
    let caller_code = format!("6000600060006000610c0c612710fa{}00", store_status(0));

    let mut state = InMemoryState::new()
        .with_code(caller, code(&caller_code))
        .with_code(callee, code("600160005500"));
    let receipt = transact(&Engine::default(), &mut state, caller, vec![], 100_000)?;
    assert!(receipt.is_success());

    assert_eq!(slot(&state, &caller, 0), Word::one());
    assert!(state.storage_of(&callee).is_empty());
    Ok(())
}

/// CALL(0 gas, 0xbeef, 10 wei) and store the status.
fn pay_beef() -> String {
    format!("6000600060006000600a61beef6000f1{}00", store_status(0))
}

#[test]
fn test_value_transfer_to_new_account() -> eyre::Result<()> {
    init_tracing();
    let payer = Address::from_low_u64(0x9a9a);
    let payee = Address::from_low_u64(0xbeef);
    let mut state = InMemoryState::new()
        .with_account(payer, Word::from(100u64))
        .with_code(payer, code(&pay_beef()));

    let receipt = transact(&Engine::default(), &mut state, payer, vec![], 100_000)?;
    assert!(receipt.is_success());
    assert_eq!(slot(&state, &payer, 0), Word::from(2u64));
    assert_eq!(state.get_balance(&payee), Word::from(10u64));
    assert_eq!(state.get_balance(&payer), Word::from(90u64));
    Ok(())
}

#[test]
fn test_value_transfer_beyond_balance_fails_softly() -> eyre::Result<()> {
    init_tracing();
    let payer = Address::from_low_u64(0x9a9a);
    let payee = Address::from_low_u64(0xbeef);
    let mut state = InMemoryState::new().with_code(payer, code(&pay_beef()));

    let receipt = transact(&Engine::default(), &mut state, payer, vec![], 100_000)?;
    assert!(receipt.is_success());
    assert_eq!(slot(&state, &payer, 0), Word::one());
    assert!(state.account(&payee).is_none());
    Ok(())
}

#[test]
fn test_return_data_is_visible_to_the_caller() -> eyre::Result<()> {
    init_tracing();
    let caller = Address::from_low_u64(0x0f0f);
    let callee = Address::from_low_u64(0x2a2a);
    let caller_code = [
        // CALL(GAS, 0x2a2a, 0, 0, 0, 0, 32) and drop the status
        "60206000600060006000612a2a5af150",
        // SSTORE(0, MLOAD(0))
        "600051600055",
        // SSTORE(1, RETURNDATASIZE)
        "3d600155",
        // RETURNDATACOPY(32, 0, 32); SSTORE(2, MLOAD(32))
        "6020600060203e",
        "602051600255",
        "00",
    ]
    .concat();

    let mut state = InMemoryState::new()
        .with_code(caller, code(&caller_code))
        // MSTORE(0, 42); RETURN(0, 32)
        .with_code(callee, code("602a60005260206000f3"));
    let receipt = transact(&Engine::default(), &mut state, caller, vec![], 100_000)?;
    assert!(receipt.is_success());

    assert_eq!(slot(&state, &caller, 0), Word::from(42u64));
    assert_eq!(slot(&state, &caller, 1), Word::from(32u64));
    assert_eq!(slot(&state, &caller, 2), Word::from(42u64));
    Ok(())
}

#[test]
fn test_output_lands_in_the_window_of_each_call() -> eyre::Result<()> {
    init_tracing();
    let outer = Address::from_low_u64(0x0f0f);
    let middle = Address::from_low_u64(0x3b3b);
    let callee = Address::from_low_u64(0x2a2a);
    // CALL(GAS, 0x2a2a, 0, 0, 0, 64, 32); RETURN(64, 32)
    let middle_code = "60206040600060006000612a2a5af150".to_owned() + "60206040f3";
    // CALL(GAS, 0x3b3b, 0, 0, 0, 0, 32); SSTORE(0, MLOAD(0))
    let outer_code = "60206000600060006000613b3b5af150".to_owned() + "600051600055" + "00";

    let mut state = InMemoryState::new()
        .with_code(outer, code(&outer_code))
        .with_code(middle, code(&middle_code))
        .with_code(callee, code("602a60005260206000f3"));
    let engine = Engine::default();

    let receipt = transact(&engine, &mut state, middle, vec![], 200_000)?;
    assert!(receipt.is_success());
    assert_eq!(receipt.output, Word::from(42u64).into_bytes().to_vec());

    let receipt = transact(&engine, &mut state, outer, vec![], 200_000)?;
    assert!(receipt.is_success());
    assert_eq!(slot(&state, &outer, 0), Word::from(42u64));
    Ok(())
}

#[test]
fn test_returndatacopy_out_of_bounds() -> eyre::Result<()> {
    init_tracing();
    let caller = Address::from_low_u64(0x0f0f);
    let callee = Address::from_low_u64(0x2a2a);
    // the callee returns 32 bytes, the caller asks for 32 bytes from offset 1
    let caller_code = "60206000600060006000612a2a5af150".to_owned() + "6020600160003e" + "00";

    let mut state = InMemoryState::new()
        .with_code(caller, code(&caller_code))
        .with_code(callee, code("602a60005260206000f3"));
    let receipt = transact(&Engine::default(), &mut state, caller, vec![], 100_000)?;

    assert_eq!(receipt.status, Status::Failure(ExceptionType::AccessViolation));
    assert_eq!(receipt.gas_used, 100_000);
    Ok(())
}

#[test]
fn test_identity_precompile() -> eyre::Result<()> {
    init_tracing();
    let caller = Address::from_low_u64(0x0f0f);
    let caller_code = [
        // MSTORE(0, 0xdeadbeef)
        "63deadbeef600052",
        // CALL(GAS, 0x04, 0, 28, 4, 60, 4)
        "6004603c6004601c600060045af1",
        store_status(0).as_str(),
        // SSTORE(1, MLOAD(32))
        "602051600155",
        "00",
    ]
    .concat();

    let mut state = InMemoryState::new().with_code(caller, code(&caller_code));
    let receipt = transact(&Engine::default(), &mut state, caller, vec![], 100_000)?;
    assert!(receipt.is_success());

    assert_eq!(slot(&state, &caller, 0), Word::from(2u64));
    assert_eq!(slot(&state, &caller, 1), Word::from(0xdeadbeefu64));
    Ok(())
}

#[test]
fn test_action_events_follow_the_call_tree() -> eyre::Result<()> {
    init_tracing();
    let caller = Address::from_low_u64(0x0f0f);
    let callee = Address::from_low_u64(0x0a0a);
    let mut state = InMemoryState::new()
        .with_code(caller, code(&(call(0x0a0a) + "00")))
        .with_code(callee, code("60006000f3"));

    let mut tracer = LoggingTracer::actions();
    let receipt = Armature::new()
        .call(caller, vec![])
        .with_sender(sender())
        .with_gas(100_000)
        .ready()
        .apply_traced(&Engine::default(), &mut state, &mut tracer)?;
    assert!(receipt.is_success());

    let events = tracer
        .events()
        .iter()
        .map(|event| {
            let name = match &event.data {
                EventData::Call { .. } => "call",
                EventData::Return { .. } => "return",
                EventData::Revert { .. } => "revert",
                EventData::Error { .. } => "error",
                _ => "other",
            };
            (name, event.depth)
        })
        .collect::<Vec<_>>();
    assert_eq!(
        events,
        vec![("call", 0), ("call", 1), ("return", 1), ("return", 0)]
    );

    match &tracer.events()[1].data {
        EventData::Call { kind, from, to, .. } => {
            assert_eq!(*kind, ExecutionType::Call);
            assert_eq!(*from, caller);
            assert_eq!(*to, callee);
        }
        other => eyre::bail!("unexpected event {other:?}"),
    }
    Ok(())
}

#[test]
fn test_point_evaluation_exists_from_cancun() -> eyre::Result<()> {
    init_tracing();
    let caller = Address::from_low_u64(0x0f0f);
    // CALL(60000, 0x0a, 0, 0, 0, 0, 0) with no input
    let caller_code = format!("{}{}00", call(0x000a).replace("5af1", "61ea60f1"), store_status(0));

    let mut state = InMemoryState::new().with_code(caller, code(&caller_code));
    let receipt = transact(&Engine::default(), &mut state, caller, vec![], 100_000)?;
    assert!(receipt.is_success());
    assert_eq!(slot(&state, &caller, 0), Word::one());

    // before Cancun 0x0a is a plain empty account
    let mut state = InMemoryState::new().with_code(caller, code(&caller_code));
    let shanghai = Engine::new(Spec::from(Fork::Shanghai));
    let receipt = transact(&shanghai, &mut state, caller, vec![], 100_000)?;
    assert!(receipt.is_success());
    assert_eq!(slot(&state, &caller, 0), Word::from(2u64));
    Ok(())
}
