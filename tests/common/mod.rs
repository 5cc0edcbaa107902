#![allow(dead_code)]

use armature::{Address, Armature, Builder, Engine, InMemoryState, Receipt, Word};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn sender() -> Address {
    Address::from_low_u64(0xa11ce)
}

pub fn code(hex: &str) -> Vec<u8> {
    hex::decode(hex).expect("valid hex")
}

/// CALL to `address` forwarding all gas, no value, empty input and output.
pub fn call(address: u16) -> String {
    format!("6000600060006000600061{address:04x}5af1")
}

/// Stores the status word plus one at `slot`, so that a failed call (0) is still visible as 1.
pub fn store_status(slot: u8) -> String {
    format!("60010160{slot:02x}55")
}

pub fn slot(state: &InMemoryState, address: &Address, key: u64) -> Word {
    state
        .storage_of(address)
        .get(&Word::from(key))
        .copied()
        .unwrap_or_default()
}

pub fn transact(engine: &Engine, state: &mut InMemoryState, to: Address, data: Vec<u8>, gas: i64) -> eyre::Result<Receipt> {
    let receipt = Armature::new()
        .call(to, data)
        .with_sender(sender())
        .with_gas(gas)
        .ready()
        .apply(engine, state)?;
    Ok(receipt)
}
