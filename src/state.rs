use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::common::{Address, Word, hash::EMPTY_CODE_HASH, hash::keccak256};

/// Opaque point-in-time marker handed out by [`WorldState::take_snapshot`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Snapshot(usize);

impl Snapshot {
    pub fn new(id: usize) -> Self {
        Self(id)
    }

    pub fn id(&self) -> usize {
        self.0
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub balance: Word,
    pub nonce: u64,
    #[serde(rename = "codeHash")]
    pub code_hash: Word,
}

impl Default for Account {
    fn default() -> Self {
        Self {
            balance: Word::zero(),
            nonce: 0,
            code_hash: *EMPTY_CODE_HASH,
        }
    }
}

impl Account {
    pub fn with_balance(balance: Word) -> Self {
        Self {
            balance,
            ..Default::default()
        }
    }

    /// No balance, no nonce, no code.
    pub fn is_empty(&self) -> bool {
        self.balance.is_zero() && self.nonce == 0 && self.code_hash == *EMPTY_CODE_HASH
    }

    pub fn has_code(&self) -> bool {
        self.code_hash != *EMPTY_CODE_HASH
    }
}

/// Everything the engine reads from and writes to the world. Reads of missing
/// accounts or slots return zero values; writes must be undone exactly by `restore`.
pub trait WorldState {
    fn account_exists(&self, address: &Address) -> bool;
    /// Missing, or present with no balance, zero nonce and no code.
    fn is_dead_account(&self, address: &Address) -> bool;
    fn get_balance(&self, address: &Address) -> Word;
    fn get_nonce(&self, address: &Address) -> u64;
    /// Zero for missing accounts.
    fn get_code_hash(&self, address: &Address) -> Word;
    fn get_code(&self, address: &Address) -> Vec<u8>;

    fn create_account(&mut self, address: &Address, balance: Word);
    fn delete_account(&mut self, address: &Address);
    fn add_to_balance(&mut self, address: &Address, value: &Word);
    fn subtract_from_balance(&mut self, address: &Address, value: &Word);
    fn increment_nonce(&mut self, address: &Address);
    fn set_code(&mut self, address: &Address, code: Vec<u8>);

    fn get_storage(&self, address: &Address, key: &Word) -> Word;
    fn set_storage(&mut self, address: &Address, key: &Word, value: Word);
    /// Value of the slot when the current transaction started.
    fn get_original_storage(&self, address: &Address, key: &Word) -> Word;
    fn clear_storage(&mut self, address: &Address);

    fn get_transient_storage(&self, address: &Address, key: &Word) -> Word;
    fn set_transient_storage(&mut self, address: &Address, key: &Word, value: Word);

    fn take_snapshot(&mut self) -> Snapshot;
    fn restore(&mut self, snapshot: Snapshot);

    /// Marks a transaction boundary: original values are re-captured and transient storage is dropped.
    fn begin_transaction(&mut self);
}

#[derive(Clone, Debug)]
enum Change {
    Account(Address, Option<Account>),
    Storage(Address, Word, Word),
    StorageCleared(Address, HashMap<Word, Word>),
    Transient(Address, Word, Word),
}

/// Journaled in-memory world state. Every write records the value it replaced.
#[derive(Clone, Debug, Default)]
pub struct InMemoryState {
    accounts: HashMap<Address, Account>,
    storage: HashMap<Address, HashMap<Word, Word>>,
    codes: HashMap<Word, Vec<u8>>,
    original: HashMap<(Address, Word), Word>,
    transient: HashMap<(Address, Word), Word>,
    journal: Vec<Change>,
}

impl InMemoryState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_account(mut self, address: Address, balance: Word) -> Self {
        self.accounts.insert(address, Account::with_balance(balance));
        self
    }

    pub fn with_code(mut self, address: Address, code: Vec<u8>) -> Self {
        let hash = Word::from(keccak256(&code));
        let account = self.accounts.entry(address).or_default();
        account.code_hash = hash;
        if account.nonce == 0 {
            account.nonce = 1;
        }
        self.codes.insert(hash, code);
        self
    }

    pub fn with_storage(mut self, address: Address, key: Word, value: Word) -> Self {
        self.accounts.entry(address).or_default();
        self.storage.entry(address).or_default().insert(key, value);
        self
    }

    pub fn account(&self, address: &Address) -> Option<&Account> {
        self.accounts.get(address)
    }

    pub fn accounts(&self) -> impl Iterator<Item = (&Address, &Account)> {
        self.accounts.iter()
    }

    pub fn storage_of(&self, address: &Address) -> HashMap<Word, Word> {
        self.storage.get(address).cloned().unwrap_or_default()
    }

    fn update(&mut self, address: &Address, f: impl FnOnce(&mut Account)) {
        let previous = self.accounts.get(address).cloned();
        let mut account = previous.clone().unwrap_or_default();
        f(&mut account);
        self.journal.push(Change::Account(*address, previous));
        self.accounts.insert(*address, account);
    }
}

impl WorldState for InMemoryState {
    fn account_exists(&self, address: &Address) -> bool {
        self.accounts.contains_key(address)
    }

    fn is_dead_account(&self, address: &Address) -> bool {
        self.accounts.get(address).is_none_or(Account::is_empty)
    }

    fn get_balance(&self, address: &Address) -> Word {
        self.accounts
            .get(address)
            .map(|account| account.balance)
            .unwrap_or_default()
    }

    fn get_nonce(&self, address: &Address) -> u64 {
        self.accounts
            .get(address)
            .map(|account| account.nonce)
            .unwrap_or_default()
    }

    fn get_code_hash(&self, address: &Address) -> Word {
        self.accounts
            .get(address)
            .map(|account| account.code_hash)
            .unwrap_or_default()
    }

    fn get_code(&self, address: &Address) -> Vec<u8> {
        self.accounts
            .get(address)
            .and_then(|account| self.codes.get(&account.code_hash))
            .cloned()
            .unwrap_or_default()
    }

    fn create_account(&mut self, address: &Address, balance: Word) {
        let previous = self.accounts.insert(*address, Account::with_balance(balance));
        self.journal.push(Change::Account(*address, previous));
    }

    fn delete_account(&mut self, address: &Address) {
        self.clear_storage(address);
        if let Some(previous) = self.accounts.remove(address) {
            self.journal.push(Change::Account(*address, Some(previous)));
        }
    }

    fn add_to_balance(&mut self, address: &Address, value: &Word) {
        self.update(address, |account| account.balance = account.balance + *value);
    }

    fn subtract_from_balance(&mut self, address: &Address, value: &Word) {
        self.update(address, |account| {
            account.balance = account.balance.saturating_sub(*value)
        });
    }

    fn increment_nonce(&mut self, address: &Address) {
        self.update(address, |account| account.nonce = account.nonce.saturating_add(1));
    }

    fn set_code(&mut self, address: &Address, code: Vec<u8>) {
        let hash = Word::from(keccak256(&code));
        self.codes.entry(hash).or_insert(code);
        self.update(address, |account| account.code_hash = hash);
    }

    fn get_storage(&self, address: &Address, key: &Word) -> Word {
        self.storage
            .get(address)
            .and_then(|slots| slots.get(key))
            .copied()
            .unwrap_or_default()
    }

    fn set_storage(&mut self, address: &Address, key: &Word, value: Word) {
        let previous = self.get_storage(address, key);
        self.original.entry((*address, *key)).or_insert(previous);
        self.journal.push(Change::Storage(*address, *key, previous));
        self.storage.entry(*address).or_default().insert(*key, value);
    }

    fn get_original_storage(&self, address: &Address, key: &Word) -> Word {
        self.original
            .get(&(*address, *key))
            .copied()
            .unwrap_or_else(|| self.get_storage(address, key))
    }

    fn clear_storage(&mut self, address: &Address) {
        let Some(slots) = self.storage.remove(address) else {
            return;
        };
        for (key, value) in &slots {
            self.original.entry((*address, *key)).or_insert(*value);
        }
        self.journal.push(Change::StorageCleared(*address, slots));
    }

    fn get_transient_storage(&self, address: &Address, key: &Word) -> Word {
        self.transient
            .get(&(*address, *key))
            .copied()
            .unwrap_or_default()
    }

    fn set_transient_storage(&mut self, address: &Address, key: &Word, value: Word) {
        let previous = self.transient.insert((*address, *key), value).unwrap_or_default();
        self.journal.push(Change::Transient(*address, *key, previous));
    }

    fn take_snapshot(&mut self) -> Snapshot {
        Snapshot(self.journal.len())
    }

    fn restore(&mut self, snapshot: Snapshot) {
        while self.journal.len() > snapshot.0 {
            let Some(change) = self.journal.pop() else {
                break;
            };
            match change {
                Change::Account(address, Some(account)) => {
                    self.accounts.insert(address, account);
                }
                Change::Account(address, None) => {
                    self.accounts.remove(&address);
                }
                Change::Storage(address, key, value) => {
                    let slots = self.storage.entry(address).or_default();
                    if value.is_zero() {
                        slots.remove(&key);
                    } else {
                        slots.insert(key, value);
                    }
                }
                Change::StorageCleared(address, slots) => {
                    self.storage.insert(address, slots);
                }
                Change::Transient(address, key, value) => {
                    self.transient.insert((address, key), value);
                }
            }
        }
    }

    fn begin_transaction(&mut self) {
        self.original.clear();
        self.transient.clear();
        self.journal.clear();
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn alice() -> Address {
        Address::from_low_u64(0xa11ce)
    }

    #[test]
    fn test_restore_undoes_everything() {
        let mut state = InMemoryState::new()
            .with_account(alice(), Word::from(100u64))
            .with_storage(alice(), Word::one(), Word::from(7u64));
        let before = state.clone();

        let snapshot = state.take_snapshot();
        state.subtract_from_balance(&alice(), &Word::from(40u64));
        state.increment_nonce(&alice());
        state.set_storage(&alice(), &Word::one(), Word::zero());
        state.set_storage(&alice(), &Word::from(2u64), Word::from(9u64));
        state.set_code(&alice(), vec![0x00]);
        state.create_account(&Address::from_low_u64(1), Word::from(5u64));
        state.set_transient_storage(&alice(), &Word::one(), Word::one());

        assert_eq!(state.get_balance(&alice()), Word::from(60u64));
        state.restore(snapshot);

        assert_eq!(state.accounts, before.accounts);
        assert_eq!(state.storage_of(&alice()), before.storage_of(&alice()));
        assert_eq!(state.get_transient_storage(&alice(), &Word::one()), Word::zero());
        assert!(!state.account_exists(&Address::from_low_u64(1)));
    }

    #[test]
    fn test_nested_snapshots() {
        let mut state = InMemoryState::new().with_account(alice(), Word::from(10u64));
        let outer = state.take_snapshot();
        state.add_to_balance(&alice(), &Word::one());
        let inner = state.take_snapshot();
        state.add_to_balance(&alice(), &Word::one());
        state.restore(inner);
        assert_eq!(state.get_balance(&alice()), Word::from(11u64));
        state.restore(outer);
        assert_eq!(state.get_balance(&alice()), Word::from(10u64));
    }

    #[test]
    fn test_original_storage() {
        let mut state = InMemoryState::new().with_storage(alice(), Word::one(), Word::from(3u64));
        state.begin_transaction();
        state.set_storage(&alice(), &Word::one(), Word::from(4u64));
        state.set_storage(&alice(), &Word::one(), Word::from(5u64));
        assert_eq!(state.get_original_storage(&alice(), &Word::one()), Word::from(3u64));
        assert_eq!(state.get_original_storage(&alice(), &Word::from(2u64)), Word::zero());

        state.begin_transaction();
        assert_eq!(state.get_original_storage(&alice(), &Word::one()), Word::from(5u64));
    }

    #[test]
    fn test_dead_accounts() {
        let mut state = InMemoryState::new();
        assert!(state.is_dead_account(&alice()));
        state.create_account(&alice(), Word::zero());
        assert!(state.account_exists(&alice()));
        assert!(state.is_dead_account(&alice()));
        state.increment_nonce(&alice());
        assert!(!state.is_dead_account(&alice()));
        assert_eq!(state.get_code_hash(&alice()), *EMPTY_CODE_HASH);
        assert_eq!(state.get_code_hash(&Address::from_low_u64(9)), Word::zero());
    }

    #[test]
    fn test_delete_account_clears_storage() {
        let mut state = InMemoryState::new().with_storage(alice(), Word::one(), Word::one());
        let snapshot = state.take_snapshot();
        state.delete_account(&alice());
        assert!(!state.account_exists(&alice()));
        assert_eq!(state.get_storage(&alice(), &Word::one()), Word::zero());
        state.restore(snapshot);
        assert_eq!(state.get_storage(&alice(), &Word::one()), Word::one());
    }
}
