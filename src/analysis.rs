use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use once_cell::sync::{Lazy, OnceCell};

use crate::{common::Word, precompiles::Precompile};

/// Bytecode plus everything derived from it once: jump destinations and subroutine entries.
#[derive(Debug, Default)]
pub struct CodeInfo {
    pub code: Vec<u8>,
    jumpdests: Vec<u64>,
    subroutines: Vec<u64>,
    pub precompile: Option<Precompile>,
}

const JUMPDEST: u8 = 0x5b;
const BEGINSUB: u8 = 0x5c;
const PUSH1: u8 = 0x60;
const PUSH32: u8 = 0x7f;

static EMPTY: Lazy<Arc<CodeInfo>> = Lazy::new(|| Arc::new(CodeInfo::default()));

impl CodeInfo {
    pub fn new(code: Vec<u8>) -> Self {
        let words = code.len().div_ceil(64);
        let mut jumpdests = vec![0u64; words];
        let mut subroutines = vec![0u64; words];

        let mut pos = 0;
        while pos < code.len() {
            match code[pos] {
                JUMPDEST => set(&mut jumpdests, pos),
                BEGINSUB => set(&mut subroutines, pos),
                op @ PUSH1..=PUSH32 => pos += (op - PUSH1 + 1) as usize,
                _ => (),
            }
            pos += 1;
        }

        Self {
            code,
            jumpdests,
            subroutines,
            precompile: None,
        }
    }

    pub fn precompile(precompile: Precompile) -> Self {
        Self {
            precompile: Some(precompile),
            ..Default::default()
        }
    }

    pub fn empty() -> Arc<CodeInfo> {
        EMPTY.clone()
    }

    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    /// Whether `dest` holds a JUMPDEST (or BEGINSUB when `subroutine`) outside any PUSH data.
    pub fn is_valid_jump(&self, dest: &Word, subroutine: bool) -> bool {
        let Some(dest) = dest.to_usize() else {
            return false;
        };
        let map = if subroutine {
            &self.subroutines
        } else {
            &self.jumpdests
        };
        map.get(dest / 64)
            .is_some_and(|bits| bits & (1u64 << (dest % 64)) != 0)
    }
}

fn set(map: &mut [u64], pos: usize) {
    map[pos / 64] |= 1u64 << (pos % 64);
}

/// Concurrent code analysis cache keyed by code hash. Each entry is analysed at most once.
pub struct CodeCache {
    capacity: usize,
    entries: RwLock<HashMap<Word, Arc<OnceCell<Arc<CodeInfo>>>>>,
}

impl CodeCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn disabled() -> Self {
        Self::new(0)
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|entries| entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the cached analysis for `hash`, running `load` at most once per key.
    /// When the cache is disabled, full, or poisoned the code is analysed without caching.
    pub fn get_or_analyse(&self, hash: &Word, load: impl FnOnce() -> Vec<u8>) -> Arc<CodeInfo> {
        match self.slot(hash) {
            Some(slot) => slot
                .get_or_init(|| Arc::new(CodeInfo::new(load())))
                .clone(),
            None => Arc::new(CodeInfo::new(load())),
        }
    }

    fn slot(&self, hash: &Word) -> Option<Arc<OnceCell<Arc<CodeInfo>>>> {
        if self.capacity == 0 {
            return None;
        }
        if let Some(slot) = self.entries.read().ok()?.get(hash) {
            return Some(slot.clone());
        }
        let mut entries = match self.entries.write() {
            Ok(entries) => entries,
            Err(_) => {
                tracing::warn!("code cache lock poisoned, analysing without cache");
                return None;
            }
        };
        if !entries.contains_key(hash) && entries.len() >= self.capacity {
            // TODO: replace wholesale eviction with LRU once hit rates are measured
            tracing::debug!(capacity = self.capacity, "code cache full, evicting");
            entries.clear();
        }
        Some(entries.entry(*hash).or_default().clone())
    }
}

impl Default for CodeCache {
    fn default() -> Self {
        Self::new(4096)
    }
}
