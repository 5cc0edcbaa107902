use crate::common::Word;

/// Byte-addressable frame memory. Its length only grows, in whole words.
#[derive(Debug, Default, Clone)]
pub struct Memory {
    data: Vec<u8>,
}

impl Memory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn words(&self) -> u64 {
        (self.data.len() / 32) as u64
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Grows to cover `[0, end)` rounded up to a word. Never shrinks.
    pub fn expand(&mut self, end: usize) {
        let size = end.div_ceil(32) * 32;
        if size > self.data.len() {
            self.data.resize(size, 0);
        }
    }

    /// Zero-padded view: bytes past the current length read as zero and do not grow memory.
    pub fn load(&self, offset: usize, len: usize) -> Vec<u8> {
        let mut ret = vec![0u8; len];
        if offset < self.data.len() {
            let end = self.data.len().min(offset.saturating_add(len));
            ret[..end - offset].copy_from_slice(&self.data[offset..end]);
        }
        ret
    }

    pub fn load_word(&self, offset: usize) -> Word {
        Word::from_bytes(&self.load(offset, 32))
    }

    pub fn store(&mut self, offset: usize, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        self.expand(offset + data.len());
        self.data[offset..offset + data.len()].copy_from_slice(data);
    }

    pub fn store_word(&mut self, offset: usize, value: &Word) {
        self.store(offset, &value.into_bytes());
    }

    /// Writes `len` bytes of `source` starting at `source_offset`, zero-filling past its end.
    pub fn store_padded(&mut self, offset: usize, source: &[u8], source_offset: usize, len: usize) {
        if len == 0 {
            return;
        }
        self.expand(offset + len);
        let target = &mut self.data[offset..offset + len];
        target.fill(0);
        if source_offset < source.len() {
            let available = (source.len() - source_offset).min(len);
            target[..available].copy_from_slice(&source[source_offset..source_offset + available]);
        }
    }

    pub fn copy_within(&mut self, dst: usize, src: usize, len: usize) {
        if len == 0 {
            return;
        }
        self.expand(dst.max(src) + len);
        self.data.copy_within(src..src + len, dst);
    }
}
