use once_cell::sync::Lazy;

use crate::common::word::Word;

pub fn keccak256(input: &[u8]) -> [u8; 32] {
    use tiny_keccak::Hasher;
    let mut sha3 = tiny_keccak::Keccak::v256();
    let mut ret = [0u8; 32];
    sha3.update(input);
    sha3.finalize(&mut ret);
    ret
}

/// Hash of the empty byte string, the code hash of every account without code.
pub static EMPTY_CODE_HASH: Lazy<Word> = Lazy::new(|| Word::from(keccak256(&[])));

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_code_hash() {
        assert_eq!(
            *EMPTY_CODE_HASH,
            Word::from_hex("0xc5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470")
                .unwrap()
        );
    }
}
