use std::ops::{BitAnd, BitOr, BitXor, Not};

use i256::I256;
use primitive_types::U512;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

type U256 = primitive_types::U256;

/// 256-bit unsigned machine word. Arithmetic wraps modulo 2^256 unless stated otherwise.
#[derive(Default, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct Word(U256);

impl Word {
    pub fn mul_modulo(&self, that: &Word, modulo: &Word) -> Word {
        if modulo.is_zero() {
            return Word::zero();
        }
        let res = self.0.full_mul(that.0) % U512::from(modulo.0);
        Word(U256::from_big_endian(&res.to_big_endian()[32..]))
    }

    pub fn add_modulo(&self, that: &Word, modulo: &Word) -> Word {
        if modulo.is_zero() {
            return Word::zero();
        }
        let res = (U512::from(self.0) + U512::from(that.0)) % U512::from(modulo.0);
        Word(U256::from_big_endian(&res.to_big_endian()[32..]))
    }
}

impl std::fmt::Debug for Word {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::LowerHex::fmt(&self.0, f)
    }
}

impl std::fmt::Display for Word {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::LowerHex::fmt(&self.0, f)
    }
}

impl std::fmt::LowerHex for Word {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::LowerHex::fmt(&self.0, f)
    }
}

impl Word {
    pub fn into_bytes(&self) -> [u8; 32] {
        self.0.to_big_endian()
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self(U256::from_big_endian(bytes))
    }

    pub fn zero() -> Self {
        Self(U256::zero())
    }

    pub fn one() -> Self {
        Self(U256::one())
    }

    pub fn max() -> Self {
        Self(U256::max_value())
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn bit(&self, index: usize) -> bool {
        self.0.bit(index)
    }

    pub fn bits(&self) -> usize {
        self.0.bits()
    }

    /// Number of significant bytes, zero for the zero word.
    pub fn byte_len(&self) -> usize {
        self.0.bits().div_ceil(8)
    }

    pub fn low_u64(&self) -> u64 {
        self.0.low_u64()
    }

    pub fn to_u64(&self) -> Option<u64> {
        (self.0.bits() <= 64).then(|| self.0.low_u64())
    }

    pub fn to_usize(&self) -> Option<usize> {
        self.to_u64().and_then(|value| usize::try_from(value).ok())
    }

    /// Lossless below `usize::MAX`, clamps above it.
    pub fn saturating_usize(&self) -> usize {
        self.to_usize().unwrap_or(usize::MAX)
    }

    pub fn pow(&self, exp: Self) -> Self {
        let (ret, _) = self.0.overflowing_pow(exp.0);
        Self(ret)
    }

    pub fn saturating_sub(&self, rhs: Self) -> Self {
        Self(self.0.saturating_sub(rhs.0))
    }

    pub fn overflowing_add(&self, rhs: Self) -> (Self, bool) {
        let (word, flag) = self.0.overflowing_add(rhs.0);
        (Self(word), flag)
    }

    pub fn overflowing_mul(&self, rhs: Self) -> (Self, bool) {
        let (word, flag) = self.0.overflowing_mul(rhs.0);
        (Self(word), flag)
    }

    pub fn overflowing_sub(&self, rhs: Self) -> (Self, bool) {
        let (word, flag) = self.0.overflowing_sub(rhs.0);
        (Self(word), flag)
    }

    pub fn checked_div(&self, rhs: Self) -> Self {
        self.0.checked_div(rhs.0).map(Self).unwrap_or_default()
    }

    pub fn checked_rem(&self, rhs: Self) -> Self {
        self.0.checked_rem(rhs.0).map(Self).unwrap_or_default()
    }

    pub fn signed(&self) -> I256 {
        I256::from_be_bytes(self.into_bytes())
    }

    pub fn from_signed(value: I256) -> Self {
        Self::from_bytes(&value.to_be_bytes())
    }

    pub fn is_negative(&self) -> bool {
        self.bit(255)
    }

    pub fn sdiv(&self, rhs: Self) -> Self {
        if rhs.is_zero() {
            return Word::zero();
        }
        let a = self.signed();
        let b = rhs.signed();
        if a == I256::MIN && b == I256::from(-1) {
            return Word::from_signed(I256::MIN);
        }
        Word::from_signed(a / b)
    }

    pub fn smod(&self, rhs: Self) -> Self {
        if rhs.is_zero() || rhs == Word::max() {
            return Word::zero();
        }
        Word::from_signed(self.signed() % rhs.signed())
    }

    pub fn slt(&self, rhs: &Self) -> bool {
        self.signed() < rhs.signed()
    }

    pub fn sgt(&self, rhs: &Self) -> bool {
        self.signed() > rhs.signed()
    }

    /// Byte `index` counted from the most significant end, zero past 31.
    pub fn byte(&self, index: &Word) -> Word {
        match index.to_usize() {
            Some(index) if index < 32 => Word::from(self.into_bytes()[index]),
            _ => Word::zero(),
        }
    }

    pub fn shl(&self, shift: &Word) -> Word {
        match shift.to_usize() {
            Some(shift) if shift < 256 => Word(self.0 << shift),
            _ => Word::zero(),
        }
    }

    pub fn shr(&self, shift: &Word) -> Word {
        match shift.to_usize() {
            Some(shift) if shift < 256 => Word(self.0 >> shift),
            _ => Word::zero(),
        }
    }

    pub fn sar(&self, shift: &Word) -> Word {
        match shift.to_usize() {
            Some(shift) if shift < 256 => Word::from_signed(self.signed() >> shift),
            _ if self.is_negative() => Word::max(),
            _ => Word::zero(),
        }
    }

    /// Extends the sign bit of byte `size` (counted from the least significant end).
    pub fn sign_extend(&self, size: &Word) -> Word {
        match size.to_usize() {
            Some(size) if size < 31 => {
                let bit = size * 8 + 7;
                let mask = (U256::one() << (bit + 1)) - U256::one();
                if self.0.bit(bit) {
                    Word(self.0 | !mask)
                } else {
                    Word(self.0 & mask)
                }
            }
            _ => *self,
        }
    }

    pub fn from_hex(hex: &str) -> eyre::Result<Self> {
        let hex = hex.trim_start_matches("0x");
        let word = U256::from_str_radix(hex, 16);
        Ok(Self(
            word.map_err(|_| eyre::eyre!("Invalid U256: '{hex}'."))?,
        ))
    }
}

impl From<bool> for Word {
    fn from(value: bool) -> Self {
        if value { Word::one() } else { Word::zero() }
    }
}

impl From<u8> for Word {
    fn from(value: u8) -> Self {
        Self(U256::from(value))
    }
}

impl From<u32> for Word {
    fn from(value: u32) -> Self {
        Self(U256::from(value))
    }
}

impl From<u64> for Word {
    fn from(value: u64) -> Self {
        Self(U256::from(value))
    }
}

impl From<usize> for Word {
    fn from(value: usize) -> Self {
        Self(U256::from(value))
    }
}

impl From<u128> for Word {
    fn from(value: u128) -> Self {
        Self(U256::from(value))
    }
}

impl From<[u8; 32]> for Word {
    fn from(value: [u8; 32]) -> Self {
        Self::from_bytes(&value)
    }
}

impl std::ops::Sub<Word> for Word {
    type Output = Word;

    fn sub(self, rhs: Word) -> Self::Output {
        self.overflowing_sub(rhs).0
    }
}

impl std::ops::Add<Word> for Word {
    type Output = Word;

    fn add(self, rhs: Word) -> Self::Output {
        self.overflowing_add(rhs).0
    }
}

impl std::ops::Mul<Word> for Word {
    type Output = Word;

    fn mul(self, rhs: Word) -> Self::Output {
        self.overflowing_mul(rhs).0
    }
}

impl BitAnd for Word {
    type Output = Word;

    fn bitand(self, rhs: Self) -> Self::Output {
        Self(self.0 & rhs.0)
    }
}

impl BitOr for Word {
    type Output = Word;

    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

impl BitXor for Word {
    type Output = Word;

    fn bitxor(self, rhs: Self) -> Self::Output {
        Self(self.0 ^ rhs.0)
    }
}

impl Not for Word {
    type Output = Word;

    fn not(self) -> Self::Output {
        Self(!self.0)
    }
}

impl Serialize for Word {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("0x{:x}", self.0))
    }
}

impl<'de> Deserialize<'de> for Word {
    fn deserialize<D>(deserializer: D) -> Result<Word, D::Error>
    where
        D: Deserializer<'de>,
    {
        use serde::de::Error;

        let hex: String = Deserialize::deserialize(deserializer)?;
        Word::from_hex(&hex).map_err(|_| {
            D::Error::invalid_value(serde::de::Unexpected::Str(&hex), &"256-bit hex number")
        })
    }
}

/// Extracts the message of a Solidity `Error(string)` revert payload.
pub fn decode_error_string(ret: &[u8]) -> Option<String> {
    if ret.len() < 4 + 32 + 32 {
        return None;
    }
    let offset = Word::from_bytes(&ret[4..4 + 32]).to_usize()?;
    let offset = offset.checked_add(4)?;
    let size_end = offset.checked_add(32)?;
    if ret.len() < size_end {
        return None;
    }
    let size = Word::from_bytes(&ret[offset..size_end]).to_usize()?;
    let end = size_end.checked_add(size)?;
    let data = ret.get(size_end..end)?;
    String::from_utf8(data.to_vec()).ok()
}
