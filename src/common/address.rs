use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::common::{error::Error, hash::keccak256, word::Word};

#[derive(Clone, Copy, Default, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct Address(pub [u8; 20]);

impl Address {
    pub fn zero() -> Self {
        Self([0u8; 20])
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|byte| byte == &0)
    }

    pub fn from_low_u64(value: u64) -> Self {
        let mut bytes = [0u8; 20];
        bytes[12..].copy_from_slice(&value.to_be_bytes());
        Self(bytes)
    }

    /// CREATE target: `keccak256(rlp([sender, nonce]))[12:]`.
    pub fn create(&self, nonce: u64) -> Address {
        let nonce_bytes = nonce
            .to_be_bytes()
            .into_iter()
            .skip_while(|byte| byte == &0)
            .collect::<Vec<_>>();

        let mut buffer = Vec::with_capacity(1 + 21 + 9);
        let nonce_len = match nonce_bytes.as_slice() {
            [single] if *single < 0x80 => 1,
            bytes => 1 + bytes.len(),
        };
        buffer.push(0xc0u8 + (1 + self.0.len() + nonce_len) as u8);
        buffer.push(0x80u8 + self.0.len() as u8);
        buffer.extend_from_slice(&self.0);
        match nonce_bytes.as_slice() {
            // single bytes below 0x80 are their own RLP encoding
            [single] if *single < 0x80 => buffer.push(*single),
            bytes => {
                buffer.push(0x80u8 + bytes.len() as u8);
                buffer.extend_from_slice(bytes);
            }
        }

        Self::from_hash(&keccak256(&buffer))
    }

    /// CREATE2 target: `keccak256(0xff ++ sender ++ salt ++ keccak256(init_code))[12:]`.
    pub fn create2(&self, salt: &Word, init_code: &[u8]) -> Address {
        let mut buffer = Vec::with_capacity(1 + 20 + 32 + 32);
        buffer.push(0xff);
        buffer.extend_from_slice(&self.0);
        buffer.extend_from_slice(&salt.into_bytes());
        buffer.extend_from_slice(&keccak256(init_code));
        Self::from_hash(&keccak256(&buffer))
    }

    fn from_hash(hash: &[u8; 32]) -> Address {
        let mut addr = [0u8; 20];
        addr.copy_from_slice(&hash[12..32]);
        Address(addr)
    }

    pub fn as_word(&self) -> Word {
        Word::from(self)
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl std::fmt::Debug for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Address(0x{})", hex::encode(self.0))
    }
}

impl From<&Address> for Word {
    fn from(value: &Address) -> Self {
        let mut bytes = [0u8; 32];
        bytes[12..].copy_from_slice(&value.0);
        Word::from_bytes(&bytes)
    }
}

impl From<&Word> for Address {
    fn from(value: &Word) -> Self {
        let bytes: [u8; 32] = value.into_bytes();
        let mut ret = Address::default();
        ret.0[..].copy_from_slice(&bytes[12..]);
        ret
    }
}

impl From<[u8; 20]> for Address {
    fn from(value: [u8; 20]) -> Self {
        Self(value)
    }
}

impl TryFrom<&[u8]> for Address {
    type Error = Error;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        let bytes: [u8; 20] = value.try_into().map_err(|_| Error::InvalidAddress)?;
        Ok(Address(bytes))
    }
}

impl TryFrom<&str> for Address {
    type Error = Error;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        if value.len() != 40 && value.len() != 42 {
            return Err(Error::InvalidAddress);
        }
        let mut bytes = [0u8; 20];
        hex::decode_to_slice(value.trim_start_matches("0x"), &mut bytes)
            .map_err(|e| Error::InvalidHex(e.to_string()))?;
        Ok(Address(bytes))
    }
}

impl Serialize for Address {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D>(deserializer: D) -> Result<Address, D::Error>
    where
        D: Deserializer<'de>,
    {
        use serde::de::Error;

        let hex: String = Deserialize::deserialize(deserializer)?;
        Address::try_from(hex.as_str()).map_err(|_| {
            D::Error::invalid_value(serde::de::Unexpected::Str(&hex), &"20-byte hex address")
        })
    }
}

/// Address from a hex literal known to be valid; panics otherwise.
#[cfg(test)]
pub const fn addr(s: &str) -> Address {
    Address(crate::common::decode(s))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_address() {
        assert_eq!(
            addr("0x5bc1c1942f2333acb9ce156525bc079fad983f13").create(0x065b),
            addr("0xe77afefd5b7beb79d1843e65a0fd54963abc742f")
        );
    }

    #[test]
    fn test_create_address_small_nonce() {
        let sender = addr("0x6ac7ea33f8831ea9dcc53393aaa88b25a785dbf0");
        assert_eq!(
            sender.create(0),
            addr("0xcd234a471b72ba2f1ccf0a70fcaba648a5eecd8d")
        );
        assert_eq!(
            sender.create(1),
            addr("0x343c43a37d37dff08ae8c4a11544c718abb4fcf8")
        );
        assert_eq!(sender.create(7), sender.create(7));
        assert_ne!(sender.create(7), sender.create(8));
    }

    #[test]
    fn test_create2_address() {
        assert_eq!(
            Address::zero().create2(&Word::zero(), &[0x00]),
            addr("0x4d1a2e2bb4f88f0250f26ffff098b0b30b26bf38")
        );
        assert_eq!(
            addr("0xdeadbeef00000000000000000000000000000000").create2(&Word::zero(), &[0x00]),
            addr("0xb928f69bb1d91cd65274e3c79d8986362984fda3")
        );
        let salt =
            Word::from_hex("0x000000000000000000000000feed000000000000000000000000000000000000")
                .unwrap();
        assert_eq!(
            addr("0xdeadbeef00000000000000000000000000000000").create2(&salt, &[0x00]),
            addr("0xd04116cdd17bebe565eb2422f2497e06cc1c9833")
        );
    }

    #[test]
    fn test_word_roundtrip() {
        let address = addr("0xdeadbeef00000000000000000000000000000001");
        assert_eq!(Address::from(&address.as_word()), address);
        assert!(Address::try_from("0x1234").is_err());
    }

    #[test]
    fn test_parse_rejects_bad_hex() {
        assert!(Address::try_from("0xdeadbeef0000000000000000000000000000zz01").is_err());
        assert_eq!(
            Address::try_from("0xdeadbeef00000000000000000000000000000001").ok(),
            Some(addr("0xdeadbeef00000000000000000000000000000001"))
        );
    }
}
