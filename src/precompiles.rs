use eyre::{Result, bail, eyre};
use once_cell::sync::Lazy;

use ark_bn254::{Bn254, Fq, Fq2, Fr, G1Affine, G1Projective, G2Affine};
use ark_ec::{CurveGroup, pairing::Pairing};
use ark_ff::{BigInteger, PrimeField};
use k256::ecdsa::{RecoveryId, Signature, VerifyingKey};
use kzg_rs::{Bytes32, Bytes48, KzgProof, KzgSettings};
use num_bigint::BigUint;
use num_traits::Zero;
use ripemd::Ripemd160;
use sha2::{Digest, Sha256};

use crate::{
    common::{Address, Word, hash::keccak256},
    fork::Spec,
};

/// Native contracts living at the reserved low addresses.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Precompile {
    EcRecover,
    Sha256,
    Ripemd160,
    Identity,
    ModExp,
    Bn254Add,
    Bn254Mul,
    Bn254Pairing,
    Blake2F,
    PointEvaluation,
}

impl Precompile {
    const ALL: [Precompile; 10] = [
        Precompile::EcRecover,
        Precompile::Sha256,
        Precompile::Ripemd160,
        Precompile::Identity,
        Precompile::ModExp,
        Precompile::Bn254Add,
        Precompile::Bn254Mul,
        Precompile::Bn254Pairing,
        Precompile::Blake2F,
        Precompile::PointEvaluation,
    ];

    /// The precompile at `address`, if one is active under `spec`.
    pub fn from_address(address: &Address, spec: &Spec) -> Option<Precompile> {
        if address.0[..19] != [0u8; 19] {
            return None;
        }
        let precompile = *Self::ALL.get((address.0[19] as usize).checked_sub(1)?)?;
        precompile.is_active(spec).then_some(precompile)
    }

    /// Every precompile active under `spec`, in address order.
    pub fn all(spec: &Spec) -> impl Iterator<Item = Precompile> + '_ {
        Self::ALL.into_iter().filter(|p| p.is_active(spec))
    }

    pub fn address(&self) -> Address {
        Address::from_low_u64(*self as u64 + 1)
    }

    fn is_active(&self, spec: &Spec) -> bool {
        match self {
            Precompile::EcRecover
            | Precompile::Sha256
            | Precompile::Ripemd160
            | Precompile::Identity => true,
            Precompile::ModExp
            | Precompile::Bn254Add
            | Precompile::Bn254Mul
            | Precompile::Bn254Pairing => spec.byzantium_precompiles,
            Precompile::Blake2F => spec.blake2f,
            Precompile::PointEvaluation => spec.blob_hash,
        }
    }

    pub fn gas_cost(&self, spec: &Spec, input: &[u8]) -> i64 {
        let words = input.len().div_ceil(32) as i64;
        match self {
            Precompile::EcRecover => 3000,
            Precompile::Sha256 => 60 + 12 * words,
            Precompile::Ripemd160 => 600 + 120 * words,
            Precompile::Identity => 15 + 3 * words,
            Precompile::ModExp => modexp_gas_cost(spec, input),
            Precompile::Bn254Add => {
                if spec.eip1108 {
                    150
                } else {
                    500
                }
            }
            Precompile::Bn254Mul => {
                if spec.eip1108 {
                    6000
                } else {
                    40000
                }
            }
            Precompile::Bn254Pairing => {
                let pairs = (input.len() / 192) as i64;
                if spec.eip1108 {
                    45000 + 34000 * pairs
                } else {
                    100000 + 80000 * pairs
                }
            }
            Precompile::Blake2F => match input.get(..4) {
                Some(rounds) => u32::from_be_bytes([rounds[0], rounds[1], rounds[2], rounds[3]]) as i64,
                None => 0,
            },
            Precompile::PointEvaluation => 50000,
        }
    }

    /// Runs the precompile. An `Err` is a logical failure: the call fails and its gas is gone.
    pub fn run(&self, input: &[u8]) -> Result<Vec<u8>> {
        match self {
            Precompile::EcRecover => Ok(ecrecover(input).unwrap_or_default()),
            Precompile::Sha256 => Ok(Sha256::digest(input).to_vec()),
            Precompile::Ripemd160 => {
                let mut output = vec![0u8; 32];
                output[12..].copy_from_slice(&Ripemd160::digest(input));
                Ok(output)
            }
            Precompile::Identity => Ok(input.to_vec()),
            Precompile::ModExp => modexp(input),
            Precompile::Bn254Add => bn254_add(input),
            Precompile::Bn254Mul => bn254_mul(input),
            Precompile::Bn254Pairing => bn254_pairing(input),
            Precompile::Blake2F => blake2f(input),
            Precompile::PointEvaluation => point_evaluation(input),
        }
    }
}

/// Reads `len` bytes at `offset`, zero-filling past the end of `input`.
fn padded(input: &[u8], offset: usize, len: usize) -> Vec<u8> {
    let mut out = vec![0u8; len];
    if offset < input.len() {
        let end = input.len().min(offset.saturating_add(len));
        out[..end - offset].copy_from_slice(&input[offset..end]);
    }
    out
}

const SECP256K1_N: [u8; 32] = [
    0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xfe,
    0xba, 0xae, 0xdc, 0xe6, 0xaf, 0x48, 0xa0, 0x3b, 0xbf, 0xd2, 0x5e, 0x8c, 0xd0, 0x36, 0x41, 0x41,
];

const SECP256K1_N_HALF: [u8; 32] = [
    0x7f, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
    0x5d, 0x57, 0x6e, 0x73, 0x57, 0xa4, 0x50, 0x1d, 0xdf, 0xe9, 0x2f, 0x46, 0x68, 0x1b, 0x20, 0xa0,
];

fn ecrecover(input: &[u8]) -> Result<Vec<u8>> {
    let input = padded(input, 0, 128);
    let hash = &input[0..32];
    let v = Word::from_bytes(&input[32..64]);
    let r = &input[64..96];
    let s = &input[96..128];

    let mut recovery_id = match v.to_u64() {
        Some(27) => 0u8,
        Some(28) => 1u8,
        _ => bail!("invalid v"),
    };

    // k256 only accepts low-s signatures, so flip high-s ones to their low-s twin
    let mut signature = [0u8; 64];
    signature[..32].copy_from_slice(r);
    if s > &SECP256K1_N_HALF[..] && s < &SECP256K1_N[..] {
        let low = BigUint::from_bytes_be(&SECP256K1_N) - BigUint::from_bytes_be(s);
        let low = low.to_bytes_be();
        signature[64 - low.len()..].copy_from_slice(&low);
        recovery_id ^= 1;
    } else {
        signature[32..].copy_from_slice(s);
    }

    let signature = Signature::from_slice(&signature)?;
    let recovery_id = RecoveryId::from_byte(recovery_id).ok_or_else(|| eyre!("invalid recovery id"))?;
    let key = VerifyingKey::recover_from_prehash(hash, &signature, recovery_id)?;

    let point = key.to_encoded_point(false);
    let hash = keccak256(&point.as_bytes()[1..]);
    let mut output = vec![0u8; 32];
    output[12..].copy_from_slice(&hash[12..]);
    Ok(output)
}

struct ModExpHeader {
    base_len: Word,
    exp_len: Word,
    mod_len: Word,
}

impl ModExpHeader {
    fn parse(input: &[u8]) -> Self {
        Self {
            base_len: Word::from_bytes(&padded(input, 0, 32)),
            exp_len: Word::from_bytes(&padded(input, 32, 32)),
            mod_len: Word::from_bytes(&padded(input, 64, 32)),
        }
    }
}

fn modexp_gas_cost(spec: &Spec, input: &[u8]) -> i64 {
    let header = ModExpHeader::parse(input);
    let (Some(base_len), Some(exp_len), Some(mod_len)) = (
        header.base_len.to_u64(),
        header.exp_len.to_u64(),
        header.mod_len.to_u64(),
    ) else {
        return i64::MAX;
    };
    let (base_len, exp_len, mod_len) = (base_len as u128, exp_len as u128, mod_len as u128);

    // leading 32 bytes of the exponent decide the iteration count
    let head_len = exp_len.min(32) as usize;
    let exp_offset = 96usize.saturating_add(base_len as usize);
    let exp_head = Word::from_bytes(&padded(input, exp_offset, head_len));
    let head_bits = exp_head.bits() as u128;
    let iterations = if exp_len <= 32 {
        head_bits.saturating_sub(1)
    } else {
        (8 * (exp_len - 32)).saturating_add(head_bits.saturating_sub(1))
    };
    let iterations = iterations.max(1);

    let max_len = base_len.max(mod_len);
    let gas = if spec.modexp_eip2565 {
        let words = max_len.div_ceil(8);
        let complexity = words.saturating_mul(words);
        (complexity.saturating_mul(iterations) / 3).max(200)
    } else {
        let complexity = if max_len <= 64 {
            max_len * max_len
        } else if max_len <= 1024 {
            max_len * max_len / 4 + 96 * max_len - 3072
        } else {
            (max_len.saturating_mul(max_len) / 16)
                .saturating_add(480 * max_len)
                .saturating_sub(199680)
        };
        complexity.saturating_mul(iterations) / 20
    };
    i64::try_from(gas).unwrap_or(i64::MAX)
}

fn modexp(input: &[u8]) -> Result<Vec<u8>> {
    let header = ModExpHeader::parse(input);
    if header.base_len.is_zero() && header.mod_len.is_zero() {
        return Ok(vec![]);
    }
    let length = |word: &Word| word.to_usize().ok_or_else(|| eyre!("modexp length overflow"));
    let base_len = length(&header.base_len)?;
    let exp_len = length(&header.exp_len)?;
    let mod_len = length(&header.mod_len)?;

    let base = BigUint::from_bytes_be(&padded(input, 96, base_len));
    let exp_offset = 96usize.saturating_add(base_len);
    let exp = BigUint::from_bytes_be(&padded(input, exp_offset, exp_len));
    let modulus = BigUint::from_bytes_be(&padded(input, exp_offset.saturating_add(exp_len), mod_len));

    let mut output = vec![0u8; mod_len];
    if modulus.is_zero() {
        return Ok(output);
    }
    let result = base.modpow(&exp, &modulus).to_bytes_be();
    output[mod_len - result.len()..].copy_from_slice(&result);
    Ok(output)
}

static FQ_MODULUS: Lazy<BigUint> = Lazy::new(|| Fq::MODULUS.into());

fn read_fq(bytes: &[u8]) -> Result<Fq> {
    if BigUint::from_bytes_be(bytes) >= *FQ_MODULUS {
        bail!("coordinate exceeds field modulus");
    }
    Ok(Fq::from_be_bytes_mod_order(bytes))
}

fn read_g1(bytes: &[u8]) -> Result<G1Affine> {
    let x = read_fq(&bytes[0..32])?;
    let y = read_fq(&bytes[32..64])?;
    if x.is_zero() && y.is_zero() {
        return Ok(G1Affine::identity());
    }
    let point = G1Affine::new_unchecked(x, y);
    if !point.is_on_curve() {
        bail!("G1 point not on curve");
    }
    Ok(point)
}

/// G2 coordinates arrive as (imaginary, real) pairs.
fn read_g2(bytes: &[u8]) -> Result<G2Affine> {
    let x = Fq2::new(read_fq(&bytes[32..64])?, read_fq(&bytes[0..32])?);
    let y = Fq2::new(read_fq(&bytes[96..128])?, read_fq(&bytes[64..96])?);
    if x.is_zero() && y.is_zero() {
        return Ok(G2Affine::identity());
    }
    let point = G2Affine::new_unchecked(x, y);
    if !point.is_on_curve() || !point.is_in_correct_subgroup_assuming_on_curve() {
        bail!("G2 point not in subgroup");
    }
    Ok(point)
}

fn write_g1(point: G1Projective) -> Vec<u8> {
    let point = point.into_affine();
    let mut output = vec![0u8; 64];
    if !point.infinity {
        output[..32].copy_from_slice(&fq_bytes(point.x));
        output[32..].copy_from_slice(&fq_bytes(point.y));
    }
    output
}

fn fq_bytes(fq: Fq) -> [u8; 32] {
    let bytes = fq.into_bigint().to_bytes_be();
    let mut out = [0u8; 32];
    out[32 - bytes.len()..].copy_from_slice(&bytes);
    out
}

fn bn254_add(input: &[u8]) -> Result<Vec<u8>> {
    let input = padded(input, 0, 128);
    let a = read_g1(&input[0..64])?;
    let b = read_g1(&input[64..128])?;
    Ok(write_g1(G1Projective::from(a) + b))
}

fn bn254_mul(input: &[u8]) -> Result<Vec<u8>> {
    let input = padded(input, 0, 96);
    let point = read_g1(&input[0..64])?;
    let scalar = Fr::from_be_bytes_mod_order(&input[64..96]);
    Ok(write_g1(G1Projective::from(point) * scalar))
}

fn bn254_pairing(input: &[u8]) -> Result<Vec<u8>> {
    if input.len() % 192 != 0 {
        bail!("pairing input is not a multiple of 192 bytes");
    }
    let mut g1 = Vec::with_capacity(input.len() / 192);
    let mut g2 = Vec::with_capacity(input.len() / 192);
    for chunk in input.chunks(192) {
        let a = read_g1(&chunk[0..64])?;
        let b = read_g2(&chunk[64..192])?;
        if a.infinity || b.infinity {
            continue;
        }
        g1.push(a);
        g2.push(b);
    }

    let holds = g1.is_empty() || Bn254::multi_pairing(g1, g2).is_zero();
    Ok(Word::from(holds).into_bytes().to_vec())
}

const BLAKE2B_IV: [u64; 8] = [
    0x6a09e667f3bcc908,
    0xbb67ae8584caa73b,
    0x3c6ef372fe94f82b,
    0xa54ff53a5f1d36f1,
    0x510e527fade682d1,
    0x9b05688c2b3e6c1f,
    0x1f83d9abfb41bd6b,
    0x5be0cd19137e2179,
];

const SIGMA: [[usize; 16]; 10] = [
    [0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15],
    [14, 10, 4, 8, 9, 15, 13, 6, 1, 12, 0, 2, 11, 7, 5, 3],
    [11, 8, 12, 0, 5, 2, 15, 13, 10, 14, 3, 6, 7, 1, 9, 4],
    [7, 9, 3, 1, 13, 12, 11, 14, 2, 6, 5, 10, 4, 0, 15, 8],
    [9, 0, 5, 7, 2, 4, 10, 15, 14, 1, 11, 12, 6, 8, 3, 13],
    [2, 12, 6, 10, 0, 11, 8, 3, 4, 13, 7, 5, 15, 14, 1, 9],
    [12, 5, 1, 15, 14, 13, 4, 10, 0, 7, 6, 3, 9, 2, 8, 11],
    [13, 11, 7, 14, 12, 1, 3, 9, 5, 0, 15, 4, 8, 6, 2, 10],
    [6, 15, 14, 9, 11, 3, 0, 8, 12, 2, 13, 7, 1, 4, 10, 5],
    [10, 2, 8, 4, 7, 6, 1, 5, 15, 11, 9, 14, 3, 12, 13, 0],
];

fn le_words<const N: usize>(bytes: &[u8]) -> [u64; N] {
    let mut words = [0u64; N];
    for (word, chunk) in words.iter_mut().zip(bytes.chunks_exact(8)) {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(chunk);
        *word = u64::from_le_bytes(buf);
    }
    words
}

fn blake2f(input: &[u8]) -> Result<Vec<u8>> {
    if input.len() != 213 {
        bail!("blake2f input must be 213 bytes, got {}", input.len());
    }
    let rounds = u32::from_be_bytes([input[0], input[1], input[2], input[3]]);
    let mut h = le_words::<8>(&input[4..68]);
    let m = le_words::<16>(&input[68..196]);
    let t = le_words::<2>(&input[196..212]);
    let last = match input[212] {
        0 => false,
        1 => true,
        f => bail!("invalid blake2f final flag {f}"),
    };

    let mut v = [0u64; 16];
    v[..8].copy_from_slice(&h);
    v[8..].copy_from_slice(&BLAKE2B_IV);
    v[12] ^= t[0];
    v[13] ^= t[1];
    if last {
        v[14] = !v[14];
    }

    for round in 0..rounds as usize {
        let s = &SIGMA[round % 10];
        mix(&mut v, 0, 4, 8, 12, m[s[0]], m[s[1]]);
        mix(&mut v, 1, 5, 9, 13, m[s[2]], m[s[3]]);
        mix(&mut v, 2, 6, 10, 14, m[s[4]], m[s[5]]);
        mix(&mut v, 3, 7, 11, 15, m[s[6]], m[s[7]]);
        mix(&mut v, 0, 5, 10, 15, m[s[8]], m[s[9]]);
        mix(&mut v, 1, 6, 11, 12, m[s[10]], m[s[11]]);
        mix(&mut v, 2, 7, 8, 13, m[s[12]], m[s[13]]);
        mix(&mut v, 3, 4, 9, 14, m[s[14]], m[s[15]]);
    }

    for i in 0..8 {
        h[i] ^= v[i] ^ v[i + 8];
    }
    Ok(h.iter().flat_map(|word| word.to_le_bytes()).collect())
}

fn mix(v: &mut [u64; 16], a: usize, b: usize, c: usize, d: usize, x: u64, y: u64) {
    v[a] = v[a].wrapping_add(v[b]).wrapping_add(x);
    v[d] = (v[d] ^ v[a]).rotate_right(32);
    v[c] = v[c].wrapping_add(v[d]);
    v[b] = (v[b] ^ v[c]).rotate_right(24);
    v[a] = v[a].wrapping_add(v[b]).wrapping_add(y);
    v[d] = (v[d] ^ v[a]).rotate_right(16);
    v[c] = v[c].wrapping_add(v[d]);
    v[b] = (v[b] ^ v[c]).rotate_right(63);
}

const VERSIONED_HASH_VERSION_KZG: u8 = 0x01;
const FIELD_ELEMENTS_PER_BLOB: u64 = 4096;
/// Order of the BLS12-381 scalar field.
const BLS_MODULUS: &str = "0x73eda753299d7d483339d80809a1d80553bda402fffe5bfeffffffff00000001";

static KZG_SETTINGS: Lazy<Option<KzgSettings>> =
    Lazy::new(|| KzgSettings::load_trusted_setup_file().ok());

/// EIP-4844: verifies that the blob behind `commitment` evaluates to `y` at `z`.
///
/// Input is `versioned_hash ‖ z ‖ y ‖ commitment ‖ proof` (32, 32, 32, 48 and 48 bytes).
fn point_evaluation(input: &[u8]) -> Result<Vec<u8>> {
    if input.len() != 192 {
        bail!("point evaluation input must be 192 bytes, got {}", input.len());
    }
    let (versioned_hash, rest) = input.split_at(32);
    let (z, rest) = rest.split_at(32);
    let (y, rest) = rest.split_at(32);
    let (commitment, proof) = rest.split_at(48);

    let mut expected = Sha256::digest(commitment);
    expected[0] = VERSIONED_HASH_VERSION_KZG;
    if versioned_hash != expected.as_slice() {
        bail!("versioned hash does not match the commitment");
    }

    let settings = KZG_SETTINGS
        .as_ref()
        .ok_or_else(|| eyre!("KZG trusted setup is unavailable"))?;
    let valid = KzgProof::verify_kzg_proof(
        &Bytes48::from_slice(commitment).map_err(|e| eyre!("commitment: {e:?}"))?,
        &Bytes32::from_slice(z).map_err(|e| eyre!("z: {e:?}"))?,
        &Bytes32::from_slice(y).map_err(|e| eyre!("y: {e:?}"))?,
        &Bytes48::from_slice(proof).map_err(|e| eyre!("proof: {e:?}"))?,
        settings,
    )
    .map_err(|e| eyre!("KZG proof: {e:?}"))?;
    if !valid {
        bail!("KZG proof does not verify");
    }

    let mut output = Word::from(FIELD_ELEMENTS_PER_BLOB).into_bytes().to_vec();
    output.extend_from_slice(&Word::from_hex(BLS_MODULUS)?.into_bytes());
    Ok(output)
}
