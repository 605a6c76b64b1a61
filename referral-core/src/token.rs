//! Base62 token generation
//!
//! Referral codes are short base62 strings drawn from a cryptographically
//! secure RNG. Random bytes are folded into a big unsigned integer and
//! repeatedly reduced modulo 62; once the integer runs out, further random
//! bytes pad the token to the requested length.
//!
//! The RNG is owned by the generator so tests can inject a seeded one.

use num_bigint::BigUint;
use num_traits::{ToPrimitive, Zero};
use rand::{rngs::StdRng, RngCore, SeedableRng};
use std::sync::Mutex;

/// Token alphabet: digits, uppercase, lowercase
pub const BASE62_ALPHABET: &[u8; 62] =
    b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

/// Default referral code length
pub const DEFAULT_CODE_LENGTH: usize = 8;

/// Lower bound on random bytes drawn per token
const MIN_ENTROPY_BYTES: usize = 6;

/// Largest multiple of 62 that fits in a byte; padding bytes at or above it are rejected
const UNBIASED_BYTE_LIMIT: u8 = 248;

/// Random base62 token generator
pub struct TokenGenerator {
    rng: Mutex<StdRng>,
}

impl TokenGenerator {
    /// Generator seeded from the operating system
    pub fn secure() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Deterministic generator for tests and replays
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    /// Generate a token of exactly `length` characters
    pub fn generate(&self, length: usize) -> String {
        let mut rng = self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        encode_base62(&mut *rng, length)
    }

    /// Generate a token of the default code length
    pub fn generate_code(&self) -> String {
        self.generate(DEFAULT_CODE_LENGTH)
    }
}

impl Default for TokenGenerator {
    fn default() -> Self {
        Self::secure()
    }
}

impl std::fmt::Debug for TokenGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenGenerator").finish_non_exhaustive()
    }
}

/// Bytes needed to carry `length` base62 digits of entropy
fn entropy_bytes(length: usize) -> usize {
    let bits = length as f64 * 62f64.log2();
    MIN_ENTROPY_BYTES.max((bits / 8.0).ceil() as usize)
}

/// Encode fresh randomness from `rng` as a base62 token of `length` characters
pub fn encode_base62<R: RngCore + ?Sized>(rng: &mut R, length: usize) -> String {
    let mut seed = vec![0u8; entropy_bytes(length)];
    rng.fill_bytes(&mut seed);

    let base = BigUint::from(62u32);
    let mut num = BigUint::from_bytes_be(&seed);
    let mut out = String::with_capacity(length);

    while out.len() < length && !num.is_zero() {
        let idx = (&num % &base).to_usize().unwrap_or(0);
        out.push(BASE62_ALPHABET[idx] as char);
        num /= &base;
    }

    let mut pad = [0u8; 4];
    while out.len() < length {
        rng.fill_bytes(&mut pad);
        for byte in pad {
            if out.len() == length {
                break;
            }
            if byte < UNBIASED_BYTE_LIMIT {
                out.push(BASE62_ALPHABET[(byte % 62) as usize] as char);
            }
        }
    }

    out
}

/// Whether `code` looks like a referral code
pub fn is_well_formed(code: &str) -> bool {
    code.len() == DEFAULT_CODE_LENGTH && code.bytes().all(|b| b.is_ascii_alphanumeric())
}
