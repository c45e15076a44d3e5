//! Shamir Secret Sharing
//!
//! K-of-N secret sharing over GF(256) for dataset encryption keys.
//! Each 32-byte secret is shared byte-wise: byte `i` of every share is a
//! point on an independent random polynomial whose constant term is byte
//! `i` of the secret.

use rand::RngCore;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A share identifier (1-indexed; doubles as the polynomial x-coordinate)
pub type ShareId = u8;

/// One share of a split dataset encryption key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Share {
    /// Share identifier (1 to N)
    pub id: ShareId,
    /// Share value (32 bytes)
    pub value: [u8; 32],
}

impl Share {
    pub fn new(id: ShareId, value: [u8; 32]) -> Self {
        Self { id, value }
    }
}

/// Threshold encryption errors
#[derive(Debug, Error)]
pub enum ThresholdError {
    #[error("insufficient shares: got {got}, need {need}")]
    InsufficientShares { got: usize, need: usize },

    #[error("invalid threshold: k={k}, n={n}")]
    InvalidThreshold { k: usize, n: usize },

    #[error("duplicate share id {0}")]
    DuplicateShare(ShareId),

    #[error("decryption failed")]
    DecryptionFailed,

    #[error("invalid share format")]
    InvalidShare,
}

/// GF(256) arithmetic with the AES reduction polynomial
mod gf256 {
    pub fn mul(a: u8, b: u8) -> u8 {
        let mut result: u8 = 0;
        let mut a = a;
        let mut b = b;

        while b != 0 {
            if b & 1 != 0 {
                result ^= a;
            }
            let hi = a & 0x80;
            a <<= 1;
            if hi != 0 {
                a ^= 0x1b;
            }
            b >>= 1;
        }
        result
    }

    /// Multiplicative inverse: a^254, by square-and-multiply over the
    /// fixed exponent (a^255 = 1 for a != 0).
    pub fn inv(a: u8) -> u8 {
        if a == 0 {
            return 0;
        }
        let mut result: u8 = 1;
        let mut base = a;
        let mut exp = 254u8;
        while exp != 0 {
            if exp & 1 != 0 {
                result = mul(result, base);
            }
            base = mul(base, base);
            exp >>= 1;
        }
        result
    }

    pub fn div(a: u8, b: u8) -> u8 {
        mul(a, inv(b))
    }
}

/// Split a 32-byte secret into N shares, K of which reconstruct it.
pub fn split_secret(
    secret: &[u8; 32],
    threshold: usize,
    total: usize,
) -> Result<Vec<Share>, ThresholdError> {
    if threshold > total || threshold == 0 || total == 0 || total > 255 {
        return Err(ThresholdError::InvalidThreshold {
            k: threshold,
            n: total,
        });
    }

    let mut rng = rand::thread_rng();
    let mut shares: Vec<Share> = (1..=total as u8)
        .map(|id| Share::new(id, [0u8; 32]))
        .collect();

    for byte_idx in 0..32 {
        // f(x) = secret[byte_idx] + a1*x + ... + a_{k-1}*x^{k-1}
        let mut coeffs = vec![secret[byte_idx]];
        for _ in 1..threshold {
            let mut random_byte = [0u8; 1];
            rng.fill_bytes(&mut random_byte);
            coeffs.push(random_byte[0]);
        }

        for share in shares.iter_mut() {
            let x = share.id;
            let mut y = coeffs[0];
            let mut x_pow = x;

            for coeff in coeffs.iter().skip(1) {
                y ^= gf256::mul(*coeff, x_pow);
                x_pow = gf256::mul(x_pow, x);
            }

            share.value[byte_idx] = y;
        }
    }

    Ok(shares)
}

/// Reconstruct the secret from at least K shares via Lagrange
/// interpolation at x = 0.
///
/// Shares beyond the first K are ignored; which subset is supplied does
/// not matter, but share ids within it must be distinct.
pub fn combine_shares(shares: &[Share], threshold: usize) -> Result<[u8; 32], ThresholdError> {
    if shares.len() < threshold {
        return Err(ThresholdError::InsufficientShares {
            got: shares.len(),
            need: threshold,
        });
    }

    let shares = &shares[..threshold];
    for (i, share) in shares.iter().enumerate() {
        if shares[..i].iter().any(|other| other.id == share.id) {
            return Err(ThresholdError::DuplicateShare(share.id));
        }
    }

    let mut secret = [0u8; 32];

    for byte_idx in 0..32 {
        let mut result: u8 = 0;

        for (i, share_i) in shares.iter().enumerate() {
            let xi = share_i.id;
            let yi = share_i.value[byte_idx];

            // Lagrange basis Li(0) = prod_{j != i} xj / (xi ^ xj)
            let mut numerator: u8 = 1;
            let mut denominator: u8 = 1;

            for (j, share_j) in shares.iter().enumerate() {
                if i != j {
                    let xj = share_j.id;
                    numerator = gf256::mul(numerator, xj);
                    denominator = gf256::mul(denominator, xi ^ xj);
                }
            }

            let li = gf256::div(numerator, denominator);
            result ^= gf256::mul(yi, li);
        }

        secret[byte_idx] = result;
    }

    Ok(secret)
}

/// Generate a random 32-byte secret (a fresh dataset encryption key)
pub fn random_secret() -> [u8; 32] {
    let mut secret = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut secret);
    secret
}
