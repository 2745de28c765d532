//! # Shamir 秘密共享 (Split / Reconstruct)
//!
//! `split` 将秘密嵌入为多项式常数项 f(0)，并在 x = 1..=n 处求值得到 n 个分片；
//! `reconstruct` 通过拉格朗日插值在 x = 0 处恢复 f(0)，再还原为原始字节。
//!
//! 任意 t 个分片即可恢复秘密；少于 t 个分片与秘密统计独立，
//! 因此 `reconstruct` 在分片不足时直接返回 `InsufficientShares`，不会给出一个"看似合理"的值。

pub mod encoding;
mod share;

use std::collections::BTreeSet;

use k256::Scalar;
use rand_core::{CryptoRng, OsRng, RngCore};
use zeroize::Zeroizing;

pub use encoding::{embed, extract, MAX_SECRET_LEN};
pub use share::Share;

use crate::error::{SharingError, SharingResult};
use crate::math;

/// Splits `secret` into `shares` points, any `threshold` of which recover it.
pub fn split(secret: &[u8], threshold: usize, shares: usize) -> SharingResult<Vec<Share>> {
    split_with_rng(secret, threshold, shares, &mut OsRng)
}

pub fn split_with_rng<R: CryptoRng + RngCore>(
    secret: &[u8],
    threshold: usize,
    shares: usize,
    rng: &mut R,
) -> SharingResult<Vec<Share>> {
    if threshold < 1 || threshold > shares || shares > usize::from(u16::MAX) {
        return Err(SharingError::InvalidThreshold { threshold, shares });
    }

    let constant = embed(secret)?;
    let coeffs = Zeroizing::new(math::random_polynomial(constant, threshold - 1, rng));

    (1..=shares as u16)
        .map(|index| {
            let y = math::evaluate_polynomial(&coeffs, &math::x_coordinate(index));
            Share::new(index, y)
        })
        .collect()
}

/// Recovers the secret from at least `threshold` distinct shares.
///
/// Every supplied share takes part in the interpolation; shares from the same
/// split agree on f(0) no matter which or how many are given.
pub fn reconstruct(shares: &[Share], threshold: usize) -> SharingResult<Vec<u8>> {
    let secret = interpolate(shares, threshold, &Scalar::ZERO)?;
    extract(&secret)
}

/// Regenerates the share at `index` (e.g. for a replaced shareholder).
pub fn recover_share(shares: &[Share], threshold: usize, index: u16) -> SharingResult<Share> {
    if index == 0 {
        return Err(SharingError::InvalidShareIndex);
    }
    let value = interpolate(shares, threshold, &math::x_coordinate(index))?;
    Share::new(index, value)
}

fn interpolate(shares: &[Share], threshold: usize, at: &Scalar) -> SharingResult<Scalar> {
    if threshold == 0 {
        return Err(SharingError::InvalidThreshold {
            threshold,
            shares: shares.len(),
        });
    }

    let mut seen = BTreeSet::new();
    for share in shares {
        if !seen.insert(share.index()) {
            return Err(SharingError::DuplicateShareIndex(share.index()));
        }
    }
    if shares.len() < threshold {
        return Err(SharingError::InsufficientShares {
            got: shares.len(),
            need: threshold,
        });
    }

    let points: Vec<(u16, Scalar)> = shares.iter().map(|s| (s.index(), *s.value())).collect();
    math::interpolate_at(&points, at)
}
