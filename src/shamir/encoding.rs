//! Lossless embedding of short byte strings into a single field element.
//!
//! Layout of the 32-byte big-endian representation:
//! `00 .. 00 | 01 | secret bytes`. The marker byte keeps leading zero bytes of
//! the secret, and caps the value below 2^249, well under the group order.

use elliptic_curve::PrimeField;
use k256::{FieldBytes, Scalar};
use zeroize::Zeroizing;

use crate::error::{SharingError, SharingResult};

/// Longest secret that fits in one field element together with the marker.
pub const MAX_SECRET_LEN: usize = 31;

const MARKER: u8 = 0x01;

pub fn embed(secret: &[u8]) -> SharingResult<Scalar> {
    if secret.len() > MAX_SECRET_LEN {
        return Err(SharingError::EncodingOutOfRange {
            len: secret.len(),
            max: MAX_SECRET_LEN,
        });
    }

    let mut repr = Zeroizing::new([0u8; 32]);
    let offset = repr.len() - secret.len();
    repr[offset - 1] = MARKER;
    repr[offset..].copy_from_slice(secret);

    Option::<Scalar>::from(Scalar::from_repr(FieldBytes::clone_from_slice(&repr[..])))
        .ok_or(SharingError::InvalidEncoding)
}

pub fn extract(value: &Scalar) -> SharingResult<Vec<u8>> {
    let mut repr = Zeroizing::new([0u8; 32]);
    repr.copy_from_slice(&value.to_bytes());
    let start = repr
        .iter()
        .position(|b| *b != 0)
        .ok_or(SharingError::InvalidEncoding)?;
    if repr[start] != MARKER {
        return Err(SharingError::InvalidEncoding);
    }
    Ok(repr[start + 1..].to_vec())
}
