use std::fmt;
use std::str::FromStr;

use elliptic_curve::PrimeField;
use k256::{FieldBytes, Scalar};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{SharingError, SharingResult};

/// One point `(index, f(index))` on the secret polynomial.
///
/// Textual form is `"<index>-<64 hex chars>"`, e.g. `"3-00ab..."`; the same
/// string is used on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Share {
    index: u16,
    value: Scalar,
}

impl Share {
    pub fn new(index: u16, value: Scalar) -> SharingResult<Self> {
        if index == 0 {
            return Err(SharingError::InvalidShareIndex);
        }
        Ok(Self { index, value })
    }

    pub fn index(&self) -> u16 {
        self.index
    }

    pub fn value(&self) -> &Scalar {
        &self.value
    }
}

impl fmt::Display for Share {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.index, hex::encode(self.value.to_bytes()))
    }
}

impl FromStr for Share {
    type Err = SharingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (index, value) = s
            .trim()
            .split_once('-')
            .ok_or_else(|| SharingError::MalformedShare("missing '-' separator".into()))?;

        let index: u16 = index
            .parse()
            .map_err(|e| SharingError::MalformedShare(format!("bad index {index:?}: {e}")))?;

        let bytes = hex::decode(value)
            .map_err(|e| SharingError::MalformedShare(format!("bad hex value: {e}")))?;
        if bytes.len() != 32 {
            return Err(SharingError::MalformedShare(format!(
                "value is {} bytes, expected 32",
                bytes.len()
            )));
        }

        let value = Option::<Scalar>::from(Scalar::from_repr(FieldBytes::clone_from_slice(&bytes)))
            .ok_or_else(|| SharingError::MalformedShare("value outside the field".into()))?;

        Share::new(index, value)
    }
}

impl Serialize for Share {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Share {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}
