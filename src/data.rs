//! Canonical encodings for field elements.
//!
//! Field elements travel as `0x`-prefixed, 32-byte big-endian hex, the same
//! representation a contract reports for a `uint256`.  Parsing is strict:
//! values at or above the field modulus are rejected instead of reduced.

use ark_bn254::Fr;
use ark_ff::{BigInteger, PrimeField};

use crate::error::{MaciError, MaciResult};

/// Width of a canonical field element encoding in bytes.
pub const FIELD_BYTES: usize = 32;

/// Encodes a field element as `0x` followed by 64 lowercase hex digits.
pub fn fr_to_hex(value: &Fr) -> String {
    format!("0x{}", hex::encode(fr_to_bytes_be(value)))
}

/// Returns the 32-byte big-endian representation of a field element.
pub fn fr_to_bytes_be(value: &Fr) -> [u8; FIELD_BYTES] {
    let bytes = value.into_bigint().to_bytes_be();
    let mut out = [0u8; FIELD_BYTES];
    out[FIELD_BYTES - bytes.len()..].copy_from_slice(&bytes);
    out
}

/// Parses a field element from hex, with or without the `0x` prefix.
pub fn fr_from_hex(input: &str) -> MaciResult<Fr> {
    let trimmed = input.trim();
    let digits = trimmed.strip_prefix("0x").unwrap_or(trimmed);
    if digits.is_empty() || digits.len() > FIELD_BYTES * 2 {
        return Err(MaciError::Decode(format!(
            "field element must be 1..=64 hex digits, got {}",
            digits.len()
        )));
    }
    let padded = format!("{digits:0>64}");
    let bytes = hex::decode(&padded).map_err(|err| MaciError::Decode(err.to_string()))?;
    let mut arr = [0u8; FIELD_BYTES];
    arr.copy_from_slice(&bytes);
    fr_from_bytes_be(&arr)
}

/// Interprets 32 big-endian bytes as a field element, rejecting non-canonical values.
pub fn fr_from_bytes_be(bytes: &[u8; FIELD_BYTES]) -> MaciResult<Fr> {
    let value = Fr::from_be_bytes_mod_order(bytes);
    if &fr_to_bytes_be(&value) != bytes {
        return Err(MaciError::Decode(
            "field element exceeds the BN254 scalar modulus".into(),
        ));
    }
    Ok(value)
}

/// Returns the value as `u64` if it fits.
pub fn fr_to_u64(value: &Fr) -> Option<u64> {
    let limbs = value.into_bigint().0;
    if limbs[1..].iter().all(|limb| *limb == 0) {
        Some(limbs[0])
    } else {
        None
    }
}

/// Returns the value as `u128` if it fits.
pub fn fr_to_u128(value: &Fr) -> Option<u128> {
    let limbs = value.into_bigint().0;
    if limbs[2..].iter().all(|limb| *limb == 0) {
        Some(((limbs[1] as u128) << 64) | limbs[0] as u128)
    } else {
        None
    }
}

/// Lifts a `u128` into the field.
pub fn fr_from_u128(value: u128) -> Fr {
    Fr::from(value)
}

/// Serde adapter storing a field element as canonical hex.
pub mod fr_hex {
    use super::{fr_from_hex, fr_to_hex};
    use ark_bn254::Fr;
    use serde::{de::Error as _, Deserialize, Deserializer, Serializer};

    /// Serialises `value` as `0x`-prefixed hex.
    pub fn serialize<S: Serializer>(value: &Fr, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&fr_to_hex(value))
    }

    /// Parses a `0x`-prefixed hex string.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Fr, D::Error> {
        let text = String::deserialize(deserializer)?;
        fr_from_hex(&text).map_err(D::Error::custom)
    }
}

/// Serde adapter for vectors of field elements.
pub mod fr_hex_vec {
    use super::{fr_from_hex, fr_to_hex};
    use ark_bn254::Fr;
    use serde::{de::Error as _, Deserialize, Deserializer, Serializer};

    /// Serialises every element as `0x`-prefixed hex.
    pub fn serialize<S: Serializer>(values: &[Fr], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(values.iter().map(fr_to_hex))
    }

    /// Parses a sequence of `0x`-prefixed hex strings.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<Fr>, D::Error> {
        let texts = Vec::<String>::deserialize(deserializer)?;
        texts
            .iter()
            .map(|text| fr_from_hex(text).map_err(D::Error::custom))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ark_ff::Zero;

    #[test]
    fn hex_roundtrip_and_padding() {
        let value = Fr::from(0x1234u64);
        let text = fr_to_hex(&value);
        assert_eq!(text.len(), 66);
        assert!(text.ends_with("1234"));
        assert_eq!(fr_from_hex(&text).unwrap(), value);
        assert_eq!(fr_from_hex("1234").unwrap(), value);
        assert_eq!(fr_from_hex("0x0").unwrap(), Fr::zero());
    }

    #[test]
    fn rejects_non_canonical_values() {
        let too_big = format!("0x{}", "f".repeat(64));
        assert!(fr_from_hex(&too_big).is_err());
        assert!(fr_from_hex("0x").is_err());
        assert!(fr_from_hex("0xzz").is_err());
    }

    #[test]
    fn integer_conversions() {
        assert_eq!(fr_to_u64(&Fr::from(42u64)), Some(42));
        let wide = fr_from_u128(u128::MAX);
        assert_eq!(fr_to_u64(&wide), None);
        assert_eq!(fr_to_u128(&wide), Some(u128::MAX));
        let negative_one = -Fr::from(1u64);
        assert_eq!(fr_to_u128(&negative_one), None);
    }
}
