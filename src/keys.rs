//! Baby Jubjub key material for voters and the coordinator.
//!
//! A private key is a 32-byte seed.  The scalar used for signing and key
//! exchange is `Blake2b-512(seed)` reduced modulo the prime subgroup order, and
//! the public key is that scalar times the subgroup generator.  The same key
//! pair signs commands and performs ECDH.
//!
//! External encodings follow the `macisk.` / `macipk.` convention:
//! `macisk.<hex seed>` and `macipk.<hex compressed point>`.

use ark_bn254::Fr;
use ark_ec::{AffineRepr, CurveGroup};
use ark_ed_on_bn254::{EdwardsAffine, Fr as Scalar};
use ark_ff::PrimeField;
use ark_serialize::{CanonicalDeserialize, CanonicalSerialize};
use blake2::{Blake2b512, Digest};
use rand::{CryptoRng, RngCore};
use serde::{de::Error as _, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use crate::error::{MaciError, MaciResult};

/// Prefix of serialised private keys.
pub const PRIVATE_KEY_PREFIX: &str = "macisk.";
/// Prefix of serialised public keys.
pub const PUBLIC_KEY_PREFIX: &str = "macipk.";
/// Length of a private key seed in bytes.
pub const SEED_LENGTH: usize = 32;

const SCALAR_DOMAIN: &[u8] = b"MACI_BABYJUB_SK";

/// Secret seed from which a Baby Jubjub scalar is derived.
#[derive(Clone, PartialEq, Eq)]
pub struct PrivateKey {
    seed: [u8; SEED_LENGTH],
}

impl PrivateKey {
    /// Wraps an existing seed.
    pub fn from_seed(seed: [u8; SEED_LENGTH]) -> Self {
        Self { seed }
    }

    /// Draws a fresh seed from `rng`.
    pub fn random<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        let mut seed = [0u8; SEED_LENGTH];
        rng.fill_bytes(&mut seed);
        Self { seed }
    }

    /// Raw seed bytes.
    pub fn seed(&self) -> &[u8; SEED_LENGTH] {
        &self.seed
    }

    /// Scalar used for signing and ECDH.
    pub fn scalar(&self) -> Scalar {
        let mut hasher = Blake2b512::new();
        hasher.update(SCALAR_DOMAIN);
        hasher.update(self.seed);
        Scalar::from_le_bytes_mod_order(&hasher.finalize())
    }

    /// Derives the matching public key.
    pub fn public_key(&self) -> PublicKey {
        PublicKey((EdwardsAffine::generator() * self.scalar()).into_affine())
    }

    /// Encodes the key as `macisk.<hex>`.
    pub fn to_macisk(&self) -> String {
        format!("{PRIVATE_KEY_PREFIX}{}", hex::encode(self.seed))
    }

    /// Parses a key produced by [`PrivateKey::to_macisk`].
    pub fn from_macisk(input: &str) -> MaciResult<Self> {
        let digits = input
            .trim()
            .strip_prefix(PRIVATE_KEY_PREFIX)
            .ok_or_else(|| MaciError::Decode(format!("missing {PRIVATE_KEY_PREFIX} prefix")))?;
        let bytes = hex::decode(digits).map_err(|err| MaciError::Decode(err.to_string()))?;
        if bytes.len() != SEED_LENGTH {
            return Err(MaciError::Decode(format!(
                "private key must be {SEED_LENGTH} bytes, got {}",
                bytes.len()
            )));
        }
        let mut seed = [0u8; SEED_LENGTH];
        seed.copy_from_slice(&bytes);
        Ok(Self { seed })
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PrivateKey(..)")
    }
}

/// Point in the prime-order subgroup of Baby Jubjub.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct PublicKey(EdwardsAffine);

impl PublicKey {
    /// Identity point, used by the blank state leaf.
    pub fn identity() -> Self {
        Self(EdwardsAffine::zero())
    }

    /// Builds a key from affine coordinates, checking curve and subgroup membership.
    pub fn from_coordinates(x: Fr, y: Fr) -> MaciResult<Self> {
        let point = EdwardsAffine::new_unchecked(x, y);
        if !point.is_on_curve() {
            return Err(MaciError::Decode("point is not on Baby Jubjub".into()));
        }
        if !point.is_in_correct_subgroup_assuming_on_curve() {
            return Err(MaciError::Decode(
                "point is outside the prime-order subgroup".into(),
            ));
        }
        Ok(Self(point))
    }

    /// Underlying affine point.
    pub fn point(&self) -> &EdwardsAffine {
        &self.0
    }

    /// Affine x coordinate.
    pub fn x(&self) -> Fr {
        self.0.x
    }

    /// Affine y coordinate.
    pub fn y(&self) -> Fr {
        self.0.y
    }

    /// Coordinates as they enter hashes: `[x, y]`.
    pub fn as_fields(&self) -> [Fr; 2] {
        [self.0.x, self.0.y]
    }

    /// Compressed point encoding.
    pub fn to_bytes(&self) -> MaciResult<Vec<u8>> {
        let mut out = Vec::new();
        self.0
            .serialize_compressed(&mut out)
            .map_err(|err| MaciError::Decode(err.to_string()))?;
        Ok(out)
    }

    /// Encodes the key as `macipk.<hex>`.
    pub fn to_macipk(&self) -> MaciResult<String> {
        Ok(format!("{PUBLIC_KEY_PREFIX}{}", hex::encode(self.to_bytes()?)))
    }

    /// Parses a key produced by [`PublicKey::to_macipk`].
    pub fn from_macipk(input: &str) -> MaciResult<Self> {
        let digits = input
            .trim()
            .strip_prefix(PUBLIC_KEY_PREFIX)
            .ok_or_else(|| MaciError::Decode(format!("missing {PUBLIC_KEY_PREFIX} prefix")))?;
        let bytes = hex::decode(digits).map_err(|err| MaciError::Decode(err.to_string()))?;
        let point = EdwardsAffine::deserialize_compressed(bytes.as_slice())
            .map_err(|err| MaciError::Decode(err.to_string()))?;
        Ok(Self(point))
    }
}

impl Hash for PublicKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.x.hash(state);
        self.0.y.hash(state);
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_macipk() {
            Ok(text) => write!(f, "PublicKey({text})"),
            Err(_) => write!(f, "PublicKey({:?})", self.0),
        }
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = self.to_macipk().map_err(|_| fmt::Error)?;
        f.write_str(&text)
    }
}

impl FromStr for PublicKey {
    type Err = MaciError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_macipk(s)
    }
}

impl Serialize for PublicKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let text = self.to_macipk().map_err(serde::ser::Error::custom)?;
        serializer.serialize_str(&text)
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Self::from_macipk(&text).map_err(D::Error::custom)
    }
}

/// A private key and its public key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Keypair {
    /// Secret half.
    pub private_key: PrivateKey,
    /// Public half derived from `private_key`.
    pub public_key: PublicKey,
}

impl Keypair {
    /// Generates a fresh key pair.
    pub fn random<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        Self::from_private_key(PrivateKey::random(rng))
    }

    /// Completes a key pair from its private key.
    pub fn from_private_key(private_key: PrivateKey) -> Self {
        let public_key = private_key.public_key();
        Self {
            private_key,
            public_key,
        }
    }
}

/// ECDH shared point between two key pairs.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct SharedKey(EdwardsAffine);

impl SharedKey {
    /// Coordinates fed into the encryption keystream.
    pub fn as_fields(&self) -> [Fr; 2] {
        [self.0.x, self.0.y]
    }
}

impl fmt::Debug for SharedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SharedKey(..)")
    }
}

/// Derives the ECDH secret `sk_a · pk_b`; symmetric in the two parties.
pub fn derive_shared_key(private_key: &PrivateKey, public_key: &PublicKey) -> SharedKey {
    SharedKey((*public_key.point() * private_key.scalar()).into_affine())
}
