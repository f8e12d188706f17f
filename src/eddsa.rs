//! EdDSA over Baby Jubjub with Poseidon challenges.
//!
//! Signatures are deterministic: the nonce scalar is derived from the signer's
//! seed and the message, so signing the same command twice yields the same
//! `(R8, S)` pair.

use ark_bn254::Fr;
use ark_ec::{AffineRepr, CurveGroup};
use ark_ed_on_bn254::{EdwardsAffine, Fr as Scalar};
use ark_ff::{BigInteger, PrimeField};
use blake2::{Blake2b512, Digest};
use serde::{Deserialize, Serialize};

use crate::data::{fr_from_hex, fr_to_bytes_be, fr_to_hex};
use crate::error::{MaciError, MaciResult};
use crate::keys::{PrivateKey, PublicKey};
use crate::poseidon::poseidon;

const NONCE_DOMAIN: &[u8] = b"MACI_EDDSA_NONCE";

/// Signature `(R8, S)` over a single field element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "SignatureJson", into = "SignatureJson")]
pub struct Signature {
    r8: EdwardsAffine,
    s: Scalar,
}

impl Signature {
    /// Signs `message` with `private_key`.
    pub fn sign(private_key: &PrivateKey, message: &Fr) -> Self {
        let secret = private_key.scalar();
        let public_key = private_key.public_key();
        let mut hasher = Blake2b512::new();
        hasher.update(NONCE_DOMAIN);
        hasher.update(private_key.seed());
        hasher.update(fr_to_bytes_be(message));
        let nonce = Scalar::from_le_bytes_mod_order(&hasher.finalize());
        let r8 = (EdwardsAffine::generator() * nonce).into_affine();
        let c = challenge(&r8, &public_key, message);
        Self {
            r8,
            s: nonce + c * secret,
        }
    }

    /// Checks `S·G == R8 + c·A`.
    pub fn verify(&self, public_key: &PublicKey, message: &Fr) -> bool {
        let c = challenge(&self.r8, public_key, message);
        let lhs = EdwardsAffine::generator() * self.s;
        let rhs = self.r8.into_group() + *public_key.point() * c;
        lhs == rhs
    }

    /// Field encoding `[R8.x, R8.y, S]` carried inside encrypted messages.
    pub fn to_fields(&self) -> [Fr; 3] {
        [self.r8.x, self.r8.y, scalar_to_fr(&self.s)]
    }

    /// Decodes the field encoding, checking the point and the scalar range.
    pub fn from_fields(fields: [Fr; 3]) -> MaciResult<Self> {
        let r8 = PublicKey::from_coordinates(fields[0], fields[1])?;
        let s = Scalar::from_bigint(fields[2].into_bigint()).ok_or_else(|| {
            MaciError::Decode("signature scalar exceeds the subgroup order".into())
        })?;
        Ok(Self {
            r8: *r8.point(),
            s,
        })
    }
}

fn challenge(r8: &EdwardsAffine, public_key: &PublicKey, message: &Fr) -> Scalar {
    let digest = poseidon([r8.x, r8.y, public_key.x(), public_key.y(), *message]);
    Scalar::from_le_bytes_mod_order(&digest.into_bigint().to_bytes_le())
}

fn scalar_to_fr(value: &Scalar) -> Fr {
    Fr::from_le_bytes_mod_order(&value.into_bigint().to_bytes_le())
}

#[derive(Serialize, Deserialize)]
struct SignatureJson {
    r8x: String,
    r8y: String,
    s: String,
}

impl From<Signature> for SignatureJson {
    fn from(sig: Signature) -> Self {
        let [x, y, s] = sig.to_fields();
        Self {
            r8x: fr_to_hex(&x),
            r8y: fr_to_hex(&y),
            s: fr_to_hex(&s),
        }
    }
}

impl TryFrom<SignatureJson> for Signature {
    type Error = MaciError;

    fn try_from(json: SignatureJson) -> Result<Self, Self::Error> {
        Signature::from_fields([
            fr_from_hex(&json.r8x)?,
            fr_from_hex(&json.r8y)?,
            fr_from_hex(&json.s)?,
        ])
    }
}
