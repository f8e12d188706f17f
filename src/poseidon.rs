//! Poseidon hashing over the BN254 scalar field.
//!
//! Every tree node, leaf, command digest and commitment in the round is a
//! Poseidon permutation with the circomlib parameters: width `n + 1` for `n`
//! inputs, eight full rounds, the `x^5` S-box and circomlib's round constants
//! and MDS matrices. A digest computed here equals the one the circuits and
//! contracts compute for the same inputs.
//!
//! The parameters exist for 1 to [`MAX_INPUTS`] inputs. Fixed-arity callers
//! use [`poseidon`], which rejects unsupported arities at compile time.

use ark_bn254::Fr;
use light_poseidon::{Poseidon, PoseidonHasher};

use crate::error::{MaciError, MaciResult};

/// Largest input count circomlib publishes parameters for.
pub const MAX_INPUTS: usize = 12;

/// Hashes an ordered list of field elements into one element.
///
/// Fails with [`MaciError::Decode`] for an empty list or more than
/// [`MAX_INPUTS`] elements.
pub fn poseidon_hash(inputs: &[Fr]) -> MaciResult<Fr> {
    if inputs.is_empty() || inputs.len() > MAX_INPUTS {
        return Err(MaciError::Decode(format!(
            "poseidon takes 1 to {MAX_INPUTS} inputs, got {}",
            inputs.len()
        )));
    }
    let mut hasher = Poseidon::<Fr>::new_circom(inputs.len())
        .map_err(|err| MaciError::Decode(format!("poseidon parameters: {err}")))?;
    hasher
        .hash(inputs)
        .map_err(|err| MaciError::Decode(format!("poseidon: {err}")))
}

struct Arity<const N: usize>;

impl<const N: usize> Arity<N> {
    const SUPPORTED: () = assert!(N >= 1 && N <= MAX_INPUTS, "unsupported poseidon arity");
}

/// Hashes exactly `N` elements; `N` outside `1..=MAX_INPUTS` does not compile.
pub fn poseidon<const N: usize>(inputs: [Fr; N]) -> Fr {
    #[allow(clippy::let_unit_value)]
    let () = Arity::<N>::SUPPORTED;
    match poseidon_hash(&inputs) {
        Ok(digest) => digest,
        Err(err) => unreachable!("arity {N} is supported: {err}"),
    }
}

/// Two-to-one compression used for Merkle nodes.
#[inline]
pub fn hash_pair(left: &Fr, right: &Fr) -> Fr {
    poseidon([*left, *right])
}
