//! State tree leaves and per-option vote weights.

use ark_bn254::Fr;
use ark_ff::UniformRand;
use rand::{CryptoRng, Rng, RngCore};
use serde::{Deserialize, Serialize};

use crate::data::{fr_from_u128, fr_to_u128};
use crate::error::{MaciError, MaciResult};
use crate::keys::{Keypair, PublicKey};
use crate::poseidon::poseidon;

/// Credits spent for and against one vote option.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VoteLeaf {
    /// Weight in favour of the option.
    pub positive: u64,
    /// Weight against the option.
    pub negative: u64,
}

impl VoteLeaf {
    /// Creates a vote leaf.
    pub fn new(positive: u64, negative: u64) -> Self {
        Self { positive, negative }
    }

    /// Voice credits this vote consumes: `positive² + negative²`.
    ///
    /// `None` when the sum does not fit in `u128`; no balance can pay for
    /// such a vote.
    pub fn cost(&self) -> Option<u128> {
        let pos = self.positive as u128;
        let neg = self.negative as u128;
        pos.checked_mul(pos)?.checked_add(neg.checked_mul(neg)?)
    }

    /// Packs both weights into one field element: `positive + negative·2^64`.
    pub fn pack(&self) -> Fr {
        fr_from_u128(((self.negative as u128) << 64) | self.positive as u128)
    }

    /// Inverse of [`VoteLeaf::pack`].
    pub fn unpack(packed: &Fr) -> MaciResult<Self> {
        let value = fr_to_u128(packed)
            .ok_or_else(|| MaciError::Decode("packed vote leaf exceeds 128 bits".into()))?;
        Ok(Self {
            positive: value as u64,
            negative: (value >> 64) as u64,
        })
    }
}

/// One voter slot in the state tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateLeaf {
    /// Key that must sign the voter's next command.
    pub public_key: PublicKey,
    /// Remaining voice credits.
    pub voice_credit_balance: u64,
    /// Root of the voter's vote option tree.
    #[serde(with = "crate::data::fr_hex")]
    pub vote_option_tree_root: Fr,
    /// Number of commands applied so far.
    pub nonce: u64,
}

impl StateLeaf {
    /// Creates a leaf.
    pub fn new(
        public_key: PublicKey,
        voice_credit_balance: u64,
        vote_option_tree_root: Fr,
        nonce: u64,
    ) -> Self {
        Self {
            public_key,
            voice_credit_balance,
            vote_option_tree_root,
            nonce,
        }
    }

    /// Leaf reserved at state index 0: identity key, no credits, no votes.
    pub fn blank(empty_vote_option_root: Fr) -> Self {
        Self::new(PublicKey::identity(), 0, empty_vote_option_root, 0)
    }

    /// A well-formed leaf with no link to any voter, drawn from `rng`.
    pub fn random<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        let public_key = Keypair::random(rng).public_key;
        let vote_option_tree_root = Fr::rand(rng);
        let voice_credit_balance = rng.gen::<u32>() as u64;
        Self::new(public_key, voice_credit_balance, vote_option_tree_root, 0)
    }

    /// Field encoding `[pk.x, pk.y, vote_option_tree_root, balance, nonce]`.
    pub fn to_fields(&self) -> [Fr; 5] {
        [
            self.public_key.x(),
            self.public_key.y(),
            self.vote_option_tree_root,
            Fr::from(self.voice_credit_balance),
            Fr::from(self.nonce),
        ]
    }

    /// Poseidon hash inserted into the state tree.
    pub fn hash(&self) -> Fr {
        poseidon(self.to_fields())
    }

    /// Serialises the leaf to JSON.
    pub fn to_json_string(&self) -> MaciResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parses a leaf previously emitted by [`StateLeaf::to_json_string`].
    pub fn from_json_str(input: &str) -> MaciResult<Self> {
        Ok(serde_json::from_str(input)?)
    }
}
