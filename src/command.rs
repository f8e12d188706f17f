//! Voter commands and their signing and encryption.
//!
//! A [`Command`] is a voter's request to replace their state leaf.  It is
//! signed with the voter's current key over the Poseidon digest of all six
//! fields, then encrypted together with the signature under an ECDH secret
//! shared between a fresh ephemeral key and the coordinator.

use ark_bn254::Fr;
use ark_ff::UniformRand;
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};

use crate::data::fr_to_u64;
use crate::eddsa::Signature;
use crate::error::{MaciError, MaciResult};
use crate::keys::{derive_shared_key, Keypair, PrivateKey, PublicKey, SharedKey};
use crate::leaf::VoteLeaf;
use crate::message::{Ciphertext, Message};
use crate::poseidon::poseidon;

/// Number of field elements in a command's canonical encoding.
pub const COMMAND_FIELDS: usize = 7;
/// Number of plaintext elements in an encrypted message: command plus signature.
pub const PLAINTEXT_FIELDS: usize = COMMAND_FIELDS + 3;

/// A voter's signed intention to update their own state leaf.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    /// Sign-up slot of the voter issuing the command.
    pub state_index: u64,
    /// Key that replaces the voter's key once the command applies.
    pub new_public_key: PublicKey,
    /// Vote option the weights apply to.
    pub vote_option_index: u64,
    /// New weights for that option.
    pub vote_leaf: VoteLeaf,
    /// Must equal the voter's stored nonce plus one.
    pub nonce: u64,
    /// Random blinding value.
    #[serde(with = "crate::data::fr_hex")]
    pub salt: Fr,
}

impl Command {
    /// Creates a command.
    pub fn new(
        state_index: u64,
        new_public_key: PublicKey,
        vote_option_index: u64,
        vote_leaf: VoteLeaf,
        nonce: u64,
        salt: Fr,
    ) -> Self {
        Self {
            state_index,
            new_public_key,
            vote_option_index,
            vote_leaf,
            nonce,
            salt,
        }
    }

    /// Draws a random salt suitable for [`Command::salt`].
    pub fn random_salt<R: RngCore + CryptoRng>(rng: &mut R) -> Fr {
        Fr::rand(rng)
    }

    /// Canonical encoding:
    /// `[state_index, new_pk.x, new_pk.y, vote_option_index, vote_leaf, nonce, salt]`.
    pub fn to_fields(&self) -> [Fr; COMMAND_FIELDS] {
        [
            Fr::from(self.state_index),
            self.new_public_key.x(),
            self.new_public_key.y(),
            Fr::from(self.vote_option_index),
            self.vote_leaf.pack(),
            Fr::from(self.nonce),
            self.salt,
        ]
    }

    /// Decodes the canonical encoding, rejecting out-of-range integers and invalid keys.
    pub fn from_fields(fields: &[Fr; COMMAND_FIELDS]) -> MaciResult<Self> {
        let int = |value: &Fr, name: &str| {
            fr_to_u64(value).ok_or_else(|| MaciError::Decode(format!("{name} exceeds 64 bits")))
        };
        Ok(Self {
            state_index: int(&fields[0], "state index")?,
            new_public_key: PublicKey::from_coordinates(fields[1], fields[2])?,
            vote_option_index: int(&fields[3], "vote option index")?,
            vote_leaf: VoteLeaf::unpack(&fields[4])?,
            nonce: int(&fields[5], "nonce")?,
            salt: fields[6],
        })
    }

    /// Digest that signatures commit to.
    pub fn hash(&self) -> Fr {
        poseidon(self.to_fields())
    }

    /// Signs the command with the voter's current key.
    pub fn sign(&self, private_key: &PrivateKey) -> Signature {
        Signature::sign(private_key, &self.hash())
    }

    /// Checks `signature` against `public_key`.
    pub fn verify_signature(&self, signature: &Signature, public_key: &PublicKey) -> bool {
        signature.verify(public_key, &self.hash())
    }

    /// Encrypts `(command, signature)` under `shared_key`.
    pub fn encrypt(&self, signature: &Signature, shared_key: &SharedKey) -> Ciphertext {
        let mut plaintext = [Fr::from(0u64); PLAINTEXT_FIELDS];
        plaintext[..COMMAND_FIELDS].copy_from_slice(&self.to_fields());
        plaintext[COMMAND_FIELDS..].copy_from_slice(&signature.to_fields());
        Ciphertext::encrypt(&plaintext, shared_key)
    }

    /// Signs with `voter_key`, encrypts for `coordinator_key` under a fresh
    /// ephemeral key pair and returns the message with that key pair.
    pub fn into_message<R: RngCore + CryptoRng>(
        &self,
        voter_key: &PrivateKey,
        coordinator_key: &PublicKey,
        rng: &mut R,
    ) -> (Message, Keypair) {
        let signature = self.sign(voter_key);
        let ephemeral = Keypair::random(rng);
        let shared = derive_shared_key(&ephemeral.private_key, coordinator_key);
        let message = Message::new(self.encrypt(&signature, &shared), ephemeral.public_key);
        (message, ephemeral)
    }
}
