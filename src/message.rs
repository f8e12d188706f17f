//! Encrypted messages as published to the message tree.
//!
//! Encryption is a Poseidon keystream: with `iv = Poseidon(plaintext)` each
//! element is masked as `data[i] = plaintext[i] + Poseidon(K.x, K.y, iv + i)`.
//! Decryption recomputes the digest of the recovered plaintext and compares it
//! with `iv`, so a wrong key or a tampered ciphertext is detected instead of
//! producing a garbage command.
//!
//! A message always carries [`PLAINTEXT_FIELDS`] masked elements; anything
//! else cannot be hashed into the message tree and is refused at publication.

use ark_bn254::Fr;
use serde::{Deserialize, Serialize};

use crate::command::{Command, COMMAND_FIELDS, PLAINTEXT_FIELDS};
use crate::eddsa::Signature;
use crate::error::{MaciError, MaciResult};
use crate::keys::{derive_shared_key, PrivateKey, PublicKey, SharedKey};
use crate::poseidon::{poseidon, poseidon_hash};

/// Masked plaintext plus its initialisation value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ciphertext {
    /// Poseidon digest of the plaintext.
    #[serde(with = "crate::data::fr_hex")]
    pub iv: Fr,
    /// Masked plaintext elements.
    #[serde(with = "crate::data::fr_hex_vec")]
    pub data: Vec<Fr>,
}

impl Ciphertext {
    /// Masks `plaintext` with the keystream derived from `key`.
    pub fn encrypt(plaintext: &[Fr; PLAINTEXT_FIELDS], key: &SharedKey) -> Self {
        let iv = poseidon(*plaintext);
        let data = plaintext
            .iter()
            .enumerate()
            .map(|(i, value)| *value + keystream(key, &iv, i))
            .collect();
        Self { iv, data }
    }

    /// Removes the keystream and authenticates the result against `iv`.
    pub fn decrypt(&self, key: &SharedKey) -> MaciResult<[Fr; PLAINTEXT_FIELDS]> {
        if self.data.len() != PLAINTEXT_FIELDS {
            return Err(MaciError::Decryption(format!(
                "expected {PLAINTEXT_FIELDS} ciphertext elements, got {}",
                self.data.len()
            )));
        }
        let mut plaintext = [Fr::from(0u64); PLAINTEXT_FIELDS];
        for (i, (slot, value)) in plaintext.iter_mut().zip(&self.data).enumerate() {
            *slot = *value - keystream(key, &self.iv, i);
        }
        if poseidon(plaintext) != self.iv {
            return Err(MaciError::Decryption(
                "plaintext digest does not match iv".into(),
            ));
        }
        Ok(plaintext)
    }
}

fn keystream(key: &SharedKey, iv: &Fr, i: usize) -> Fr {
    let [kx, ky] = key.as_fields();
    poseidon([kx, ky, *iv + Fr::from(i as u64)])
}

/// The on-wire, on-tree unit: ciphertext plus the sender's ephemeral key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Encrypted `(command, signature)`.
    pub ciphertext: Ciphertext,
    /// Ephemeral key the coordinator combines with its own key for ECDH.
    pub ephemeral_public_key: PublicKey,
}

impl Message {
    /// Wraps a ciphertext and the ephemeral key used to produce it.
    pub fn new(ciphertext: Ciphertext, ephemeral_public_key: PublicKey) -> Self {
        Self {
            ciphertext,
            ephemeral_public_key,
        }
    }

    /// Leaf hash in the message tree:
    /// `Poseidon(Poseidon(iv, data..), epk.x, epk.y)`.
    ///
    /// Fails with [`MaciError::Decode`] unless `data` holds exactly
    /// [`PLAINTEXT_FIELDS`] elements.
    pub fn hash(&self) -> MaciResult<Fr> {
        let data = &self.ciphertext.data;
        if data.len() != PLAINTEXT_FIELDS {
            return Err(MaciError::Decode(format!(
                "expected {PLAINTEXT_FIELDS} ciphertext elements, got {}",
                data.len()
            )));
        }
        let mut body = Vec::with_capacity(PLAINTEXT_FIELDS + 1);
        body.push(self.ciphertext.iv);
        body.extend_from_slice(data);
        let [x, y] = self.ephemeral_public_key.as_fields();
        Ok(poseidon([poseidon_hash(&body)?, x, y]))
    }

    /// Recovers `(command, signature)` with the coordinator's private key.
    ///
    /// Every failure is reported as [`MaciError::Decryption`].
    pub fn decrypt(&self, coordinator_key: &PrivateKey) -> MaciResult<(Command, Signature)> {
        let shared = derive_shared_key(coordinator_key, &self.ephemeral_public_key);
        let plaintext = self.ciphertext.decrypt(&shared)?;
        let mut command_fields = [Fr::from(0u64); COMMAND_FIELDS];
        command_fields.copy_from_slice(&plaintext[..COMMAND_FIELDS]);
        let command = Command::from_fields(&command_fields).map_err(into_decryption)?;
        let signature = Signature::from_fields([
            plaintext[COMMAND_FIELDS],
            plaintext[COMMAND_FIELDS + 1],
            plaintext[COMMAND_FIELDS + 2],
        ])
        .map_err(into_decryption)?;
        Ok((command, signature))
    }

    /// Serialises the message to JSON.
    pub fn to_json_string(&self) -> MaciResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parses a message previously emitted by [`Message::to_json_string`].
    pub fn from_json_str(input: &str) -> MaciResult<Self> {
        Ok(serde_json::from_str(input)?)
    }
}

fn into_decryption(err: MaciError) -> MaciError {
    match err {
        MaciError::Decode(reason) => MaciError::Decryption(reason),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::Keypair;
    use crate::leaf::VoteLeaf;
    use proptest::prelude::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn setup(seed: u64) -> (StdRng, Keypair, Keypair) {
        let mut rng = StdRng::seed_from_u64(seed);
        let coordinator = Keypair::random(&mut rng);
        let voter = Keypair::random(&mut rng);
        (rng, coordinator, voter)
    }

    #[test]
    fn coordinator_recovers_command_and_signature() {
        let (mut rng, coordinator, voter) = setup(30);
        let cmd = Command::new(
            1,
            voter.public_key,
            0,
            VoteLeaf::new(3, 0),
            1,
            Command::random_salt(&mut rng),
        );
        let (message, ephemeral) =
            cmd.into_message(&voter.private_key, &coordinator.public_key, &mut rng);
        assert_eq!(message.ephemeral_public_key, ephemeral.public_key);
        let (decoded, signature) = message.decrypt(&coordinator.private_key).unwrap();
        assert_eq!(decoded, cmd);
        assert!(decoded.verify_signature(&signature, &voter.public_key));
    }

    #[test]
    fn wrong_key_fails_with_decryption_error() {
        let (mut rng, coordinator, voter) = setup(31);
        let cmd = Command::new(1, voter.public_key, 0, VoteLeaf::new(1, 0), 1, Fr::from(5u64));
        let (message, _) = cmd.into_message(&voter.private_key, &coordinator.public_key, &mut rng);
        let err = message.decrypt(&voter.private_key).unwrap_err();
        assert!(matches!(err, MaciError::Decryption(_)));
    }

    #[test]
    fn malformed_ciphertexts_are_rejected() {
        let (mut rng, coordinator, voter) = setup(32);
        let cmd = Command::new(1, voter.public_key, 0, VoteLeaf::new(1, 0), 1, Fr::from(5u64));
        let (message, _) = cmd.into_message(&voter.private_key, &coordinator.public_key, &mut rng);

        let mut truncated = message.clone();
        truncated.ciphertext.data.pop();
        assert!(matches!(
            truncated.decrypt(&coordinator.private_key),
            Err(MaciError::Decryption(_))
        ));

        let mut flipped = message.clone();
        flipped.ciphertext.data[0] += Fr::from(1u64);
        assert!(matches!(
            flipped.decrypt(&coordinator.private_key),
            Err(MaciError::Decryption(_))
        ));
    }

    #[test]
    fn message_hash_and_json() {
        let (mut rng, coordinator, voter) = setup(33);
        let cmd = Command::new(1, voter.public_key, 0, VoteLeaf::new(1, 0), 1, Fr::from(5u64));
        let (message, _) = cmd.into_message(&voter.private_key, &coordinator.public_key, &mut rng);
        let parsed = Message::from_json_str(&message.to_json_string().unwrap()).unwrap();
        assert_eq!(parsed, message);
        assert_eq!(parsed.hash().unwrap(), message.hash().unwrap());
        let mut other = message.clone();
        other.ciphertext.iv += Fr::from(1u64);
        assert_ne!(other.hash().unwrap(), message.hash().unwrap());

        let mut short = message.clone();
        short.ciphertext.data.pop();
        assert!(matches!(short.hash(), Err(MaciError::Decode(_))));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]
        #[test]
        fn encrypt_decrypt_roundtrip(
            seed in any::<u64>(),
            state_index in any::<u64>(),
            option in any::<u64>(),
            positive in any::<u64>(),
            negative in any::<u64>(),
            nonce in any::<u64>(),
        ) {
            let (mut rng, coordinator, voter) = setup(seed);
            let cmd = Command::new(
                state_index,
                voter.public_key,
                option,
                VoteLeaf::new(positive, negative),
                nonce,
                Command::random_salt(&mut rng),
            );
            let signature = cmd.sign(&voter.private_key);
            let ephemeral = Keypair::random(&mut rng);
            let shared = derive_shared_key(&ephemeral.private_key, &coordinator.public_key);
            let message = Message::new(cmd.encrypt(&signature, &shared), ephemeral.public_key);
            let (decoded, decoded_sig) = message.decrypt(&coordinator.private_key).unwrap();
            prop_assert_eq!(decoded, cmd);
            prop_assert_eq!(decoded_sig, signature);
        }
    }
}
