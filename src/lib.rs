#![deny(missing_docs)]

//! # maci_replica
//!
//! Off-chain replica engine for a Minimal Anti-Collusion Infrastructure
//! (MACI) voting round.  The crate mirrors, bit for bit, the Merkle trees a
//! round contract maintains, and implements the command protocol that lets
//! voters submit signed, encrypted votes only the coordinator can read.
//!
//! ## Layers
//!
//! * **Primitives**: Baby Jubjub keys ([`keys`]), Poseidon over BN254
//!   ([`poseidon`]), EdDSA-Poseidon signatures ([`eddsa`]) and incremental
//!   Merkle accumulators ([`merkle`]).
//! * **Protocol entities**: [`StateLeaf`], [`VoteLeaf`], [`Command`] and
//!   [`Message`], each with canonical field and JSON encodings.
//! * **Replica**: [`MaciState`] owns both trees and the voter registry and
//!   processes message batches, substituting random leaves for rejected
//!   commands.
//! * **Tally**: per-option totals with a salted commitment ([`tally`]).
//!
//! The library emits `tracing` events but never installs a subscriber.
//!
//! ## Usage
//!
//! ```rust
//! use maci_replica::{Command, Keypair, MaciState, RoundConfig, VoteLeaf};
//! use rand::{rngs::StdRng, SeedableRng};
//!
//! let mut rng = StdRng::seed_from_u64(7);
//! let config = RoundConfig::from_limits(15, 15, 15, 4, 4, 1000)?;
//! let mut round = MaciState::new(config, Keypair::random(&mut rng))?;
//!
//! let voter = Keypair::random(&mut rng);
//! let state_index = round.sign_up_default(voter.public_key)?;
//! round.open_voting()?;
//!
//! let salt = Command::random_salt(&mut rng);
//! let command = Command::new(state_index, voter.public_key, 0, VoteLeaf::new(3, 0), 1, salt);
//! let (message, _) =
//!     command.into_message(&voter.private_key, round.coordinator_public_key(), &mut rng);
//! round.publish_message(message)?;
//! round.close_voting()?;
//!
//! round.process_all_batches()?;
//! let result = round.finalize_tally()?;
//! assert_eq!(result.totals[0], VoteLeaf::new(3, 0));
//! # Ok::<(), maci_replica::MaciError>(())
//! ```

pub mod command;
pub mod config;
pub mod data;
pub mod eddsa;
pub mod error;
pub mod keys;
pub mod leaf;
pub mod merkle;
pub mod message;
pub mod poseidon;
pub mod prng;
pub mod replica;
pub mod tally;

pub use command::Command;
pub use config::RoundConfig;
pub use data::{fr_from_hex, fr_to_hex};
pub use eddsa::Signature;
pub use error::{MaciError, MaciResult, TreeKind};
pub use keys::{derive_shared_key, Keypair, PrivateKey, PublicKey, SharedKey};
pub use leaf::{StateLeaf, VoteLeaf};
pub use merkle::{nothing_up_my_sleeve, IncrementalTree, MerklePath};
pub use message::{Ciphertext, Message};
pub use prng::random_state_leaf;
pub use replica::{BatchOutcome, MaciState, MessageTransition, Phase, TallyBatchOutcome, Voter};
pub use tally::{commit, compute_tally, reveal, Ballot, Tally, TallyResult};
