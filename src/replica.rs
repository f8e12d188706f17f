//! The coordinator's replica of a voting round.
//!
//! [`MaciState`] mirrors the state and message trees kept by the round
//! contract.  Voters sign up and publish messages while the round is open;
//! once voting closes the coordinator decrypts messages batch by batch and
//! turns each one into a fresh state leaf.  Commands that fail validation
//! still occupy a slot: a random leaf, derived from the coordinator secret and
//! the message index, is inserted in their place so observers cannot tell
//! which messages were accepted.
//!
//! Batches advance forward through the message log.  Inside a batch the
//! messages are applied latest-first, so a voter can override an earlier
//! command published in the same batch.

use ark_bn254::Fr;
use ark_ff::{UniformRand, Zero};
#[cfg(not(target_arch = "wasm32"))]
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info};

use crate::command::Command;
use crate::config::RoundConfig;
use crate::data::{fr_from_hex, fr_to_hex};
use crate::eddsa::Signature;
use crate::error::{MaciError, MaciResult, TreeKind};
use crate::keys::{Keypair, PublicKey};
use crate::leaf::{StateLeaf, VoteLeaf};
use crate::merkle::{nothing_up_my_sleeve, IncrementalTree, MerklePath};
use crate::message::Message;
use crate::prng::{random_state_leaf, CoordinatorPrng};
use crate::tally::{commit, vote_option_root, Ballot, Tally, TallyResult};

const TALLY_SALT_DOMAIN: &[u8] = b"MACI_TALLY_SALT";

/// Round lifecycle. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    /// Sign-ups accepted, messages not yet.
    Registering,
    /// Sign-ups and messages accepted.
    Voting,
    /// Messages are being processed and tallied.
    Processing,
    /// The tally is final.
    Tallied,
}

/// A registered voter and their latest accepted state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Voter {
    /// Index assigned at sign-up; commands address the voter by it.
    pub state_index: u64,
    /// Tree index of the voter's latest leaf.
    pub leaf_index: u64,
    /// Latest leaf accepted for the voter.
    pub leaf: StateLeaf,
    /// Current weights per vote option.
    pub votes: Vec<VoteLeaf>,
}

impl Voter {
    /// The voter's ballot for tallying.
    pub fn ballot(&self) -> Ballot {
        Ballot {
            state_index: self.state_index,
            leaf: self.leaf.clone(),
            votes: self.votes.clone(),
        }
    }
}

/// Witness values for one processed message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageTransition {
    /// Position of the message in the log.
    pub message_index: u64,
    /// The message as published.
    pub message: Message,
    /// Path of the message in the message tree.
    pub message_path: MerklePath,
    /// Decrypted command, when decryption succeeded.
    pub command: Option<Command>,
    /// Decrypted signature, when decryption succeeded.
    pub signature: Option<Signature>,
    /// Addressed voter's leaf before the message, when the state index resolved.
    pub old_leaf: Option<StateLeaf>,
    /// Tree index of `old_leaf`.
    pub old_leaf_index: Option<u64>,
    /// Path of `old_leaf` in the state tree before the insertion.
    pub old_leaf_path: Option<MerklePath>,
    /// Leaf inserted for the message: the updated voter leaf or a random leaf.
    pub new_leaf: StateLeaf,
    /// Tree index of `new_leaf`.
    pub new_leaf_index: u64,
    /// Path of `new_leaf` right after its insertion.
    pub new_leaf_path: MerklePath,
    /// Why the command was rejected, if it was.
    pub rejection: Option<MaciError>,
}

impl MessageTransition {
    /// `true` when the command was applied.
    pub fn is_accepted(&self) -> bool {
        self.rejection.is_none()
    }
}

/// Result of [`MaciState::process_batch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchOutcome {
    /// Index of the first message in the batch.
    pub start_index: u64,
    /// Requested batch size; the pointer advanced by this much.
    pub batch_size: usize,
    /// Random leaf derived for `start_index`, reported for external cross-checks.
    pub random_leaf: StateLeaf,
    /// State root before the batch.
    pub state_root_before: Fr,
    /// State root after the batch.
    pub state_root_after: Fr,
    /// One entry per processed message, in application order (latest first).
    pub transitions: Vec<MessageTransition>,
}

impl BatchOutcome {
    /// Number of commands applied.
    pub fn accepted(&self) -> usize {
        self.transitions.iter().filter(|t| t.is_accepted()).count()
    }

    /// Number of commands replaced by random leaves.
    pub fn rejected(&self) -> usize {
        self.transitions.len() - self.accepted()
    }
}

/// Result of [`MaciState::tally_batch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TallyBatchOutcome {
    /// Zero-based number of this tally batch.
    pub batch_index: u64,
    /// State index of the first voter in the batch.
    pub start_state_index: u64,
    /// Number of voters tallied in this batch.
    pub voters: usize,
    /// Totals contributed by this batch alone.
    pub batch_tally: Tally,
    /// Totals over every voter tallied so far.
    pub cumulative: Tally,
    /// Commitment carried in from the previous batch (zero for the first).
    pub previous_commitment: Fr,
    /// Commitment to `cumulative` under `salt`.
    pub commitment: Fr,
    /// Fresh salt for this batch.
    pub salt: Fr,
    /// `true` once every voter has been tallied.
    pub complete: bool,
}

#[derive(Debug, Clone)]
struct TallyProgress {
    cursor: usize,
    batches: u64,
    tally: Tally,
    commitment: Fr,
}

// Stage-one decision for one message, before anything is inserted.
struct Decision {
    message_index: u64,
    decrypted: Option<(Command, Signature)>,
    outcome: MaciResult<Voter>,
}

/// Off-chain replica of one voting round.
#[derive(Debug, Clone)]
pub struct MaciState {
    config: RoundConfig,
    coordinator: Keypair,
    phase: Phase,
    state_tree: IncrementalTree,
    message_tree: IncrementalTree,
    messages: Vec<Message>,
    voters: Vec<Voter>,
    key_index: HashMap<PublicKey, u64>,
    empty_vote_option_root: Fr,
    processed: u64,
    tally: TallyProgress,
    result: Option<TallyResult>,
}

impl MaciState {
    /// Starts a round in [`Phase::Registering`] with the blank leaf at state index 0.
    pub fn new(config: RoundConfig, coordinator: Keypair) -> MaciResult<Self> {
        config.validate()?;
        let zero = nothing_up_my_sleeve();
        let mut state_tree = IncrementalTree::new(config.state_tree_depth, zero);
        let message_tree = IncrementalTree::new(config.message_tree_depth, zero);
        let empty_votes = vec![VoteLeaf::default(); config.max_vote_options as usize];
        let empty_vote_option_root =
            vote_option_root(&empty_votes, config.vote_option_tree_depth)?;
        state_tree.insert(StateLeaf::blank(empty_vote_option_root).hash())?;
        let tally = TallyProgress {
            cursor: 0,
            batches: 0,
            tally: Tally::new(config.max_vote_options as usize),
            commitment: Fr::zero(),
        };
        info!(
            evt = "round_created",
            state_depth = config.state_tree_depth,
            message_depth = config.message_tree_depth,
            vote_option_depth = config.vote_option_tree_depth,
            max_vote_options = config.max_vote_options,
        );
        Ok(Self {
            config,
            coordinator,
            phase: Phase::Registering,
            state_tree,
            message_tree,
            messages: Vec::new(),
            voters: Vec::new(),
            key_index: HashMap::new(),
            empty_vote_option_root,
            processed: 0,
            tally,
            result: None,
        })
    }

    /// Round parameters.
    pub fn config(&self) -> &RoundConfig {
        &self.config
    }

    /// Current phase.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Public key voters encrypt to.
    pub fn coordinator_public_key(&self) -> &PublicKey {
        &self.coordinator.public_key
    }

    /// Root of a freshly signed-up voter's vote option tree.
    pub fn empty_vote_option_root(&self) -> Fr {
        self.empty_vote_option_root
    }

    /// Moves from [`Phase::Registering`] to [`Phase::Voting`].
    pub fn open_voting(&mut self) -> MaciResult<()> {
        self.advance(Phase::Registering, Phase::Voting)
    }

    /// Moves from [`Phase::Voting`] to [`Phase::Processing`].
    pub fn close_voting(&mut self) -> MaciResult<()> {
        self.advance(Phase::Voting, Phase::Processing)
    }

    fn advance(&mut self, from: Phase, to: Phase) -> MaciResult<()> {
        self.require_phase(from)?;
        self.phase = to;
        info!(evt = "phase", from = ?from, to = ?to);
        Ok(())
    }

    fn require_phase(&self, expected: Phase) -> MaciResult<()> {
        if self.phase != expected {
            return Err(MaciError::InvalidPhase {
                expected,
                actual: self.phase,
            });
        }
        Ok(())
    }

    /// Registers `public_key` with `voice_credits` and returns its state index.
    pub fn sign_up(&mut self, public_key: PublicKey, voice_credits: u64) -> MaciResult<u64> {
        if !matches!(self.phase, Phase::Registering | Phase::Voting) {
            return Err(MaciError::InvalidPhase {
                expected: Phase::Voting,
                actual: self.phase,
            });
        }
        let leaf = StateLeaf::new(public_key, voice_credits, self.empty_vote_option_root, 0);
        let state_index = self.state_tree.insert(leaf.hash())?;
        self.voters.push(Voter {
            state_index,
            leaf_index: state_index,
            leaf,
            votes: vec![VoteLeaf::default(); self.config.max_vote_options as usize],
        });
        self.key_index.insert(public_key, state_index);
        info!(evt = "signup", state_index, voice_credits);
        Ok(state_index)
    }

    /// Registers `public_key` with the configured initial credits.
    pub fn sign_up_default(&mut self, public_key: PublicKey) -> MaciResult<u64> {
        self.sign_up(public_key, self.config.initial_voice_credits)
    }

    /// Appends `message` to the message tree and log; returns its index.
    ///
    /// A message whose ciphertext has the wrong length is refused with
    /// [`MaciError::Decode`] and leaves the tree unchanged.
    pub fn publish_message(&mut self, message: Message) -> MaciResult<u64> {
        self.require_phase(Phase::Voting)?;
        let index = self.message_tree.insert(message.hash()?)?;
        self.messages.push(message);
        debug!(evt = "publish", message_index = index);
        Ok(index)
    }

    /// Processes the next `batch_size` messages.
    ///
    /// Capacity is checked up front, so an error leaves the replica untouched.
    pub fn process_batch(&mut self, batch_size: usize) -> MaciResult<BatchOutcome> {
        self.require_phase(Phase::Processing)?;
        if batch_size == 0 {
            return Err(MaciError::InvalidBatchSize);
        }
        let total = self.messages.len() as u64;
        let start = self.processed;
        if start >= total {
            return Err(MaciError::NothingToProcess("messages"));
        }
        let end = start.saturating_add(batch_size as u64).min(total);
        let count = end - start;
        if self.state_tree.remaining() < count {
            return Err(MaciError::CapacityExceeded {
                depth: self.state_tree.depth(),
                capacity: self.state_tree.capacity(),
            });
        }

        let decrypted = self.decrypt_range(start as usize, end as usize);
        let decisions = self.decide(start, decrypted)?;

        let state_root_before = self.state_tree.root();
        let mut transitions = Vec::with_capacity(decisions.len());
        for decision in decisions {
            transitions.push(self.apply(decision)?);
        }
        self.processed = start.saturating_add(batch_size as u64);

        let outcome = BatchOutcome {
            start_index: start,
            batch_size,
            random_leaf: random_state_leaf(&self.coordinator.private_key, start),
            state_root_before,
            state_root_after: self.state_tree.root(),
            transitions,
        };
        info!(
            evt = "batch",
            start_index = start,
            processed = count,
            accepted = outcome.accepted(),
            rejected = outcome.rejected(),
            state_root = %fr_to_hex(&outcome.state_root_after),
        );
        Ok(outcome)
    }

    /// Processes every remaining message with the configured batch size.
    pub fn process_all_batches(&mut self) -> MaciResult<Vec<BatchOutcome>> {
        let mut outcomes = Vec::new();
        while self.pending_messages() > 0 {
            outcomes.push(self.process_batch(self.config.message_batch_size)?);
        }
        Ok(outcomes)
    }

    fn decrypt_range(&self, start: usize, end: usize) -> Vec<MaciResult<(Command, Signature)>> {
        let key = &self.coordinator.private_key;
        let batch = &self.messages[start..end];
        #[cfg(not(target_arch = "wasm32"))]
        {
            batch.par_iter().map(|message| message.decrypt(key)).collect()
        }
        #[cfg(target_arch = "wasm32")]
        {
            batch.iter().map(|message| message.decrypt(key)).collect()
        }
    }

    // Validates the batch latest-first against a staged view of the voters.
    fn decide(
        &self,
        start: u64,
        decrypted: Vec<MaciResult<(Command, Signature)>>,
    ) -> MaciResult<Vec<Decision>> {
        let mut staged: HashMap<u64, Voter> = HashMap::new();
        let mut decisions = Vec::with_capacity(decrypted.len());
        for (offset, result) in decrypted.into_iter().enumerate().rev() {
            let message_index = start + offset as u64;
            let (decrypted, outcome) = match result {
                Ok((command, signature)) => {
                    let outcome = self.validate(&command, &signature, &staged);
                    if let Ok(updated) = &outcome {
                        staged.insert(updated.state_index, updated.clone());
                    }
                    (Some((command, signature)), outcome)
                }
                Err(err) => (None, Err(err)),
            };
            if let Err(err) = &outcome {
                if !err.is_recoverable() {
                    return Err(err.clone());
                }
            }
            decisions.push(Decision {
                message_index,
                decrypted,
                outcome,
            });
        }
        Ok(decisions)
    }

    fn validate(
        &self,
        command: &Command,
        signature: &Signature,
        staged: &HashMap<u64, Voter>,
    ) -> MaciResult<Voter> {
        let voter = staged
            .get(&command.state_index)
            .or_else(|| self.voter(command.state_index))
            .ok_or(MaciError::UnknownStateIndex(command.state_index))?;
        let leaf = &voter.leaf;
        if !command.verify_signature(signature, &leaf.public_key) {
            return Err(MaciError::InvalidSignature);
        }
        let expected = leaf.nonce.saturating_add(1);
        if command.nonce != expected {
            return Err(MaciError::NonceMismatch {
                expected,
                actual: command.nonce,
            });
        }
        if command.vote_option_index >= self.config.max_vote_options {
            return Err(MaciError::InvalidVoteOption {
                index: command.vote_option_index,
                max: self.config.max_vote_options,
            });
        }
        let option = command.vote_option_index as usize;
        // Stored votes were paid for, so their cost is always finite.
        let refund = voter.votes[option].cost().unwrap_or(0);
        let available = (leaf.voice_credit_balance as u128).saturating_add(refund);
        let required = command.vote_leaf.cost().unwrap_or(u128::MAX);
        let balance = available
            .checked_sub(required)
            .and_then(|rest| u64::try_from(rest).ok())
            .ok_or(MaciError::InsufficientCredits {
                available,
                required,
            })?;

        let mut votes = voter.votes.clone();
        votes[option] = command.vote_leaf;
        let root = vote_option_root(&votes, self.config.vote_option_tree_depth)?;
        Ok(Voter {
            state_index: voter.state_index,
            leaf_index: voter.leaf_index,
            leaf: StateLeaf::new(command.new_public_key, balance, root, command.nonce),
            votes,
        })
    }

    fn apply(&mut self, decision: Decision) -> MaciResult<MessageTransition> {
        let Decision {
            message_index,
            decrypted,
            outcome,
        } = decision;
        let (command, signature) = match decrypted {
            Some((command, signature)) => (Some(command), Some(signature)),
            None => (None, None),
        };
        let previous = command
            .as_ref()
            .and_then(|c| self.voter(c.state_index))
            .cloned();
        let old_leaf_path = match &previous {
            Some(voter) => Some(self.state_tree.path(voter.leaf_index)?),
            None => None,
        };

        let (new_leaf, new_leaf_index, rejection) = match outcome {
            Ok(updated) => {
                let leaf = updated.leaf.clone();
                let index = self.state_tree.insert(leaf.hash())?;
                self.commit_voter(updated, index);
                (leaf, index, None)
            }
            Err(err) => {
                let leaf = random_state_leaf(&self.coordinator.private_key, message_index);
                let index = self.state_tree.insert(leaf.hash())?;
                (leaf, index, Some(err))
            }
        };
        match &rejection {
            None => debug!(evt = "command_applied", message_index, leaf_index = new_leaf_index),
            Some(err) => debug!(
                evt = "command_rejected",
                message_index,
                leaf_index = new_leaf_index,
                reason = %err,
            ),
        }

        Ok(MessageTransition {
            message_index,
            message: self.messages[message_index as usize].clone(),
            message_path: self.message_tree.path(message_index)?,
            command,
            signature,
            old_leaf: previous.as_ref().map(|voter| voter.leaf.clone()),
            old_leaf_index: previous.as_ref().map(|voter| voter.leaf_index),
            old_leaf_path,
            new_leaf,
            new_leaf_index,
            new_leaf_path: self.state_tree.path(new_leaf_index)?,
            rejection,
        })
    }

    fn commit_voter(&mut self, mut updated: Voter, leaf_index: u64) {
        updated.leaf_index = leaf_index;
        let slot = (updated.state_index - 1) as usize;
        let old_key = self.voters[slot].leaf.public_key;
        let new_key = updated.leaf.public_key;
        if old_key != new_key {
            if self.key_index.get(&old_key) == Some(&updated.state_index) {
                self.key_index.remove(&old_key);
            }
            self.key_index.insert(new_key, updated.state_index);
        }
        self.voters[slot] = updated;
    }

    /// Tallies the next `batch_size` voters, chaining the results commitment.
    ///
    /// Requires every message to be processed.  The batch that reaches the
    /// last voter finalises the result and moves the round to [`Phase::Tallied`].
    pub fn tally_batch(&mut self, batch_size: usize) -> MaciResult<TallyBatchOutcome> {
        self.require_phase(Phase::Processing)?;
        if batch_size == 0 {
            return Err(MaciError::InvalidBatchSize);
        }
        let pending = self.pending_messages();
        if pending > 0 {
            return Err(MaciError::MessagesPending(pending));
        }
        let depth = self.config.vote_option_tree_depth;
        let start = self.tally.cursor;
        let end = start.saturating_add(batch_size).min(self.voters.len());

        let mut batch_tally = Tally::new(self.config.max_vote_options as usize);
        for voter in &self.voters[start..end] {
            let ballot = voter.ballot();
            ballot.verify(depth)?;
            batch_tally.add_ballot(&ballot)?;
        }
        let cumulative = self.tally.tally.merge(&batch_tally)?;
        let batch_index = self.tally.batches;
        let mut rng =
            CoordinatorPrng::for_slot(&self.coordinator.private_key, TALLY_SALT_DOMAIN, batch_index);
        let salt = Fr::rand(&mut rng);
        let commitment = commit(&cumulative, &salt, depth)?;
        let previous_commitment = self.tally.commitment;

        self.tally = TallyProgress {
            cursor: end,
            batches: batch_index + 1,
            tally: cumulative.clone(),
            commitment,
        };
        let complete = end == self.voters.len();
        info!(
            evt = "tally_batch",
            batch_index,
            voters = end - start,
            complete,
            commitment = %fr_to_hex(&commitment),
        );
        if complete {
            self.result = Some(TallyResult::new(cumulative.clone(), salt, depth)?);
            self.phase = Phase::Tallied;
            info!(evt = "phase", from = ?Phase::Processing, to = ?Phase::Tallied);
        }
        Ok(TallyBatchOutcome {
            batch_index,
            start_state_index: start as u64 + 1,
            voters: end - start,
            batch_tally,
            cumulative,
            previous_commitment,
            commitment,
            salt,
            complete,
        })
    }

    /// Runs the remaining tally batches and returns the final result.
    pub fn finalize_tally(&mut self) -> MaciResult<TallyResult> {
        while self.phase == Phase::Processing {
            self.tally_batch(self.config.tally_batch_size)?;
        }
        self.result
            .clone()
            .ok_or(MaciError::InvalidPhase {
                expected: Phase::Tallied,
                actual: self.phase,
            })
    }

    /// The final tally, once the round is [`Phase::Tallied`].
    pub fn tally_result(&self) -> Option<&TallyResult> {
        self.result.as_ref()
    }

    /// Every voter's current ballot in state index order.
    pub fn ballots(&self) -> Vec<Ballot> {
        self.voters.iter().map(Voter::ballot).collect()
    }

    /// Voter registered at `state_index`.
    pub fn voter(&self, state_index: u64) -> Option<&Voter> {
        let slot = state_index.checked_sub(1)?;
        self.voters.get(usize::try_from(slot).ok()?)
    }

    /// State index of the voter currently holding `public_key`.
    pub fn state_index_of(&self, public_key: &PublicKey) -> Option<u64> {
        self.key_index.get(public_key).copied()
    }

    /// Number of sign-ups.
    pub fn num_signups(&self) -> u64 {
        self.voters.len() as u64
    }

    /// Published messages in order.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Index of the next unprocessed message.
    pub fn processed_messages(&self) -> u64 {
        self.processed.min(self.messages.len() as u64)
    }

    /// Messages not yet consumed by a batch.
    pub fn pending_messages(&self) -> u64 {
        (self.messages.len() as u64).saturating_sub(self.processed)
    }

    /// The state tree.
    pub fn state_tree(&self) -> &IncrementalTree {
        &self.state_tree
    }

    /// The message tree.
    pub fn message_tree(&self) -> &IncrementalTree {
        &self.message_tree
    }

    /// State tree root.
    pub fn state_root(&self) -> Fr {
        self.state_tree.root()
    }

    /// Message tree root.
    pub fn message_root(&self) -> Fr {
        self.message_tree.root()
    }

    /// State root as `0x`-prefixed big-endian hex.
    pub fn state_root_hex(&self) -> String {
        fr_to_hex(&self.state_root())
    }

    /// Message root as `0x`-prefixed big-endian hex.
    pub fn message_root_hex(&self) -> String {
        fr_to_hex(&self.message_root())
    }

    /// Compares both roots with values reported by the ledger.
    pub fn ensure_roots(&self, state_root: &str, message_root: &str) -> MaciResult<()> {
        for (tree, reported, actual) in [
            (TreeKind::State, state_root, self.state_root()),
            (TreeKind::Message, message_root, self.message_root()),
        ] {
            if fr_from_hex(reported)? != actual {
                return Err(MaciError::RootMismatch {
                    tree,
                    expected: reported.to_string(),
                    actual: fr_to_hex(&actual),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Ciphertext;
    use crate::tally::compute_tally;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    struct Round {
        rng: StdRng,
        state: MaciState,
        voters: Vec<Keypair>,
    }

    impl Round {
        fn new(config: RoundConfig, voters: usize, seed: u64) -> Self {
            let mut rng = StdRng::seed_from_u64(seed);
            let coordinator = Keypair::random(&mut rng);
            let mut state = MaciState::new(config, coordinator).unwrap();
            let voters: Vec<Keypair> = (0..voters).map(|_| Keypair::random(&mut rng)).collect();
            for voter in &voters {
                state.sign_up_default(voter.public_key).unwrap();
            }
            state.open_voting().unwrap();
            Self { rng, state, voters }
        }

        fn standard(voters: usize, seed: u64) -> Self {
            Self::new(
                RoundConfig::from_limits(15, 15, 15, 4, 4, 1000).unwrap(),
                voters,
                seed,
            )
        }

        fn command(&mut self, voter: usize, option: u64, vote: VoteLeaf, nonce: u64) -> Command {
            Command::new(
                voter as u64 + 1,
                self.voters[voter].public_key,
                option,
                vote,
                nonce,
                Command::random_salt(&mut self.rng),
            )
        }

        fn send(&mut self, signer: &Keypair, command: &Command) -> u64 {
            let coordinator = *self.state.coordinator_public_key();
            let (message, _) =
                command.into_message(&signer.private_key, &coordinator, &mut self.rng);
            self.state.publish_message(message).unwrap()
        }

        fn vote(&mut self, voter: usize, option: u64, vote: VoteLeaf, nonce: u64) -> u64 {
            let command = self.command(voter, option, vote, nonce);
            let signer = self.voters[voter].clone();
            self.send(&signer, &command)
        }
    }

    #[test]
    fn four_voters_end_to_end() {
        let mut round = Round::standard(4, 1);
        for voter in 0..4 {
            round.vote(voter, 0, VoteLeaf::new(3, 0), 1);
        }
        round.state.close_voting().unwrap();
        let outcome = round.state.process_batch(4).unwrap();
        assert_eq!(outcome.start_index, 0);
        assert_eq!(outcome.accepted(), 4);

        for state_index in 1..=4 {
            let voter = round.state.voter(state_index).unwrap();
            assert_eq!(voter.leaf.voice_credit_balance, 991);
            assert_eq!(voter.leaf.nonce, 1);
            assert_eq!(voter.votes[0], VoteLeaf::new(3, 0));
            assert!(voter.leaf_index > 4);
        }

        let result = round.state.finalize_tally().unwrap();
        assert_eq!(round.state.phase(), Phase::Tallied);
        assert_eq!(result.totals[0], VoteLeaf::new(12, 0));
        assert!(result.totals[1..].iter().all(|t| *t == VoteLeaf::default()));
        assert_eq!(result.total_spent_voice_credits, 36);
        assert!(result.verify(round.state.config().vote_option_tree_depth).is_ok());
    }

    #[test]
    fn skipped_nonce_inserts_random_leaf() {
        let mut round = Round::standard(2, 2);
        let index = round.vote(0, 0, VoteLeaf::new(3, 0), 2);
        round.state.close_voting().unwrap();
        let before = round.state.voter(1).unwrap().clone();
        let outcome = round.state.process_batch(4).unwrap();

        let transition = &outcome.transitions[0];
        assert_eq!(
            transition.rejection,
            Some(MaciError::NonceMismatch {
                expected: 1,
                actual: 2
            })
        );
        let random = random_state_leaf(&round.state.coordinator.private_key, index);
        assert_eq!(transition.new_leaf, random);
        assert_eq!(
            round.state.state_tree().leaf(transition.new_leaf_index),
            random.hash()
        );
        assert_eq!(round.state.voter(1), Some(&before));

        let result = round.state.finalize_tally().unwrap();
        assert!(result.totals.iter().all(|t| *t == VoteLeaf::default()));
        assert_eq!(result.total_spent_voice_credits, 0);
    }

    #[test]
    fn latest_message_in_batch_wins() {
        let mut round = Round::standard(1, 3);
        round.vote(0, 0, VoteLeaf::new(1, 0), 1);
        round.vote(0, 0, VoteLeaf::new(2, 0), 1);
        round.state.close_voting().unwrap();
        let outcome = round.state.process_batch(2).unwrap();

        assert_eq!(outcome.transitions[0].message_index, 1);
        assert!(outcome.transitions[0].is_accepted());
        assert!(matches!(
            outcome.transitions[1].rejection,
            Some(MaciError::NonceMismatch { .. })
        ));
        let voter = round.state.voter(1).unwrap();
        assert_eq!(voter.votes[0], VoteLeaf::new(2, 0));
        assert_eq!(voter.leaf.voice_credit_balance, 996);
    }

    #[test]
    fn key_change_moves_signing_authority() {
        let mut round = Round::standard(1, 4);
        let new_key = Keypair::random(&mut round.rng);
        let mut first = round.command(0, 1, VoteLeaf::new(1, 0), 1);
        first.new_public_key = new_key.public_key;
        let old_key = round.voters[0].clone();
        round.send(&old_key, &first);
        let second = Command::new(
            1,
            new_key.public_key,
            1,
            VoteLeaf::new(2, 0),
            2,
            Fr::from(9u64),
        );
        round.send(&new_key, &second);
        round.state.close_voting().unwrap();

        let outcomes = {
            let mut all = Vec::new();
            while round.state.pending_messages() > 0 {
                all.push(round.state.process_batch(1).unwrap());
            }
            all
        };
        assert!(outcomes.iter().all(|o| o.accepted() == 1));
        assert_eq!(round.state.state_index_of(&new_key.public_key), Some(1));
        assert_eq!(round.state.state_index_of(&old_key.public_key), None);
        assert_eq!(round.state.voter(1).unwrap().leaf.nonce, 2);
    }

    #[test]
    fn credits_are_checked_with_refund() {
        let mut round = Round::standard(1, 5);
        round.vote(0, 2, VoteLeaf::new(32, 0), 1);
        round.vote(0, 2, VoteLeaf::new(31, 0), 1);
        round.vote(0, 2, VoteLeaf::new(10, 0), 2);
        round.state.close_voting().unwrap();

        let first = round.state.process_batch(1).unwrap();
        assert_eq!(
            first.transitions[0].rejection,
            Some(MaciError::InsufficientCredits {
                available: 1000,
                required: 1024
            })
        );
        round.state.process_batch(1).unwrap();
        assert_eq!(round.state.voter(1).unwrap().leaf.voice_credit_balance, 39);
        round.state.process_batch(1).unwrap();
        assert_eq!(round.state.voter(1).unwrap().leaf.voice_credit_balance, 900);
    }

    #[test]
    fn unpayable_weights_insert_random_leaf() {
        let mut round = Round::standard(1, 13);
        let index = round.vote(0, 0, VoteLeaf::new(u64::MAX - 1, 1 << 33), 1);
        round.state.close_voting().unwrap();
        let before = round.state.voter(1).unwrap().clone();
        let outcome = round.state.process_batch(4).unwrap();

        let transition = &outcome.transitions[0];
        assert_eq!(
            transition.rejection,
            Some(MaciError::InsufficientCredits {
                available: 1000,
                required: u128::MAX
            })
        );
        assert_eq!(
            transition.new_leaf,
            random_state_leaf(&round.state.coordinator.private_key, index)
        );
        assert_eq!(round.state.voter(1), Some(&before));
        let result = round.state.finalize_tally().unwrap();
        assert_eq!(result.totals[0], VoteLeaf::default());
    }

    #[test]
    fn invalid_commands_are_absorbed() {
        let mut round = Round::standard(2, 6);
        // Signed by the wrong voter.
        let command = round.command(0, 0, VoteLeaf::new(1, 0), 1);
        let impostor = round.voters[1].clone();
        round.send(&impostor, &command);
        // Unknown state index.
        let mut stray = round.command(0, 0, VoteLeaf::new(1, 0), 1);
        stray.state_index = 9;
        let signer = round.voters[0].clone();
        round.send(&signer, &stray);
        // Vote option out of range.
        round.vote(1, 15, VoteLeaf::new(1, 0), 1);
        // Garbage ciphertext.
        let garbage = Message::new(
            Ciphertext {
                iv: Fr::from(1u64),
                data: vec![Fr::from(2u64); 10],
            },
            Keypair::random(&mut round.rng).public_key,
        );
        round.state.publish_message(garbage).unwrap();
        round.state.close_voting().unwrap();

        let outcome = round.state.process_batch(4).unwrap();
        let reasons: Vec<_> = outcome
            .transitions
            .iter()
            .map(|t| t.rejection.clone())
            .collect();
        assert!(matches!(reasons[0], Some(MaciError::Decryption(_))));
        assert!(outcome.transitions[0].command.is_none());
        assert_eq!(
            reasons[1],
            Some(MaciError::InvalidVoteOption { index: 15, max: 15 })
        );
        assert_eq!(reasons[2], Some(MaciError::UnknownStateIndex(9)));
        assert_eq!(reasons[3], Some(MaciError::InvalidSignature));
        assert_eq!(outcome.accepted(), 0);
        assert!(reasons.iter().flatten().all(MaciError::is_recoverable));
    }

    #[test]
    fn transitions_carry_valid_witnesses() {
        let mut round = Round::standard(2, 7);
        round.vote(0, 0, VoteLeaf::new(2, 0), 1);
        round.vote(1, 0, VoteLeaf::new(0, 1), 1);
        round.state.close_voting().unwrap();
        let message_root = round.state.message_root();
        let outcome = round.state.process_batch(2).unwrap();

        let first = &outcome.transitions[0];
        let old_leaf = first.old_leaf.as_ref().unwrap();
        assert!(first
            .old_leaf_path
            .as_ref()
            .unwrap()
            .verify(&old_leaf.hash(), &outcome.state_root_before));
        let last = outcome.transitions.last().unwrap();
        assert!(last
            .new_leaf_path
            .verify(&last.new_leaf.hash(), &outcome.state_root_after));
        for transition in &outcome.transitions {
            assert!(transition
                .message_path
                .verify(&transition.message.hash().unwrap(), &message_root));
        }
        assert_eq!(
            outcome.random_leaf,
            random_state_leaf(&round.state.coordinator.private_key, 0)
        );
    }

    #[test]
    fn replicas_agree_on_roots() {
        let run = || {
            let mut round = Round::standard(3, 8);
            round.vote(0, 1, VoteLeaf::new(2, 0), 1);
            round.vote(1, 1, VoteLeaf::new(1, 0), 3);
            round.vote(2, 4, VoteLeaf::new(0, 5), 1);
            round.state.close_voting().unwrap();
            round.state.process_all_batches().unwrap();
            (round.state.state_root_hex(), round.state.message_root_hex())
        };
        let (state_a, message_a) = run();
        let (state_b, message_b) = run();
        assert_eq!(state_a, state_b);
        assert_eq!(message_a, message_b);
    }

    #[test]
    fn phases_gate_operations() {
        let mut rng = StdRng::seed_from_u64(9);
        let config = RoundConfig::from_limits(15, 15, 15, 4, 4, 1000).unwrap();
        let mut state = MaciState::new(config, Keypair::random(&mut rng)).unwrap();
        let voter = Keypair::random(&mut rng);
        assert_eq!(state.sign_up_default(voter.public_key), Ok(1));

        let command = Command::new(1, voter.public_key, 0, VoteLeaf::new(1, 0), 1, Fr::from(3u64));
        let (message, _) =
            command.into_message(&voter.private_key, state.coordinator_public_key(), &mut rng);
        assert!(matches!(
            state.publish_message(message.clone()),
            Err(MaciError::InvalidPhase { .. })
        ));
        assert!(matches!(
            state.process_batch(1),
            Err(MaciError::InvalidPhase { .. })
        ));
        state.open_voting().unwrap();
        assert!(state.open_voting().is_err());
        state.publish_message(message).unwrap();
        state.close_voting().unwrap();
        assert!(matches!(
            state.sign_up_default(voter.public_key),
            Err(MaciError::InvalidPhase { .. })
        ));
        assert_eq!(state.process_batch(0), Err(MaciError::InvalidBatchSize));
        assert_eq!(state.tally_batch(1), Err(MaciError::MessagesPending(1)));
        state.process_batch(4).unwrap();
        assert_eq!(
            state.process_batch(4),
            Err(MaciError::NothingToProcess("messages"))
        );
        state.finalize_tally().unwrap();
        assert!(matches!(
            state.tally_batch(1),
            Err(MaciError::InvalidPhase { .. })
        ));
    }

    #[test]
    fn malformed_messages_are_refused_at_publication() {
        let mut round = Round::standard(1, 14);
        let message = Message::new(
            Ciphertext {
                iv: Fr::from(0u64),
                data: Vec::new(),
            },
            round.voters[0].public_key,
        );
        let root = round.state.message_root();
        assert!(matches!(
            round.state.publish_message(message),
            Err(MaciError::Decode(_))
        ));
        assert_eq!(round.state.message_root(), root);
        assert_eq!(round.vote(0, 0, VoteLeaf::new(1, 0), 1), 0);
    }

    #[test]
    fn full_state_tree_fails_before_mutation() {
        let config = RoundConfig::from_limits(4, 15, 4, 4, 4, 100).unwrap();
        let mut round = Round::new(config, 3, 10);
        let extra = Keypair::random(&mut round.rng);
        assert!(matches!(
            round.state.sign_up_default(extra.public_key),
            Err(MaciError::CapacityExceeded { .. })
        ));
        round.vote(0, 0, VoteLeaf::new(1, 0), 1);
        round.state.close_voting().unwrap();
        let root = round.state.state_root();
        assert!(matches!(
            round.state.process_batch(4),
            Err(MaciError::CapacityExceeded { .. })
        ));
        assert_eq!(round.state.state_root(), root);
        assert_eq!(round.state.pending_messages(), 1);
    }

    #[test]
    fn tally_batches_chain_commitments() {
        let mut round = Round::standard(3, 11);
        round.vote(0, 0, VoteLeaf::new(3, 0), 1);
        round.vote(1, 1, VoteLeaf::new(0, 2), 1);
        round.vote(2, 0, VoteLeaf::new(1, 1), 1);
        round.state.close_voting().unwrap();
        round.state.process_all_batches().unwrap();
        let expected = compute_tally(&round.state.ballots(), 15).unwrap();

        let first = round.state.tally_batch(2).unwrap();
        assert_eq!(first.previous_commitment, Fr::zero());
        assert_eq!(first.voters, 2);
        assert!(!first.complete);
        let second = round.state.tally_batch(2).unwrap();
        assert_eq!(second.previous_commitment, first.commitment);
        assert_eq!(second.start_state_index, 3);
        assert!(second.complete);
        assert_ne!(first.salt, second.salt);
        assert_eq!(second.cumulative, expected);

        let result = round.state.tally_result().unwrap();
        assert_eq!(result.commitment, second.commitment);
        assert_eq!(result.totals[0], VoteLeaf::new(4, 1));
        assert_eq!(result.totals[1], VoteLeaf::new(0, 2));
    }

    #[test]
    fn ensure_roots_reports_mismatch() {
        let round = Round::standard(1, 12);
        let state_root = round.state.state_root_hex();
        let message_root = round.state.message_root_hex();
        assert!(round.state.ensure_roots(&state_root, &message_root).is_ok());
        assert!(matches!(
            round.state.ensure_roots(&message_root, &message_root),
            Err(MaciError::RootMismatch {
                tree: TreeKind::State,
                ..
            })
        ));
    }
}
