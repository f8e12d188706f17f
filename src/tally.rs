//! Vote tallying and the salted results commitment.
//!
//! A [`Tally`] is a per-option vector of summed [`VoteLeaf`] weights plus the
//! voice credits spent to cast them.  Tallies over disjoint sets of ballots
//! combine with [`Tally::merge`], which is associative and commutative, so the
//! tally can be produced in batches that mirror a chunked proving pipeline.
//!
//! The commitment is `Poseidon(root, salt)` where `root` is the vote option
//! tree built over the packed totals.

use ark_bn254::Fr;
use ark_ff::Zero;
use serde::{Deserialize, Serialize};

use crate::error::{MaciError, MaciResult};
use crate::leaf::{StateLeaf, VoteLeaf};
use crate::merkle::{IncrementalTree, MAX_TREE_DEPTH};
use crate::poseidon::hash_pair;

/// Root of a vote option tree holding `votes` in order, zero-padded to `2^depth`.
pub fn vote_option_root(votes: &[VoteLeaf], depth: u8) -> MaciResult<Fr> {
    if depth == 0 || depth > MAX_TREE_DEPTH {
        return Err(MaciError::InvalidConfig(format!(
            "vote option tree depth must be in 1..={MAX_TREE_DEPTH}, got {depth}"
        )));
    }
    let packed: Vec<Fr> = votes.iter().map(VoteLeaf::pack).collect();
    Ok(IncrementalTree::from_leaves(depth, Fr::zero(), &packed)?.root())
}

/// A voter's final state leaf together with the votes behind its vote option root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ballot {
    /// Sign-up slot of the voter.
    pub state_index: u64,
    /// Latest leaf accepted for the voter.
    pub leaf: StateLeaf,
    /// Per-option weights; option `i` is `votes[i]`.
    pub votes: Vec<VoteLeaf>,
}

impl Ballot {
    /// Checks that `votes` open the leaf's vote option root.
    pub fn verify(&self, depth: u8) -> MaciResult<()> {
        if vote_option_root(&self.votes, depth)? != self.leaf.vote_option_tree_root {
            return Err(MaciError::VoteOptionRootMismatch(self.state_index));
        }
        Ok(())
    }
}

/// Per-option totals and spent credits over a set of ballots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tally {
    /// Summed weights per vote option.
    pub totals: Vec<VoteLeaf>,
    /// Voice credits consumed by the tallied votes.
    pub spent_voice_credits: u128,
}

impl Tally {
    /// Empty tally over `num_options` options.
    pub fn new(num_options: usize) -> Self {
        Self {
            totals: vec![VoteLeaf::default(); num_options],
            spent_voice_credits: 0,
        }
    }

    /// Adds one ballot's votes.
    pub fn add_ballot(&mut self, ballot: &Ballot) -> MaciResult<()> {
        if ballot.votes.len() > self.totals.len() {
            let extra = ballot.votes[self.totals.len()..]
                .iter()
                .position(|vote| *vote != VoteLeaf::default());
            if let Some(offset) = extra {
                return Err(MaciError::InvalidVoteOption {
                    index: (self.totals.len() + offset) as u64,
                    max: self.totals.len() as u64,
                });
            }
        }
        for (option, (total, vote)) in self.totals.iter_mut().zip(&ballot.votes).enumerate() {
            *total = add_votes(total, vote, option)?;
            self.spent_voice_credits = vote
                .cost()
                .and_then(|cost| self.spent_voice_credits.checked_add(cost))
                .ok_or(MaciError::TallyOverflow(option))?;
        }
        Ok(())
    }

    /// Sums two tallies option by option. The shorter one is zero-extended.
    pub fn merge(&self, other: &Tally) -> MaciResult<Tally> {
        let len = self.totals.len().max(other.totals.len());
        let zero = VoteLeaf::default();
        let totals = (0..len)
            .map(|option| {
                let left = self.totals.get(option).unwrap_or(&zero);
                let right = other.totals.get(option).unwrap_or(&zero);
                add_votes(left, right, option)
            })
            .collect::<MaciResult<Vec<_>>>()?;
        let spent_voice_credits = self
            .spent_voice_credits
            .checked_add(other.spent_voice_credits)
            .ok_or(MaciError::TallyOverflow(len))?;
        Ok(Tally {
            totals,
            spent_voice_credits,
        })
    }

    /// Number of vote options covered.
    pub fn num_options(&self) -> usize {
        self.totals.len()
    }
}

fn add_votes(left: &VoteLeaf, right: &VoteLeaf, option: usize) -> MaciResult<VoteLeaf> {
    let positive = left
        .positive
        .checked_add(right.positive)
        .ok_or(MaciError::TallyOverflow(option))?;
    let negative = left
        .negative
        .checked_add(right.negative)
        .ok_or(MaciError::TallyOverflow(option))?;
    Ok(VoteLeaf::new(positive, negative))
}

/// Tallies `ballots` over `num_options` options.
pub fn compute_tally(ballots: &[Ballot], num_options: usize) -> MaciResult<Tally> {
    let mut tally = Tally::new(num_options);
    for ballot in ballots {
        tally.add_ballot(ballot)?;
    }
    Ok(tally)
}

/// Hiding commitment to the tally totals: `Poseidon(vote_option_root(totals), salt)`.
pub fn commit(tally: &Tally, salt: &Fr, depth: u8) -> MaciResult<Fr> {
    let root = vote_option_root(&tally.totals, depth)?;
    Ok(hash_pair(&root, salt))
}

/// Succeeds iff `tally` and `salt` open `commitment`.
pub fn reveal(commitment: &Fr, tally: &Tally, salt: &Fr, depth: u8) -> MaciResult<()> {
    if commit(tally, salt, depth)? != *commitment {
        return Err(MaciError::CommitmentMismatch);
    }
    Ok(())
}

/// Final, publishable outcome of a round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TallyResult {
    /// Summed weights per vote option.
    pub totals: Vec<VoteLeaf>,
    /// Voice credits consumed across all voters.
    pub total_spent_voice_credits: u128,
    /// Salt of the final commitment, kept secret until reveal.
    #[serde(with = "crate::data::fr_hex")]
    pub salt: Fr,
    /// `commit(totals, salt)`.
    #[serde(with = "crate::data::fr_hex")]
    pub commitment: Fr,
}

impl TallyResult {
    /// Packages a finished tally with the salt it was committed under.
    pub fn new(tally: Tally, salt: Fr, depth: u8) -> MaciResult<Self> {
        let commitment = commit(&tally, &salt, depth)?;
        Ok(Self {
            totals: tally.totals,
            total_spent_voice_credits: tally.spent_voice_credits,
            salt,
            commitment,
        })
    }

    /// The totals as a [`Tally`].
    pub fn tally(&self) -> Tally {
        Tally {
            totals: self.totals.clone(),
            spent_voice_credits: self.total_spent_voice_credits,
        }
    }

    /// Re-opens the stored commitment.
    pub fn verify(&self, depth: u8) -> MaciResult<()> {
        reveal(&self.commitment, &self.tally(), &self.salt, depth)
    }

    /// Serialises the result to JSON.
    pub fn to_json_string(&self) -> MaciResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parses a result previously emitted by [`TallyResult::to_json_string`].
    pub fn from_json_str(input: &str) -> MaciResult<Self> {
        Ok(serde_json::from_str(input)?)
    }
}
