//! Error type shared by every layer of the replica.
//!
//! Errors fall into two groups.  Command-level validation failures
//! ([`MaciError::is_recoverable`]) are expected while processing a batch and
//! only cause a random leaf to be inserted in place of the command.  All other
//! variants abort the enclosing call and are surfaced to the caller verbatim.

use thiserror::Error;

use crate::replica::Phase;

/// Result alias used throughout the crate.
pub type MaciResult<T> = Result<T, MaciError>;

/// Identifies one of the two round accumulators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeKind {
    /// Sign-up tree of state leaves.
    State,
    /// Append-only tree of published messages.
    Message,
}

impl std::fmt::Display for TreeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::State => f.write_str("state"),
            Self::Message => f.write_str("message"),
        }
    }
}

/// Errors raised by the replica, the command protocol and the tally engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MaciError {
    #[error("tree of depth {depth} is full ({capacity} leaves)")]
    /// The accumulator has no free leaf left.
    CapacityExceeded {
        /// Depth of the full tree.
        depth: u8,
        /// Number of leaves the tree can hold.
        capacity: u64,
    },
    #[error("decryption failed: {0}")]
    /// The ciphertext could not be decrypted into a well-formed command.
    Decryption(String),
    #[error("command signature does not verify against the voter key")]
    /// The command signature did not verify.
    InvalidSignature,
    #[error("nonce mismatch (expected {expected}, got {actual})")]
    /// The command nonce was not the voter's stored nonce plus one.
    NonceMismatch {
        /// Nonce the command had to carry.
        expected: u64,
        /// Nonce the command carried.
        actual: u64,
    },
    #[error("insufficient voice credits (available {available}, required {required})")]
    /// The voter cannot pay for the requested vote weights.
    InsufficientCredits {
        /// Credits available, including the refund of the previous vote.
        available: u128,
        /// Credits the new vote costs.
        required: u128,
    },
    #[error("unknown state index {0}")]
    /// The command addressed a state index with no registered voter.
    UnknownStateIndex(u64),
    #[error("vote option {index} out of range (max {max})")]
    /// The command addressed a vote option beyond the configured maximum.
    InvalidVoteOption {
        /// Requested vote option index.
        index: u64,
        /// Number of vote options in the round.
        max: u64,
    },
    #[error("tally commitment mismatch")]
    /// A revealed tally and salt do not open the commitment.
    CommitmentMismatch,
    #[error("operation requires phase {expected:?}, round is in {actual:?}")]
    /// The operation is not allowed in the current round phase.
    InvalidPhase {
        /// Phase the operation requires.
        expected: Phase,
        /// Phase the round is currently in.
        actual: Phase,
    },
    #[error("no unprocessed {0} remaining")]
    /// Every batch has already been consumed.
    NothingToProcess(&'static str),
    #[error("{0} published messages are still unprocessed")]
    /// Tallying was requested before every message batch was processed.
    MessagesPending(u64),
    #[error("batch size must be non-zero")]
    /// A batch operation was requested with size zero.
    InvalidBatchSize,
    #[error("invalid config: {0}")]
    /// The round configuration failed validation.
    InvalidConfig(String),
    #[error("decode error: {0}")]
    /// A textual or binary encoding could not be parsed.
    Decode(String),
    #[error("json error: {0}")]
    /// JSON (de)serialisation failed.
    Json(String),
    #[error("io error: {0}")]
    /// Underlying filesystem failure.
    Io(String),
    #[error("{tree} root mismatch (expected {expected}, replica {actual})")]
    /// A root reported by the ledger differs from the replica's root.
    RootMismatch {
        /// Tree whose roots diverged.
        tree: TreeKind,
        /// Hex root reported by the caller.
        expected: String,
        /// Hex root computed by the replica.
        actual: String,
    },
    #[error("ballot votes do not match the vote option root of state index {0}")]
    /// Ballot votes disagree with the leaf's vote option root.
    VoteOptionRootMismatch(u64),
    #[error("tally overflow on vote option {0}")]
    /// A per-option total no longer fits its integer type.
    TallyOverflow(usize),
}

impl MaciError {
    /// Returns `true` for command-level validation failures that are absorbed
    /// by inserting a random leaf during batch processing.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Decryption(_)
                | Self::InvalidSignature
                | Self::NonceMismatch { .. }
                | Self::InsufficientCredits { .. }
                | Self::UnknownStateIndex(_)
                | Self::InvalidVoteOption { .. }
        )
    }
}

impl From<serde_json::Error> for MaciError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err.to_string())
    }
}

impl From<std::io::Error> for MaciError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
