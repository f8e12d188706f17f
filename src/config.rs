//! Immutable parameters of a voting round.
//!
//! A round is described by its three tree depths, the number of vote options,
//! the batch sizes used for message processing and tallying, and the voice
//! credits granted on sign-up.  Configurations are plain JSON so a coordinator
//! can keep them next to the contract deployment record.

use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

use crate::error::{MaciError, MaciResult};
use crate::merkle::MAX_TREE_DEPTH;

/// Parameters fixed when the round is created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundConfig {
    /// Depth of the state tree.
    pub state_tree_depth: u8,
    /// Depth of the message tree.
    pub message_tree_depth: u8,
    /// Depth of each voter's vote option tree.
    pub vote_option_tree_depth: u8,
    /// Number of vote options voters may address.
    pub max_vote_options: u64,
    /// Messages per processing batch.
    pub message_batch_size: usize,
    /// Voters per tally batch.
    pub tally_batch_size: usize,
    /// Credits granted by [`crate::MaciState::sign_up_default`].
    pub initial_voice_credits: u64,
}

impl RoundConfig {
    /// Derives tree depths from capacity limits the way deployments size them:
    /// `depth = ceil(log2(max))`.
    pub fn from_limits(
        max_users: u64,
        max_messages: u64,
        max_vote_options: u64,
        message_batch_size: usize,
        tally_batch_size: usize,
        initial_voice_credits: u64,
    ) -> MaciResult<Self> {
        let config = Self {
            state_tree_depth: depth_for(max_users)?,
            message_tree_depth: depth_for(max_messages)?,
            vote_option_tree_depth: depth_for(max_vote_options)?,
            max_vote_options,
            message_batch_size,
            tally_batch_size,
            initial_voice_credits,
        };
        config.validate()?;
        Ok(config)
    }

    /// Checks depths, option count and batch sizes.
    pub fn validate(&self) -> MaciResult<()> {
        for (name, depth) in [
            ("state_tree_depth", self.state_tree_depth),
            ("message_tree_depth", self.message_tree_depth),
            ("vote_option_tree_depth", self.vote_option_tree_depth),
        ] {
            if depth == 0 || depth > MAX_TREE_DEPTH {
                return Err(MaciError::InvalidConfig(format!(
                    "{name} must be in 1..={MAX_TREE_DEPTH}, got {depth}"
                )));
            }
        }
        let option_capacity = 1u64 << self.vote_option_tree_depth;
        if self.max_vote_options == 0 || self.max_vote_options > option_capacity {
            return Err(MaciError::InvalidConfig(format!(
                "max_vote_options must be in 1..={option_capacity}, got {}",
                self.max_vote_options
            )));
        }
        if self.message_batch_size == 0 || self.tally_batch_size == 0 {
            return Err(MaciError::InvalidConfig(
                "batch sizes must be non-zero".into(),
            ));
        }
        if self.message_batch_size as u64 > 1u64 << self.message_tree_depth {
            return Err(MaciError::InvalidConfig(
                "message_batch_size exceeds message tree capacity".into(),
            ));
        }
        Ok(())
    }

    /// Parses and validates a JSON configuration.
    pub fn from_json_str(input: &str) -> MaciResult<Self> {
        let config: Self = serde_json::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads and validates a JSON configuration file.
    pub fn load(path: &Path) -> MaciResult<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Persists the configuration as pretty JSON.
    pub fn save(&self, path: &Path) -> MaciResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_vec_pretty(self)?)?;
        Ok(())
    }
}

fn depth_for(max_leaves: u64) -> MaciResult<u8> {
    if max_leaves == 0 {
        return Err(MaciError::InvalidConfig("limits must be non-zero".into()));
    }
    let depth = (u64::BITS - (max_leaves - 1).leading_zeros()) as u8;
    Ok(depth.max(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn depths_from_limits() {
        let config = RoundConfig::from_limits(15, 15, 15, 4, 4, 1000).unwrap();
        assert_eq!(config.state_tree_depth, 4);
        assert_eq!(config.message_tree_depth, 4);
        assert_eq!(config.vote_option_tree_depth, 4);
        assert_eq!(depth_for(16).unwrap(), 4);
        assert_eq!(depth_for(17).unwrap(), 5);
        assert_eq!(depth_for(1).unwrap(), 1);
        assert!(depth_for(0).is_err());
    }

    #[test]
    fn validation_rejects_bad_values() {
        let good = RoundConfig::from_limits(15, 15, 15, 4, 4, 1000).unwrap();
        let bad = RoundConfig {
            max_vote_options: 17,
            ..good.clone()
        };
        assert!(matches!(bad.validate(), Err(MaciError::InvalidConfig(_))));
        let bad = RoundConfig {
            message_batch_size: 0,
            ..good.clone()
        };
        assert!(bad.validate().is_err());
        let bad = RoundConfig {
            state_tree_depth: 40,
            ..good
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("round.json");
        let config = RoundConfig::from_limits(31, 63, 7, 4, 2, 500).unwrap();
        config.save(&path).unwrap();
        assert_eq!(RoundConfig::load(&path).unwrap(), config);
    }
}
