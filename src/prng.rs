//! Coordinator-side deterministic randomness.
//!
//! Random state leaves must be unlinkable for observers yet reproducible by
//! the coordinator, so that re-running a batch yields the same tree.  The
//! generator here is a BLAKE2b-256 counter-mode stream keyed by the
//! coordinator's private seed and a slot label (for example the index of the
//! message being replaced).

use std::fmt;

use blake2::digest::{consts::U32, Digest};
use rand::{CryptoRng, RngCore};

use crate::keys::PrivateKey;
use crate::leaf::StateLeaf;

type Blake2b256 = blake2::Blake2b<U32>;

const PRNG_DOMAIN: &[u8] = b"MACI_COORDINATOR_PRNG";
const RANDOM_LEAF_DOMAIN: &[u8] = b"MACI_RANDOM_LEAF";

const BLOCK_BYTES: u64 = 32;

/// A deterministic stream generator derived from BLAKE2b-256.
///
/// Output block `i` is `BLAKE2b-256(slot prefix ‖ i)`; the stream position
/// counts bytes already handed out.
#[derive(Clone)]
pub struct CoordinatorPrng {
    slot: Blake2b256,
    position: u64,
}

impl CoordinatorPrng {
    /// Stream for slot `index` under `domain`, keyed by the coordinator secret.
    pub fn for_slot(coordinator: &PrivateKey, domain: &[u8], index: u64) -> Self {
        let slot = Blake2b256::new()
            .chain_update(PRNG_DOMAIN)
            .chain_update((domain.len() as u64).to_be_bytes())
            .chain_update(domain)
            .chain_update(coordinator.seed())
            .chain_update(index.to_be_bytes());
        Self { slot, position: 0 }
    }

    fn block(&self, counter: u64) -> [u8; BLOCK_BYTES as usize] {
        let digest = self.slot.clone().chain_update(counter.to_be_bytes()).finalize();
        let mut block = [0u8; BLOCK_BYTES as usize];
        block.copy_from_slice(&digest);
        block
    }
}

impl fmt::Debug for CoordinatorPrng {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoordinatorPrng")
            .field("position", &self.position)
            .finish_non_exhaustive()
    }
}

impl RngCore for CoordinatorPrng {
    fn next_u32(&mut self) -> u32 {
        let mut chunk = [0u8; 4];
        self.fill_bytes(&mut chunk);
        u32::from_be_bytes(chunk)
    }

    fn next_u64(&mut self) -> u64 {
        let mut chunk = [0u8; 8];
        self.fill_bytes(&mut chunk);
        u64::from_be_bytes(chunk)
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        let mut rest = dest;
        while !rest.is_empty() {
            let block = self.block(self.position / BLOCK_BYTES);
            let skip = (self.position % BLOCK_BYTES) as usize;
            let take = (block.len() - skip).min(rest.len());
            let (head, tail) = rest.split_at_mut(take);
            head.copy_from_slice(&block[skip..skip + take]);
            self.position = self.position.wrapping_add(take as u64);
            rest = tail;
        }
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand::Error> {
        self.fill_bytes(dest);
        Ok(())
    }
}

impl CryptoRng for CoordinatorPrng {}

/// Random leaf substituted for the message at `message_index`.
pub fn random_state_leaf(coordinator: &PrivateKey, message_index: u64) -> StateLeaf {
    let mut rng = CoordinatorPrng::for_slot(coordinator, RANDOM_LEAF_DOMAIN, message_index);
    StateLeaf::random(&mut rng)
}
