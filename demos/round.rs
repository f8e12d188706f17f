//! Runs a small round end to end: four voters, one of whom skips a nonce.
//!
//! `RUST_LOG=maci_replica=debug cargo run --example round` shows the
//! per-message outcomes.

use maci_replica::{
    Command, Keypair, MaciResult, MaciState, RoundConfig, VoteLeaf,
};
use rand::{rngs::StdRng, SeedableRng};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .try_init();
}

fn run() -> MaciResult<()> {
    let mut rng = StdRng::seed_from_u64(2024);
    let config = RoundConfig::from_limits(15, 15, 15, 4, 2, 1000)?;
    let coordinator = Keypair::random(&mut rng);
    println!("coordinator key: {}", coordinator.public_key);
    let mut round = MaciState::new(config, coordinator)?;

    let voters: Vec<Keypair> = (0..4).map(|_| Keypair::random(&mut rng)).collect();
    let mut indices = Vec::with_capacity(voters.len());
    for voter in &voters {
        indices.push(round.sign_up_default(voter.public_key)?);
    }
    round.open_voting()?;

    for (i, (voter, state_index)) in voters.iter().zip(&indices).enumerate() {
        // The last voter skips nonce 1, so their vote is replaced by a random leaf.
        let nonce = if i == voters.len() - 1 { 2 } else { 1 };
        let command = Command::new(
            *state_index,
            voter.public_key,
            0,
            VoteLeaf::new(3, 0),
            nonce,
            Command::random_salt(&mut rng),
        );
        let (message, _) =
            command.into_message(&voter.private_key, round.coordinator_public_key(), &mut rng);
        round.publish_message(message)?;
    }
    round.close_voting()?;
    println!("message root: {}", round.message_root_hex());

    for outcome in round.process_all_batches()? {
        println!(
            "batch @{}: accepted={} rejected={} random leaf={}",
            outcome.start_index,
            outcome.accepted(),
            outcome.rejected(),
            outcome.random_leaf.to_json_string()?,
        );
    }
    println!("state root: {}", round.state_root_hex());

    let result = round.finalize_tally()?;
    result.verify(round.config().vote_option_tree_depth)?;
    println!("tally: {}", result.to_json_string()?);
    Ok(())
}

fn main() {
    init_logging();
    if let Err(err) = run() {
        eprintln!("round failed: {err}");
        std::process::exit(1);
    }
}
