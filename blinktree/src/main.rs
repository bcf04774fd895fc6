#![cfg_attr(test, allow(clippy::disallowed_methods))]
// Forbid unwrap() in production code so a bad input cannot panic the demo.
// Test code is allowed to use unwrap() for convenience.
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
use std::thread;
use std::time::Instant;

use blinktree::BLinkTree;
use blinktree::config::WorkloadConfig;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "blinktree=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration from environment variables
    let config = match WorkloadConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };

    tracing::info!(
        "Loaded configuration: order={}, threads={}, keys={}, seed={}",
        config.order,
        config.threads,
        config.keys,
        config.seed
    );

    let tree = match BLinkTree::with_order(config.order) {
        Ok(tree) => tree,
        Err(e) => {
            tracing::error!("Failed to create tree: {e}");
            std::process::exit(1);
        }
    };

    let mut keys: Vec<u64> = (0..config.keys).collect();
    keys.shuffle(&mut StdRng::seed_from_u64(config.seed));
    let chunk_size = keys.len().div_ceil(config.threads).max(1);

    let started = Instant::now();
    thread::scope(|scope| {
        for (worker, chunk) in keys.chunks(chunk_size).enumerate() {
            let tree = &tree;
            scope.spawn(move || {
                let rejected = chunk
                    .iter()
                    .filter(|&&key| !tree.insert(key, key.wrapping_mul(2)))
                    .count();
                if rejected > 0 {
                    tracing::warn!("worker {worker} saw {rejected} rejected inserts");
                }
                tracing::debug!("worker {worker} inserted {} keys", chunk.len());
            });
        }
    });
    tracing::info!(
        "Inserted {} keys in {:?}",
        tree.len(),
        started.elapsed()
    );

    let stats = match tree.validate() {
        Ok(stats) => stats,
        Err(e) => {
            tracing::error!("Tree failed validation: {e}");
            std::process::exit(1);
        }
    };
    tracing::info!(
        "Tree is valid: height={}, nodes={}, leaves={}, keys={}",
        stats.height,
        stats.nodes,
        stats.leaves,
        stats.keys
    );

    let missing = keys.iter().filter(|key| tree.get(key).is_none()).count();
    if missing > 0 {
        tracing::error!("{missing} inserted keys are not reachable");
        std::process::exit(1);
    }

    // A duplicate is reported, not stored
    if let Some(&first) = keys.first() {
        let accepted = tree.insert(first, 0);
        tracing::info!("Re-inserting key {first}: accepted={accepted}");
    }
}
