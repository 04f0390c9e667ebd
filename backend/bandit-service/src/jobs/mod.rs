// Batch jobs run by the bandit-service binary:
// - seed_arms: build instances from a ranked-interactions file
// - bootstrap: load a directory of instance records into the store

pub mod bootstrap;
pub mod seed_arms;

pub use bootstrap::{bootstrap_from_dir, BootstrapReport};
pub use seed_arms::{load_ranked_interactions, seed_from_file};
