//! Side-effecting adapters: configuration, prompt assets, child processes and
//! the three external capabilities (generator, engine, rendering host).

pub mod assets;
pub mod config;
pub mod engine;
pub mod generator;
pub mod process;
pub mod prompt;
pub mod sandbox;
