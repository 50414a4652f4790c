pub mod classify;
pub mod cli;
pub mod config;
pub mod confluence;
pub mod engine;
mod http;
pub mod utils;

pub use cli::run;
pub use config::IndexerConfig;
pub use engine::{Indexer, RunSummary};
