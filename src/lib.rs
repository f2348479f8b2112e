#[cfg(feature = "cli")]
pub mod cli;
pub mod clients;
pub mod config;
pub mod engine;
pub mod error;
pub mod filter;
pub mod input;
pub mod model;
pub mod output;
pub mod probe;
pub mod util;
