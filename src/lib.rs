#![forbid(unsafe_code)]

pub mod cleanup;
pub mod config;
pub mod errors;
pub mod models;
pub mod multiplayer;
pub mod persistence;
pub mod runtime;
pub mod supervisor;
pub mod sweeper;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
