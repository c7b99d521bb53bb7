//! Library entrypoint: re‑export modules

pub mod cli;
pub mod config;
pub mod db;
pub mod errors;
pub mod indexes;
pub mod metrics;
pub mod migrator;
pub mod plan;
pub mod queries;
pub mod schema;
pub mod verify;
