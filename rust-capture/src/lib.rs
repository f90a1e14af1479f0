//! rust-capture library crate.
//!
//! Scheduled, resumable capture of remote data sources into mirrored blob
//! storage.

pub mod alert;
pub mod config;
pub mod database;
pub mod dedup;
pub mod domain;
pub mod error;
pub mod executor;
pub mod generator;
pub mod logging;
pub mod maintenance;
pub mod queue;
pub mod runner;
pub mod scheduler;
pub mod services;
pub mod storage;

pub use error::{Error, Result};
