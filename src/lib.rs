//! Mailflow: coordination and learning layer for an email agent.
//!
//! Fans each batch of records out to three analyzers, gates their proposed
//! actions by confidence, executes the confident ones and learns from user
//! corrections.

pub mod config;
pub mod error;
pub mod logging;
pub mod memory;
pub mod monitor;
pub mod pipeline;
pub mod store;
pub mod tools;

pub use config::AppConfig;
pub use error::{Error, Result};
pub use memory::Memory;
pub use monitor::PerformanceMonitor;
pub use pipeline::{Collaborators, Orchestrator};
