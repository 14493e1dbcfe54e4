//! replyscout: a batch pipeline that finds social posts with buying
//! intent, judges and scores them, drafts replies in a configured
//! persona's voice, and sends them only after human approval.
//!
//! Stages run in order and communicate only through the database, so
//! every stage can be re-run idempotently:
//!
//! ```text
//! collect -> normalize -> judge -> score -> draft -> [human approval] -> send
//! ```

pub mod approval;
pub mod cache;
pub mod collector;
pub mod config;
pub mod db;
pub mod drafter;
pub mod error;
pub mod gateway;
pub mod judge;
pub mod llm;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod normalizer;
pub mod outcomes;
pub mod pipeline;
pub mod platform;
pub mod ratelimit;
pub mod schema;
pub mod scorer;
pub mod sender;
pub mod validation;

pub use approval::ApprovalService;
pub use collector::Collector;
pub use config::{AppConfig, ProjectConfig};
pub use db::Database;
pub use drafter::Drafter;
pub use error::{ReplyscoutError, Result};
pub use gateway::LlmGateway;
pub use judge::Judge;
pub use normalizer::Normalizer;
pub use outcomes::OutcomeTracker;
pub use pipeline::Pipeline;
pub use ratelimit::RateLimiter;
pub use scorer::Scorer;
pub use sender::Sender;
