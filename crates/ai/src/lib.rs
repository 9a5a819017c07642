//! `jobping-ai`
//!
//! **Responsibility:** the oracle boundary.
//!
//! This crate turns jobs and user prompts into research blobs and match
//! assessments. It does not touch storage or queues:
//! - It must not persist anything itself.
//! - It reports placeholders explicitly (`OracleOutcome::Unavailable`) so
//!   callers decide what to store.

pub mod openai;
pub mod oracle;
pub mod placeholder;
pub mod prompt;
pub mod result;
pub mod scripted;

pub use openai::{OpenAiConfig, OpenAiOracle};
pub use oracle::{MatchRequest, Oracle, OracleOutcome, ResearchRequest};
pub use placeholder::PlaceholderOracle;
pub use result::{AiError, MatchAssessment};
pub use scripted::ScriptedOracle;
