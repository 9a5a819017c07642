//! `jobping-core` — domain building blocks for the job matching pipeline.
//!
//! This crate contains **pure domain** types (no queue, storage or oracle
//! concerns): identifiers, jobs, users, matches and notifications, plus the
//! threshold and research-freshness rules the stages apply.

pub mod error;
pub mod id;
pub mod job;
pub mod matching;
pub mod notification;
pub mod user;

pub use error::{DomainError, DomainResult};
pub use id::{JobId, MatchId, NotificationId, UserId};
pub use job::{CompanyResearch, Job, JobStatus, ResearchPolicy, SalaryRange};
pub use matching::{AnalysisSource, MatchAnalysis, MatchScore, UserJobMatch};
pub use notification::Notification;
pub use user::{NotifyThreshold, User};
