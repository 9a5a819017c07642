//! `jobping-pipeline` — the job matching pipeline.
//!
//! **Responsibility:** the four stages and how they are driven.
//!
//! ```text
//! enrichment -> fanout -> scoring -> notification
//! ```
//!
//! Each arrow is a queue. Every stage is stateless and safe to run more than
//! once on the same message; all state lives in the store.
//!
//! Retry granularity per stage (see `Stage::default_failure_scope`):
//! - enrichment: host-invoked, a failure fails the whole batch; when self-polled
//!   the batch stops at the first failure and messages that cannot succeed are dropped
//! - fanout, scoring, notification: self-polling, failures are per message

pub mod backfill;
pub mod bootstrap;
pub mod enrichment;
pub mod error;
pub mod fanout;
pub mod notification;
pub mod pipeline;
pub mod scoring;
pub mod stage;

pub use backfill::{BackfillReport, requeue_pending_notifications};
pub use enrichment::Enrichment;
pub use error::StageError;
pub use fanout::FanOut;
pub use notification::NotificationDispatch;
pub use pipeline::Pipeline;
pub use scoring::Scoring;
pub use stage::{DropReason, Stage, StageHandler, StageOutcome, StageProcessor, UnknownStage};
