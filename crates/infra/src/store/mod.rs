//! Persistence boundary for the pipeline.
//!
//! Stages depend on these traits only. `InMemoryStore` backs tests and local
//! runs; `PostgresStore` is the production implementation.
//!
//! All writes the stages perform are idempotent or conditional:
//! - research is overwritten wholesale
//! - a match is created only if none exists for (user, job)
//! - `notified` only moves from `false` to `true`

use chrono::{DateTime, Utc};
use thiserror::Error;

use jobping_core::{
    CompanyResearch, Job, JobId, JobStatus, MatchId, Notification, ResearchPolicy, User, UserId,
    UserJobMatch,
};

pub mod in_memory;
pub mod postgres;

pub use in_memory::InMemoryStore;
pub use postgres::PostgresStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("database error: {0}")]
    Database(String),

    /// A stored row could not be mapped back into a domain value.
    #[error("corrupt record: {0}")]
    Corrupt(String),

    /// Internal lock poisoning (in-memory store).
    #[error("store state poisoned")]
    Poisoned,
}

impl StoreError {
    /// Whether retrying the same operation later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Database(_) | StoreError::Poisoned)
    }
}

/// Result of an atomic create-or-ignore on the (user, job) match key.
#[derive(Debug, Clone, PartialEq)]
pub enum UpsertOutcome {
    /// The candidate was stored.
    Created(UserJobMatch),
    /// A match already existed; the candidate was discarded.
    Existing(UserJobMatch),
}

impl UpsertOutcome {
    pub fn was_created(&self) -> bool {
        matches!(self, UpsertOutcome::Created(_))
    }

    pub fn into_match(self) -> UserJobMatch {
        match self {
            UpsertOutcome::Created(m) | UpsertOutcome::Existing(m) => m,
        }
    }
}

#[async_trait::async_trait]
pub trait JobRepository: Send + Sync {
    async fn insert_job(&self, job: &Job) -> Result<(), StoreError>;

    async fn get_job(&self, id: JobId) -> Result<Option<Job>, StoreError>;

    /// Whether the job's stored research is younger than `policy` allows.
    ///
    /// Jobs without research are never fresh.
    async fn is_research_fresh(
        &self,
        id: JobId,
        policy: ResearchPolicy,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Overwrite the job's research blob and timestamp.
    async fn save_company_research(
        &self,
        id: JobId,
        research: &CompanyResearch,
    ) -> Result<(), StoreError>;

    async fn set_job_status(&self, id: JobId, status: JobStatus) -> Result<(), StoreError>;
}

#[async_trait::async_trait]
pub trait UserRepository: Send + Sync {
    async fn insert_user(&self, user: &User) -> Result<(), StoreError>;

    async fn get_user(&self, id: UserId) -> Result<Option<User>, StoreError>;

    /// Users whose matching prompt is present and not blank.
    async fn list_users_with_prompt(&self) -> Result<Vec<User>, StoreError>;
}

#[async_trait::async_trait]
pub trait MatchRepository: Send + Sync {
    async fn get_match(&self, user_id: UserId, job_id: JobId)
    -> Result<Option<UserJobMatch>, StoreError>;

    /// Store `candidate` unless a match for its (user, job) already exists.
    ///
    /// Atomic: concurrent callers for the same key see exactly one `Created`.
    async fn insert_match_if_absent(
        &self,
        candidate: UserJobMatch,
    ) -> Result<UpsertOutcome, StoreError>;

    /// Set `notified = true`. Returns whether this call made the transition.
    async fn mark_match_notified(&self, id: MatchId) -> Result<bool, StoreError>;

    /// Unnotified matches scoring at or above their user's current threshold.
    async fn list_pending_notifications(&self) -> Result<Vec<UserJobMatch>, StoreError>;
}

#[async_trait::async_trait]
pub trait NotificationRepository: Send + Sync {
    async fn create_notification(&self, notification: &Notification) -> Result<(), StoreError>;

    /// Newest first, optionally for a single user.
    async fn list_notifications(
        &self,
        user_id: Option<UserId>,
        limit: usize,
    ) -> Result<Vec<Notification>, StoreError>;
}

/// Everything the stages need from storage.
pub trait PipelineStore:
    JobRepository + UserRepository + MatchRepository + NotificationRepository
{
}

impl<T> PipelineStore for T where
    T: JobRepository + UserRepository + MatchRepository + NotificationRepository
{
}
