//! Postgres-backed pipeline store.
//!
//! Schema lives in `migrations/0001_pipeline.sql` and can be applied with
//! [`PostgresStore::ensure_schema`].
//!
//! ## Error Mapping
//!
//! | SQLx Error | StoreError | Scenario |
//! |------------|------------|----------|
//! | Database (any code) | `Database` | constraint violations, connection drops mid-query |
//! | PoolClosed / PoolTimedOut / Io | `Database` | pool exhausted or server gone |
//! | ColumnDecode / Decode / ColumnNotFound | `Corrupt` | row does not match the domain type |
//!
//! ## Create-or-ignore
//!
//! `insert_match_if_absent` is a single `INSERT ... ON CONFLICT (user_id, job_id)
//! DO NOTHING RETURNING id`. When no row comes back the existing match is
//! loaded and returned as `UpsertOutcome::Existing`.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::Row;
use tracing::instrument;

use jobping_core::{
    CompanyResearch, Job, JobId, JobStatus, MatchAnalysis, MatchId, MatchScore, Notification,
    NotificationId, NotifyThreshold, ResearchPolicy, SalaryRange, User, UserId, UserJobMatch,
};

use super::{
    JobRepository, MatchRepository, NotificationRepository, StoreError, UpsertOutcome,
    UserRepository,
};

const SCHEMA: &str = include_str!("../../../../migrations/0001_pipeline.sql");

const JOB_COLUMNS: &str = "id, title, company, location, description, job_url, job_type, \
     is_remote, min_salary, max_salary, posted_at, status, company_info, \
     company_info_updated_at, created_at";

const MATCH_COLUMNS: &str = "id, user_id, job_id, score, analysis, notified, created_at";

const NOTIFICATION_COLUMNS: &str =
    "id, user_id, job_id, match_id, job_title, company, job_url, score, analysis, created_at";

#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: Arc<PgPool>,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Open a pool against `database_url`.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    /// Apply the bundled schema. Every statement is `IF NOT EXISTS`.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        Ok(())
    }

    async fn fetch_match(
        &self,
        user_id: UserId,
        job_id: JobId,
    ) -> Result<Option<UserJobMatch>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {MATCH_COLUMNS} FROM user_job_matches WHERE user_id = $1 AND job_id = $2"
        ))
        .bind(user_id.as_uuid())
        .bind(job_id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_match", e))?;

        row.as_ref().map(match_from_row).transpose()
    }
}

#[async_trait::async_trait]
impl JobRepository for PostgresStore {
    #[instrument(skip(self, job), fields(job_id = %job.id), err)]
    async fn insert_job(&self, job: &Job) -> Result<(), StoreError> {
        let (facts, researched_at) = match &job.company_research {
            Some(r) => (Some(r.facts.clone()), Some(r.researched_at)),
            None => (None, None),
        };

        sqlx::query(
            r#"
            INSERT INTO jobs (
                id, title, company, location, description, job_url, job_type,
                is_remote, min_salary, max_salary, posted_at, status,
                company_info, company_info_updated_at, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(job.id.as_uuid())
        .bind(&job.title)
        .bind(&job.employer)
        .bind(&job.location)
        .bind(&job.description)
        .bind(&job.url)
        .bind(&job.job_type)
        .bind(job.is_remote)
        .bind(job.salary.min)
        .bind(job.salary.max)
        .bind(job.posted_at)
        .bind(job.status.as_str())
        .bind(facts)
        .bind(researched_at)
        .bind(job.created_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_job", e))?;

        Ok(())
    }

    #[instrument(skip(self), fields(job_id = %id), err)]
    async fn get_job(&self, id: JobId) -> Result<Option<Job>, StoreError> {
        let row = sqlx::query(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_job", e))?;

        row.as_ref().map(job_from_row).transpose()
    }

    #[instrument(skip(self, policy, now), fields(job_id = %id), err)]
    async fn is_research_fresh(
        &self,
        id: JobId,
        policy: ResearchPolicy,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let row = sqlx::query("SELECT company_info_updated_at FROM jobs WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("is_research_fresh", e))?
            .ok_or_else(|| StoreError::NotFound(format!("job {id}")))?;

        let researched_at: Option<DateTime<Utc>> = row
            .try_get("company_info_updated_at")
            .map_err(|e| map_sqlx_error("is_research_fresh", e))?;

        Ok(researched_at.is_some_and(|at| policy.is_fresh(at, now)))
    }

    #[instrument(skip(self, research), fields(job_id = %id), err)]
    async fn save_company_research(
        &self,
        id: JobId,
        research: &CompanyResearch,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET company_info = $2, company_info_updated_at = $3, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .bind(&research.facts)
        .bind(research.researched_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("save_company_research", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("job {id}")));
        }
        Ok(())
    }

    #[instrument(skip(self), fields(job_id = %id, status = status.as_str()), err)]
    async fn set_job_status(&self, id: JobId, status: JobStatus) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE jobs SET status = $2, updated_at = NOW() WHERE id = $1")
            .bind(id.as_uuid())
            .bind(status.as_str())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("set_job_status", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("job {id}")));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl UserRepository for PostgresStore {
    #[instrument(skip(self, user), fields(user_id = %user.id), err)]
    async fn insert_user(&self, user: &User) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO users (id, username, ai_prompt, sink_address, notify_threshold, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO UPDATE
            SET username = EXCLUDED.username,
                ai_prompt = EXCLUDED.ai_prompt,
                sink_address = EXCLUDED.sink_address,
                notify_threshold = EXCLUDED.notify_threshold,
                updated_at = NOW()
            "#,
        )
        .bind(user.id.as_uuid())
        .bind(&user.username)
        .bind(&user.matching_prompt)
        .bind(&user.sink_address)
        .bind(i16::from(user.notify_threshold.value()))
        .bind(user.created_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_user", e))?;

        Ok(())
    }

    #[instrument(skip(self), fields(user_id = %id), err)]
    async fn get_user(&self, id: UserId) -> Result<Option<User>, StoreError> {
        let row = sqlx::query(
            "SELECT id, username, ai_prompt, sink_address, notify_threshold, created_at \
             FROM users WHERE id = $1",
        )
        .bind(id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_user", e))?;

        row.as_ref().map(user_from_row).transpose()
    }

    #[instrument(skip(self), err)]
    async fn list_users_with_prompt(&self) -> Result<Vec<User>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, username, ai_prompt, sink_address, notify_threshold, created_at
            FROM users
            WHERE ai_prompt IS NOT NULL AND btrim(ai_prompt) <> ''
            ORDER BY created_at, id
            "#,
        )
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_users_with_prompt", e))?;

        rows.iter().map(user_from_row).collect()
    }
}

#[async_trait::async_trait]
impl MatchRepository for PostgresStore {
    #[instrument(skip(self), fields(user_id = %user_id, job_id = %job_id), err)]
    async fn get_match(
        &self,
        user_id: UserId,
        job_id: JobId,
    ) -> Result<Option<UserJobMatch>, StoreError> {
        self.fetch_match(user_id, job_id).await
    }

    #[instrument(
        skip(self, candidate),
        fields(user_id = %candidate.user_id, job_id = %candidate.job_id, score = candidate.score.value()),
        err
    )]
    async fn insert_match_if_absent(
        &self,
        candidate: UserJobMatch,
    ) -> Result<UpsertOutcome, StoreError> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO user_job_matches (id, user_id, job_id, score, analysis, notified, created_at)
            VALUES ($1, $2, $3, $4, $5, FALSE, $6)
            ON CONFLICT (user_id, job_id) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(candidate.id.as_uuid())
        .bind(candidate.user_id.as_uuid())
        .bind(candidate.job_id.as_uuid())
        .bind(i16::from(candidate.score.value()))
        .bind(Json(&candidate.analysis))
        .bind(candidate.created_at)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_match_if_absent", e))?;

        if inserted.is_some() {
            return Ok(UpsertOutcome::Created(candidate));
        }

        let existing = self
            .fetch_match(candidate.user_id, candidate.job_id)
            .await?
            .ok_or_else(|| {
                StoreError::NotFound(format!(
                    "match for user {} job {} vanished after conflict",
                    candidate.user_id, candidate.job_id
                ))
            })?;
        Ok(UpsertOutcome::Existing(existing))
    }

    #[instrument(skip(self), fields(match_id = %id), err)]
    async fn mark_match_notified(&self, id: MatchId) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE user_job_matches SET notified = TRUE WHERE id = $1 AND notified = FALSE",
        )
        .bind(id.as_uuid())
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("mark_match_notified", e))?;

        if result.rows_affected() == 1 {
            return Ok(true);
        }

        let exists = sqlx::query("SELECT 1 FROM user_job_matches WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("mark_match_notified", e))?;

        match exists {
            Some(_) => Ok(false),
            None => Err(StoreError::NotFound(format!("match {id}"))),
        }
    }

    #[instrument(skip(self), err)]
    async fn list_pending_notifications(&self) -> Result<Vec<UserJobMatch>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT m.id, m.user_id, m.job_id, m.score, m.analysis, m.notified, m.created_at
            FROM user_job_matches m
            JOIN users u ON u.id = m.user_id
            WHERE m.notified = FALSE AND m.score >= u.notify_threshold
            ORDER BY m.created_at, m.id
            "#,
        )
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_pending_notifications", e))?;

        rows.iter().map(match_from_row).collect()
    }
}

#[async_trait::async_trait]
impl NotificationRepository for PostgresStore {
    #[instrument(
        skip(self, notification),
        fields(notification_id = %notification.id, match_id = %notification.match_id),
        err
    )]
    async fn create_notification(&self, notification: &Notification) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO notifications (
                id, user_id, job_id, match_id, job_title, company, job_url, score, analysis, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(notification.id.as_uuid())
        .bind(notification.user_id.as_uuid())
        .bind(notification.job_id.as_uuid())
        .bind(notification.match_id.as_uuid())
        .bind(&notification.job_title)
        .bind(&notification.employer)
        .bind(&notification.job_url)
        .bind(i16::from(notification.score.value()))
        .bind(Json(&notification.analysis))
        .bind(notification.created_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("create_notification", e))?;

        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn list_notifications(
        &self,
        user_id: Option<UserId>,
        limit: usize,
    ) -> Result<Vec<Notification>, StoreError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = sqlx::query(&format!(
            "SELECT {NOTIFICATION_COLUMNS} FROM notifications \
             WHERE ($1::uuid IS NULL OR user_id = $1) \
             ORDER BY created_at DESC, id DESC \
             LIMIT $2"
        ))
        .bind(user_id.map(|u| *u.as_uuid()))
        .bind(limit)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_notifications", e))?;

        rows.iter().map(notification_from_row).collect()
    }
}

fn score_from_db(raw: i16) -> Result<MatchScore, StoreError> {
    u8::try_from(raw)
        .ok()
        .and_then(|v| MatchScore::new(v).ok())
        .ok_or_else(|| StoreError::Corrupt(format!("score out of range: {raw}")))
}

fn threshold_from_db(raw: i16) -> Result<NotifyThreshold, StoreError> {
    u8::try_from(raw)
        .ok()
        .and_then(|v| NotifyThreshold::new(v).ok())
        .ok_or_else(|| StoreError::Corrupt(format!("notify_threshold out of range: {raw}")))
}

fn job_from_row(row: &PgRow) -> Result<Job, StoreError> {
    let get = |e| map_sqlx_error("job_from_row", e);

    let status: String = row.try_get("status").map_err(get)?;
    let status = status
        .parse::<JobStatus>()
        .map_err(|e| StoreError::Corrupt(e.to_string()))?;

    let facts: Option<JsonValue> = row.try_get("company_info").map_err(get)?;
    let researched_at: Option<DateTime<Utc>> = row.try_get("company_info_updated_at").map_err(get)?;
    let company_research = match (facts, researched_at) {
        (Some(facts), Some(researched_at)) => Some(CompanyResearch { facts, researched_at }),
        _ => None,
    };

    Ok(Job {
        id: JobId::from_uuid(row.try_get("id").map_err(get)?),
        title: row.try_get("title").map_err(get)?,
        employer: row.try_get("company").map_err(get)?,
        location: row.try_get("location").map_err(get)?,
        description: row.try_get("description").map_err(get)?,
        url: row.try_get("job_url").map_err(get)?,
        job_type: row.try_get("job_type").map_err(get)?,
        is_remote: row.try_get("is_remote").map_err(get)?,
        salary: SalaryRange {
            min: row.try_get("min_salary").map_err(get)?,
            max: row.try_get("max_salary").map_err(get)?,
        },
        posted_at: row.try_get("posted_at").map_err(get)?,
        status,
        company_research,
        created_at: row.try_get("created_at").map_err(get)?,
    })
}

fn user_from_row(row: &PgRow) -> Result<User, StoreError> {
    let get = |e| map_sqlx_error("user_from_row", e);
    Ok(User {
        id: UserId::from_uuid(row.try_get("id").map_err(get)?),
        username: row.try_get("username").map_err(get)?,
        matching_prompt: row.try_get("ai_prompt").map_err(get)?,
        sink_address: row.try_get("sink_address").map_err(get)?,
        notify_threshold: threshold_from_db(row.try_get("notify_threshold").map_err(get)?)?,
        created_at: row.try_get("created_at").map_err(get)?,
    })
}

fn match_from_row(row: &PgRow) -> Result<UserJobMatch, StoreError> {
    let get = |e| map_sqlx_error("match_from_row", e);
    let analysis: Json<MatchAnalysis> = row.try_get("analysis").map_err(get)?;
    Ok(UserJobMatch {
        id: MatchId::from_uuid(row.try_get("id").map_err(get)?),
        user_id: UserId::from_uuid(row.try_get("user_id").map_err(get)?),
        job_id: JobId::from_uuid(row.try_get("job_id").map_err(get)?),
        score: score_from_db(row.try_get("score").map_err(get)?)?,
        analysis: analysis.0,
        notified: row.try_get("notified").map_err(get)?,
        created_at: row.try_get("created_at").map_err(get)?,
    })
}

fn notification_from_row(row: &PgRow) -> Result<Notification, StoreError> {
    let get = |e| map_sqlx_error("notification_from_row", e);
    let analysis: Json<MatchAnalysis> = row.try_get("analysis").map_err(get)?;
    Ok(Notification {
        id: NotificationId::from_uuid(row.try_get("id").map_err(get)?),
        user_id: UserId::from_uuid(row.try_get("user_id").map_err(get)?),
        job_id: JobId::from_uuid(row.try_get("job_id").map_err(get)?),
        match_id: MatchId::from_uuid(row.try_get("match_id").map_err(get)?),
        job_title: row.try_get("job_title").map_err(get)?,
        employer: row.try_get("company").map_err(get)?,
        job_url: row.try_get("job_url").map_err(get)?,
        score: score_from_db(row.try_get("score").map_err(get)?)?,
        analysis: analysis.0,
        created_at: row.try_get("created_at").map_err(get)?,
    })
}

/// Map SQLx errors to store errors.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let code = db_err.code().map(|c| c.to_string()).unwrap_or_default();
            StoreError::Database(format!(
                "database error in {operation} ({code}): {}",
                db_err.message()
            ))
        }
        sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::Decode(_)
        | sqlx::Error::ColumnNotFound(_)
        | sqlx::Error::TypeNotFound { .. } => {
            StoreError::Corrupt(format!("failed to decode row in {operation}: {err}"))
        }
        sqlx::Error::RowNotFound => {
            StoreError::NotFound(format!("unexpected row not found in {operation}"))
        }
        _ => StoreError::Database(format!("sqlx error in {operation}: {err}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scores_outside_range_are_corrupt() {
        assert_eq!(score_from_db(77).unwrap().value(), 77);
        assert!(matches!(score_from_db(101), Err(StoreError::Corrupt(_))));
        assert!(matches!(score_from_db(-1), Err(StoreError::Corrupt(_))));
        assert!(matches!(threshold_from_db(300), Err(StoreError::Corrupt(_))));
    }

    #[test]
    fn pool_errors_are_retryable_and_decode_errors_are_not() {
        let pool = map_sqlx_error("op", sqlx::Error::PoolTimedOut);
        assert!(pool.is_retryable());

        let decode = map_sqlx_error("op", sqlx::Error::ColumnNotFound("score".to_string()));
        assert!(matches!(decode, StoreError::Corrupt(_)));
        assert!(!decode.is_retryable());
    }

    #[test]
    fn bundled_schema_declares_the_match_key() {
        assert!(SCHEMA.contains("UNIQUE (user_id, job_id)"));
    }
}
