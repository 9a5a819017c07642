use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};

use jobping_core::{
    CompanyResearch, Job, JobId, JobStatus, MatchId, Notification, ResearchPolicy, User, UserId,
    UserJobMatch,
};

use super::{
    JobRepository, MatchRepository, NotificationRepository, StoreError, UpsertOutcome,
    UserRepository,
};

/// In-memory pipeline store.
///
/// Intended for tests/dev. The match map is keyed by (user, job), so
/// create-or-ignore is a single entry lookup under the write lock.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    jobs: RwLock<HashMap<JobId, Job>>,
    users: RwLock<HashMap<UserId, User>>,
    matches: RwLock<HashMap<(UserId, JobId), UserJobMatch>>,
    notifications: RwLock<Vec<Notification>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All stored matches, oldest first.
    pub fn all_matches(&self) -> Vec<UserJobMatch> {
        let mut all: Vec<_> = self
            .matches
            .read()
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default();
        all.sort_by_key(|m| (m.created_at, m.id));
        all
    }

    /// All stored notifications, in creation order.
    pub fn all_notifications(&self) -> Vec<Notification> {
        self.notifications
            .read()
            .map(|n| n.clone())
            .unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl JobRepository for InMemoryStore {
    async fn insert_job(&self, job: &Job) -> Result<(), StoreError> {
        let mut jobs = self.jobs.write().map_err(|_| StoreError::Poisoned)?;
        jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn get_job(&self, id: JobId) -> Result<Option<Job>, StoreError> {
        let jobs = self.jobs.read().map_err(|_| StoreError::Poisoned)?;
        Ok(jobs.get(&id).cloned())
    }

    async fn is_research_fresh(
        &self,
        id: JobId,
        policy: ResearchPolicy,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let jobs = self.jobs.read().map_err(|_| StoreError::Poisoned)?;
        let job = jobs
            .get(&id)
            .ok_or_else(|| StoreError::NotFound(format!("job {id}")))?;
        Ok(job.has_fresh_research(&policy, now))
    }

    async fn save_company_research(
        &self,
        id: JobId,
        research: &CompanyResearch,
    ) -> Result<(), StoreError> {
        let mut jobs = self.jobs.write().map_err(|_| StoreError::Poisoned)?;
        let job = jobs
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("job {id}")))?;
        job.company_research = Some(research.clone());
        Ok(())
    }

    async fn set_job_status(&self, id: JobId, status: JobStatus) -> Result<(), StoreError> {
        let mut jobs = self.jobs.write().map_err(|_| StoreError::Poisoned)?;
        let job = jobs
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("job {id}")))?;
        job.status = status;
        Ok(())
    }
}

#[async_trait::async_trait]
impl UserRepository for InMemoryStore {
    async fn insert_user(&self, user: &User) -> Result<(), StoreError> {
        let mut users = self.users.write().map_err(|_| StoreError::Poisoned)?;
        users.insert(user.id, user.clone());
        Ok(())
    }

    async fn get_user(&self, id: UserId) -> Result<Option<User>, StoreError> {
        let users = self.users.read().map_err(|_| StoreError::Poisoned)?;
        Ok(users.get(&id).cloned())
    }

    async fn list_users_with_prompt(&self) -> Result<Vec<User>, StoreError> {
        let users = self.users.read().map_err(|_| StoreError::Poisoned)?;
        let mut out: Vec<User> = users
            .values()
            .filter(|u| u.active_prompt().is_some())
            .cloned()
            .collect();
        out.sort_by_key(|u| (u.created_at, u.id));
        Ok(out)
    }
}

#[async_trait::async_trait]
impl MatchRepository for InMemoryStore {
    async fn get_match(
        &self,
        user_id: UserId,
        job_id: JobId,
    ) -> Result<Option<UserJobMatch>, StoreError> {
        let matches = self.matches.read().map_err(|_| StoreError::Poisoned)?;
        Ok(matches.get(&(user_id, job_id)).cloned())
    }

    async fn insert_match_if_absent(
        &self,
        candidate: UserJobMatch,
    ) -> Result<UpsertOutcome, StoreError> {
        let mut matches = self.matches.write().map_err(|_| StoreError::Poisoned)?;
        let key = (candidate.user_id, candidate.job_id);
        if let Some(existing) = matches.get(&key) {
            return Ok(UpsertOutcome::Existing(existing.clone()));
        }
        matches.insert(key, candidate.clone());
        Ok(UpsertOutcome::Created(candidate))
    }

    async fn mark_match_notified(&self, id: MatchId) -> Result<bool, StoreError> {
        let mut matches = self.matches.write().map_err(|_| StoreError::Poisoned)?;
        let m = matches
            .values_mut()
            .find(|m| m.id == id)
            .ok_or_else(|| StoreError::NotFound(format!("match {id}")))?;
        let transitioned = !m.notified;
        m.notified = true;
        Ok(transitioned)
    }

    async fn list_pending_notifications(&self) -> Result<Vec<UserJobMatch>, StoreError> {
        let users = self.users.read().map_err(|_| StoreError::Poisoned)?;
        let matches = self.matches.read().map_err(|_| StoreError::Poisoned)?;

        let mut pending: Vec<UserJobMatch> = matches
            .values()
            .filter(|m| {
                users
                    .get(&m.user_id)
                    .is_some_and(|u| m.awaits_notification(u.notify_threshold))
            })
            .cloned()
            .collect();
        pending.sort_by_key(|m| (m.created_at, m.id));
        Ok(pending)
    }
}

#[async_trait::async_trait]
impl NotificationRepository for InMemoryStore {
    async fn create_notification(&self, notification: &Notification) -> Result<(), StoreError> {
        let mut notifications = self.notifications.write().map_err(|_| StoreError::Poisoned)?;
        notifications.push(notification.clone());
        Ok(())
    }

    async fn list_notifications(
        &self,
        user_id: Option<UserId>,
        limit: usize,
    ) -> Result<Vec<Notification>, StoreError> {
        let notifications = self.notifications.read().map_err(|_| StoreError::Poisoned)?;
        Ok(notifications
            .iter()
            .rev()
            .filter(|n| user_id.is_none_or(|u| n.user_id == u))
            .take(limit)
            .cloned()
            .collect())
    }
}
