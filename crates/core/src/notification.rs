//! Notification records: an immutable snapshot of a match at send time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::{JobId, MatchId, NotificationId, UserId};
use crate::job::Job;
use crate::matching::{MatchAnalysis, MatchScore, UserJobMatch};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: NotificationId,
    pub user_id: UserId,
    pub job_id: JobId,
    pub match_id: MatchId,
    pub job_title: String,
    pub employer: String,
    pub job_url: String,
    pub score: MatchScore,
    pub analysis: MatchAnalysis,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    /// Copy the job details and match outcome so later edits to either do not
    /// change what the user was told.
    pub fn snapshot(job: &Job, matched: &UserJobMatch) -> Self {
        Self {
            id: NotificationId::new(),
            user_id: matched.user_id,
            job_id: job.id,
            match_id: matched.id,
            job_title: job.title.clone(),
            employer: job.employer.clone(),
            job_url: job.url.clone(),
            score: matched.score,
            analysis: matched.analysis.clone(),
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_is_detached_from_later_job_edits() {
        let mut job = Job::new("Backend Engineer", "Acme", "Rust services", "https://acme.test/jobs/1");
        let matched = UserJobMatch::new(
            UserId::new(),
            job.id,
            MatchScore::new(88).unwrap(),
            MatchAnalysis::new("strong overlap"),
        );

        let n = Notification::snapshot(&job, &matched);
        job.title = "Renamed".to_string();

        assert_eq!(n.job_title, "Backend Engineer");
        assert_eq!(n.match_id, matched.id);
        assert_eq!(n.score.value(), 88);
    }
}
