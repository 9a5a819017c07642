//! Job postings and the company research attached to them.

use core::str::FromStr;

use chrono::{DateTime, Months, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::DomainError;
use crate::id::JobId;

/// Lifecycle status of a job posting.
///
/// Jobs enter as `Pending` and become `Processed` once enrichment has handed
/// them to fan-out. Jobs are never deleted by the pipeline.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processed => "processed",
            JobStatus::Failed => "failed",
        }
    }
}

impl FromStr for JobStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "processed" => Ok(JobStatus::Processed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(DomainError::validation(format!("unknown job status: {other}"))),
        }
    }
}

/// Advertised salary bounds; either side may be missing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SalaryRange {
    pub min: Option<f64>,
    pub max: Option<f64>,
}

/// Structured facts about a job's employer, produced by the oracle.
///
/// `facts` is an opaque JSON blob; the pipeline only stores it and hands it
/// back to the scoring oracle as context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompanyResearch {
    pub facts: JsonValue,
    pub researched_at: DateTime<Utc>,
}

/// How old company research may get before it is redone.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResearchPolicy {
    pub max_age_months: u32,
}

impl Default for ResearchPolicy {
    fn default() -> Self {
        Self { max_age_months: 6 }
    }
}

impl ResearchPolicy {
    pub fn new(max_age_months: u32) -> Self {
        Self { max_age_months }
    }

    /// Research taken strictly after `now - max_age_months` counts as fresh.
    pub fn is_fresh(&self, researched_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        match now.checked_sub_months(Months::new(self.max_age_months)) {
            Some(cutoff) => researched_at > cutoff,
            None => true,
        }
    }
}

/// A job posting as ingested upstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub title: String,
    pub employer: String,
    pub location: Option<String>,
    pub description: String,
    pub url: String,
    pub job_type: Option<String>,
    pub is_remote: bool,
    pub salary: SalaryRange,
    pub posted_at: Option<DateTime<Utc>>,
    pub status: JobStatus,
    pub company_research: Option<CompanyResearch>,
    pub created_at: DateTime<Utc>,
}

impl Job {
    pub fn new(
        title: impl Into<String>,
        employer: impl Into<String>,
        description: impl Into<String>,
        url: impl Into<String>,
    ) -> Self {
        Self {
            id: JobId::new(),
            title: title.into(),
            employer: employer.into(),
            location: None,
            description: description.into(),
            url: url.into(),
            job_type: None,
            is_remote: false,
            salary: SalaryRange::default(),
            posted_at: None,
            status: JobStatus::Pending,
            company_research: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn with_salary(mut self, min: Option<f64>, max: Option<f64>) -> Self {
        self.salary = SalaryRange { min, max };
        self
    }

    pub fn with_remote(mut self, is_remote: bool) -> Self {
        self.is_remote = is_remote;
        self
    }

    pub fn with_research(mut self, facts: JsonValue, researched_at: DateTime<Utc>) -> Self {
        self.company_research = Some(CompanyResearch { facts, researched_at });
        self
    }

    /// Whether the attached research is recent enough to skip the oracle.
    pub fn has_fresh_research(&self, policy: &ResearchPolicy, now: DateTime<Utc>) -> bool {
        self.company_research
            .as_ref()
            .is_some_and(|r| policy.is_fresh(r.researched_at, now))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use serde_json::json;

    #[test]
    fn research_inside_window_is_fresh() {
        let now = Utc.with_ymd_and_hms(2024, 9, 15, 12, 0, 0).unwrap();
        let policy = ResearchPolicy::default();

        assert!(policy.is_fresh(now - Duration::days(30), now));
        assert!(policy.is_fresh(Utc.with_ymd_and_hms(2024, 3, 15, 12, 0, 1).unwrap(), now));
    }

    #[test]
    fn research_at_or_past_the_cutoff_is_stale() {
        let now = Utc.with_ymd_and_hms(2024, 9, 15, 12, 0, 0).unwrap();
        let policy = ResearchPolicy::default();

        assert!(!policy.is_fresh(Utc.with_ymd_and_hms(2024, 3, 15, 12, 0, 0).unwrap(), now));
        assert!(!policy.is_fresh(now - Duration::days(400), now));
    }

    #[test]
    fn job_without_research_is_never_fresh() {
        let job = Job::new("Rust Engineer", "Acme", "Build things", "https://example.com/1");
        assert!(!job.has_fresh_research(&ResearchPolicy::default(), Utc::now()));

        let job = job.with_research(json!({"industry": "tools"}), Utc::now());
        assert!(job.has_fresh_research(&ResearchPolicy::default(), Utc::now()));
    }

    #[test]
    fn status_round_trips_through_text() {
        for status in [JobStatus::Pending, JobStatus::Processed, JobStatus::Failed] {
            assert_eq!(status.as_str().parse::<JobStatus>().unwrap(), status);
        }
        assert!("archived".parse::<JobStatus>().is_err());
    }
}
