//! Subscribed users and their notification preferences.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::id::UserId;
use crate::matching::MatchScore;

/// Minimum match score (inclusive) a user wants to be notified about.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct NotifyThreshold(u8);

impl NotifyThreshold {
    pub const DEFAULT: NotifyThreshold = NotifyThreshold(70);

    pub fn new(value: u8) -> Result<Self, DomainError> {
        if value > 100 {
            return Err(DomainError::validation(format!(
                "notify threshold must be within 0..=100, got {value}"
            )));
        }
        Ok(Self(value))
    }

    pub fn value(&self) -> u8 {
        self.0
    }

    /// A score meets the threshold when it is greater than or equal to it.
    pub fn is_met_by(&self, score: MatchScore) -> bool {
        score.value() >= self.0
    }
}

impl Default for NotifyThreshold {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl TryFrom<u8> for NotifyThreshold {
    type Error = DomainError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<NotifyThreshold> for u8 {
    fn from(value: NotifyThreshold) -> Self {
        value.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    /// Free-text description of what the user is looking for.
    pub matching_prompt: Option<String>,
    /// Delivery address for notifications (e.g. a webhook URL).
    pub sink_address: Option<String>,
    pub notify_threshold: NotifyThreshold,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            id: UserId::new(),
            username: username.into(),
            matching_prompt: None,
            sink_address: None,
            notify_threshold: NotifyThreshold::default(),
            created_at: Utc::now(),
        }
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.matching_prompt = Some(prompt.into());
        self
    }

    pub fn with_sink_address(mut self, address: impl Into<String>) -> Self {
        self.sink_address = Some(address.into());
        self
    }

    pub fn with_threshold(mut self, threshold: NotifyThreshold) -> Self {
        self.notify_threshold = threshold;
        self
    }

    /// The matching prompt, if the user has a non-blank one.
    ///
    /// Users without one are never fanned out to or scored.
    pub fn active_prompt(&self) -> Option<&str> {
        self.matching_prompt
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn blank_prompts_are_inactive() {
        assert_eq!(User::new("a").active_prompt(), None);
        assert_eq!(User::new("b").with_prompt("").active_prompt(), None);
        assert_eq!(User::new("c").with_prompt("  \n ").active_prompt(), None);
        assert_eq!(
            User::new("d").with_prompt(" remote rust ").active_prompt(),
            Some("remote rust")
        );
    }

    #[test]
    fn threshold_defaults_to_seventy_and_rejects_out_of_range() {
        assert_eq!(NotifyThreshold::default().value(), 70);
        assert!(NotifyThreshold::new(100).is_ok());
        assert!(matches!(NotifyThreshold::new(101), Err(DomainError::Validation(_))));
    }

    #[test]
    fn threshold_deserialization_validates() {
        assert!(serde_json::from_str::<NotifyThreshold>("80").is_ok());
        assert!(serde_json::from_str::<NotifyThreshold>("180").is_err());
    }

    proptest! {
        #[test]
        fn threshold_is_inclusive(threshold in 0u8..=100, score in 0u8..=100) {
            let t = NotifyThreshold::new(threshold).unwrap();
            let s = MatchScore::new(score).unwrap();
            prop_assert_eq!(t.is_met_by(s), score >= threshold);
        }
    }
}
