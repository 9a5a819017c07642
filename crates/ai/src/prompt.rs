//! Prompt construction and response parsing for chat-style oracles.

use serde::Deserialize;
use serde_json::{Value as JsonValue, json};

use jobping_core::{MatchAnalysis, MatchScore};

use crate::oracle::{MatchRequest, ResearchRequest};
use crate::result::MatchAssessment;

pub const RESEARCH_DESCRIPTION_LIMIT: usize = 500;
pub const MATCH_DESCRIPTION_LIMIT: usize = 800;

/// Score assigned when the oracle's scoring output cannot be parsed.
pub const UNPARSED_SCORE: u8 = 50;

pub const RESEARCH_SYSTEM_PROMPT: &str =
    "You are a company research assistant. Provide factual, balanced information about companies.";

pub const MATCH_SYSTEM_PROMPT: &str =
    "You are a job matching assistant. Be honest and balanced in your analysis.";

/// Cut `text` to at most `max_chars` characters, appending `...` when cut.
pub fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => format!("{}...", &text[..byte_idx]),
        None => text.to_string(),
    }
}

pub fn research_prompt(request: &ResearchRequest) -> String {
    format!(
        r#"Research and analyze this company for a job seeker. Provide factual information if you know it, otherwise indicate uncertainty.

Company: {employer}
Job Title: {title}
Job Description (partial): {description}

Provide a JSON response with these fields:
{{
  "company_size": "estimated employee count or range",
  "industry": "primary industry",
  "culture": "brief description of work culture if known",
  "funding": "funding status/stage if known",
  "notable_info": "any notable facts (acquisitions, layoffs, growth, etc.)",
  "tech_stack": "common technologies used if known",
  "work_life_balance": "reputation for work-life balance if known",
  "red_flags": ["any concerning patterns"],
  "green_flags": ["positive indicators"]
}}"#,
        employer = request.employer,
        title = request.title,
        description = truncate(&request.description, RESEARCH_DESCRIPTION_LIMIT),
    )
}

pub fn match_prompt(request: &MatchRequest) -> String {
    let research = request
        .company_research
        .as_ref()
        .map(JsonValue::to_string)
        .unwrap_or_default();

    format!(
        r#"Match this job to a user's preferences and provide a compatibility score.

USER'S PREFERENCES/IDEAL JOB:
{prompt}

JOB DETAILS:
Title: {title}
Company: {employer}
Description: {description}

COMPANY RESEARCH:
{research}

Analyze how well this job matches the user's preferences. Provide a JSON response:
{{
  "score": 0-100 (how well this job matches their preferences),
  "explanation": "2-3 sentence explanation of the match",
  "pros": ["reasons this job is a good fit"],
  "cons": ["reasons this job might not be ideal"],
  "key_match_factors": ["specific factors from user preferences that match"]
}}"#,
        prompt = request.prompt,
        title = request.title,
        employer = request.employer,
        description = truncate(&request.description, MATCH_DESCRIPTION_LIMIT),
    )
}

/// Models like to wrap JSON in a markdown fence; drop it if present.
fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = rest.split_once('\n').map_or("", |(_, body)| body);
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

/// Research output is stored as-is when it is a JSON object, otherwise the
/// raw text is kept under `raw_analysis`.
pub fn parse_research(raw: &str) -> JsonValue {
    match serde_json::from_str::<JsonValue>(strip_code_fence(raw)) {
        Ok(value) if value.is_object() => value,
        _ => json!({ "raw_analysis": raw }),
    }
}

#[derive(Debug, Deserialize)]
struct RawAssessment {
    score: f64,
    #[serde(default)]
    explanation: String,
    #[serde(default)]
    pros: Vec<String>,
    #[serde(default)]
    cons: Vec<String>,
    #[serde(default)]
    key_match_factors: Vec<String>,
}

pub fn parse_assessment(raw: &str) -> MatchAssessment {
    match serde_json::from_str::<RawAssessment>(strip_code_fence(raw)) {
        Ok(parsed) => MatchAssessment::new(
            MatchScore::clamped(parsed.score.round() as i64),
            MatchAnalysis::new(parsed.explanation)
                .with_pros(parsed.pros)
                .with_cons(parsed.cons)
                .with_key_factors(parsed.key_match_factors),
        ),
        Err(_) => MatchAssessment::new(
            MatchScore::clamped(i64::from(UNPARSED_SCORE)),
            MatchAnalysis::unparsed(raw),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobping_core::AnalysisSource;
    use proptest::prelude::*;

    #[test]
    fn parses_plain_and_fenced_assessments() {
        let plain = r#"{"score": 82, "explanation": "Good fit", "pros": ["remote"], "cons": []}"#;
        let a = parse_assessment(plain);
        assert_eq!(a.score.value(), 82);
        assert_eq!(a.analysis.pros, vec!["remote".to_string()]);
        assert_eq!(a.analysis.source, AnalysisSource::Oracle);

        let fenced = "```json\n{\"score\": 91.6, \"explanation\": \"x\"}\n```";
        assert_eq!(parse_assessment(fenced).score.value(), 92);
    }

    #[test]
    fn out_of_range_scores_are_clamped() {
        assert_eq!(parse_assessment(r#"{"score": 140}"#).score.value(), 100);
        assert_eq!(parse_assessment(r#"{"score": -3}"#).score.value(), 0);
    }

    #[test]
    fn unparseable_assessment_scores_fifty_and_keeps_raw() {
        let a = parse_assessment("I think this is a great job!");
        assert_eq!(a.score.value(), UNPARSED_SCORE);
        assert_eq!(a.analysis.source, AnalysisSource::Unparsed);
        assert_eq!(a.analysis.raw.as_deref(), Some("I think this is a great job!"));
    }

    #[test]
    fn research_falls_back_to_raw_analysis() {
        assert_eq!(parse_research(r#"{"industry":"fintech"}"#)["industry"], "fintech");
        assert_eq!(parse_research("no idea")["raw_analysis"], "no idea");
        assert_eq!(parse_research("[1,2]")["raw_analysis"], "[1,2]");
    }

    #[test]
    fn prompts_truncate_descriptions() {
        let request = MatchRequest {
            title: "Dev".to_string(),
            employer: "Acme".to_string(),
            description: "x".repeat(2000),
            company_research: None,
            prompt: "rust".to_string(),
        };
        let prompt = match_prompt(&request);
        assert!(prompt.contains(&format!("{}...", "x".repeat(MATCH_DESCRIPTION_LIMIT))));
        assert!(!prompt.contains(&"x".repeat(MATCH_DESCRIPTION_LIMIT + 1)));
    }

    proptest! {
        #[test]
        fn truncate_keeps_a_char_aligned_prefix(text in "\\PC{0,60}", max in 0usize..40) {
            let out = truncate(&text, max);
            if text.chars().count() <= max {
                prop_assert_eq!(out, text);
            } else {
                let kept = out.strip_suffix("...").unwrap();
                prop_assert_eq!(kept.chars().count(), max);
                prop_assert!(text.starts_with(kept));
            }
        }
    }
}
