//! Chat-completions oracle (OpenAI-compatible HTTP API).

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{debug, instrument};

use crate::oracle::{MatchRequest, Oracle, OracleOutcome, ResearchRequest};
use crate::prompt;
use crate::result::{AiError, MatchAssessment};

pub const DEFAULT_MODEL: &str = "gpt-3.5-turbo";
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Kept below the default queue visibility timeout so a hung call fails the
/// message before it is redelivered to someone else.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(45);

#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub timeout: Duration,
}

impl OpenAiConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Clone)]
pub struct OpenAiOracle {
    http: reqwest::Client,
    config: OpenAiConfig,
}

impl OpenAiOracle {
    pub fn new(config: OpenAiConfig) -> Result<Self, AiError> {
        if config.api_key.trim().is_empty() {
            return Err(AiError::InvalidInput("api key is empty".to_string()));
        }
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| AiError::Internal(format!("failed to build http client: {e}")))?;
        Ok(Self { http, config })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'))
    }

    #[instrument(skip(self, system, user), fields(model = %self.config.model), err)]
    async fn complete(&self, system: &str, user: &str) -> Result<String, AiError> {
        let body = ChatRequest {
            model: &self.config.model,
            messages: [
                ChatMessage { role: "system", content: system },
                ChatMessage { role: "user", content: user },
            ],
        };

        let response = self
            .http
            .post(self.endpoint())
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| AiError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AiError::InferenceFailed(format!("oracle returned status {status}")));
        }

        let reply: ChatResponse = response
            .json()
            .await
            .map_err(|e| AiError::InferenceFailed(format!("unreadable oracle response: {e}")))?;

        let content = reply
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| AiError::InferenceFailed("oracle returned no choices".to_string()))?;

        debug!(chars = content.len(), "oracle replied");
        Ok(content)
    }
}

#[async_trait::async_trait]
impl Oracle for OpenAiOracle {
    async fn research_company(
        &self,
        request: &ResearchRequest,
    ) -> Result<OracleOutcome<JsonValue>, AiError> {
        let raw = self
            .complete(prompt::RESEARCH_SYSTEM_PROMPT, &prompt::research_prompt(request))
            .await?;
        Ok(OracleOutcome::Available(prompt::parse_research(&raw)))
    }

    async fn score_match(
        &self,
        request: &MatchRequest,
    ) -> Result<OracleOutcome<MatchAssessment>, AiError> {
        let raw = self
            .complete(prompt::MATCH_SYSTEM_PROMPT, &prompt::match_prompt(request))
            .await?;
        Ok(OracleOutcome::Available(prompt::parse_assessment(&raw)))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use axum::{Json, Router, extract::State, http::HeaderMap, http::StatusCode, routing::post};
    use serde_json::json;

    use super::*;

    #[derive(Clone)]
    struct Stub {
        status: StatusCode,
        reply: JsonValue,
        seen: Arc<Mutex<Vec<(Option<String>, JsonValue)>>>,
    }

    async fn completions(
        State(stub): State<Stub>,
        headers: HeaderMap,
        Json(body): Json<JsonValue>,
    ) -> (StatusCode, Json<JsonValue>) {
        let auth = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        stub.seen.lock().unwrap().push((auth, body));
        (stub.status, Json(stub.reply.clone()))
    }

    async fn spawn_stub(stub: Stub) -> String {
        let app = Router::new()
            .route("/v1/chat/completions", post(completions))
            .with_state(stub);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}/v1")
    }

    fn chat_reply(content: &str) -> JsonValue {
        json!({ "choices": [ { "message": { "role": "assistant", "content": content } } ] })
    }

    fn match_request() -> MatchRequest {
        MatchRequest {
            title: "Platform Engineer".to_string(),
            employer: "Acme".to_string(),
            description: "Rust and Postgres".to_string(),
            company_research: Some(json!({"industry": "logistics"})),
            prompt: "remote rust roles".to_string(),
        }
    }

    #[tokio::test]
    async fn scores_through_chat_completions() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let base = spawn_stub(Stub {
            status: StatusCode::OK,
            reply: chat_reply(r#"{"score": 77, "explanation": "solid", "pros": ["rust"], "cons": ["onsite"]}"#),
            seen: seen.clone(),
        })
        .await;

        let oracle = OpenAiOracle::new(OpenAiConfig::new("sk-test").with_base_url(base)).unwrap();
        let outcome = oracle.score_match(&match_request()).await.unwrap();

        let OracleOutcome::Available(assessment) = outcome else {
            panic!("expected a real answer");
        };
        assert_eq!(assessment.score.value(), 77);

        let seen = seen.lock().unwrap();
        assert_eq!(seen[0].0.as_deref(), Some("Bearer sk-test"));
        assert_eq!(seen[0].1["model"], DEFAULT_MODEL);
        assert_eq!(seen[0].1["messages"][0]["role"], "system");
        assert!(
            seen[0].1["messages"][1]["content"]
                .as_str()
                .unwrap()
                .contains("remote rust roles")
        );
    }

    #[tokio::test]
    async fn research_keeps_raw_text_when_not_json() {
        let base = spawn_stub(Stub {
            status: StatusCode::OK,
            reply: chat_reply("Acme is a mid-size logistics firm."),
            seen: Arc::default(),
        })
        .await;

        let oracle = OpenAiOracle::new(OpenAiConfig::new("sk-test").with_base_url(base)).unwrap();
        let request = ResearchRequest {
            employer: "Acme".to_string(),
            title: "Dev".to_string(),
            description: "...".to_string(),
        };
        let facts = oracle.research_company(&request).await.unwrap().into_value();
        assert_eq!(facts["raw_analysis"], "Acme is a mid-size logistics firm.");
    }

    #[tokio::test]
    async fn non_success_status_is_a_retryable_failure() {
        let base = spawn_stub(Stub {
            status: StatusCode::TOO_MANY_REQUESTS,
            reply: json!({"error": "slow down"}),
            seen: Arc::default(),
        })
        .await;

        let oracle = OpenAiOracle::new(OpenAiConfig::new("sk-test").with_base_url(base)).unwrap();
        let err = oracle.score_match(&match_request()).await.unwrap_err();
        assert!(matches!(err, AiError::InferenceFailed(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn empty_choices_is_a_failure() {
        let base = spawn_stub(Stub {
            status: StatusCode::OK,
            reply: json!({ "choices": [] }),
            seen: Arc::default(),
        })
        .await;

        let oracle = OpenAiOracle::new(OpenAiConfig::new("sk-test").with_base_url(base)).unwrap();
        assert!(oracle.score_match(&match_request()).await.is_err());
    }

    #[test]
    fn empty_api_key_is_rejected() {
        assert!(matches!(
            OpenAiOracle::new(OpenAiConfig::new("  ")),
            Err(AiError::InvalidInput(_))
        ));
    }
}
