use std::time::Duration;

use reqwest::StatusCode;
use serde_json::json;
use tracing::{instrument, warn};

use jobping_core::Notification;

use super::{NotificationSink, SinkError};

const MAX_LISTED: usize = 3;
const EMBED_COLOR: u32 = 0x58_B9_FF;

/// Title and markdown body for a match notification.
pub fn format_message(notification: &Notification) -> (String, String) {
    let title = format!(
        "Job Match: {} at {}",
        notification.job_title, notification.employer
    );

    let analysis = &notification.analysis;
    let mut body = vec![
        format!("**Match Score: {}/100**", notification.score),
        String::new(),
        analysis.explanation.clone(),
        String::new(),
    ];

    for (heading, items) in [("**Pros:**", &analysis.pros), ("**Cons:**", &analysis.cons)] {
        if items.is_empty() {
            continue;
        }
        body.push(heading.to_string());
        body.extend(items.iter().take(MAX_LISTED).map(|item| format!("- {item}")));
        body.push(String::new());
    }

    if !notification.job_url.is_empty() {
        body.push(format!("[View Job]({})", notification.job_url));
    }

    (title, body.join("\n"))
}

/// Posts a Discord-style embed to the user's webhook URL.
#[derive(Debug, Clone)]
pub struct WebhookSink {
    http: reqwest::Client,
}

impl WebhookSink {
    pub fn new(timeout: Duration) -> Result<Self, SinkError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SinkError::Permanent(format!("http client: {e}")))?;
        Ok(Self { http })
    }
}

#[async_trait::async_trait]
impl NotificationSink for WebhookSink {
    #[instrument(skip(self, address, notification), fields(notification_id = %notification.id), err)]
    async fn deliver(&self, address: &str, notification: &Notification) -> Result<(), SinkError> {
        let (title, description) = format_message(notification);
        let payload = json!({
            "embeds": [{
                "title": title,
                "description": description,
                "url": notification.job_url,
                "color": EMBED_COLOR,
            }]
        });

        let response = self
            .http
            .post(address)
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_builder() {
                    SinkError::Permanent(format!("invalid webhook address: {e}"))
                } else {
                    SinkError::Transient(e.to_string())
                }
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        warn!(status = status.as_u16(), "webhook returned non-success status");
        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            Err(SinkError::Transient(format!("webhook status {status}")))
        } else {
            Err(SinkError::Permanent(format!("webhook status {status}")))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use axum::routing::post;
    use axum::{Json, Router};
    use jobping_core::{Job, MatchAnalysis, MatchScore, UserId, UserJobMatch};
    use serde_json::Value as JsonValue;

    use super::*;

    fn notification() -> Notification {
        let job = Job::new("Platform Engineer", "Acme", "Build things", "https://acme.test/jobs/7");
        let matched = UserJobMatch::new(
            UserId::new(),
            job.id,
            MatchScore::new(82).unwrap(),
            MatchAnalysis::new("Good fit for backend work")
                .with_pros(vec!["Rust".into(), "Remote".into(), "Salary".into(), "Team".into()])
                .with_cons(vec!["On-call".into()]),
        );
        Notification::snapshot(&job, &matched)
    }

    #[test]
    fn message_lists_at_most_three_pros() {
        let (title, body) = format_message(&notification());
        assert_eq!(title, "Job Match: Platform Engineer at Acme");
        assert!(body.starts_with("**Match Score: 82/100**"));
        assert!(body.contains("- Salary"));
        assert!(!body.contains("- Team"));
        assert!(body.contains("**Cons:**\n- On-call"));
        assert!(body.ends_with("[View Job](https://acme.test/jobs/7)"));
    }

    #[test]
    fn empty_sections_are_omitted() {
        let mut n = notification();
        n.analysis.pros.clear();
        n.analysis.cons.clear();
        let (_, body) = format_message(&n);
        assert!(!body.contains("Pros"));
        assert!(!body.contains("Cons"));
    }

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}/hook")
    }

    #[tokio::test]
    async fn posts_embed_to_webhook() {
        let received: Arc<Mutex<Vec<JsonValue>>> = Arc::default();
        let sink_received = received.clone();
        let router = Router::new().route(
            "/hook",
            post(move |Json(body): Json<JsonValue>| {
                let sink_received = sink_received.clone();
                async move {
                    sink_received.lock().unwrap().push(body);
                    StatusCode::NO_CONTENT
                }
            }),
        );
        let url = serve(router).await;

        let sink = WebhookSink::new(Duration::from_secs(5)).unwrap();
        sink.deliver(&url, &notification()).await.unwrap();

        let bodies = received.lock().unwrap();
        assert_eq!(bodies.len(), 1);
        assert_eq!(bodies[0]["embeds"][0]["title"], "Job Match: Platform Engineer at Acme");
    }

    #[tokio::test]
    async fn status_codes_map_to_retryability() {
        let router = Router::new()
            .route("/hook", post(|| async { StatusCode::NOT_FOUND }))
            .route("/busy", post(|| async { StatusCode::SERVICE_UNAVAILABLE }));
        let url = serve(router).await;
        let sink = WebhookSink::new(Duration::from_secs(5)).unwrap();

        let gone = sink.deliver(&url, &notification()).await.unwrap_err();
        assert!(!gone.is_retryable());

        let busy = sink
            .deliver(&url.replace("/hook", "/busy"), &notification())
            .await
            .unwrap_err();
        assert!(busy.is_retryable());
    }
}
