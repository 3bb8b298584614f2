//! Transcript evaluation
//!
//! Scores a finished conversation against a test case's metrics. All
//! metrics go to the model in one request and come back as structured
//! pass/fail verdicts.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::http::HttpClient;
use crate::models::{EvaluationResult, Metric, Verdict};

pub const OPENAI_API_URL: &str = "https://api.openai.com/v1";

const SYSTEM_PROMPT: &str = "You are an expert in evaluating transcripts between customers and agents. \
Evaluate the conversation for all the following metrics. For each metric, \
provide a pass/fail result and a brief reason.";

/// Scores transcripts against metrics
#[async_trait]
pub trait Evaluator: Send + Sync {
    async fn evaluate(&self, transcript: &str, metrics: &[Metric]) -> Result<Vec<EvaluationResult>>;
}

/// OpenAI-compatible chat completions evaluator with a strict JSON schema
pub struct ChatEvaluator {
    client: HttpClient,
    model: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    refusal: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Verdicts {
    evaluations: Vec<RawVerdict>,
}

#[derive(Debug, Deserialize)]
struct RawVerdict {
    name: String,
    result: Verdict,
    reason: String,
}

impl ChatEvaluator {
    pub fn new(api_url: &str, api_key: &str, model: impl Into<String>) -> Result<Self> {
        let client = HttpClient::with_timeout(120)?
            .base_url(api_url)
            .bearer_auth(api_key);
        Ok(Self {
            client,
            model: model.into(),
        })
    }

    fn request_body(&self, transcript: &str, metrics: &[Metric]) -> serde_json::Value {
        let metrics_prompt = metrics
            .iter()
            .enumerate()
            .map(|(i, m)| format!("Metric {}: {}\n{}", i + 1, m.name, m.prompt))
            .collect::<Vec<_>>()
            .join("\n");

        json!({
            "model": self.model,
            "temperature": 0,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                {
                    "role": "user",
                    "content": format!(
                        "Metrics to evaluate:\n{metrics_prompt}\n\nConversation Data: {transcript}"
                    ),
                },
            ],
            "response_format": {
                "type": "json_schema",
                "json_schema": {
                    "name": "voice_agent_evaluation_results",
                    "strict": true,
                    "schema": {
                        "type": "object",
                        "properties": {
                            "evaluations": {
                                "type": "array",
                                "items": {
                                    "type": "object",
                                    "properties": {
                                        "name": { "type": "string" },
                                        "result": { "type": "string", "enum": ["pass", "fail"] },
                                        "reason": { "type": "string" }
                                    },
                                    "required": ["name", "result", "reason"],
                                    "additionalProperties": false
                                }
                            }
                        },
                        "required": ["evaluations"],
                        "additionalProperties": false
                    }
                }
            }
        })
    }
}

#[async_trait]
impl Evaluator for ChatEvaluator {
    async fn evaluate(&self, transcript: &str, metrics: &[Metric]) -> Result<Vec<EvaluationResult>> {
        if metrics.is_empty() {
            warn!("No metrics to evaluate, returning empty list");
            return Ok(Vec::new());
        }

        info!("Evaluating transcript against {} metrics", metrics.len());
        let body = self.request_body(transcript, metrics);
        let resp = self
            .client
            .post_json("/chat/completions", &body)
            .await?
            .error_for_status()
            .context("Evaluation request rejected")?;

        let chat: ChatResponse = resp.json()?;
        let message = chat
            .choices
            .into_iter()
            .next()
            .map(|c| c.message)
            .context("Evaluation response has no choices")?;
        if let Some(refusal) = message.refusal {
            bail!("Evaluator refused: {refusal}");
        }
        let content = message.content.context("Evaluation response has no content")?;

        let verdicts: Verdicts =
            serde_json::from_str(&content).context("Evaluation content is not valid JSON")?;
        let results: Vec<EvaluationResult> = verdicts
            .evaluations
            .into_iter()
            .map(|v| EvaluationResult {
                name: v.name,
                verdict: v.result,
                reason: v.reason,
            })
            .collect();

        for result in &results {
            debug!("Metric: {}, Result: {}, Reason: {}", result.name, result.verdict, result.reason);
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fixtures;
    use axum::{routing::post, Json, Router};
    use std::sync::{Arc, Mutex};

    async fn mock_chat(content: &'static str, seen: Arc<Mutex<Vec<serde_json::Value>>>) -> String {
        let router = Router::new().route(
            "/v1/chat/completions",
            post(move |Json(body): Json<serde_json::Value>| async move {
                seen.lock().unwrap().push(body);
                Json(json!({
                    "choices": [{ "message": { "role": "assistant", "content": content } }]
                }))
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, router).await.unwrap() });
        format!("http://{addr}/v1")
    }

    #[tokio::test]
    async fn test_evaluate_parses_verdicts() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let url = mock_chat(
            r#"{"evaluations":[{"name":"Greeting","result":"pass","reason":"Greeted politely"},{"name":"Booking","result":"fail","reason":"No confirmation"}]}"#,
            Arc::clone(&seen),
        )
        .await;
        let evaluator = ChatEvaluator::new(&url, "sk-test", "gpt-4o").unwrap();

        let results = evaluator
            .evaluate(
                "assistant: Hello\nuser: Book a table",
                &[fixtures::metric("greeting"), fixtures::metric("booking")],
            )
            .await
            .unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0], EvaluationResult::pass("Greeting", "Greeted politely"));
        assert_eq!(results[1].verdict, Verdict::Fail);

        let body = &seen.lock().unwrap()[0];
        assert_eq!(body["temperature"], 0);
        assert_eq!(body["response_format"]["json_schema"]["strict"], true);
        let user = body["messages"][1]["content"].as_str().unwrap();
        assert!(user.starts_with("Metrics to evaluate:\nMetric 1:"));
        assert!(user.ends_with("Conversation Data: assistant: Hello\nuser: Book a table"));
    }

    #[tokio::test]
    async fn test_no_metrics_skips_request() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let url = mock_chat("{}", Arc::clone(&seen)).await;
        let evaluator = ChatEvaluator::new(&url, "sk-test", "gpt-4o").unwrap();

        let results = evaluator.evaluate("user: hi", &[]).await.unwrap();
        assert!(results.is_empty());
        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_content_is_error() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let url = mock_chat("not json", seen).await;
        let evaluator = ChatEvaluator::new(&url, "sk-test", "gpt-4o").unwrap();

        let result = evaluator
            .evaluate("user: hi", &[fixtures::metric("greeting")])
            .await;
        assert!(result.is_err());
    }
}
