use anyhow::Result;
use async_trait::async_trait;
use ingest::RetryPolicy;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::CompletionError;
use crate::json_repair::parse_lenient;
use crate::prompt::STRICT_JSON_SUFFIX;

/// Structured completion: a prompt pair in, a parsed JSON value out.
#[async_trait]
pub trait CompletionCapability: Send + Sync {
    /// `retries` is the total attempt budget for this call.
    async fn complete(&self, system: &str, user: &str, temperature: f32, retries: usize) -> Result<Value>;
}

#[derive(Clone)]
pub struct OllamaClient {
    base_url: String,
    model: String,
    client: reqwest::Client,
    retry: RetryPolicy,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    stream: bool,
    format: &'static str,
    options: ChatOptions,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Deserialize)]
struct ChatResponse {
    message: ChatReply,
}

#[derive(Deserialize)]
struct ChatReply {
    content: String,
}

#[derive(Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagEntry>,
}

#[derive(Deserialize)]
struct TagEntry {
    name: String,
}

/// Result of probing the Ollama server.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OllamaHealth {
    pub connected: bool,
    pub model: String,
    pub model_available: bool,
    pub available_models: Vec<String>,
}

const MAX_TOKENS: u32 = 4096;

impl OllamaClient {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            client,
            retry: RetryPolicy::fixed(2, Duration::from_secs(1)),
        })
    }

    /// Delay curve between attempts; the attempt budget comes from each call.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn chat_once(&self, system: &str, user: &str, temperature: f32) -> Result<Value, CompletionError> {
        let url = format!("{}/api/chat", self.base_url);
        let request = ChatRequest {
            model: &self.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
            stream: false,
            format: "json",
            options: ChatOptions {
                temperature,
                num_predict: MAX_TOKENS,
            },
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| CompletionError::Unavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(CompletionError::Http {
                status: response.status().as_u16(),
            });
        }

        let reply: ChatResponse = response
            .json()
            .await
            .map_err(|e| CompletionError::Malformed(format!("unexpected chat envelope: {e}")))?;

        debug!(chars = reply.message.content.len(), "Received completion");
        parse_lenient(&reply.message.content)
    }

    /// Whether the server answers and the configured model is pulled. Never fails.
    pub async fn health(&self) -> OllamaHealth {
        let url = format!("{}/api/tags", self.base_url);
        let tags = match self.client.get(&url).send().await {
            Ok(response) if response.status().is_success() => response.json::<TagsResponse>().await.ok(),
            Ok(response) => {
                warn!(status = %response.status(), "Ollama tags request failed");
                None
            }
            Err(e) => {
                warn!(error = %e, "Ollama not reachable");
                None
            }
        };

        let Some(tags) = tags else {
            return OllamaHealth {
                connected: false,
                model: self.model.clone(),
                model_available: false,
                available_models: Vec::new(),
            };
        };

        let family = self.model.split(':').next().unwrap_or(&self.model);
        let available_models: Vec<String> = tags.models.into_iter().map(|m| m.name).collect();
        let model_available = available_models
            .iter()
            .any(|name| name == &self.model || name.starts_with(family));
        if !model_available {
            warn!(model = %self.model, available = ?available_models, "Configured model not pulled");
        }

        OllamaHealth {
            connected: true,
            model: self.model.clone(),
            model_available,
            available_models,
        }
    }
}

#[async_trait]
impl CompletionCapability for OllamaClient {
    async fn complete(&self, system: &str, user: &str, temperature: f32, retries: usize) -> Result<Value> {
        let system = format!("{system}{STRICT_JSON_SUFFIX}");
        let value = self
            .retry
            .with_max_attempts(retries)
            .retry("ollama_chat", || self.chat_once(&system, user, temperature))
            .await?;
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> OllamaClient {
        OllamaClient::new(server.uri(), "llama3.1:8b", Duration::from_secs(5))
            .unwrap()
            .with_retry(RetryPolicy::fixed(1, Duration::ZERO))
    }

    fn chat_reply(content: &str) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(json!({
            "model": "llama3.1:8b",
            "message": {"role": "assistant", "content": content},
            "done": true
        }))
    }

    #[tokio::test]
    async fn sends_chat_request_and_repairs_reply() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .and(body_partial_json(json!({
                "model": "llama3.1:8b",
                "stream": false,
                "format": "json",
                "options": {"num_predict": 4096}
            })))
            .respond_with(chat_reply("```json\n{\"entities\": [], \"relationships\": [],}\n```"))
            .expect(1)
            .mount(&server)
            .await;

        let value = client(&server).complete("system", "user", 0.3, 2).await.unwrap();
        assert_eq!(value, json!({"entities": [], "relationships": []}));
    }

    #[tokio::test]
    async fn retries_malformed_output_within_budget() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(chat_reply("I am not JSON"))
            .up_to_n_times(1)
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(chat_reply("{\"accepted\": []}"))
            .mount(&server)
            .await;

        let value = client(&server).complete("system", "user", 0.3, 2).await.unwrap();
        assert_eq!(value, json!({"accepted": []}));
    }

    #[tokio::test]
    async fn server_errors_surface_after_budget() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(ResponseTemplate::new(500))
            .expect(2)
            .mount(&server)
            .await;

        let err = client(&server).complete("system", "user", 0.3, 2).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CompletionError>(),
            Some(CompletionError::Http { status: 500 })
        ));
    }

    #[tokio::test]
    async fn health_reports_model_presence() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/tags"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "models": [{"name": "llama3.1:70b"}, {"name": "mistral:7b"}]
            })))
            .mount(&server)
            .await;

        let health = client(&server).health().await;
        assert!(health.connected);
        assert!(health.model_available);
        assert_eq!(health.available_models.len(), 2);
    }

    #[tokio::test]
    async fn health_when_unreachable() {
        let client = OllamaClient::new("http://127.0.0.1:9", "llama3.1:8b", Duration::from_millis(200)).unwrap();
        let health = client.health().await;
        assert!(!health.connected);
        assert!(!health.model_available);
    }
}
