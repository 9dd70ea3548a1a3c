use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, warn};

use crate::core::ai::{AiBackend, Conversation, Role, UnconfiguredBackend};
use crate::domain::config::AiConfig;
use crate::domain::error::AiError;

/// The API key travels in this header, never in the URL
const API_KEY_HEADER: &str = "x-goog-api-key";

/// Google Gemini `generateContent` client
#[derive(Debug, Clone)]
pub struct GeminiBackend {
    client: reqwest::Client,
    api_base: String,
    api_key: String,
    model: String,
    temperature: f32,
    max_output_tokens: u32,
}

impl GeminiBackend {
    pub fn new(config: &AiConfig) -> Result<Self, AiError> {
        let api_key = config
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .ok_or(AiError::NotConfigured)?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms.max(1)))
            .build()?;

        Ok(Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: config.model.clone(),
            temperature: config.temperature,
            max_output_tokens: config.max_output_tokens,
        })
    }

    fn generate_content_url(&self) -> String {
        format!("{}/models/{}:generateContent", self.api_base, self.model)
    }

    fn request_body(&self, conversation: &Conversation, prompt: &str) -> Value {
        let mut contents: Vec<Value> = conversation
            .turns()
            .iter()
            .map(|turn| {
                let role = match turn.role {
                    Role::User => "user",
                    Role::Model => "model",
                };
                json!({ "role": role, "parts": [{ "text": turn.text }] })
            })
            .collect();
        contents.push(json!({ "role": "user", "parts": [{ "text": prompt }] }));

        json!({
            "contents": contents,
            "generationConfig": {
                "temperature": self.temperature,
                "maxOutputTokens": self.max_output_tokens,
            },
        })
    }
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    #[serde(default)]
    text: Option<String>,
}

fn reply_text(body: &str) -> Result<String, AiError> {
    let response: GenerateContentResponse = serde_json::from_str(body)
        .map_err(|e| AiError::InvalidResponse(format!("undecodable body: {e}")))?;

    let text: String = response
        .candidates
        .into_iter()
        .next()
        .and_then(|candidate| candidate.content)
        .map(|content| content.parts.into_iter().filter_map(|part| part.text).collect())
        .unwrap_or_default();

    if text.trim().is_empty() {
        return Err(AiError::InvalidResponse("response contained no text".to_string()));
    }
    Ok(text)
}

#[async_trait]
impl AiBackend for GeminiBackend {
    async fn ask(&self, conversation: &mut Conversation, prompt: &str) -> Result<String, AiError> {
        let body = self.request_body(conversation, prompt);
        debug!(model = %self.model, history = conversation.len(), "sending AI request");

        let response = self
            .client
            .post(self.generate_content_url())
            .header(API_KEY_HEADER, &self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            warn!(status = status.as_u16(), "AI backend rejected request");
            return Err(AiError::Status {
                status: status.as_u16(),
                body: text,
            });
        }

        let reply = reply_text(&text)?;
        conversation.record(prompt, reply.clone());
        Ok(reply)
    }
}

/// Gemini when an API key is configured, otherwise a backend that always
/// reports `NotConfigured`
pub fn backend_from_config(config: &AiConfig) -> Box<dyn AiBackend> {
    match GeminiBackend::new(config) {
        Ok(backend) => Box::new(backend),
        Err(AiError::NotConfigured) => {
            warn!("no AI API key configured, AI tools are disabled");
            Box::new(UnconfiguredBackend)
        }
        Err(e) => {
            warn!(error = %e, "could not create AI client, AI tools are disabled");
            Box::new(UnconfiguredBackend)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    fn config(api_base: String) -> AiConfig {
        AiConfig {
            api_base,
            api_key: Some("test-key".to_string()),
            model: "gemini-test".to_string(),
            request_timeout_ms: 5_000,
            ..AiConfig::default()
        }
    }

    fn reply(text: &str) -> Value {
        json!({
            "candidates": [{
                "content": { "role": "model", "parts": [{ "text": text }] },
                "finishReason": "STOP"
            }]
        })
    }

    #[tokio::test]
    async fn test_ask_records_exchange() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/models/gemini-test:generateContent")
                .header("x-goog-api-key", "test-key");
            then.status(200).json_body(reply("Object detected ahead."));
        });

        let backend = GeminiBackend::new(&config(server.base_url())).unwrap();
        let mut conversation = Conversation::new();

        let answer = backend.ask(&mut conversation, "What does IR=1 mean?").await.unwrap();

        mock.assert_calls(1);
        assert_eq!(answer, "Object detected ahead.");
        assert_eq!(conversation.len(), 2);
        assert_eq!(conversation.turns()[0].text, "What does IR=1 mean?");
    }

    #[tokio::test]
    async fn test_http_error_leaves_history_unchanged() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/models/gemini-test:generateContent");
            then.status(429).body("quota exceeded");
        });

        let backend = GeminiBackend::new(&config(server.base_url())).unwrap();
        let mut conversation = Conversation::new();

        let result = backend.ask(&mut conversation, "hello").await;

        match result {
            Err(AiError::Status { status, body }) => {
                assert_eq!(status, 429);
                assert_eq!(body, "quota exceeded");
            }
            other => panic!("unexpected result {other:?}"),
        }
        assert!(conversation.is_empty());
    }

    #[tokio::test]
    async fn test_transport_error_does_not_reveal_key() {
        let mut config = config("http://127.0.0.1:1/v1beta".to_string());
        config.api_key = Some("SECRET-KEY-123".to_string());
        let backend = GeminiBackend::new(&config).unwrap();

        let error = backend.ask(&mut Conversation::new(), "hello").await.unwrap_err();

        assert!(matches!(error, AiError::Http(_)));
        assert!(!error.to_string().contains("SECRET-KEY-123"), "{error}");
        assert!(!format!("{error:?}").contains("SECRET-KEY-123"));
    }

    #[tokio::test]
    async fn test_empty_candidates_are_invalid() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST);
            then.status(200).json_body(json!({ "candidates": [] }));
        });

        let backend = GeminiBackend::new(&config(server.base_url())).unwrap();
        let result = backend.ask(&mut Conversation::new(), "hello").await;

        assert!(matches!(result, Err(AiError::InvalidResponse(_))));
    }

    #[test]
    fn test_history_is_sent_with_prompt() {
        let backend = GeminiBackend::new(&config("http://localhost".to_string())).unwrap();
        let mut conversation = Conversation::new();
        conversation.record("first", "answer");

        let body = backend.request_body(&conversation, "second");

        assert_eq!(body["contents"].as_array().unwrap().len(), 3);
        assert_eq!(body["contents"][1]["role"], "model");
        assert_eq!(body["contents"][2]["parts"][0]["text"], "second");
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 1024);
    }

    #[test]
    fn test_reply_text_joins_parts() {
        let body = json!({
            "candidates": [{ "content": { "parts": [{ "text": "LED:ON " }, { "text": "it is dark" }] } }]
        });

        assert_eq!(reply_text(&body.to_string()).unwrap(), "LED:ON it is dark");
    }

    #[test]
    fn test_missing_key_is_not_configured() {
        let config = AiConfig {
            api_key: Some("  ".to_string()),
            ..AiConfig::default()
        };

        assert!(matches!(GeminiBackend::new(&config), Err(AiError::NotConfigured)));
    }
}
