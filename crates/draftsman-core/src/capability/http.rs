//! OpenAI-compatible chat-completions client implementing
//! [`GenerationCapability`].

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{CapabilityError, GenerationCapability, GenerationRequest};

/// Connection settings for the generation endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpGenerationConfig {
    /// Base URL, e.g. `https://api.openai.com/v1`.
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub temperature_milli: u32,
    pub timeout_secs: u64,
}

impl HttpGenerationConfig {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key: None,
            temperature_milli: 300,
            timeout_secs: 120,
        }
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Read from the environment.
    ///
    /// - `DRAFTSMAN_LLM_BASE_URL` (required)
    /// - `DRAFTSMAN_LLM_MODEL` (required)
    /// - `DRAFTSMAN_LLM_API_KEY` (optional)
    pub fn from_env() -> std::result::Result<Self, String> {
        let base_url = std::env::var("DRAFTSMAN_LLM_BASE_URL")
            .map_err(|_| "DRAFTSMAN_LLM_BASE_URL not set")?;
        let model =
            std::env::var("DRAFTSMAN_LLM_MODEL").map_err(|_| "DRAFTSMAN_LLM_MODEL not set")?;
        let mut config = Self::new(base_url, model);
        if let Ok(key) = std::env::var("DRAFTSMAN_LLM_API_KEY") {
            config = config.with_api_key(key);
        }
        Ok(config)
    }
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f64,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Debug, Deserialize)]
struct ChatResponseRaw {
    choices: Vec<ChoiceRaw>,
}

#[derive(Debug, Deserialize)]
struct ChoiceRaw {
    message: MessageRaw,
}

#[derive(Debug, Deserialize)]
struct MessageRaw {
    #[serde(default)]
    content: Option<String>,
}

/// Generation over HTTP.
pub struct HttpGenerationClient {
    config: HttpGenerationConfig,
    http_client: reqwest::Client,
}

impl HttpGenerationClient {
    pub fn new(config: HttpGenerationConfig) -> std::result::Result<Self, CapabilityError> {
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("draftsman/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| CapabilityError::Unavailable(e.to_string()))?;
        Ok(Self {
            config,
            http_client,
        })
    }

    fn build_body<'a>(&'a self, request: &GenerationRequest) -> ChatRequest<'a> {
        let mut messages = Vec::with_capacity(2);
        if !request.instructions.is_empty() {
            messages.push(ChatMessage {
                role: "system",
                content: request.instructions.join("\n"),
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: request.context.clone(),
        });
        ChatRequest {
            model: &self.config.model,
            temperature: f64::from(self.config.temperature_milli) / 1000.0,
            messages,
        }
    }
}

fn parse_completion(body: &str) -> std::result::Result<String, CapabilityError> {
    let raw: ChatResponseRaw =
        serde_json::from_str(body).map_err(|e| CapabilityError::InvalidResponse(e.to_string()))?;
    raw.choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .filter(|c| !c.trim().is_empty())
        .ok_or_else(|| CapabilityError::InvalidResponse("empty completion".to_string()))
}

#[async_trait]
impl GenerationCapability for HttpGenerationClient {
    async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> std::result::Result<String, CapabilityError> {
        let start = std::time::Instant::now();
        let mut builder = self
            .http_client
            .post(format!("{}/chat/completions", self.config.base_url))
            .json(&self.build_body(request));
        if let Some(key) = &self.config.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.map_err(|e| {
            warn!(error = %e, "generation request failed");
            CapabilityError::Request(e.to_string())
        })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| CapabilityError::Request(e.to_string()))?;
        if !status.is_success() {
            warn!(status = %status, "generation endpoint returned an error");
            return Err(CapabilityError::Unavailable(format!("HTTP {status}: {body}")));
        }

        let content = parse_completion(&body)?;
        debug!(
            model = %self.config.model,
            purpose = ?request.purpose,
            duration_ms = start.elapsed().as_millis() as u64,
            "generation completed"
        );
        Ok(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::GenerationPurpose;

    #[test]
    fn test_body_has_system_and_user_messages() {
        let client = HttpGenerationClient::new(
            HttpGenerationConfig::new("http://localhost:8080/v1/", "local-model"),
        )
        .unwrap();
        let request = GenerationRequest {
            purpose: GenerationPurpose::SectionDraft,
            context: "CONTEXT".to_string(),
            instructions: vec!["Write formally.".to_string(), "Cite sources.".to_string()],
            section_index: Some(0),
        };
        let body = serde_json::to_value(client.build_body(&request)).unwrap();
        assert_eq!(body["model"], "local-model");
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(
            body["messages"][0]["content"],
            "Write formally.\nCite sources."
        );
        assert_eq!(body["messages"][1]["content"], "CONTEXT");
        assert_eq!(client.config.base_url, "http://localhost:8080/v1");
    }

    #[test]
    fn test_parse_completion() {
        let ok = r#"{"choices":[{"message":{"role":"assistant","content":"Draft text"}}]}"#;
        assert_eq!(parse_completion(ok).unwrap(), "Draft text");

        let empty = r#"{"choices":[]}"#;
        assert!(matches!(
            parse_completion(empty),
            Err(CapabilityError::InvalidResponse(_))
        ));
        assert!(parse_completion("not json").is_err());
    }
}
