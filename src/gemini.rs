use async_trait::async_trait;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::{invalid, parse_or};
use crate::embeddings::{Embedder, Embedding, EmbeddingTask};
use crate::error::{ConfigError, LlmError};
use crate::llm::{GenerationRequest, LanguageModel};
use crate::retry::{retry_with_backoff, RetryConfig};

/// Gemini accepts at most this many texts per batchEmbedContents call
const MAX_BATCH_EMBED: usize = 100;

/// Configuration for Gemini API
#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_key: String,
    pub base_url: String,
    pub chat_model: String,
    pub embedding_model: String,
    pub max_output_tokens: u32,
    pub temperature: f32,
    pub timeout_secs: u64,
}

impl GeminiConfig {
    pub fn from_lookup<F>(lookup: &F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let config = GeminiConfig {
            api_key: lookup("GEMINI_API_KEY").unwrap_or_default(),
            base_url: lookup("GEMINI_BASE_URL")
                .unwrap_or_else(|| "https://generativelanguage.googleapis.com/v1beta".to_string())
                .trim_end_matches('/')
                .to_string(),
            chat_model: lookup("GEMINI_MODEL").unwrap_or_else(|| "gemini-2.0-flash".to_string()),
            embedding_model: lookup("EMBEDDING_MODEL")
                .unwrap_or_else(|| "text-embedding-004".to_string()),
            max_output_tokens: parse_or("MAX_TOKENS", lookup, 1000)?,
            temperature: parse_or("TEMPERATURE", lookup, 0.1)?,
            timeout_secs: parse_or("GEMINI_TIMEOUT_SECS", lookup, 60)?,
        };

        if !(0.0..=2.0).contains(&config.temperature) {
            return Err(invalid(
                "TEMPERATURE",
                &config.temperature.to_string(),
                "must be between 0 and 2",
            ));
        }
        if config.max_output_tokens == 0 {
            return Err(invalid("MAX_TOKENS", "0", "must be greater than 0"));
        }

        Ok(config)
    }
}

/// Client for interacting with Gemini API
#[derive(Clone)]
pub struct GeminiClient {
    config: GeminiConfig,
    client: reqwest::Client,
    retry: RetryConfig,
}

impl GeminiClient {
    /// Create a new Gemini client
    pub fn new(config: GeminiConfig) -> Result<Self, LlmError> {
        if config.api_key.trim().is_empty() {
            return Err(LlmError::Config("GEMINI_API_KEY is not set".to_string()));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(GeminiClient {
            config,
            client,
            retry: RetryConfig::default(),
        })
    }

    /// Get the client configuration
    pub fn config(&self) -> &GeminiConfig {
        &self.config
    }

    fn endpoint(&self, model: &str, method: &str) -> String {
        format!("{}/{}:{}", self.config.base_url, model_path(model), method)
    }

    async fn post_json<Req, Resp>(&self, url: &str, body: &Req) -> Result<Resp, LlmError>
    where
        Req: Serialize + ?Sized,
        Resp: for<'de> Deserialize<'de>,
    {
        let response = self
            .client
            .post(url)
            .header("x-goog-api-key", &self.config.api_key)
            .json(body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(LlmError::Api { status, message });
        }

        Ok(response.json().await?)
    }

    async fn embed_chunk(
        &self,
        texts: &[String],
        task: EmbeddingTask,
    ) -> Result<Vec<Embedding>, LlmError> {
        let model = model_path(&self.config.embedding_model);
        let request = BatchEmbedRequest {
            requests: texts
                .iter()
                .map(|text| EmbedContentRequest {
                    model: model.clone(),
                    content: Content::text(text, None),
                    task_type: task.as_api_str(),
                })
                .collect(),
        };

        let url = self.endpoint(&self.config.embedding_model, "batchEmbedContents");
        let response: BatchEmbedResponse =
            retry_with_backoff(&self.retry, "batchEmbedContents", || {
                self.post_json(&url, &request)
            })
            .await?;

        if response.embeddings.len() != texts.len() {
            return Err(LlmError::InvalidResponse(format!(
                "requested {} embeddings, received {}",
                texts.len(),
                response.embeddings.len()
            )));
        }

        Ok(response
            .embeddings
            .into_iter()
            .map(|e| Embedding::new(e.values))
            .collect())
    }

    /// Check that the API key and generation model work
    pub async fn test_connection(&self) -> bool {
        let request = GenerationRequest::new(
            "Hello, this is a test message. Please respond with 'Connection successful'.",
        );
        match self.generate(request).await {
            Ok(text) => text.to_lowercase().contains("successful"),
            Err(e) => {
                info!("Gemini connection test failed: {}", e);
                false
            }
        }
    }
}

#[async_trait]
impl Embedder for GeminiClient {
    async fn embed(&self, text: &str, task: EmbeddingTask) -> Result<Embedding, LlmError> {
        let request = EmbedContentRequest {
            model: model_path(&self.config.embedding_model),
            content: Content::text(text, None),
            task_type: task.as_api_str(),
        };

        let url = self.endpoint(&self.config.embedding_model, "embedContent");
        let response: EmbeddingResponse =
            retry_with_backoff(&self.retry, "embedContent", || self.post_json(&url, &request))
                .await?;

        Ok(Embedding::new(response.embedding.values))
    }

    async fn embed_batch(
        &self,
        texts: &[String],
        task: EmbeddingTask,
    ) -> Result<Vec<Embedding>, LlmError> {
        let mut embeddings = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(MAX_BATCH_EMBED) {
            embeddings.extend(self.embed_chunk(chunk, task).await?);
        }
        debug!("Generated {} embeddings", embeddings.len());
        Ok(embeddings)
    }

    fn model_name(&self) -> &str {
        &self.config.embedding_model
    }
}

#[async_trait]
impl LanguageModel for GeminiClient {
    async fn generate(&self, request: GenerationRequest) -> Result<String, LlmError> {
        let body = GenerateRequest {
            contents: vec![Content::text(&request.prompt, Some("user"))],
            system_instruction: request.system.as_deref().map(|s| Content::text(s, None)),
            generation_config: GenerationConfig {
                temperature: self.config.temperature,
                max_output_tokens: self.config.max_output_tokens,
                response_mime_type: request.json_output.then_some("application/json"),
            },
        };

        let url = self.endpoint(&self.config.chat_model, "generateContent");
        let response: GenerateResponse =
            retry_with_backoff(&self.retry, "generateContent", || self.post_json(&url, &body))
                .await?;

        response_text(response)
    }

    fn model_name(&self) -> &str {
        &self.config.chat_model
    }
}

/// Model names may be given with or without the `models/` prefix.
fn model_path(model: &str) -> String {
    if model.starts_with("models/") {
        model.to_string()
    } else {
        format!("models/{}", model)
    }
}

/// Concatenate the text parts of the first candidate
fn response_text(response: GenerateResponse) -> Result<String, LlmError> {
    if let Some(reason) = response
        .prompt_feedback
        .and_then(|feedback| feedback.block_reason)
    {
        return Err(LlmError::InvalidResponse(format!(
            "prompt blocked: {}",
            reason
        )));
    }

    let text: String = response
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|content| {
            content
                .parts
                .into_iter()
                .filter_map(|p| p.text)
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default();

    if text.trim().is_empty() {
        return Err(LlmError::EmptyResponse);
    }
    Ok(text)
}

// Request/response structures for the Gemini REST API

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EmbedContentRequest<'a> {
    model: String,
    content: Content<'a>,
    task_type: &'static str,
}

#[derive(Serialize)]
struct BatchEmbedRequest<'a> {
    requests: Vec<EmbedContentRequest<'a>>,
}

#[derive(Deserialize, Debug)]
struct EmbeddingResponse {
    embedding: EmbeddingData,
}

#[derive(Deserialize, Debug)]
struct BatchEmbedResponse {
    #[serde(default)]
    embeddings: Vec<EmbeddingData>,
}

#[derive(Deserialize, Debug)]
struct EmbeddingData {
    values: Vec<f32>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    parts: Vec<Part<'a>>,
}

impl<'a> Content<'a> {
    fn text(text: &'a str, role: Option<&'static str>) -> Self {
        Content {
            role,
            parts: vec![Part { text }],
        }
    }
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<&'static str>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

#[derive(Deserialize, Debug)]
struct Candidate {
    #[serde(default)]
    content: Option<ResponseContent>,
}

#[derive(Deserialize, Debug)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize, Debug)]
struct ResponsePart {
    #[serde(default)]
    text: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config() -> GeminiConfig {
        GeminiConfig::from_lookup(&|key: &str| match key {
            "GEMINI_API_KEY" => Some("test-key".to_string()),
            "GEMINI_BASE_URL" => Some("http://localhost:9999/v1beta/".to_string()),
            _ => None,
        })
        .unwrap()
    }

    #[test]
    fn test_requires_api_key() {
        let mut config = config();
        config.api_key = String::new();
        assert!(matches!(GeminiClient::new(config), Err(LlmError::Config(_))));
    }

    #[test]
    fn test_endpoint_urls() {
        let client = GeminiClient::new(config()).unwrap();
        assert_eq!(
            client.endpoint("gemini-2.0-flash", "generateContent"),
            "http://localhost:9999/v1beta/models/gemini-2.0-flash:generateContent"
        );
        assert_eq!(
            client.endpoint("models/text-embedding-004", "embedContent"),
            "http://localhost:9999/v1beta/models/text-embedding-004:embedContent"
        );
    }

    #[test]
    fn test_generate_request_shape() {
        let body = GenerateRequest {
            contents: vec![Content::text("hi", Some("user"))],
            system_instruction: Some(Content::text("be brief", None)),
            generation_config: GenerationConfig {
                temperature: 0.1,
                max_output_tokens: 1000,
                response_mime_type: Some("application/json"),
            },
        };
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["contents"][0]["role"], "user");
        assert_eq!(value["systemInstruction"]["parts"][0]["text"], "be brief");
        assert!(value["systemInstruction"].get("role").is_none());
        assert_eq!(value["generationConfig"]["maxOutputTokens"], 1000);
        assert_eq!(
            value["generationConfig"]["responseMimeType"],
            "application/json"
        );
    }

    #[test]
    fn test_response_text_joins_parts() {
        let response: GenerateResponse = serde_json::from_value(json!({
            "candidates": [{
                "content": {"parts": [{"text": "Hello, "}, {"text": "world"}], "role": "model"},
                "finishReason": "STOP"
            }]
        }))
        .unwrap();
        assert_eq!(response_text(response).unwrap(), "Hello, world");
    }

    #[test]
    fn test_blocked_and_empty_responses() {
        let blocked: GenerateResponse = serde_json::from_value(json!({
            "promptFeedback": {"blockReason": "SAFETY"}
        }))
        .unwrap();
        assert!(matches!(
            response_text(blocked),
            Err(LlmError::InvalidResponse(_))
        ));

        let empty: GenerateResponse = serde_json::from_value(json!({
            "candidates": [{"finishReason": "SAFETY"}]
        }))
        .unwrap();
        assert!(matches!(response_text(empty), Err(LlmError::EmptyResponse)));
    }
}
