// Gemini REST Client
//
// Blocking client for the hosted completion and embedding endpoints.

use std::sync::Arc;
use std::time::Duration;

use reqwest::blocking::{Client, Response};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use super::{EmbeddingModel, LanguageModel, ModelFactory, Models, RagError};
use crate::config::ModelConfig;

const API_KEY_HEADER: &str = "x-goog-api-key";

/// Strip the URL from transport errors before they are reported.
fn redact(error: reqwest::Error) -> RagError {
    RagError::Http(error.without_url())
}

#[derive(Debug, Clone)]
pub struct GeminiClient {
    http: Client,
    base_url: String,
    model: String,
    api_key: String,
}

impl GeminiClient {
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, RagError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(RagError::MissingApiKey);
        }

        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key,
        })
    }

    fn endpoint(&self, method: &str) -> String {
        format!("{}/{}:{}", self.base_url, self.model, method)
    }

    /// The key travels in a header so it never appears in request URLs or
    /// the errors that quote them.
    fn post<B: Serialize>(&self, method: &str, body: &B) -> Result<Response, RagError> {
        let response = self
            .http
            .post(self.endpoint(method))
            .header(API_KEY_HEADER, &self.api_key)
            .json(body)
            .send()
            .map_err(redact)?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().unwrap_or_default();
            error!(model = %self.model, method, status = status.as_u16(), "model API error");
            return Err(RagError::Api {
                status: status.as_u16(),
                message,
            });
        }
        Ok(response)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    #[serde(default)]
    text: String,
}

impl Content {
    fn text(text: &str) -> Self {
        Self {
            parts: vec![Part {
                text: text.to_string(),
            }],
        }
    }
}

#[derive(Debug, Serialize)]
struct GenerateRequest {
    contents: Vec<Content>,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    content: Content,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embedding: Option<Embedding>,
}

#[derive(Debug, Deserialize)]
struct Embedding {
    values: Vec<f32>,
}

impl GenerateResponse {
    fn into_text(self) -> Option<String> {
        let content = self.candidates.into_iter().next()?.content?;
        let text: String = content.parts.into_iter().map(|p| p.text).collect();
        (!text.trim().is_empty()).then_some(text)
    }
}

impl LanguageModel for GeminiClient {
    fn complete(&self, prompt: &str) -> Result<String, RagError> {
        let request = GenerateRequest {
            contents: vec![Content::text(prompt)],
        };
        let response: GenerateResponse = self
            .post("generateContent", &request)?
            .json()
            .map_err(redact)?;
        let text = response.into_text().ok_or(RagError::EmptyResponse)?;

        debug!(model = %self.model, chars = text.len(), "completion received");
        Ok(text)
    }
}

impl EmbeddingModel for GeminiClient {
    fn embed(&self, text: &str) -> Result<Vec<f32>, RagError> {
        let request = EmbedRequest {
            model: &self.model,
            content: Content::text(text),
        };
        let response: EmbedResponse = self
            .post("embedContent", &request)?
            .json()
            .map_err(redact)?;

        match response.embedding {
            Some(embedding) if !embedding.values.is_empty() => Ok(embedding.values),
            _ => Err(RagError::EmptyResponse),
        }
    }
}

/// Builds completion and embedding clients from configuration.
#[derive(Debug, Clone)]
pub struct GeminiFactory {
    config: ModelConfig,
}

impl GeminiFactory {
    pub fn new(config: ModelConfig) -> Self {
        Self { config }
    }
}

impl ModelFactory for GeminiFactory {
    fn create(&self, api_key: &str) -> Result<Models, RagError> {
        let timeout = Duration::from_secs(self.config.timeout_secs);
        let llm = GeminiClient::new(
            &self.config.base_url,
            &self.config.llm_model,
            api_key,
            timeout,
        )?;
        let embedder = GeminiClient::new(
            &self.config.base_url,
            &self.config.embed_model,
            api_key,
            timeout,
        )?;

        Ok(Models {
            llm: Arc::new(llm),
            embedder: Arc::new(embedder),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(model: &str) -> GeminiClient {
        GeminiClient::new(
            "https://example.invalid/v1beta/",
            model,
            "key",
            Duration::from_secs(1),
        )
        .unwrap()
    }

    #[test]
    fn endpoint_joins_model_and_method() {
        assert_eq!(
            client("models/gemini-1.5-pro").endpoint("generateContent"),
            "https://example.invalid/v1beta/models/gemini-1.5-pro:generateContent"
        );
    }

    #[test]
    fn empty_key_is_rejected() {
        let err = GeminiClient::new("https://x", "m", "  ", Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, RagError::MissingApiKey));

        let factory = GeminiFactory::new(ModelConfig::default());
        assert!(matches!(factory.create(""), Err(RagError::MissingApiKey)));
    }

    #[test]
    fn transport_errors_do_not_reveal_the_key() {
        // Nothing listens on the discard port.
        let client = GeminiClient::new(
            "http://127.0.0.1:9",
            "models/m",
            "SECRETKEY123",
            Duration::from_secs(2),
        )
        .unwrap();

        let err = client.complete("hi").unwrap_err();
        assert!(matches!(err, RagError::Http(_)));
        assert!(!err.to_string().contains("SECRETKEY123"), "{err}");
        assert!(!format!("{err:?}").contains("SECRETKEY123"), "{err:?}");

        let err = client.embed("hi").unwrap_err();
        assert!(!err.to_string().contains("SECRETKEY123"), "{err}");
    }

    #[test]
    fn generate_response_text_is_concatenated() {
        let response: GenerateResponse = serde_json::from_str(
            r#"{"candidates":[{"content":{"parts":[{"text":"Hello, "},{"text":"world"}],"role":"model"}}]}"#,
        )
        .unwrap();
        assert_eq!(response.into_text().as_deref(), Some("Hello, world"));

        let blocked: GenerateResponse = serde_json::from_str(r#"{"candidates":[]}"#).unwrap();
        assert!(blocked.into_text().is_none());
    }

    #[test]
    fn embed_request_shape() {
        let request = EmbedRequest {
            model: "models/embedding-001",
            content: Content::text("hi"),
        };
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            serde_json::json!({"model": "models/embedding-001", "content": {"parts": [{"text": "hi"}]}})
        );
    }
}
