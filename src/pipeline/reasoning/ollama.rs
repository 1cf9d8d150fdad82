use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::gateway::{classify_status, classify_transport, ReasoningGateway};
use super::request::ReasoningRequest;
use super::GatewayError;

pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";
pub const DEFAULT_OLLAMA_MODEL: &str = "medgemma";

/// Sampling options sent with every generate call.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GenerationOptions {
    /// Low for reproducible findings.
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_ctx: Option<u32>,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            temperature: 0.1,
            top_p: 0.9,
            top_k: 40,
            num_ctx: None,
        }
    }
}

/// Reasoning backend on a local Ollama instance (`/api/generate`, JSON mode).
pub struct OllamaGateway {
    base_url: String,
    model: String,
    options: GenerationOptions,
    client: reqwest::blocking::Client,
}

impl OllamaGateway {
    pub fn new(base_url: &str, model: &str) -> Result<Self, GatewayError> {
        let client = reqwest::blocking::Client::builder()
            .build()
            .map_err(|e| GatewayError::MalformedRequest(format!("HTTP client: {e}")))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            options: GenerationOptions::default(),
            client,
        })
    }

    pub fn default_local() -> Result<Self, GatewayError> {
        Self::new(DEFAULT_OLLAMA_URL, DEFAULT_OLLAMA_MODEL)
    }

    pub fn with_options(mut self, options: GenerationOptions) -> Self {
        self.options = options;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

/// Request body for Ollama /api/generate
#[derive(Serialize)]
struct OllamaGenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    system: &'a str,
    stream: bool,
    format: &'a str,
    options: GenerationOptions,
}

/// Response body from Ollama /api/generate
#[derive(Deserialize)]
struct OllamaGenerateResponse {
    response: String,
}

impl ReasoningGateway for OllamaGateway {
    fn invoke(
        &self,
        request: &ReasoningRequest,
        timeout: Duration,
    ) -> Result<String, GatewayError> {
        let url = format!("{}/api/generate", self.base_url);
        let body = OllamaGenerateRequest {
            model: &self.model,
            prompt: &request.prompt,
            system: &request.system_prompt,
            stream: false,
            format: "json",
            options: self.options,
        };

        tracing::debug!(
            patient_id = %request.patient_id,
            model = %self.model,
            url = %url,
            "Calling Ollama"
        );

        let response = self
            .client
            .post(&url)
            .timeout(timeout)
            .json(&body)
            .send()
            .map_err(|e| classify_transport(&e, timeout))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(classify_status(status.as_u16(), &body));
        }

        let parsed: OllamaGenerateResponse = response
            .json()
            .map_err(|e| GatewayError::Transient(format!("Unreadable Ollama response: {e}")))?;

        Ok(parsed.response)
    }

    fn model(&self) -> &str {
        &self.model
    }
}
