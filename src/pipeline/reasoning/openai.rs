use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::gateway::{classify_status, classify_transport, ReasoningGateway};
use super::request::ReasoningRequest;
use super::GatewayError;

pub const DEFAULT_OPENAI_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4.1";
pub const DEFAULT_OPENAI_TEMPERATURE: f32 = 0.1;

/// Reasoning backend on an OpenAI-compatible chat completions endpoint,
/// with JSON-object response format.
pub struct OpenAiGateway {
    base_url: String,
    api_key: String,
    model: String,
    temperature: f32,
    client: reqwest::blocking::Client,
}

impl OpenAiGateway {
    pub fn new(
        base_url: &str,
        api_key: &str,
        model: &str,
        temperature: f32,
    ) -> Result<Self, GatewayError> {
        if api_key.trim().is_empty() {
            return Err(GatewayError::Auth("no API key configured".into()));
        }
        let client = reqwest::blocking::Client::builder()
            .build()
            .map_err(|e| GatewayError::MalformedRequest(format!("HTTP client: {e}")))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.trim().to_string(),
            model: model.to_string(),
            temperature,
            client,
        })
    }

    fn body<'a>(&'a self, request: &'a ReasoningRequest) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: &request.system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: &request.prompt,
                },
            ],
            temperature: self.temperature,
            response_format: ResponseFormat {
                kind: "json_object",
            },
        }
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    temperature: f32,
    response_format: ResponseFormat,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

impl ReasoningGateway for OpenAiGateway {
    fn invoke(
        &self,
        request: &ReasoningRequest,
        timeout: Duration,
    ) -> Result<String, GatewayError> {
        let url = format!("{}/chat/completions", self.base_url);

        tracing::debug!(
            patient_id = %request.patient_id,
            model = %self.model,
            "Calling chat completions"
        );

        let response = self
            .client
            .post(&url)
            .timeout(timeout)
            .bearer_auth(&self.api_key)
            .json(&self.body(request))
            .send()
            .map_err(|e| classify_transport(&e, timeout))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(classify_status(status.as_u16(), &body));
        }

        let parsed: ChatResponse = response
            .json()
            .map_err(|e| GatewayError::Transient(format!("Unreadable completion response: {e}")))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| GatewayError::Transient("Completion contained no message content".into()))
    }

    fn model(&self) -> &str {
        &self.model
    }
}
