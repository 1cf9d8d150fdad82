use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::ollama::OllamaGateway;
use super::openai::OpenAiGateway;
use super::request::ReasoningRequest;
use super::GatewayError;
use crate::config::ProviderConfig;

/// Boundary to the external reasoning capability.
///
/// One attempt per call. Implementations never retry; they classify the
/// failure so the caller can decide.
pub trait ReasoningGateway: Send + Sync {
    fn invoke(&self, request: &ReasoningRequest, timeout: Duration)
        -> Result<String, GatewayError>;

    /// Model identifier, for logging.
    fn model(&self) -> &str;
}

/// Construct the configured backend.
///
/// Builds a blocking HTTP client, so call it outside an async context.
pub fn connect(provider: &ProviderConfig) -> Result<Arc<dyn ReasoningGateway>, GatewayError> {
    let gateway: Arc<dyn ReasoningGateway> = match provider {
        ProviderConfig::Ollama { base_url, model } => Arc::new(OllamaGateway::new(base_url, model)?),
        ProviderConfig::OpenAi {
            base_url,
            api_key,
            model,
            temperature,
        } => Arc::new(OpenAiGateway::new(base_url, api_key, model, *temperature)?),
    };
    tracing::info!(provider = provider.name(), model = gateway.model(), "Reasoning gateway ready");
    Ok(gateway)
}

/// Map an HTTP error status to a gateway failure.
pub fn classify_status(status: u16, body: &str) -> GatewayError {
    let detail = format!("status {status}: {}", truncate(body, 300));
    match status {
        401 | 403 => GatewayError::Auth(detail),
        408 | 409 | 425 | 429 => GatewayError::Transient(detail),
        500..=599 => GatewayError::Transient(detail),
        _ => GatewayError::MalformedRequest(detail),
    }
}

/// Map a transport-level `reqwest` error to a gateway failure.
pub fn classify_transport(error: &reqwest::Error, timeout: Duration) -> GatewayError {
    if error.is_timeout() {
        GatewayError::Timeout(timeout)
    } else if error.is_connect() || error.is_request() {
        GatewayError::Transient(error.to_string())
    } else if error.is_builder() {
        GatewayError::MalformedRequest(error.to_string())
    } else {
        GatewayError::Transient(error.to_string())
    }
}

fn truncate(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

/// In-process stand-in that replays canned outcomes in order, then repeats
/// the last one. Used wherever the real capability must not be called.
pub struct CannedGateway {
    outcomes: Mutex<VecDeque<Result<String, GatewayError>>>,
    last: Mutex<Option<Result<String, GatewayError>>>,
    calls: Mutex<Vec<String>>,
}

impl CannedGateway {
    pub fn new(outcomes: Vec<Result<String, GatewayError>>) -> Self {
        Self {
            outcomes: Mutex::new(outcomes.into()),
            last: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Always answers with `response`.
    pub fn answering(response: &str) -> Self {
        Self::new(vec![Ok(response.to_string())])
    }

    /// Prompts received so far.
    pub fn prompts(&self) -> Vec<String> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|c| c.len()).unwrap_or_default()
    }
}

impl ReasoningGateway for CannedGateway {
    fn invoke(
        &self,
        request: &ReasoningRequest,
        _timeout: Duration,
    ) -> Result<String, GatewayError> {
        let poisoned = || GatewayError::Transient("canned gateway lock poisoned".into());

        self.calls
            .lock()
            .map_err(|_| poisoned())?
            .push(request.prompt.clone());

        let mut last = self.last.lock().map_err(|_| poisoned())?;
        let next = self.outcomes.lock().map_err(|_| poisoned())?.pop_front();
        match next {
            Some(outcome) => {
                *last = Some(outcome.clone());
                outcome
            }
            None => last
                .clone()
                .unwrap_or_else(|| Err(GatewayError::Transient("no canned outcome".into()))),
        }
    }

    fn model(&self) -> &str {
        "canned"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ActiveOrders, ClinicalContext, ClinicalNarrative};
    use crate::pipeline::reasoning::request::ReasoningRequestBuilder;

    fn request() -> ReasoningRequest {
        ReasoningRequestBuilder::default()
            .build(
                "P-1",
                &ActiveOrders::default(),
                &ClinicalContext::default(),
                &ClinicalNarrative::default(),
                vec![],
            )
            .unwrap()
    }

    #[test]
    fn connect_builds_configured_backend() {
        let gateway = connect(&ProviderConfig::Ollama {
            base_url: "http://localhost:11434".into(),
            model: "medgemma".into(),
        })
        .unwrap();
        assert_eq!(gateway.model(), "medgemma");

        let gateway = connect(&ProviderConfig::OpenAi {
            base_url: "https://example.test/v1".into(),
            api_key: "sk-test".into(),
            model: "gpt-4.1".into(),
            temperature: 0.1,
        })
        .unwrap();
        assert_eq!(gateway.model(), "gpt-4.1");
    }

    #[test]
    fn status_classification() {
        assert!(matches!(classify_status(401, ""), GatewayError::Auth(_)));
        assert!(matches!(classify_status(403, ""), GatewayError::Auth(_)));
        assert!(matches!(classify_status(429, ""), GatewayError::Transient(_)));
        assert!(matches!(classify_status(503, ""), GatewayError::Transient(_)));
        assert!(matches!(classify_status(400, ""), GatewayError::MalformedRequest(_)));
        assert!(matches!(classify_status(404, ""), GatewayError::MalformedRequest(_)));
    }

    #[test]
    fn only_transient_is_retryable() {
        assert!(GatewayError::Transient("x".into()).is_retryable());
        assert!(!GatewayError::Auth("x".into()).is_retryable());
        assert!(!GatewayError::MalformedRequest("x".into()).is_retryable());
        assert!(!GatewayError::Timeout(Duration::from_secs(1)).is_retryable());
    }

    #[test]
    fn status_detail_is_truncated_on_char_boundary() {
        let body = "é".repeat(400);
        match classify_status(500, &body) {
            GatewayError::Transient(detail) => assert!(detail.len() < 320),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn canned_gateway_replays_then_repeats_last() {
        let gateway = CannedGateway::new(vec![
            Err(GatewayError::Transient("busy".into())),
            Ok("{}".into()),
        ]);
        let request = request();
        let timeout = Duration::from_secs(1);

        assert!(gateway.invoke(&request, timeout).is_err());
        assert_eq!(gateway.invoke(&request, timeout).unwrap(), "{}");
        assert_eq!(gateway.invoke(&request, timeout).unwrap(), "{}");
        assert_eq!(gateway.call_count(), 3);
        assert!(gateway.prompts()[0].contains("P-1"));
    }
}
