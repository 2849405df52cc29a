use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use crate::models::analysis::AnalysisIteration;

/// One inference run over a stored video.
///
/// Implementations wrap a specific vendor; the analysis worker and fusion
/// only ever see [`AnalysisIteration`] values.
#[async_trait]
pub trait InferenceClient: Send + Sync {
    async fn run_iteration(&self, video_uri: &str) -> Result<AnalysisIteration, InferenceError>;
}

/// Client for an HTTP video-analysis endpoint returning one iteration per call.
pub struct HttpInferenceClient {
    http: Client,
    endpoint: String,
    api_token: String,
}

#[derive(Serialize)]
struct InferenceRequest<'a> {
    video_uri: &'a str,
}

#[derive(Deserialize)]
struct InferenceEnvelope {
    result: serde_json::Value,
}

impl HttpInferenceClient {
    pub fn new(endpoint: &str, api_token: &str) -> Result<Self, InferenceError> {
        if endpoint.trim().is_empty() {
            return Err(InferenceError::Config("inference endpoint is empty".to_string()));
        }
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(300))
            .build()
            .map_err(InferenceError::Http)?;
        Ok(Self {
            http,
            endpoint: endpoint.to_string(),
            api_token: api_token.to_string(),
        })
    }
}

#[async_trait]
impl InferenceClient for HttpInferenceClient {
    async fn run_iteration(&self, video_uri: &str) -> Result<AnalysisIteration, InferenceError> {
        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_token)
            .json(&InferenceRequest { video_uri })
            .send()
            .await
            .map_err(InferenceError::Http)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(InferenceError::Status { status, body });
        }

        let envelope: InferenceEnvelope = response.json().await.map_err(InferenceError::Http)?;
        Ok(parse_iteration(envelope.result))
    }
}

/// Parse the model payload. Some models return the JSON document as a string,
/// so both shapes are accepted; anything else becomes a conservative run.
pub fn parse_iteration(value: serde_json::Value) -> AnalysisIteration {
    let parsed = match value {
        serde_json::Value::String(text) => serde_json::from_str::<AnalysisIteration>(strip_fences(&text)),
        other => serde_json::from_value::<AnalysisIteration>(other),
    };
    match parsed {
        Ok(iteration) => iteration,
        Err(e) => {
            tracing::warn!(error = %e, "Unparseable inference payload, using conservative defaults");
            AnalysisIteration::unparseable(e)
        }
    }
}

fn strip_fences(text: &str) -> &str {
    let trimmed = text.trim();
    trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
        .map(str::trim)
        .unwrap_or(trimmed)
}

#[derive(Debug, thiserror::Error)]
pub enum InferenceError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Inference endpoint returned HTTP {status}: {body}")]
    Status { status: StatusCode, body: String },

    #[error("Inference configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::analysis::EvidenceTier;
    use crate::services::retry::{classify_message, FailureClass};

    #[test]
    fn test_parse_object_payload() {
        let it = parse_iteration(serde_json::json!({
            "confidence": 0.82,
            "detected": true,
            "evidence_tier": "TIER_1_HIGH",
            "key_behaviors": ["reaching"],
            "concealment_actions": ["item into jacket"],
            "reasoning": "Clear concealment"
        }));
        assert!(it.detected);
        assert_eq!(it.evidence_tier, EvidenceTier::High);
        assert_eq!(it.concealment_actions.len(), 1);
    }

    #[test]
    fn test_parse_fenced_string_payload() {
        let text = "```json\n{\"confidence\": 0.2, \"detected\": false, \"reasoning\": \"Browsing\"}\n```";
        let it = parse_iteration(serde_json::Value::String(text.to_string()));
        assert_eq!(it.confidence, 0.2);
        assert_eq!(it.reasoning, "Browsing");
    }

    #[test]
    fn test_parse_garbage_is_conservative() {
        let it = parse_iteration(serde_json::Value::String("not json".to_string()));
        assert!(!it.detected);
        assert_eq!(it.confidence, 0.1);
        assert_eq!(it.evidence_tier, EvidenceTier::Error);
    }

    #[test]
    fn test_status_errors_classify() {
        let err = InferenceError::Status {
            status: StatusCode::SERVICE_UNAVAILABLE,
            body: String::new(),
        };
        assert_eq!(classify_message(&err.to_string()), FailureClass::Retryable);

        let err = InferenceError::Status {
            status: StatusCode::FORBIDDEN,
            body: String::new(),
        };
        assert_eq!(classify_message(&err.to_string()), FailureClass::Permanent);
    }
}
