//! Inference dispatcher.
//!
//! Serializes text or audio batches into the JSON body the serving handlers
//! expect, issues exactly one bounded prediction call and hands back the
//! parsed response. Failures are returned per call and never touch endpoint
//! lifecycle.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::config::InferenceConfig;
use crate::error::InferenceError;
use crate::platform::{PlatformClient, PredictRequest};

const JSON: &str = "application/json";

/// A batch of inputs for one prediction call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Payload {
    /// Serialized as `{"texts": [...]}`.
    TextBatch { texts: Vec<String> },
    /// Serialized as `{"fileUrls": [...]}`.
    AudioBatch {
        #[serde(rename = "fileUrls")]
        file_uris: Vec<String>,
    },
}

impl Payload {
    pub fn text<I, S>(texts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::TextBatch {
            texts: texts.into_iter().map(Into::into).collect(),
        }
    }

    pub fn audio<I, S>(file_uris: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::AudioBatch {
            file_uris: file_uris.into_iter().map(Into::into).collect(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::TextBatch { texts } => texts.len(),
            Self::AudioBatch { file_uris } => file_uris.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::TextBatch { .. } => "text",
            Self::AudioBatch { .. } => "audio",
        }
    }
}

/// A parsed prediction response.
#[derive(Debug, Clone, PartialEq)]
pub struct InferenceResponse {
    pub endpoint: String,
    /// Response body, passed through as returned by the serving handler.
    pub body: Value,
    pub latency: Duration,
}

/// Sends prediction requests to deployed endpoints.
pub struct InferenceDispatcher {
    platform: Arc<dyn PlatformClient>,
    config: InferenceConfig,
}

impl InferenceDispatcher {
    pub fn new(platform: Arc<dyn PlatformClient>, config: InferenceConfig) -> Self {
        Self { platform, config }
    }

    /// Invoke `endpoint` once with `payload`. Never retried.
    pub async fn invoke(
        &self,
        endpoint: &str,
        payload: &Payload,
    ) -> Result<InferenceResponse, InferenceError> {
        if payload.is_empty() {
            return Err(InferenceError::EmptyBatch {
                endpoint: endpoint.to_string(),
            });
        }
        let body = serde_json::to_vec(payload).map_err(|e| InferenceError::Serialization {
            endpoint: endpoint.to_string(),
            message: e.to_string(),
        })?;
        let request = PredictRequest {
            endpoint_name: endpoint.to_string(),
            content_type: JSON.to_string(),
            accept: JSON.to_string(),
            body,
        };

        let timeout = Duration::from_secs(self.config.timeout_secs);
        let started = Instant::now();
        let result = tokio::time::timeout(timeout, self.platform.predict(&request)).await;
        let latency = started.elapsed();

        let raw = match result {
            Ok(Ok(raw)) => raw,
            Ok(Err(e)) => {
                let err = InferenceError::from_platform(endpoint, e);
                warn!(
                    endpoint = %endpoint,
                    latency_ms = latency.as_millis() as u64,
                    error = %err,
                    "Inference failed"
                );
                return Err(err);
            }
            Err(_) => {
                warn!(endpoint = %endpoint, timeout_secs = timeout.as_secs(), "Inference timed out");
                return Err(InferenceError::Timeout {
                    endpoint: endpoint.to_string(),
                    timeout_secs: timeout.as_secs(),
                });
            }
        };

        let body: Value =
            serde_json::from_slice(&raw).map_err(|e| InferenceError::Serialization {
                endpoint: endpoint.to_string(),
                message: format!("response is not valid JSON: {e}"),
            })?;

        info!(
            endpoint = %endpoint,
            kind = payload.kind(),
            items = payload.len(),
            latency_ms = latency.as_millis() as u64,
            "Inference completed"
        );
        Ok(InferenceResponse {
            endpoint: endpoint.to_string(),
            body,
            latency,
        })
    }

    /// Embed texts on the configured text endpoint.
    pub async fn invoke_text(
        &self,
        texts: Vec<String>,
    ) -> Result<InferenceResponse, InferenceError> {
        self.invoke(&self.config.text_endpoint, &Payload::TextBatch { texts })
            .await
    }

    /// Embed audio files on the configured audio endpoint.
    pub async fn invoke_audio(
        &self,
        file_uris: Vec<String>,
    ) -> Result<InferenceResponse, InferenceError> {
        self.invoke(&self.config.audio_endpoint, &Payload::AudioBatch { file_uris })
            .await
    }

    /// Run independent requests in order, one result each.
    pub async fn invoke_batch(
        &self,
        requests: &[(String, Payload)],
    ) -> Vec<Result<InferenceResponse, InferenceError>> {
        let mut results = Vec::with_capacity(requests.len());
        for (endpoint, payload) in requests {
            results.push(self.invoke(endpoint, payload).await);
        }
        results
    }
}
