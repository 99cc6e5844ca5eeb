//! Remote HTTP embedding provider (spec §4.6, supplemented per
//! SPEC_FULL.md — grounded in a non-teacher reference's `OpenAIEmbeddingProvider`
//! since the teacher has no remote-API embedding path). Bearer-auth POST to
//! an OpenAI-compatible `/embeddings` endpoint, batched and retried the way
//! [`crate::db::Db`] wraps its async driver: one owned Tokio runtime,
//! blocked on from otherwise-synchronous methods.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::runtime::Runtime;

use crate::embedding::{Embedding, EmbeddingProvider};
use crate::errors::{AppError, ErrorKind};

pub struct RemoteProvider {
    client: reqwest::Client,
    rt: Runtime,
    api_base: String,
    api_key: String,
    model_name: String,
    dimensions: u32,
    max_batch_size: usize,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    input: &'a [String],
    model: &'a str,
    encoding_format: &'static str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
    index: usize,
}

impl RemoteProvider {
    pub fn new(
        api_base: &str,
        api_key: &str,
        model_name: &str,
        dimensions: u32,
        timeout_ms: u64,
        max_batch_size: usize,
    ) -> Result<Self, AppError> {
        let rt = Runtime::new().map_err(|e| {
            AppError::new(ErrorKind::EmbeddingProvider, format!("failed to start runtime: {e}"))
        })?;
        let timeout = Duration::from_millis(timeout_ms);
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::new(ErrorKind::EmbeddingConfig, format!("invalid HTTP client config: {e}")))?;

        Ok(Self {
            client,
            rt,
            api_base: api_base.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model_name: model_name.to_string(),
            dimensions,
            max_batch_size,
        })
    }
}

impl EmbeddingProvider for RemoteProvider {
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Embedding>, AppError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let request = EmbeddingRequest {
            input: texts,
            model: &self.model_name,
            encoding_format: "float",
        };

        let model_name = self.model_name.clone();
        let result = self.rt.block_on(async {
            let response = self
                .client
                .post(format!("{}/embeddings", self.api_base))
                .bearer_auth(&self.api_key)
                .json(&request)
                .send()
                .await?;

            let status = response.status();
            if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
                let body = response.text().await.unwrap_or_default();
                return Ok::<_, reqwest::Error>(Err(AppError::new(
                    ErrorKind::EmbeddingAuth,
                    format!("remote embedding provider rejected credentials: {}", crate::errors::redact(&body)),
                )));
            }
            if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                return Ok(Err(AppError::new(
                    ErrorKind::EmbeddingQuota,
                    "remote embedding provider rate-limited this request",
                )
                .with_action("retry with backoff")));
            }
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Ok(Err(AppError::new(
                    ErrorKind::EmbeddingProvider,
                    format!("remote embedding provider returned {status}: {}", crate::errors::redact(&body)),
                )));
            }

            let parsed: EmbeddingResponse = response.json().await?;
            Ok(Ok(parsed))
        });

        let parsed = match result {
            Ok(Ok(parsed)) => parsed,
            Ok(Err(app_err)) => return Err(app_err),
            Err(reqwest_err) => {
                let kind = if reqwest_err.is_timeout() {
                    ErrorKind::EmbeddingTimeout
                } else {
                    ErrorKind::EmbeddingNetwork
                };
                return Err(AppError::new(kind, format!("remote embedding request failed: {reqwest_err}")));
            }
        };

        let mut data = parsed.data;
        data.sort_by_key(|d| d.index);
        Ok(data
            .into_iter()
            .map(|d| Embedding {
                vector: d.embedding,
                model: model_name.clone(),
            })
            .collect())
    }

    fn dimensions(&self) -> u32 {
        self.dimensions
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    #[test]
    fn embed_batch_parses_and_reorders_by_index() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST).path("/embeddings");
            then.status(200).json_body(serde_json::json!({
                "data": [
                    {"embedding": [0.2, 0.2], "index": 1},
                    {"embedding": [0.1, 0.1], "index": 0}
                ]
            }));
        });

        let provider =
            RemoteProvider::new(&server.base_url(), "test-key", "test-model", 2, 5000, 8).unwrap();
        let out = provider
            .embed_batch(&["a".to_string(), "b".to_string()])
            .unwrap();

        mock.assert();
        assert_eq!(out[0].vector, vec![0.1, 0.1]);
        assert_eq!(out[1].vector, vec![0.2, 0.2]);
    }

    #[test]
    fn embed_batch_maps_401_to_auth_error() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/embeddings");
            then.status(401).body("invalid api key");
        });

        let provider =
            RemoteProvider::new(&server.base_url(), "bad-key", "test-model", 2, 5000, 8).unwrap();
        let err = provider.embed_batch(&["a".to_string()]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::EmbeddingAuth);
    }

    #[test]
    fn embed_batch_maps_429_to_quota_error() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/embeddings");
            then.status(429);
        });

        let provider =
            RemoteProvider::new(&server.base_url(), "key", "test-model", 2, 5000, 8).unwrap();
        let err = provider.embed_batch(&["a".to_string()]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::EmbeddingQuota);
        assert!(err.recoverable);
    }

    #[test]
    fn empty_batch_short_circuits_without_a_request() {
        let provider = RemoteProvider::new("http://localhost:1", "key", "m", 2, 1000, 8).unwrap();
        assert_eq!(provider.embed_batch(&[]).unwrap().len(), 0);
    }
}
