use crate::messages::{MessagesRequest, MessagesResponse};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use responder_core::{LlmConfig, LlmError};
use std::time::Duration;
use tracing::{debug, warn};

const PROVIDER: &str = "anthropic";
const API_VERSION: &str = "2023-06-01";

/// One Messages API call.
#[async_trait]
pub trait MessagesApi: Send + Sync {
    async fn create(&self, request: &MessagesRequest) -> Result<MessagesResponse, LlmError>;
}

pub struct AnthropicClient {
    http_client: Client,
    endpoint: String,
    api_key: String,
    mcp_beta: String,
}

impl AnthropicClient {
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs.max(1)))
            .build()
            .map_err(|_| LlmError::ServiceUnavailable {
                provider: PROVIDER.to_string(),
            })?;

        Ok(Self {
            http_client,
            endpoint: format!("{}/v1/messages", config.api_base.trim_end_matches('/')),
            api_key: config.api_key.clone(),
            mcp_beta: config.mcp.beta_version.clone(),
        })
    }
}

#[async_trait]
impl MessagesApi for AnthropicClient {
    async fn create(&self, request: &MessagesRequest) -> Result<MessagesResponse, LlmError> {
        let mut builder = self
            .http_client
            .post(&self.endpoint)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(request);
        if request.uses_mcp() {
            builder = builder.header("anthropic-beta", &self.mcp_beta);
        }

        debug!(
            "Messages request: tools={}, thinking={}, mcp={}",
            request.tools.len(),
            request.thinking.is_some(),
            request.uses_mcp()
        );

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                LlmError::RequestTimeout {
                    provider: PROVIDER.to_string(),
                }
            } else {
                warn!("Messages transport error: {}", e);
                LlmError::ServiceUnavailable {
                    provider: PROVIDER.to_string(),
                }
            }
        })?;

        let status = response.status();
        if status.is_success() {
            return response
                .json::<MessagesResponse>()
                .await
                .map_err(|_| LlmError::InvalidResponseFormat {
                    provider: PROVIDER.to_string(),
                });
        }

        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());
        let body = response.text().await.unwrap_or_default();
        Err(classify_failure(status, retry_after, &body))
    }
}

fn classify_failure(status: StatusCode, retry_after: Option<u64>, body: &str) -> LlmError {
    match status.as_u16() {
        401 | 403 => LlmError::InvalidApiKey {
            provider: PROVIDER.to_string(),
        },
        429 => LlmError::RateLimitExceeded {
            provider: PROVIDER.to_string(),
            retry_after: retry_after.unwrap_or(30),
        },
        500..=599 => LlmError::ServiceUnavailable {
            provider: PROVIDER.to_string(),
        },
        code => LlmError::RequestRejected {
            provider: PROVIDER.to_string(),
            status_code: code,
            message: body.chars().take(300).collect(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_failure() {
        assert!(matches!(
            classify_failure(StatusCode::UNAUTHORIZED, None, ""),
            LlmError::InvalidApiKey { .. }
        ));
        assert!(matches!(
            classify_failure(StatusCode::TOO_MANY_REQUESTS, Some(7), ""),
            LlmError::RateLimitExceeded { retry_after: 7, .. }
        ));
        assert!(matches!(
            classify_failure(StatusCode::from_u16(529).unwrap(), None, ""),
            LlmError::ServiceUnavailable { .. }
        ));
        match classify_failure(StatusCode::BAD_REQUEST, None, "thinking not supported") {
            LlmError::RequestRejected {
                status_code,
                message,
                ..
            } => {
                assert_eq!(status_code, 400);
                assert!(message.contains("thinking"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_endpoint_from_config() {
        let config = LlmConfig {
            api_base: "https://api.example.test/".to_string(),
            ..LlmConfig::default()
        };
        let client = AnthropicClient::new(&config).unwrap();
        assert_eq!(client.endpoint, "https://api.example.test/v1/messages");
    }
}
