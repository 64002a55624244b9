use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;

use crate::api::{ChatRequest, ChatResponse, QuotaErrorBody};
use crate::api_config::ApiConfig;
use crate::types::ClassifyError;

#[derive(Debug, Clone)]
pub struct TransportSettings {
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(60),
        }
    }
}

/// One chat-completions round trip.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn send(
        &self,
        config: &ApiConfig,
        request: &ChatRequest,
    ) -> Result<ChatResponse, ClassifyError>;
}

#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(settings: TransportSettings) -> Result<Self, ClassifyError> {
        let client = reqwest::Client::builder()
            .connect_timeout(settings.connect_timeout)
            .timeout(settings.request_timeout)
            .build()
            .map_err(|err| ClassifyError::Network(err.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ChatTransport for ReqwestTransport {
    async fn send(
        &self,
        config: &ApiConfig,
        request: &ChatRequest,
    ) -> Result<ChatResponse, ClassifyError> {
        let mut builder = self.client.post(config.url.as_str());
        for (name, value) in &config.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder
            .json(request)
            .send()
            .await
            .map_err(map_reqwest_error)?;
        let status = response.status();
        let body = response.text().await.map_err(map_reqwest_error)?;

        if !status.is_success() {
            return Err(map_failure(status, body));
        }

        serde_json::from_str::<ChatResponse>(&body)
            .map_err(|err| ClassifyError::InvalidResponse(err.to_string()))
    }
}

fn map_failure(status: StatusCode, body: String) -> ClassifyError {
    if status == StatusCode::TOO_MANY_REQUESTS {
        if let Ok(quota) = serde_json::from_str::<QuotaErrorBody>(&body) {
            if quota.is_daily_limit() {
                return ClassifyError::DailyLimitExceeded(quota.into_details());
            }
        }
    }
    ClassifyError::RequestFailed {
        status: status.as_u16(),
        body,
    }
}

fn map_reqwest_error(err: reqwest::Error) -> ClassifyError {
    if err.is_timeout() {
        return ClassifyError::Network(format!("request timed out: {err}"));
    }
    ClassifyError::Network(err.to_string())
}
