//! Consumed push-gateway interface: `sendMulticast(tokens[], payload) ->
//! {successCount, failureCount, failures}`. One trait, one impl per push
//! provider, the same shape as a notifier abstraction with one
//! implementation per downstream channel.

use async_trait::async_trait;
use serde::Serialize;

use crate::error::AppError;

/// The push payload assembled by the dispatch worker:
/// `notification={title, body}, data={category, scheduleId}`.
#[derive(Debug, Clone, Serialize)]
pub struct PushPayload {
    pub title: String,
    pub body: String,
    pub category: Option<String>,
    pub schedule_id: String,
}

/// One multicast-send outcome for a single token.
#[derive(Debug, Clone)]
pub struct PushFailure {
    pub token: String,
    pub error_code: String,
}

#[derive(Debug, Clone, Default)]
pub struct MulticastResult {
    pub success_count: usize,
    pub failure_count: usize,
    pub failures: Vec<PushFailure>,
}

/// Maximum tokens submitted to the gateway in a single call — the gateway's
/// own multicast unit ceiling.
pub const MAX_BATCH_SIZE: usize = 500;

#[async_trait]
pub trait PushGateway: Send + Sync {
    /// Submit up to `MAX_BATCH_SIZE` tokens in one call. Callers are
    /// responsible for chunking a larger token list.
    async fn send_multicast(
        &self,
        tokens: &[String],
        payload: &PushPayload,
    ) -> Result<MulticastResult, AppError>;
}

/// `reqwest`-backed implementation talking to an HTTP push-relay endpoint
/// (FCM/APNs-style batch-send API), wrapping the external integration in a
/// thin HTTP client.
pub struct HttpPushGateway {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpPushGateway {
    pub fn new(endpoint: String, api_key: Option<String>, timeout: std::time::Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("failed to build push gateway HTTP client");
        Self {
            client,
            endpoint,
            api_key,
        }
    }
}

#[derive(Serialize)]
struct SendRequest<'a> {
    tokens: &'a [String],
    notification: NotificationBody<'a>,
    data: DataBody<'a>,
}

#[derive(Serialize)]
struct NotificationBody<'a> {
    title: &'a str,
    body: &'a str,
}

#[derive(Serialize)]
struct DataBody<'a> {
    category: Option<&'a str>,
    schedule_id: &'a str,
}

#[derive(serde::Deserialize)]
struct SendResponse {
    success_count: usize,
    failure_count: usize,
    #[serde(default)]
    failures: Vec<GatewayFailure>,
}

#[derive(serde::Deserialize)]
struct GatewayFailure {
    token: String,
    error_code: String,
}

#[async_trait]
impl PushGateway for HttpPushGateway {
    async fn send_multicast(
        &self,
        tokens: &[String],
        payload: &PushPayload,
    ) -> Result<MulticastResult, AppError> {
        if tokens.len() > MAX_BATCH_SIZE {
            return Err(AppError::Internal(anyhow::anyhow!(
                "send_multicast called with {} tokens, exceeds max batch size {}",
                tokens.len(),
                MAX_BATCH_SIZE
            )));
        }

        let mut request = self.client.post(&self.endpoint).json(&SendRequest {
            tokens,
            notification: NotificationBody {
                title: &payload.title,
                body: &payload.body,
            },
            data: DataBody {
                category: payload.category.as_deref(),
                schedule_id: &payload.schedule_id,
            },
        });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(AppError::Gateway)?;
        let response = response.error_for_status().map_err(AppError::Gateway)?;
        let parsed: SendResponse = response.json().await.map_err(AppError::Gateway)?;

        Ok(MulticastResult {
            success_count: parsed.success_count,
            failure_count: parsed.failure_count,
            failures: parsed
                .failures
                .into_iter()
                .map(|f| PushFailure {
                    token: f.token,
                    error_code: f.error_code,
                })
                .collect(),
        })
    }
}

#[cfg(test)]
pub mod mock {
    use super::*;
    use std::sync::Mutex;

    /// Deterministic in-memory gateway for unit/integration tests: returns
    /// a scripted result or, if none is queued, a clean all-success result.
    #[derive(Default)]
    pub struct MockGateway {
        pub calls: Mutex<Vec<(Vec<String>, PushPayload)>>,
        pub scripted: Mutex<Vec<MulticastResult>>,
    }

    #[async_trait]
    impl PushGateway for MockGateway {
        async fn send_multicast(
            &self,
            tokens: &[String],
            payload: &PushPayload,
        ) -> Result<MulticastResult, AppError> {
            self.calls
                .lock()
                .unwrap()
                .push((tokens.to_vec(), payload.clone()));

            let mut scripted = self.scripted.lock().unwrap();
            if !scripted.is_empty() {
                return Ok(scripted.remove(0));
            }
            Ok(MulticastResult {
                success_count: tokens.len(),
                failure_count: 0,
                failures: Vec::new(),
            })
        }
    }
}
