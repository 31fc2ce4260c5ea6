//! Delivers notifications to robot webhook endpoints.

use crate::config::Target;
use crate::models::{DingTalkNotification, RobotResponse};
use async_trait::async_trait;
use base64::Engine;
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use sha2::Sha256;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, instrument};
use url::Url;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("failed to compute request signature")]
    Sign,

    #[error("error encoding robot request: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("error sending notification: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("unacceptable response code {status}")]
    Status { status: u16, body: String },

    #[error("error decoding robot response: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("robot rejected the notification: errcode {code}, errmsg {message:?}")]
    Rejected { code: i64, message: String },
}

impl DispatchError {
    /// True when the endpoint was reached and refused the message, as opposed
    /// to the request never completing.
    pub fn is_remote_rejection(&self) -> bool {
        matches!(self, DispatchError::Status { .. } | DispatchError::Rejected { .. })
    }
}

/// Computes `base64(HMAC-SHA256(secret, timestamp + "\n" + secret))`.
pub fn sign(secret: &str, timestamp: &str) -> Result<String, DispatchError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| DispatchError::Sign)?;
    mac.update(timestamp.as_bytes());
    mac.update(b"\n");
    mac.update(secret.as_bytes());
    Ok(base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes()))
}

/// Returns `url` with `timestamp` and `sign` query parameters set.
///
/// Existing `timestamp`/`sign` parameters are replaced. The remaining
/// parameters are kept and re-serialized sorted by name, so the same inputs
/// always produce the same URL.
pub fn signed_url(url: &Url, secret: &str, timestamp_ms: i64) -> Result<Url, DispatchError> {
    let timestamp = timestamp_ms.to_string();
    let signature = sign(secret, &timestamp)?;

    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(name, _)| name != "timestamp" && name != "sign")
        .map(|(name, value)| (name.into_owned(), value.into_owned()))
        .collect();
    pairs.sort_by(|a, b| a.0.cmp(&b.0));

    let mut signed = url.clone();
    signed
        .query_pairs_mut()
        .clear()
        .extend_pairs(&pairs)
        .append_pair("timestamp", &timestamp)
        .append_pair("sign", &signature);
    Ok(signed)
}

/// Sends one notification to one target.
#[async_trait]
pub trait Dispatch: Send + Sync {
    /// Posts `notification` to `target`, bounded by `timeout`. Succeeds only
    /// when the robot acknowledges with `errcode == 0`.
    async fn dispatch(
        &self,
        target: &Target,
        notification: &DingTalkNotification,
        timeout: Duration,
    ) -> Result<RobotResponse, DispatchError>;
}

/// The production dispatcher: a pooled HTTP client, one attempt per call.
#[derive(Debug, Clone)]
pub struct SignedDispatcher {
    client: reqwest::Client,
}

impl SignedDispatcher {
    pub fn new() -> Result<Self, DispatchError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("dingrelay/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Dispatch for SignedDispatcher {
    #[instrument(skip_all, fields(url = %target.url))]
    async fn dispatch(
        &self,
        target: &Target,
        notification: &DingTalkNotification,
        timeout: Duration,
    ) -> Result<RobotResponse, DispatchError> {
        let url = match target.signing_secret() {
            Some(secret) => signed_url(target.url.expose(), secret, Utc::now().timestamp_millis())?,
            None => target.url.expose().clone(),
        };
        let body = serde_json::to_vec(notification).map_err(DispatchError::Encode)?;

        let response = self
            .client
            .post(url)
            .header(CONTENT_TYPE, "application/json")
            .timeout(timeout)
            .body(body)
            .send()
            .await
            .map_err(|e| {
                error!(err = %e, "HTTP request to robot endpoint failed");
                DispatchError::from(e)
            })?;

        let status = response.status();
        let bytes = response.bytes().await?;
        if status != StatusCode::OK {
            let body = String::from_utf8_lossy(&bytes).into_owned();
            error!(status = %status, body = %body, "Robot endpoint returned an error status");
            return Err(DispatchError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let robot: RobotResponse = serde_json::from_slice(&bytes).map_err(DispatchError::Decode)?;
        if robot.errcode != 0 {
            error!(resp_code = robot.errcode, resp_msg = %robot.errmsg, "Robot rejected the notification");
            return Err(DispatchError::Rejected {
                code: robot.errcode,
                message: robot.errmsg,
            });
        }

        debug!(resp_code = robot.errcode, "Notification delivered");
        Ok(robot)
    }
}
