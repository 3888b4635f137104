//! Instance metadata discovery.
//!
//! [`ImdsClient`] speaks IMDSv2: a session token is requested with a `PUT`
//! and sent on every `GET`. Transient failures are retried a bounded number
//! of times with exponential backoff.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::{NatError, NatResult};

pub const IMDS_ENDPOINT: &str = "http://169.254.169.254";
pub const DEFAULT_TOKEN_TTL_SECS: u32 = 21600;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

const TOKEN_PATH: &str = "/latest/api/token";
const METADATA_PREFIX: &str = "/latest/meta-data/";
const TOKEN_TTL_HEADER: &str = "X-aws-ec2-metadata-token-ttl-seconds";
const TOKEN_HEADER: &str = "X-aws-ec2-metadata-token";

/// Read-only view of the instance metadata tree.
#[async_trait]
pub trait MetadataSource: Send + Sync {
    /// Fetch the value at `path`, relative to `meta-data/`.
    async fn get(&self, path: &str) -> NatResult<String>;
}

/// Who and where this instance is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceIdentity {
    pub instance_id: String,
    pub region: String,
    pub availability_zone: String,
}

pub async fn instance_identity(source: &dyn MetadataSource) -> NatResult<InstanceIdentity> {
    let instance_id = source.get("instance-id").await?;
    let availability_zone = source.get("placement/availability-zone").await?;
    let region = match source.get("placement/region").await {
        Ok(region) => region,
        Err(e) => {
            debug!("Deriving region from zone {}: {}", availability_zone, e);
            region_of_zone(&availability_zone)
        }
    };
    Ok(InstanceIdentity {
        instance_id,
        region,
        availability_zone,
    })
}

/// CIDR of the VPC attached to the primary interface.
pub async fn vpc_cidr(source: &dyn MetadataSource) -> NatResult<String> {
    let mac = source.get("mac").await?;
    source
        .get(&format!("network/interfaces/macs/{}/vpc-ipv4-cidr-block", mac))
        .await
}

/// `us-east-1a` -> `us-east-1`.
pub fn region_of_zone(zone: &str) -> String {
    zone.trim_end_matches(|c: char| c.is_ascii_alphabetic())
        .to_string()
}

/// IMDSv2 client.
pub struct ImdsClient {
    client: reqwest::Client,
    endpoint: String,
    token_ttl_secs: u32,
    max_attempts: u32,
    retry_delay: Duration,
    token: Mutex<Option<String>>,
}

impl ImdsClient {
    pub fn new() -> NatResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(2))
            .build()
            .map_err(|e| NatError::metadata("client", e.to_string()))?;
        Ok(Self {
            client,
            endpoint: IMDS_ENDPOINT.to_string(),
            token_ttl_secs: DEFAULT_TOKEN_TTL_SECS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_delay: Duration::from_millis(500),
            token: Mutex::new(None),
        })
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_retries(mut self, max_attempts: u32, retry_delay: Duration) -> Self {
        self.max_attempts = max_attempts.max(1);
        self.retry_delay = retry_delay;
        self
    }

    async fn session_token(&self) -> Result<String, String> {
        let mut token = self.token.lock().await;
        if let Some(existing) = token.as_ref() {
            return Ok(existing.clone());
        }

        let response = self
            .client
            .put(format!("{}{}", self.endpoint, TOKEN_PATH))
            .header(TOKEN_TTL_HEADER, self.token_ttl_secs.to_string())
            .send()
            .await
            .map_err(|e| format!("token request failed: {}", e))?;
        if !response.status().is_success() {
            return Err(format!("token request returned {}", response.status()));
        }
        let fresh = response
            .text()
            .await
            .map_err(|e| format!("token body unreadable: {}", e))?;
        *token = Some(fresh.clone());
        Ok(fresh)
    }

    /// One attempt. `Ok(None)` means the token was rejected and should be renewed.
    async fn fetch(&self, path: &str) -> Result<Option<String>, String> {
        let token = self.session_token().await?;
        let response = self
            .client
            .get(format!("{}{}{}", self.endpoint, METADATA_PREFIX, path))
            .header(TOKEN_HEADER, token)
            .send()
            .await
            .map_err(|e| format!("request failed: {}", e))?;

        match response.status() {
            StatusCode::UNAUTHORIZED => Ok(None),
            status if status.is_success() => response
                .text()
                .await
                .map(|body| Some(body.trim().to_string()))
                .map_err(|e| format!("body unreadable: {}", e)),
            status => Err(format!("returned {}", status)),
        }
    }

    /// Delay before retry `attempt`, doubling up to [`MAX_RETRY_DELAY`].
    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32
            .checked_shl(attempt.saturating_sub(1))
            .unwrap_or(u32::MAX);
        self.retry_delay.saturating_mul(factor).min(MAX_RETRY_DELAY)
    }
}

#[async_trait]
impl MetadataSource for ImdsClient {
    async fn get(&self, path: &str) -> NatResult<String> {
        let mut last_error = String::new();

        for attempt in 0..self.max_attempts {
            if attempt > 0 {
                tokio::time::sleep(self.backoff(attempt)).await;
            }

            match self.fetch(path).await {
                Ok(Some(value)) => {
                    debug!(path, "Metadata read");
                    return Ok(value);
                }
                Ok(None) => {
                    last_error = "session token rejected".to_string();
                    *self.token.lock().await = None;
                }
                Err(e) => last_error = e,
            }
            warn!(
                path,
                attempt = attempt + 1,
                max_attempts = self.max_attempts,
                "Metadata lookup failed: {}",
                last_error
            );
        }

        Err(NatError::metadata(path, last_error))
    }
}
