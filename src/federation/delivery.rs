//! Activity delivery
//!
//! Signs and POSTs one activity to every target independently. Each target
//! runs its own retry loop in its own task; one failing inbox never delays
//! or fails another.

use rand::Rng;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;

use super::model::{ACTIVITY_CONTENT_TYPE, Activity};
use super::recipients::{DeliveryTarget, TargetSet};
use super::signature::sign_request;
use crate::config::{FederationConfig, RetryBackoff};
use crate::error::AppError;
use crate::metrics;

/// When and how often a failed delivery is retried
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per target, first try included
    pub max_attempts: u32,
    pub backoff: RetryBackoff,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &FederationConfig) -> Self {
        Self {
            max_attempts: config.max_delivery_attempts,
            backoff: config.retry_backoff,
            base_delay: Duration::from_millis(config.retry_base_delay_ms),
            max_delay: Duration::from_millis(config.retry_max_delay_ms),
        }
    }

    /// Wait after the `attempt`-th failed attempt (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        match self.backoff {
            RetryBackoff::Fixed => self.base_delay.min(self.max_delay),
            RetryBackoff::Exponential => {
                let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
                let ceiling = self.base_delay.saturating_mul(factor).min(self.max_delay);
                let ceiling_ms = u64::try_from(ceiling.as_millis()).unwrap_or(u64::MAX);
                Duration::from_millis(rand::thread_rng().gen_range(0..=ceiling_ms))
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&FederationConfig::default())
    }
}

/// Key material of the local actor an activity is sent as
#[derive(Clone)]
pub struct SigningIdentity {
    /// Public key id, e.g. `https://local.example/users/alice#main-key`
    pub key_id: String,
    pub private_key_pem: String,
}

impl std::fmt::Debug for SigningIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningIdentity")
            .field("key_id", &self.key_id)
            .finish_non_exhaustive()
    }
}

/// Final state of one target
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum DeliveryOutcome {
    Delivered {
        status: u16,
    },
    Failed {
        reason: String,
        /// Status of the last response, if the remote answered at all
        last_status: Option<u16>,
    },
}

/// Per-target delivery result
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TargetDelivery {
    pub inbox: String,
    pub server_name: String,
    pub attempts: u32,
    #[serde(flatten)]
    pub outcome: DeliveryOutcome,
}

impl TargetDelivery {
    pub fn is_delivered(&self) -> bool {
        matches!(self.outcome, DeliveryOutcome::Delivered { .. })
    }

    /// `DeliveryFailed` for a target whose retries were exhausted.
    pub fn error(&self) -> Option<AppError> {
        match &self.outcome {
            DeliveryOutcome::Delivered { .. } => None,
            DeliveryOutcome::Failed { reason, .. } => Some(AppError::DeliveryFailed {
                inbox: self.inbox.clone(),
                attempts: self.attempts,
                reason: reason.clone(),
            }),
        }
    }

    fn failed(target: &DeliveryTarget, attempts: u32, reason: String, last_status: Option<u16>) -> Self {
        Self {
            inbox: target.inbox.clone(),
            server_name: target.server_name.clone(),
            attempts,
            outcome: DeliveryOutcome::Failed {
                reason,
                last_status,
            },
        }
    }
}

/// Outcomes of one send, one entry per target
#[derive(Debug, Clone, Default, Serialize)]
pub struct DeliveryReport {
    pub deliveries: Vec<TargetDelivery>,
}

impl DeliveryReport {
    pub fn delivered_count(&self) -> usize {
        self.deliveries.iter().filter(|d| d.is_delivered()).count()
    }

    pub fn failed_count(&self) -> usize {
        self.deliveries.len() - self.delivered_count()
    }

    /// Look up the outcome for an inbox.
    pub fn get(&self, inbox: &str) -> Option<&TargetDelivery> {
        self.deliveries.iter().find(|d| d.inbox == inbox)
    }

    /// One `DeliveryFailed` per failed target.
    pub fn failures(&self) -> Vec<AppError> {
        self.deliveries.iter().filter_map(TargetDelivery::error).collect()
    }
}

/// Activity delivery service
///
/// Cheap to clone; clones share the HTTP client and the concurrency limit.
#[derive(Clone)]
pub struct DeliveryEngine {
    http_client: reqwest::Client,
    policy: RetryPolicy,
    /// Bounds simultaneous outbound POSTs across all sends
    permits: Arc<Semaphore>,
}

impl DeliveryEngine {
    pub fn new(http_client: reqwest::Client, policy: RetryPolicy, max_concurrent: usize) -> Self {
        Self {
            http_client,
            policy,
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Deliver an activity to every target.
    ///
    /// `bto`/`bcc` are stripped from the wire payload. The body is serialized
    /// once so every target receives identical bytes.
    ///
    /// # Errors
    /// Only if the activity cannot be serialized; per-target failures are
    /// reported in the returned `DeliveryReport`.
    pub async fn deliver(
        &self,
        activity: &Activity,
        identity: &SigningIdentity,
        targets: TargetSet,
    ) -> Result<DeliveryReport, AppError> {
        let body = serde_json::to_vec(&activity.for_delivery())
            .map_err(|e| AppError::Internal(anyhow::anyhow!("serialize activity: {e}")))?;

        tracing::info!(
            activity = %activity.id,
            targets = targets.len(),
            "Delivering activity"
        );
        metrics::ACTIVITIES_SENT_TOTAL
            .with_label_values(&[metrics::activity_type_label(&activity.kind)])
            .inc();

        let body = Arc::new(body);
        let identity = Arc::new(identity.clone());

        let mut tasks = Vec::new();
        for target in targets {
            let engine = self.clone();
            let body = body.clone();
            let identity = identity.clone();
            let task_target = target.clone();

            let task = tokio::spawn(async move {
                engine
                    .deliver_with_retry(&task_target, &body, &identity)
                    .await
            });
            tasks.push((target, task));
        }

        let mut report = DeliveryReport::default();
        for (target, task) in tasks {
            let delivery = match task.await {
                Ok(delivery) => delivery,
                Err(e) => {
                    tracing::error!(inbox = %target.inbox, error = %e, "Delivery task aborted");
                    TargetDelivery::failed(&target, 0, format!("delivery task aborted: {}", e), None)
                }
            };
            report.deliveries.push(delivery);
        }

        tracing::info!(
            activity = %activity.id,
            delivered = report.delivered_count(),
            failed = report.failed_count(),
            "Batch delivery complete"
        );

        Ok(report)
    }

    /// Run the retry loop for one target.
    pub async fn deliver_with_retry(
        &self,
        target: &DeliveryTarget,
        body: &[u8],
        identity: &SigningIdentity,
    ) -> TargetDelivery {
        let started = Instant::now();
        let delivery = self.retry_loop(target, body, identity).await;

        metrics::DELIVERY_DURATION_SECONDS.observe(started.elapsed().as_secs_f64());
        metrics::DELIVERIES_TOTAL
            .with_label_values(&[if delivery.is_delivered() { "delivered" } else { "failed" }])
            .inc();

        if let Some(error) = delivery.error() {
            tracing::error!(inbox = %target.inbox, error = %error, "Giving up on target");
        }
        delivery
    }

    async fn retry_loop(
        &self,
        target: &DeliveryTarget,
        body: &[u8],
        identity: &SigningIdentity,
    ) -> TargetDelivery {
        let url = match url::Url::parse(&target.inbox) {
            Ok(url) => url,
            Err(e) => {
                return TargetDelivery::failed(target, 0, format!("invalid inbox URI: {}", e), None);
            }
        };

        let mut attempts = 0;
        let mut last_status = None;
        let mut last_error = String::from("no attempt made");

        while attempts < self.policy.max_attempts {
            if attempts > 0 {
                // Wait without holding a permit.
                tokio::time::sleep(self.policy.delay_after(attempts)).await;
            }
            attempts += 1;

            let result = {
                let Ok(_permit) = self.permits.acquire().await else {
                    last_error = "delivery pool closed".to_string();
                    break;
                };
                self.attempt(&url, body, identity).await
            };

            match result {
                Ok(status) if status.is_success() => {
                    metrics::DELIVERY_ATTEMPTS_TOTAL
                        .with_label_values(&["success"])
                        .inc();
                    tracing::info!(
                        inbox = %target.inbox,
                        attempts,
                        status = status.as_u16(),
                        "Delivered activity"
                    );
                    return TargetDelivery {
                        inbox: target.inbox.clone(),
                        server_name: target.server_name.clone(),
                        attempts,
                        outcome: DeliveryOutcome::Delivered {
                            status: status.as_u16(),
                        },
                    };
                }
                Ok(status) => {
                    metrics::DELIVERY_ATTEMPTS_TOTAL
                        .with_label_values(&["http_error"])
                        .inc();
                    last_status = Some(status.as_u16());
                    last_error = format!("inbox responded with HTTP {}", status);
                }
                Err(AppError::KeySigning(reason)) => {
                    // Retrying cannot fix a broken local key.
                    metrics::DELIVERY_ATTEMPTS_TOTAL
                        .with_label_values(&["signing_error"])
                        .inc();
                    last_error = format!("signing failed: {}", reason);
                    break;
                }
                Err(e) => {
                    metrics::DELIVERY_ATTEMPTS_TOTAL
                        .with_label_values(&["network_error"])
                        .inc();
                    last_error = e.to_string();
                }
            }

            tracing::warn!(
                inbox = %target.inbox,
                attempt = attempts,
                max_attempts = self.policy.max_attempts,
                error = %last_error,
                "Delivery attempt failed"
            );
        }

        TargetDelivery::failed(target, attempts, last_error, last_status)
    }

    /// One signed POST. Signed fresh so the `Date` header stays current.
    async fn attempt(
        &self,
        url: &url::Url,
        body: &[u8],
        identity: &SigningIdentity,
    ) -> Result<reqwest::StatusCode, AppError> {
        let headers = sign_request(
            "POST",
            url,
            body,
            &identity.key_id,
            &identity.private_key_pem,
        )?;

        let response = self
            .http_client
            .post(url.clone())
            .header("Host", headers.host)
            .header("Date", headers.date)
            .header("Digest", headers.digest)
            .header("Signature", headers.signature)
            .header("Content-Type", ACTIVITY_CONTENT_TYPE)
            .body(body.to_vec())
            .send()
            .await
            .map_err(|e| AppError::Federation(format!("Failed to deliver to {}: {}", url, e)))?;

        Ok(response.status())
    }
}
