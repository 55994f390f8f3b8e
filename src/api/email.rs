//! Outbox dispatch worker and publisher abstraction.
//!
//! Account creation enqueues a row in `email_outbox` inside the same
//! transaction that commits the account and its verification token, so an
//! account never exists without a pending notification. A background task
//! polls that table, locks a batch via `FOR UPDATE SKIP LOCKED`, and hands
//! each row to a [`MessagePublisher`]. The publisher returns a message id
//! on success; failures are retried with exponential backoff and jitter
//! until a max attempt threshold, then marked `failed`.
//!
//! The default publisher for local development is [`LogPublisher`], which
//! logs the payload and fabricates a message id. Swapping in a broker
//! client only requires another [`MessagePublisher`] implementation.

use anyhow::{Context, Result};
use rand::Rng;
use sqlx::{PgPool, Row};
use std::{sync::Arc, time::Duration};
use tokio::time::sleep;
use tracing::{Instrument, error, info, info_span};
use ulid::Ulid;
use uuid::Uuid;

/// Topic carrying `{email, token}` verification payloads.
pub const VERIFY_EMAIL_TOPIC: &str = "verify_email";

/// One locked outbox row, ready for publishing.
#[derive(Clone, Debug)]
pub struct OutboxMessage {
    pub to_email: String,
    pub payload_json: String,
}

/// Outbound notification contract: deliver a payload to a topic and
/// return the broker-assigned message id, or an error to schedule a retry.
pub trait MessagePublisher: Send + Sync {
    /// # Errors
    /// Returns an error when the message could not be accepted by the broker.
    fn publish(&self, topic: &str, message: &OutboxMessage) -> Result<String>;
}

/// Local dev publisher that logs the payload instead of contacting a broker.
#[derive(Clone, Debug)]
pub struct LogPublisher;

impl MessagePublisher for LogPublisher {
    fn publish(&self, topic: &str, message: &OutboxMessage) -> Result<String> {
        let message_id = Ulid::new().to_string();
        info!(
            topic,
            to_email = %message.to_email,
            payload = %message.payload_json,
            message_id = %message_id,
            "notification publish stub"
        );
        Ok(message_id)
    }
}

#[derive(Clone, Copy, Debug)]
pub struct DispatchConfig {
    poll_interval: Duration,
    batch_size: usize,
    max_attempts: u32,
    backoff_base: Duration,
    backoff_max: Duration,
}

impl DispatchConfig {
    /// Default worker config: 5s poll interval, 10 rows per batch,
    /// 5 max attempts, and 5s->5m exponential backoff with jitter.
    #[must_use]
    pub fn new() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            batch_size: 10,
            max_attempts: 5,
            backoff_base: Duration::from_secs(5),
            backoff_max: Duration::from_secs(300),
        }
    }

    #[must_use]
    pub fn with_poll_interval_seconds(mut self, seconds: u64) -> Self {
        self.poll_interval = Duration::from_secs(seconds);
        self
    }

    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    #[must_use]
    pub fn with_backoff_base_seconds(mut self, seconds: u64) -> Self {
        self.backoff_base = Duration::from_secs(seconds);
        self
    }

    #[must_use]
    pub fn with_backoff_max_seconds(mut self, seconds: u64) -> Self {
        self.backoff_max = Duration::from_secs(seconds);
        self
    }

    /// Clamp zero or inverted settings to workable values.
    #[must_use]
    pub fn normalize(self) -> Self {
        let poll_interval = if self.poll_interval.is_zero() {
            Duration::from_secs(1)
        } else {
            self.poll_interval
        };
        let backoff_base = if self.backoff_base.is_zero() {
            Duration::from_secs(1)
        } else {
            self.backoff_base
        };
        Self {
            poll_interval,
            batch_size: self.batch_size.max(1),
            max_attempts: self.max_attempts.max(1),
            backoff_base,
            backoff_max: self.backoff_max.max(backoff_base),
        }
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Spawn a background task that polls and publishes the outbox.
pub fn spawn_dispatch_worker(
    pool: PgPool,
    publisher: Arc<dyn MessagePublisher>,
    config: DispatchConfig,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let config = config.normalize();

        loop {
            if let Err(err) = dispatch_batch(&pool, publisher.as_ref(), &config).await {
                error!("Outbox dispatch batch failed: {err}");
            }

            sleep(config.poll_interval).await;
        }
    })
}

async fn dispatch_batch(
    pool: &PgPool,
    publisher: &dyn MessagePublisher,
    config: &DispatchConfig,
) -> Result<usize> {
    let mut tx = pool
        .begin()
        .await
        .context("failed to start outbox transaction")?;

    // Lock a batch so concurrent workers never double-publish a row.
    let query = r"
        SELECT id, topic, to_email, payload_json::text AS payload_json, attempts
        FROM email_outbox
        WHERE status = 'pending'
          AND next_attempt_at <= NOW()
        ORDER BY next_attempt_at ASC, created_at ASC
        LIMIT $1
        FOR UPDATE SKIP LOCKED
    ";
    let span = info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let rows = sqlx::query(query)
        .bind(i64::try_from(config.batch_size).unwrap_or(1))
        .fetch_all(&mut *tx)
        .instrument(span)
        .await
        .context("failed to lock outbox batch")?;

    let row_count = rows.len();
    for row in rows {
        let id: Uuid = row.get("id");
        let topic: String = row.get("topic");
        let attempts: i32 = row.get("attempts");
        let attempts = u32::try_from(attempts).unwrap_or(0);
        let message = OutboxMessage {
            to_email: row.get("to_email"),
            payload_json: row.get("payload_json"),
        };

        match publisher.publish(&topic, &message) {
            Ok(message_id) => {
                info!(topic, %message_id, "Published notification");
                mark_sent(&mut tx, id, attempts).await?;
            }
            Err(err) => {
                error!(topic, "Failed to publish notification: {err}");
                mark_retry_or_failed(&mut tx, id, attempts, &err.to_string(), config).await?;
            }
        }
    }

    tx.commit()
        .await
        .context("failed to commit outbox batch")?;

    Ok(row_count)
}

async fn mark_sent(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    id: Uuid,
    attempts: u32,
) -> Result<()> {
    let query = r"
        UPDATE email_outbox
        SET status = 'sent',
            attempts = $2,
            last_error = NULL,
            sent_at = NOW(),
            next_attempt_at = NOW()
        WHERE id = $1
    ";
    let span = info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(id)
        .bind(i32::try_from(attempts.saturating_add(1)).unwrap_or(i32::MAX))
        .execute(&mut **tx)
        .instrument(span)
        .await
        .context("failed to mark outbox row sent")?;
    Ok(())
}

async fn mark_retry_or_failed(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    id: Uuid,
    attempts: u32,
    last_error: &str,
    config: &DispatchConfig,
) -> Result<()> {
    let next_attempt = attempts.saturating_add(1);
    let next_attempt_i32 = i32::try_from(next_attempt).unwrap_or(i32::MAX);

    if next_attempt >= config.max_attempts {
        let query = r"
            UPDATE email_outbox
            SET status = 'failed',
                attempts = $2,
                last_error = $3,
                next_attempt_at = NOW()
            WHERE id = $1
        ";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(id)
            .bind(next_attempt_i32)
            .bind(last_error)
            .execute(&mut **tx)
            .instrument(span)
            .await
            .context("failed to mark outbox row failed")?;
        return Ok(());
    }

    let delay = backoff_delay(next_attempt, config.backoff_base, config.backoff_max);
    let delay_ms = i64::try_from(delay.as_millis()).unwrap_or(i64::MAX);
    let query = r"
        UPDATE email_outbox
        SET status = 'pending',
            attempts = $2,
            last_error = $3,
            next_attempt_at = NOW() + ($4 * INTERVAL '1 millisecond')
        WHERE id = $1
    ";
    let span = info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(id)
        .bind(next_attempt_i32)
        .bind(last_error)
        .bind(delay_ms)
        .execute(&mut **tx)
        .instrument(span)
        .await
        .context("failed to schedule outbox retry")?;
    Ok(())
}

/// Exponential backoff capped at `max`, with half-width jitter.
fn backoff_delay(attempt: u32, base: Duration, max: Duration) -> Duration {
    let shift = attempt.saturating_sub(1).min(31);
    let delay = base.checked_mul(1u32 << shift).unwrap_or(max).min(max);

    let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
    if delay_ms < 2 {
        return delay;
    }
    let half = delay_ms / 2;
    let jitter = rand::thread_rng().gen_range(0..=half);
    Duration::from_millis(half + jitter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_caps() {
        let base = Duration::from_secs(5);
        let max = Duration::from_secs(300);

        for attempt in 1..=12 {
            let delay = backoff_delay(attempt, base, max);
            let uncapped = base.checked_mul(1 << (attempt - 1)).unwrap_or(max).min(max);
            // Jitter keeps the delay within [half, full] of the capped value.
            assert!(delay <= uncapped, "attempt {attempt}: {delay:?} > {uncapped:?}");
            assert!(
                delay >= uncapped / 2,
                "attempt {attempt}: {delay:?} < {:?}",
                uncapped / 2
            );
        }
    }

    #[test]
    fn backoff_tiny_delay_skips_jitter() {
        let delay = backoff_delay(1, Duration::from_millis(1), Duration::from_secs(1));
        assert_eq!(delay, Duration::from_millis(1));
    }

    #[test]
    fn normalize_clamps_zero_settings() {
        let config = DispatchConfig::new()
            .with_poll_interval_seconds(0)
            .with_batch_size(0)
            .with_max_attempts(0)
            .with_backoff_base_seconds(0)
            .with_backoff_max_seconds(0)
            .normalize();

        assert_eq!(config.poll_interval, Duration::from_secs(1));
        assert_eq!(config.batch_size, 1);
        assert_eq!(config.max_attempts, 1);
        assert_eq!(config.backoff_base, Duration::from_secs(1));
        assert!(config.backoff_max >= config.backoff_base);
    }

    #[test]
    fn log_publisher_returns_message_id() {
        let message = OutboxMessage {
            to_email: "user@example.com".to_string(),
            payload_json: r#"{"email":"user@example.com"}"#.to_string(),
        };
        let message_id = LogPublisher
            .publish(VERIFY_EMAIL_TOPIC, &message)
            .expect("stub publish");
        assert!(!message_id.is_empty());
    }
}
