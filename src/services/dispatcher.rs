//! Outbound delivery loop.
//!
//! A single cooperative worker drains two durable sources, broadcast logs
//! and the point-to-point message queue, through one [`MessageChannel`]
//! under one shared [`RateBudget`]. All state lives in SQLite: every cycle
//! re-queries what is eligible "now", and a crash mid-batch leaves rows
//! pending so they are simply re-driven (at-least-once delivery).

use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDateTime, Utc};
use sqlx::SqlitePool;
use tokio::sync::broadcast::{self, error::TryRecvError};

use crate::config::DispatchConfig;
use crate::db::models::{Broadcast, BroadcastLog, BroadcastMode, BroadcastStatus, QueuedMessage};
use crate::db::{BroadcastRepository, MessageQueueRepository};
use crate::error::AppResult;
use crate::services::channel::{MessageChannel, OutboundMessage};
use crate::services::classifier::{classify, ClassifiedFailure, FailureClass, Resolution, RetryPolicy};
use crate::services::feedback::apply_recipient_feedback;
use crate::services::notifications::MessagePayload;
use crate::services::rate::RateBudget;

const INVALID_PAYLOAD: &str = "invalid payload";
const MISSING_SOURCE: &str = "forward broadcast has no source message";

/// Which durable source a row belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Broadcast { broadcast_id: i64 },
    Queue,
}

/// What one cycle did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub broadcast_sends: usize,
    pub queue_sends: usize,
    /// Broadcast closed during this cycle, if any.
    pub completed_broadcast: Option<i64>,
}

impl CycleReport {
    pub fn found_work(&self) -> bool {
        self.broadcast_sends > 0 || self.queue_sends > 0 || self.completed_broadcast.is_some()
    }
}

pub struct Dispatcher {
    pool: SqlitePool,
    channel: Arc<dyn MessageChannel>,
    config: DispatchConfig,
    policy: RetryPolicy,
    budget: RateBudget,
}

impl Dispatcher {
    pub fn new(pool: SqlitePool, channel: Arc<dyn MessageChannel>, config: DispatchConfig) -> Self {
        let policy = RetryPolicy::from_config(&config);
        let budget = RateBudget::per_second(config.rate_per_second);
        Self {
            pool,
            channel,
            config,
            policy,
            budget,
        }
    }

    /// Run cycles until a shutdown notification arrives.
    ///
    /// The signal is only observed between cycles and while idle, so an
    /// in-flight batch always finishes before the loop returns.
    pub async fn run(mut self, mut shutdown_rx: broadcast::Receiver<()>) {
        tracing::info!(
            rate_per_second = self.config.rate_per_second,
            send_interval_ms = self.budget.interval().as_millis() as u64,
            batch_size = self.config.batch_size,
            retry_ceiling = self.config.retry_ceiling,
            "Dispatcher started"
        );

        let idle = Duration::from_millis(self.config.idle_interval_ms);

        loop {
            match shutdown_rx.try_recv() {
                Err(TryRecvError::Empty) => {}
                _ => {
                    tracing::info!("Dispatcher received shutdown signal");
                    break;
                }
            }

            let now = Utc::now().naive_utc();
            let found_work = match self.run_cycle(now).await {
                Ok(report) => report.found_work(),
                Err(e) => {
                    tracing::error!(error = %e, "queue.worker_failed");
                    false
                }
            };

            if !found_work {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        tracing::info!("Dispatcher shutting down");
                        break;
                    }
                    _ = tokio::time::sleep(idle) => {}
                }
            }
        }

        tracing::info!("Dispatcher stopped");
    }

    /// One broadcast phase followed by one queue phase, evaluated at `now`.
    pub async fn run_cycle(&mut self, now: NaiveDateTime) -> AppResult<CycleReport> {
        let mut report = CycleReport::default();
        self.broadcast_phase(now, &mut report).await?;
        report.queue_sends = self.queue_phase(now).await?;
        Ok(report)
    }

    async fn broadcast_phase(&mut self, now: NaiveDateTime, report: &mut CycleReport) -> AppResult<()> {
        let Some(mut broadcast) = BroadcastRepository::find_active(&self.pool).await? else {
            return Ok(());
        };

        if broadcast.status == BroadcastStatus::Queued {
            broadcast = BroadcastRepository::mark_sending(&self.pool, broadcast.id, now).await?;
            tracing::info!(
                broadcast_id = broadcast.id,
                correlation_id = %broadcast.correlation_id,
                total_count = broadcast.total_count,
                "broadcast.started"
            );
        }

        let logs = BroadcastRepository::list_eligible_logs(
            &self.pool,
            broadcast.id,
            i64::from(self.config.batch_size),
            now,
        )
        .await?;

        if logs.is_empty() {
            if BroadcastRepository::count_pending_logs(&self.pool, broadcast.id).await? == 0 {
                self.finalize_broadcast(&broadcast, now).await?;
                report.completed_broadcast = Some(broadcast.id);
            }
            // Otherwise every pending row is backing off; wait for it.
            return Ok(());
        }

        let outbound = broadcast_outbound(&broadcast);
        let phase = Phase::Broadcast {
            broadcast_id: broadcast.id,
        };

        for log in &logs {
            match &outbound {
                Some(message) => {
                    self.deliver_log(phase, log, message, now).await?;
                    report.broadcast_sends += 1;
                }
                None => {
                    tracing::error!(
                        broadcast_id = broadcast.id,
                        log_id = log.id,
                        reason = MISSING_SOURCE,
                        "broadcast.send_failed"
                    );
                    BroadcastRepository::mark_log_failed(&self.pool, log.id, None, MISSING_SOURCE)
                        .await?;
                }
            }
        }

        let counts = BroadcastRepository::recompute_counts(&self.pool, broadcast.id).await?;
        tracing::debug!(
            broadcast_id = broadcast.id,
            batch = logs.len(),
            sent_count = counts.sent,
            failed_count = counts.failed,
            total_count = broadcast.total_count,
            "broadcast.batch_processed"
        );

        Ok(())
    }

    async fn deliver_log(
        &mut self,
        phase: Phase,
        log: &BroadcastLog,
        message: &OutboundMessage,
        now: NaiveDateTime,
    ) -> AppResult<()> {
        self.budget.acquire().await;
        match self.channel.send(&log.chat_id, message).await {
            Ok(()) => {
                BroadcastRepository::mark_log_sent(&self.pool, log.id).await?;
            }
            Err(e) => {
                let failure = classify(&e);
                self.settle_failure(phase, log.id, log.recipient_id.as_deref(), log.attempts, failure, now)
                    .await?;
            }
        }
        Ok(())
    }

    async fn finalize_broadcast(&self, broadcast: &Broadcast, now: NaiveDateTime) -> AppResult<()> {
        let done = BroadcastRepository::complete(&self.pool, broadcast.id, now).await?;

        let started = done.started_at.unwrap_or(now);
        let finished = done.finished_at.unwrap_or(now);
        let duration_seconds = (finished - started).num_milliseconds().max(0) as f64 / 1000.0;
        let throughput = if duration_seconds > 0.0 {
            done.sent_count as f64 / duration_seconds
        } else {
            done.sent_count as f64
        };

        tracing::info!(
            broadcast_id = done.id,
            correlation_id = %done.correlation_id,
            duration_seconds,
            throughput,
            sent_count = done.sent_count,
            failed_count = done.failed_count,
            total_count = done.total_count,
            "broadcast.completed"
        );

        Ok(())
    }

    async fn queue_phase(&mut self, now: NaiveDateTime) -> AppResult<usize> {
        let messages = MessageQueueRepository::list_eligible(
            &self.pool,
            i64::from(self.config.queue_batch_size()),
            now,
        )
        .await?;

        let mut sends = 0;
        for message in &messages {
            if self.deliver_queued(message, now).await? {
                sends += 1;
            }
        }

        Ok(sends)
    }

    /// Returns whether a channel send was attempted.
    async fn deliver_queued(&mut self, message: &QueuedMessage, now: NaiveDateTime) -> AppResult<bool> {
        let payload: MessagePayload = match serde_json::from_str(&message.payload) {
            Ok(p) => p,
            Err(e) => {
                // A producer bug, not a channel condition: no retry, no feedback.
                tracing::error!(
                    message_id = message.id,
                    error = %e,
                    reason = INVALID_PAYLOAD,
                    "queue.send_failed"
                );
                MessageQueueRepository::mark_failed(&self.pool, message.id, None, INVALID_PAYLOAD)
                    .await?;
                return Ok(false);
            }
        };

        let outbound = payload.into_outbound();

        self.budget.acquire().await;
        match self.channel.send(&message.chat_id, &outbound).await {
            Ok(()) => {
                MessageQueueRepository::mark_sent(&self.pool, message.id).await?;
            }
            Err(e) => {
                let failure = classify(&e);
                self.settle_failure(
                    Phase::Queue,
                    message.id,
                    message.recipient_id.as_deref(),
                    message.attempts,
                    failure,
                    now,
                )
                .await?;
            }
        }

        Ok(true)
    }

    /// Record a failed send: retry with backoff, or fail and (for permanent
    /// errors) downgrade the recipient before moving on. A channel-specified
    /// wait also holds back every later send of this dispatcher.
    async fn settle_failure(
        &mut self,
        phase: Phase,
        row_id: i64,
        recipient_id: Option<&str>,
        attempts_before: i32,
        failure: ClassifiedFailure,
        now: NaiveDateTime,
    ) -> AppResult<()> {
        let resolution = self.policy.resolve(&failure, attempts_before, now);
        log_failure(phase, row_id, recipient_id, attempts_before + 1, &failure, &resolution);

        if let Some(hint) = failure.retry_after {
            let pause = hint.min(std::time::Duration::from_millis(self.policy.max_backoff_ms));
            self.budget.defer(pause);
            tracing::warn!(
                pause_ms = pause.as_millis() as u64,
                "dispatcher.paused_by_channel"
            );
        }

        let error_code = failure.code.map(i32::from);
        match (phase, resolution) {
            (Phase::Queue, Resolution::Retry { next_attempt_at }) => {
                MessageQueueRepository::mark_retry(
                    &self.pool,
                    row_id,
                    error_code,
                    &failure.message,
                    next_attempt_at,
                )
                .await?;
            }
            (Phase::Queue, Resolution::Fail) => {
                MessageQueueRepository::mark_failed(&self.pool, row_id, error_code, &failure.message)
                    .await?;
            }
            (Phase::Broadcast { .. }, Resolution::Retry { next_attempt_at }) => {
                BroadcastRepository::mark_log_retry(
                    &self.pool,
                    row_id,
                    error_code,
                    &failure.message,
                    next_attempt_at,
                )
                .await?;
            }
            (Phase::Broadcast { .. }, Resolution::Fail) => {
                BroadcastRepository::mark_log_failed(&self.pool, row_id, error_code, &failure.message)
                    .await?;
            }
        }

        if failure.class == FailureClass::Permanent {
            apply_recipient_feedback(&self.pool, recipient_id, &failure).await;
        }

        Ok(())
    }
}

/// The message every recipient of `broadcast` receives, or `None` when a
/// forward broadcast lost its source reference.
fn broadcast_outbound(broadcast: &Broadcast) -> Option<OutboundMessage> {
    match broadcast.mode {
        BroadcastMode::Copy => Some(match &broadcast.media_ref {
            Some(media_ref) => OutboundMessage::Media {
                media_ref: media_ref.clone(),
                caption: broadcast.text.clone(),
            },
            None => OutboundMessage::Text {
                text: broadcast.text.clone(),
                keyboard: None,
            },
        }),
        BroadcastMode::Forward => broadcast
            .source_message()
            .map(|source| OutboundMessage::Forward { source }),
    }
}

fn log_failure(
    phase: Phase,
    row_id: i64,
    recipient_id: Option<&str>,
    attempts: i32,
    failure: &ClassifiedFailure,
    resolution: &Resolution,
) {
    let will_retry = matches!(resolution, Resolution::Retry { .. });
    let class = failure.class.as_str();

    match (phase, failure.class) {
        (Phase::Broadcast { broadcast_id }, FailureClass::RateLimited) => tracing::warn!(
            broadcast_id,
            log_id = row_id,
            attempts,
            will_retry,
            error_code = failure.code,
            "broadcast.rate_limited"
        ),
        (Phase::Queue, FailureClass::RateLimited) => tracing::warn!(
            message_id = row_id,
            attempts,
            will_retry,
            error_code = failure.code,
            "queue.rate_limited"
        ),
        (Phase::Broadcast { broadcast_id }, _) if !will_retry => tracing::error!(
            broadcast_id,
            log_id = row_id,
            recipient_id,
            attempts,
            class,
            error_code = failure.code,
            error = %failure.message,
            "broadcast.send_failed"
        ),
        (Phase::Broadcast { broadcast_id }, _) => tracing::warn!(
            broadcast_id,
            log_id = row_id,
            recipient_id,
            attempts,
            class,
            will_retry,
            error_code = failure.code,
            error = %failure.message,
            "broadcast.send_failed"
        ),
        (Phase::Queue, _) if !will_retry => tracing::error!(
            message_id = row_id,
            recipient_id,
            attempts,
            class,
            error_code = failure.code,
            error = %failure.message,
            "queue.send_failed"
        ),
        (Phase::Queue, _) => tracing::warn!(
            message_id = row_id,
            recipient_id,
            attempts,
            class,
            will_retry,
            error_code = failure.code,
            error = %failure.message,
            "queue.send_failed"
        ),
    }
}
