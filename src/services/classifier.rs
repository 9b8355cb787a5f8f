//! Failure classification and retry policy for channel sends.

use chrono::{Duration, NaiveDateTime};

use crate::config::DispatchConfig;
use crate::services::channel::{ChannelError, TransportErrorKind};

/// Closed set of outcomes for a failed send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Worth retrying: 5xx, timeouts, dropped connections.
    Transient,
    /// Retrying cannot help: the recipient blocked the bot or is invalid.
    Permanent,
    /// The channel asked us to slow down.
    RateLimited,
    /// Anything unrecognized; retried like a transient error.
    Unknown,
}

impl FailureClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureClass::Transient => "transient",
            FailureClass::Permanent => "permanent",
            FailureClass::RateLimited => "rate_limited",
            FailureClass::Unknown => "unknown",
        }
    }

    pub fn is_retryable(&self) -> bool {
        !matches!(self, FailureClass::Permanent)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifiedFailure {
    pub class: FailureClass,
    pub code: Option<u16>,
    pub message: String,
    /// Channel-specified wait, honoured as a lower bound on the backoff.
    pub retry_after: Option<std::time::Duration>,
}

/// Map a channel error onto the fixed retry policy.
pub fn classify(err: &ChannelError) -> ClassifiedFailure {
    let mut retry_after = None;
    let (class, code) = match err {
        ChannelError::Api {
            code,
            retry_after: hint,
            ..
        } => {
            retry_after = *hint;
            let class = match code {
                Some(429) => FailureClass::RateLimited,
                Some(403) | Some(400) => FailureClass::Permanent,
                Some(c) if (500..=599).contains(c) => FailureClass::Transient,
                _ => FailureClass::Unknown,
            };
            (class, *code)
        }
        ChannelError::Transport { kind, .. } => {
            let class = match kind {
                TransportErrorKind::Timeout | TransportErrorKind::ConnectionReset => {
                    FailureClass::Transient
                }
                TransportErrorKind::Other => FailureClass::Unknown,
            };
            (class, None)
        }
        ChannelError::Malformed(_) => (FailureClass::Permanent, None),
    };

    ClassifiedFailure {
        class,
        code,
        message: err.to_string(),
        retry_after,
    }
}

/// What to do with a row after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Retry { next_attempt_at: NaiveDateTime },
    Fail,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Extra attempts allowed after the first.
    pub ceiling: u32,
    pub base_ms: u64,
    pub max_backoff_ms: u64,
}

impl RetryPolicy {
    pub fn from_config(cfg: &DispatchConfig) -> Self {
        Self {
            ceiling: cfg.retry_ceiling,
            base_ms: cfg.retry_base_ms,
            max_backoff_ms: cfg.retry_max_backoff_ms,
        }
    }

    /// Delay after the `attempts`-th failed attempt: `base * 2^(attempts-1)`, capped.
    pub fn backoff(&self, attempts: u32) -> Duration {
        let exp = attempts.saturating_sub(1).min(32);
        let ms = self
            .base_ms
            .saturating_mul(1u64 << exp)
            .min(self.max_backoff_ms);
        Duration::milliseconds(ms as i64)
    }

    /// `attempts_before` is the row's attempt count before the failed send.
    /// A channel-specified `retry_after` longer than the backoff wins.
    pub fn resolve(
        &self,
        failure: &ClassifiedFailure,
        attempts_before: i32,
        now: NaiveDateTime,
    ) -> Resolution {
        if !failure.class.is_retryable() {
            return Resolution::Fail;
        }

        let attempts = attempts_before.max(0) as u32 + 1;
        if attempts > self.ceiling {
            return Resolution::Fail;
        }

        let mut delay = self.backoff(attempts);
        if let Some(hint) = failure.retry_after.and_then(|d| Duration::from_std(d).ok()) {
            delay = delay.max(hint);
        }

        Resolution::Retry {
            next_attempt_at: now + delay,
        }
    }
}
