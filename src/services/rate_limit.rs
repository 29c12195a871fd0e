//! Per-requester admission control.
//!
//! A sliding window of `window_secs` admits at most `quota` runs per
//! identity. When the backing [`WindowStore`] is missing or failing the
//! limiter switches to its configured [`FallbackMode`].

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::models::{Admission, FallbackMode, RateLimitConfig};
use crate::storage::WindowStore;

/// Apply one hit at `now` to a hit log.
///
/// Hits older than the window are dropped; a denied hit leaves the log
/// untouched.
pub fn slide_window(
    hits: &mut Vec<DateTime<Utc>>,
    now: DateTime<Utc>,
    window: chrono::Duration,
    quota: u32,
) -> Admission {
    let cutoff = now - window;
    hits.retain(|hit| *hit > cutoff);
    hits.sort();

    if hits.len() >= quota as usize {
        return Admission {
            allowed: false,
            remaining: 0,
            reset_at: hits.first().copied().unwrap_or(now) + window,
        };
    }

    hits.push(now);
    Admission {
        allowed: true,
        remaining: quota.saturating_sub(hits.len() as u32),
        reset_at: hits.first().copied().unwrap_or(now) + window,
    }
}

/// Sliding-window rate limiter.
#[derive(Clone)]
pub struct RateLimiter {
    store: Option<Arc<dyn WindowStore>>,
    config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn WindowStore>, config: RateLimitConfig) -> Self {
        Self {
            store: Some(store),
            config,
        }
    }

    /// A limiter with no backing store; every answer is the fallback.
    pub fn without_store(config: RateLimitConfig) -> Self {
        Self {
            store: None,
            config,
        }
    }

    /// Admit or deny one run for `identity`.
    pub async fn admit(&self, identity: &str) -> Admission {
        self.admit_at(identity, Utc::now()).await
    }

    pub async fn admit_at(&self, identity: &str, now: DateTime<Utc>) -> Admission {
        let Some(store) = &self.store else {
            return self.fallback(now);
        };

        match self.try_admit(store.as_ref(), identity, now).await {
            Ok(admission) => {
                if !admission.allowed {
                    log::info!("Rate limit reached for {} until {}", identity, admission.reset_at);
                }
                admission
            }
            Err(e) => {
                log::warn!("Rate limit store unavailable, using fallback: {}", e);
                self.fallback(now)
            }
        }
    }

    async fn try_admit(&self, store: &dyn WindowStore, identity: &str, now: DateTime<Utc>) -> Result<Admission> {
        store
            .admit(identity, now, self.config.window(), self.config.quota)
            .await
    }

    fn fallback(&self, now: DateTime<Utc>) -> Admission {
        let reset_at = now + self.config.window();
        match self.config.fallback {
            FallbackMode::Open => Admission {
                allowed: true,
                remaining: self.config.quota,
                reset_at,
            },
            FallbackMode::Closed => Admission {
                allowed: false,
                remaining: 0,
                reset_at,
            },
        }
    }
}
