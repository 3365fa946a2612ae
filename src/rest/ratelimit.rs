//! Per-route quota tracking for the REST dispatcher.
//!
//! Two guards run before every send: the server-advertised record from the
//! most recent `X-RateLimit-*` headers on the route, and a client-side
//! fixed-window burst counter. Records are scoped to the dispatcher
//! instance, which owns exactly one credential.

use std::collections::HashMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::limiter::FixedWindow;

/// Sends admitted per route within one burst window.
pub const BURST_LIMIT_SEND: u32 = 5;

/// Length of the client-side burst window.
pub const BURST_LIMIT_PERIOD: Duration = Duration::from_secs(1);

/// Grace applied to a stale reset clock before a record stops refusing sends.
const RESET_SKEW_SECS: i64 = 3;

/// Server-advertised quota for one route, from the most recent
/// `X-RateLimit-*` headers.
#[derive(Debug, Clone, Copy)]
pub struct RouteQuota {
    /// Maximum requests in the route's window.
    pub limit: u32,

    /// Remaining requests in the current window.
    pub remaining: u32,

    /// Reset instant, seconds since the Unix epoch.
    pub reset: u64,
}

/// Rate-limit records and burst counters for one credential.
#[derive(Debug, Default)]
pub struct RateLimitStore {
    records: Mutex<HashMap<String, RouteQuota>>,
    bursts: Mutex<HashMap<String, FixedWindow>>,
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

impl RateLimitStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit or refuse a send on `route`, consuming a burst slot when
    /// admitted.
    ///
    /// # Errors
    ///
    /// `Error::RateLimited` when the server-advertised record is exhausted
    /// and its reset clock has not passed; `Error::LocalRateLimit` when the
    /// burst guard refuses.
    pub fn acquire(&self, route: &str) -> Result<()> {
        if let Some(record) = self.records.lock().get(route) {
            if record.remaining == 0 {
                let until_reset = record.reset as i64 - epoch_secs() as i64;
                if until_reset >= -RESET_SKEW_SECS {
                    return Err(Error::RateLimited {
                        reset_in: Duration::from_secs(until_reset.max(0) as u64),
                    });
                }
            }
        }

        let mut bursts = self.bursts.lock();
        let window = bursts
            .entry(route.to_string())
            .or_insert_with(|| FixedWindow::new(BURST_LIMIT_SEND, BURST_LIMIT_PERIOD));
        if window.try_acquire() {
            Ok(())
        } else {
            Err(Error::LocalRateLimit {
                reset_in: window.retry_in(),
            })
        }
    }

    /// Absorb the `X-RateLimit-*` headers of a response on `route`. A
    /// response that omits the limit header keeps the previously seen
    /// limit for the route.
    pub fn update(
        &self,
        route: &str,
        limit: Option<u32>,
        remaining: Option<u32>,
        reset: Option<u64>,
    ) {
        if let (Some(remaining), Some(reset)) = (remaining, reset) {
            let mut records = self.records.lock();
            let limit = limit
                .or_else(|| records.get(route).map(|record| record.limit))
                .unwrap_or(0);
            records.insert(
                route.to_string(),
                RouteQuota {
                    limit,
                    remaining,
                    reset,
                },
            );
        }
    }

    /// The server-advertised record held for `route`, if any.
    #[must_use]
    pub fn quota(&self, route: &str) -> Option<RouteQuota> {
        self.records.lock().get(route).copied()
    }

    /// Seconds until the route's record resets, if one is held.
    #[must_use]
    pub fn reset_in(&self, route: &str) -> Option<Duration> {
        self.records.lock().get(route).map(|record| {
            Duration::from_secs(record.reset.saturating_sub(epoch_secs()))
        })
    }
}
