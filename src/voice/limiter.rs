// ABOUTME: Minimum-spacing rate limiter for ASR submissions
// ABOUTME: Shared globally or instantiated per session depending on configured scope
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Chorus Contributors

use std::sync::Arc;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::config::LimiterScope;

/// Enforces a minimum interval between ASR submissions
///
/// Partial passes are interim and safe to skip, so callers drop the pass
/// when acquisition fails instead of queueing.
#[derive(Debug)]
pub struct AsrRateLimiter {
    min_spacing: Duration,
    last_pass: Mutex<Option<Instant>>,
}

impl AsrRateLimiter {
    /// Create a limiter with the given minimum spacing
    #[must_use]
    pub fn new(min_spacing: Duration) -> Self {
        Self {
            min_spacing,
            last_pass: Mutex::new(None),
        }
    }

    /// Try to claim a pass slot at `now`
    ///
    /// Returns false when the previous pass was less than the minimum
    /// spacing ago; the caller should skip the pass.
    pub fn try_acquire(&self, now: Instant) -> bool {
        let Ok(mut last) = self.last_pass.lock() else {
            return false;
        };
        if let Some(prev) = *last {
            if now.duration_since(prev) < self.min_spacing {
                return false;
            }
        }
        *last = Some(now);
        true
    }
}

/// Hands out limiters according to the configured scope
///
/// Global scope shares one limiter across every session; session scope
/// creates an independent limiter per call.
#[derive(Clone)]
pub struct LimiterFactory {
    scope: LimiterScope,
    min_spacing: Duration,
    shared: Arc<AsrRateLimiter>,
}

impl LimiterFactory {
    /// Create a factory for the given scope and spacing
    #[must_use]
    pub fn new(scope: LimiterScope, min_spacing: Duration) -> Self {
        Self {
            scope,
            min_spacing,
            shared: Arc::new(AsrRateLimiter::new(min_spacing)),
        }
    }

    /// Limiter for one session
    #[must_use]
    pub fn for_session(&self) -> Arc<AsrRateLimiter> {
        match self.scope {
            LimiterScope::Global => Arc::clone(&self.shared),
            LimiterScope::Session => Arc::new(AsrRateLimiter::new(self.min_spacing)),
        }
    }
}
