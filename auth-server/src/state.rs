//! Application State
//!
//! Shared state for the auth server, accessible from all route handlers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};

use zk_auth_verifier::{Dispatcher, VerificationContext};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    dispatcher: Dispatcher,
    total_verified: AtomicU64,
    total_rejected: AtomicU64,
    started_at: DateTime<Utc>,
    start_time: Instant,
}

impl AppState {
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                dispatcher,
                total_verified: AtomicU64::new(0),
                total_rejected: AtomicU64::new(0),
                started_at: Utc::now(),
                start_time: Instant::now(),
            }),
        }
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.inner.dispatcher
    }

    /// Fresh verification context for one request
    pub fn context(&self) -> VerificationContext {
        VerificationContext::new()
    }

    pub fn record_verified(&self) {
        self.inner.total_verified.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected(&self) {
        self.inner.total_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn total_verified(&self) -> u64 {
        self.inner.total_verified.load(Ordering::Relaxed)
    }

    pub fn total_rejected(&self) -> u64 {
        self.inner.total_rejected.load(Ordering::Relaxed)
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.inner.started_at
    }

    /// Get server uptime in seconds
    pub fn uptime_secs(&self) -> u64 {
        self.inner.start_time.elapsed().as_secs()
    }
}
