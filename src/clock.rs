// prompt-toggle/src/clock.rs

use std::{
    sync::{atomic::{AtomicU64, Ordering}, Arc},
    time::{Duration, SystemTime, UNIX_EPOCH},
};

/// Time source for expiry checks. Production code injects [`SystemClock`];
/// tests drive a [`ManualClock`] instead of sleeping.
pub trait Clock: Send + Sync {
    /// Wall-clock milliseconds since the Unix epoch.
    fn now_ms(&self) -> u64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

/// Clock that only moves when told to. Clones share the same reading.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new(start_ms: u64) -> Self { Self { now: Arc::new(AtomicU64::new(start_ms)) } }
    pub fn advance(&self, by: Duration) { self.now.fetch_add(by.as_millis() as u64, Ordering::SeqCst); }
    pub fn set(&self, ms: u64) { self.now.store(ms, Ordering::SeqCst); }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 { self.now.load(Ordering::SeqCst) }
}
