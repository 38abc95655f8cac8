// prompt-toggle/src/registry.rs

//! Timed per-session flags with cooldowns and a global capacity cap.
//!
//! Expiry is lazy: stale entries are dropped when an operation observes them,
//! so correctness never depends on a background task. [`spawn_sweeper`] exists
//! only to keep idle maps small.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::{collections::{BTreeMap, HashMap}, fmt, sync::Arc, time::Duration};
use tracing::{debug, info};

use crate::clock::{Clock, SystemClock};

/// Conversation identity: `"{platform}_{session}"`, or the bare session id
/// when the platform is unknown.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionKey(String);

impl SessionKey {
    pub fn new(platform: &str, session_id: &str) -> Self {
        if platform.is_empty() { Self(session_id.to_string()) } else { Self(format!("{platform}_{session_id}")) }
    }
    pub fn as_str(&self) -> &str { &self.0 }
}

impl From<&str> for SessionKey { fn from(s: &str) -> Self { Self(s.to_string()) } }
impl From<String> for SessionKey { fn from(s: String) -> Self { Self(s) } }
impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

/// Why an activation did not happen. These are ordinary outcomes, not faults.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Rejection {
    #[error("cooling down, {remaining_secs}s remaining")]
    CoolingDown { remaining_secs: u64 },
    #[error("already active, {remaining_secs}s remaining")]
    AlreadyActive { remaining_secs: u64 },
    #[error("capacity exceeded, {max} states already active")]
    CapacityExceeded { max: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Activation {
    pub key: SessionKey,
    pub duration_secs: u64,
    pub expires_at_ms: u64,
    pub cooldown_until_ms: u64,
}

impl Activation {
    pub fn message(&self) -> String {
        format!("state activated for {} for {}s", self.key, self.duration_secs)
    }
}

/// Read-only view of one live state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateInfo {
    pub remaining_seconds: u64,
    pub expires_at: DateTime<Utc>,
}

#[derive(Default)]
struct Maps {
    active: HashMap<SessionKey, u64>,
    cooldowns: HashMap<SessionKey, u64>,
    capacity: usize,
}

impl Maps {
    fn purge(&mut self, now: u64) -> usize {
        let before = self.active.len();
        self.active.retain(|_, exp| now < *exp);
        self.cooldowns.retain(|_, exp| now < *exp);
        before - self.active.len()
    }
}

fn whole_secs(until_ms: u64, now_ms: u64) -> u64 { until_ms.saturating_sub(now_ms) / 1000 }

/// Saturates at `u64::MAX`, which reads as "never".
fn deadline(now_ms: u64, secs: u64) -> u64 { now_ms.saturating_add(secs.saturating_mul(1000)) }

/// Both maps live behind one mutex, so the cooldown check, the capacity check
/// and the insert in [`StateRegistry::activate`] are a single critical section.
pub struct StateRegistry {
    maps: Mutex<Maps>,
    clock: Arc<dyn Clock>,
}

impl StateRegistry {
    pub fn new(capacity: usize) -> Self { Self::with_clock(capacity, Arc::new(SystemClock)) }

    pub fn with_clock(capacity: usize, clock: Arc<dyn Clock>) -> Self {
        Self { maps: Mutex::new(Maps { capacity, ..Maps::default() }), clock }
    }

    /// `duration_secs` must be positive; callers validate it through the config.
    pub fn activate(&self, key: &SessionKey, duration_secs: u64, cooldown_secs: u64) -> Result<Activation, Rejection> {
        debug_assert!(duration_secs > 0, "activation duration must be positive");
        let now = self.clock.now_ms();
        let mut m = self.maps.lock();

        if let Some(&until) = m.cooldowns.get(key) {
            if now < until {
                return Err(Rejection::CoolingDown { remaining_secs: whole_secs(until, now) });
            }
        }
        if let Some(&until) = m.active.get(key) {
            if now < until {
                return Err(Rejection::AlreadyActive { remaining_secs: whole_secs(until, now) });
            }
            m.active.remove(key);
        }

        let purged = m.purge(now);
        if purged > 0 { debug!(purged, "dropped expired states"); }
        if m.active.len() >= m.capacity {
            return Err(Rejection::CapacityExceeded { max: m.capacity });
        }

        let expires_at_ms = deadline(now, duration_secs);
        let cooldown_until_ms = deadline(now, cooldown_secs);
        m.active.insert(key.clone(), expires_at_ms);
        m.cooldowns.insert(key.clone(), cooldown_until_ms);
        info!(session = %key, duration_secs, cooldown_secs, "state activated");
        Ok(Activation { key: key.clone(), duration_secs, expires_at_ms, cooldown_until_ms })
    }

    pub fn is_active(&self, key: &SessionKey) -> bool {
        let now = self.clock.now_ms();
        let mut m = self.maps.lock();
        match m.active.get(key) {
            None => false,
            Some(&until) if now >= until => {
                m.active.remove(key);
                debug!(session = %key, "state expired");
                false
            }
            Some(_) => true,
        }
    }

    pub fn remaining_seconds(&self, key: &SessionKey) -> u64 {
        let now = self.clock.now_ms();
        self.maps.lock().active.get(key).map(|&until| whole_secs(until, now)).unwrap_or(0)
    }

    /// Manual override. The cooldown entry is left alone so clearing a state
    /// cannot be used to re-trigger it immediately.
    pub fn deactivate(&self, key: &SessionKey) -> bool {
        let removed = self.maps.lock().active.remove(key).is_some();
        if removed { info!(session = %key, "state deactivated"); }
        removed
    }

    pub fn snapshot(&self) -> BTreeMap<SessionKey, StateInfo> {
        let now = self.clock.now_ms();
        let mut m = self.maps.lock();
        m.purge(now);
        m.active.iter().map(|(k, &until)| {
            let expires_at = i64::try_from(until).ok()
                .and_then(DateTime::from_timestamp_millis)
                .unwrap_or(DateTime::<Utc>::MAX_UTC);
            (k.clone(), StateInfo { remaining_seconds: whole_secs(until, now), expires_at })
        }).collect()
    }

    /// Takes effect for the next activation; live states are never evicted.
    pub fn set_capacity(&self, capacity: usize) { self.maps.lock().capacity = capacity; }
    pub fn capacity(&self) -> usize { self.maps.lock().capacity }

    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now_ms();
        self.maps.lock().purge(now)
    }

    /// Live active states.
    pub fn len(&self) -> usize {
        let now = self.clock.now_ms();
        self.maps.lock().active.values().filter(|&&until| now < until).count()
    }
    pub fn is_empty(&self) -> bool { self.len() == 0 }
}

/// Periodic purge. Optional: every read path already expires lazily.
pub fn spawn_sweeper(registry: Arc<StateRegistry>, every: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(every);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tick.tick().await;
            let purged = registry.purge_expired();
            if purged > 0 { debug!(purged, "sweeper dropped expired states"); }
        }
    })
}
