//! Alert deduplication.
//!
//! One `AlertGate` is shared by every stream worker. The check and the
//! timestamp update happen under one lock, so two workers seeing the same
//! (identity, violation) in the same instant produce exactly one alert.

use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

pub const DEFAULT_ALERT_COOLDOWN: Duration = Duration::from_secs(180);

/// Keys idle for this many cooldowns are dropped by `sweep`.
pub const DEFAULT_EVICTION_FACTOR: u32 = 4;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct AlertKey {
    /// Identity name, or `Unknown`.
    pub identity: String,
    /// Negative label, e.g. `no_helmet`.
    pub violation: String,
}

impl AlertKey {
    pub fn new(identity: impl Into<String>, violation: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            violation: violation.into(),
        }
    }
}

#[derive(Debug)]
struct AlertState {
    last_fired: HashMap<AlertKey, SystemTime>,
    last_sweep: Option<SystemTime>,
    /// Longest cooldown any caller has used; sets the eviction horizon.
    max_cooldown: Duration,
}

#[derive(Debug)]
pub struct AlertGate {
    state: Mutex<AlertState>,
    eviction_factor: u32,
}

impl Default for AlertGate {
    fn default() -> Self {
        Self::new(DEFAULT_EVICTION_FACTOR)
    }
}

impl AlertGate {
    pub fn new(eviction_factor: u32) -> Self {
        Self {
            state: Mutex::new(AlertState {
                last_fired: HashMap::new(),
                last_sweep: None,
                max_cooldown: Duration::ZERO,
            }),
            eviction_factor: eviction_factor.max(1),
        }
    }

    /// Returns true and records `now` when the key has never fired or its
    /// last fire is at least `cooldown` old. Otherwise leaves state untouched.
    ///
    /// A clock that moved backwards counts as zero elapsed.
    pub fn should_fire(&self, key: &AlertKey, now: SystemTime, cooldown: Duration) -> Result<bool> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| anyhow!("alert state lock poisoned"))?;

        if cooldown > state.max_cooldown {
            state.max_cooldown = cooldown;
        }

        let fire = match state.last_fired.get(key) {
            None => true,
            Some(last) => {
                let elapsed = now.duration_since(*last).unwrap_or(Duration::ZERO);
                elapsed >= cooldown
            }
        };
        if fire {
            state.last_fired.insert(key.clone(), now);
        }

        let sweep_due = match state.last_sweep {
            None => {
                state.last_sweep = Some(now);
                false
            }
            Some(last) => now.duration_since(last).unwrap_or(Duration::ZERO) >= state.max_cooldown,
        };
        if sweep_due {
            let evicted = self.sweep_locked(&mut state, now);
            if evicted > 0 {
                log::debug!("alert gate evicted {} idle keys", evicted);
            }
        }

        Ok(fire)
    }

    /// Drop keys whose last fire is older than the eviction horizon.
    pub fn sweep(&self, now: SystemTime) -> Result<usize> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| anyhow!("alert state lock poisoned"))?;
        Ok(self.sweep_locked(&mut state, now))
    }

    fn sweep_locked(&self, state: &mut AlertState, now: SystemTime) -> usize {
        let horizon = state
            .max_cooldown
            .checked_mul(self.eviction_factor)
            .unwrap_or(Duration::MAX);
        let before = state.last_fired.len();
        state
            .last_fired
            .retain(|_, last| now.duration_since(*last).unwrap_or(Duration::ZERO) < horizon);
        state.last_sweep = Some(now);
        before - state.last_fired.len()
    }

    pub fn len(&self) -> Result<usize> {
        let state = self
            .state
            .lock()
            .map_err(|_| anyhow!("alert state lock poisoned"))?;
        Ok(state.last_fired.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    pub fn last_fired(&self, key: &AlertKey) -> Result<Option<SystemTime>> {
        let state = self
            .state
            .lock()
            .map_err(|_| anyhow!("alert state lock poisoned"))?;
        Ok(state.last_fired.get(key).copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::UNIX_EPOCH;

    fn at(secs: u64) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(1_700_000_000 + secs)
    }

    #[test]
    fn cooldown_window_suppresses_repeats() {
        let gate = AlertGate::default();
        let key = AlertKey::new("Unknown", "no_helmet");
        let cd = DEFAULT_ALERT_COOLDOWN;
        assert!(gate.should_fire(&key, at(0), cd).unwrap());
        assert!(!gate.should_fire(&key, at(100), cd).unwrap());
        assert!(gate.should_fire(&key, at(181), cd).unwrap());
        assert_eq!(gate.last_fired(&key).unwrap(), Some(at(181)));
    }

    #[test]
    fn exactly_one_cooldown_later_fires() {
        let gate = AlertGate::default();
        let key = AlertKey::new("A", "no_shoes");
        assert!(gate.should_fire(&key, at(0), DEFAULT_ALERT_COOLDOWN).unwrap());
        assert!(gate.should_fire(&key, at(180), DEFAULT_ALERT_COOLDOWN).unwrap());
    }

    #[test]
    fn suppressed_call_does_not_extend_window() {
        let gate = AlertGate::default();
        let key = AlertKey::new("A", "no_shoes");
        let cd = Duration::from_secs(10);
        assert!(gate.should_fire(&key, at(0), cd).unwrap());
        assert!(!gate.should_fire(&key, at(9), cd).unwrap());
        assert_eq!(gate.last_fired(&key).unwrap(), Some(at(0)));
        assert!(gate.should_fire(&key, at(10), cd).unwrap());
    }

    #[test]
    fn keys_are_independent() {
        let gate = AlertGate::default();
        let cd = DEFAULT_ALERT_COOLDOWN;
        assert!(gate.should_fire(&AlertKey::new("A", "no_helmet"), at(0), cd).unwrap());
        assert!(gate.should_fire(&AlertKey::new("A", "no_shoes"), at(0), cd).unwrap());
        assert!(gate.should_fire(&AlertKey::new("B", "no_helmet"), at(0), cd).unwrap());
        assert!(!gate.should_fire(&AlertKey::new("A", "no_helmet"), at(1), cd).unwrap());
    }

    #[test]
    fn backwards_clock_is_suppressed() {
        let gate = AlertGate::default();
        let key = AlertKey::new("A", "no_helmet");
        let cd = DEFAULT_ALERT_COOLDOWN;
        assert!(gate.should_fire(&key, at(500), cd).unwrap());
        assert!(!gate.should_fire(&key, at(10), cd).unwrap());
        assert_eq!(gate.last_fired(&key).unwrap(), Some(at(500)));
    }

    #[test]
    fn sweep_evicts_idle_keys() {
        let gate = AlertGate::new(4);
        let cd = Duration::from_secs(10);
        gate.should_fire(&AlertKey::new("old", "no_helmet"), at(0), cd).unwrap();
        gate.should_fire(&AlertKey::new("new", "no_helmet"), at(35), cd).unwrap();
        assert_eq!(gate.len().unwrap(), 2);

        // Horizon is 40s: "old" fired 41s ago, "new" 6s ago.
        assert_eq!(gate.sweep(at(41)).unwrap(), 1);
        assert_eq!(gate.len().unwrap(), 1);
        assert!(gate.last_fired(&AlertKey::new("old", "no_helmet")).unwrap().is_none());
    }

    #[test]
    fn automatic_sweep_bounds_state() {
        let gate = AlertGate::new(2);
        let cd = Duration::from_secs(10);
        for i in 0..50u64 {
            let key = AlertKey::new(format!("visitor-{}", i), "no_helmet");
            gate.should_fire(&key, at(i * 10), cd).unwrap();
        }
        // Only keys younger than 2 cooldowns can survive.
        assert!(gate.len().unwrap() <= 3);
    }

    #[test]
    fn huge_cooldown_saturates_the_eviction_horizon() {
        let gate = AlertGate::default();
        let key = AlertKey::new("Unknown", "no_helmet");
        let cd = Duration::from_secs(u64::MAX / 2);
        assert!(gate.should_fire(&key, at(0), cd).unwrap());
        assert_eq!(gate.sweep(at(1_000_000)).unwrap(), 0);
        assert_eq!(gate.len().unwrap(), 1);
        assert!(!gate.should_fire(&key, at(1_000_001), cd).unwrap());
    }
}
