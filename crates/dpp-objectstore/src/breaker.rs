//! Per-process circuit breaker guarding artifact uploads, with an
//! escalating backoff schedule. Kept in memory rather than a shared table
//! since object-store failures are transient per instance rather than a
//! cross-host coordination concern.

use std::sync::Mutex;
use std::time::{Duration, Instant};

struct State {
    fail_count: u32,
    cooldown_until: Option<Instant>,
}

pub struct UploadBreaker {
    state: Mutex<State>,
}

impl Default for UploadBreaker {
    fn default() -> Self {
        Self {
            state: Mutex::new(State {
                fail_count: 0,
                cooldown_until: None,
            }),
        }
    }
}

impl UploadBreaker {
    pub fn is_open(&self) -> bool {
        let state = self.state.lock().unwrap();
        matches!(state.cooldown_until, Some(until) if Instant::now() < until)
    }

    pub fn record_failure(&self) {
        let mut state = self.state.lock().unwrap();
        state.fail_count = state.fail_count.saturating_add(1);
        let secs = backoff_secs(state.fail_count);
        state.cooldown_until = Some(Instant::now() + Duration::from_secs(secs));
    }

    pub fn record_success(&self) {
        let mut state = self.state.lock().unwrap();
        state.fail_count = 0;
        state.cooldown_until = None;
    }
}

fn backoff_secs(fail_count: u32) -> u64 {
    match fail_count {
        0 => 0,
        1 => 5,
        2 => 30,
        3 => 120,
        4 => 600,
        _ => 1800,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_schedule_is_stable() {
        assert_eq!(backoff_secs(0), 0);
        assert_eq!(backoff_secs(1), 5);
        assert_eq!(backoff_secs(4), 600);
        assert_eq!(backoff_secs(50), 1800);
    }

    #[test]
    fn opens_after_failure_and_closes_on_success() {
        let breaker = UploadBreaker::default();
        assert!(!breaker.is_open());
        breaker.record_failure();
        assert!(breaker.is_open());
        breaker.record_success();
        assert!(!breaker.is_open());
    }
}
