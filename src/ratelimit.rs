use std::{
    collections::HashMap,
    sync::{Mutex, PoisonError},
    time::{Duration, SystemTime},
};

pub const LOGIN_WINDOW: Duration = Duration::from_secs(3600);
pub const MAX_LOGIN_ATTEMPTS: usize = 10;

/// Sliding one-hour window of login attempts per remote address.
#[derive(Debug, Default)]
pub struct LoginLimiter {
    attempts: Mutex<HashMap<String, Vec<SystemTime>>>,
}

impl LoginLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an attempt from `remote` and report whether it may proceed.
    pub fn check(&self, remote: &str, now: SystemTime) -> bool {
        let mut attempts = self
            .attempts
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        attempts.retain(|_, stamps| {
            stamps.retain(|stamp| {
                now.duration_since(*stamp)
                    .map(|age| age <= LOGIN_WINDOW)
                    .unwrap_or(true)
            });
            !stamps.is_empty()
        });

        let stamps = attempts.entry(remote.to_string()).or_default();
        stamps.push(now);
        stamps.len() <= MAX_LOGIN_ATTEMPTS
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eleventh_attempt_rejected() {
        let limiter = LoginLimiter::new();
        let start = SystemTime::now();
        for i in 0..10 {
            assert!(limiter.check("10.0.0.1", start + Duration::from_secs(i)));
        }
        assert!(!limiter.check("10.0.0.1", start + Duration::from_secs(30)));
    }

    #[test]
    fn test_addresses_are_independent() {
        let limiter = LoginLimiter::new();
        let now = SystemTime::now();
        for _ in 0..11 {
            limiter.check("10.0.0.1", now);
        }
        assert!(limiter.check("10.0.0.2", now));
    }

    #[test]
    fn test_window_expires() {
        let limiter = LoginLimiter::new();
        let start = SystemTime::now();
        for _ in 0..12 {
            limiter.check("10.0.0.1", start);
        }
        assert!(!limiter.check("10.0.0.1", start + Duration::from_secs(60)));

        let quiet = start + Duration::from_secs(61 * 60);
        assert!(limiter.check("10.0.0.1", quiet + Duration::from_secs(60)));
    }
}
