//! Failed-login backoff.
//!
//! After a run of consecutive failed password checks for a username, further
//! attempts are refused for a lockout window. The counter clears on success.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use lipwire_shared::constants::{FAILED_LOGIN_LIMIT, FAILED_LOGIN_LOCKOUT_SECS};

#[derive(Debug)]
struct Attempts {
    count: u32,
    locked_until: Option<Instant>,
}

pub struct LoginGuard {
    inner: Mutex<HashMap<String, Attempts>>,
    limit: u32,
    lockout: Duration,
}

impl LoginGuard {
    pub fn new(limit: u32, lockout: Duration) -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
            limit,
            lockout,
        }
    }

    pub fn is_locked(&self, username: &str) -> bool {
        let mut map = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        let Some(attempts) = map.get_mut(username) else {
            return false;
        };
        match attempts.locked_until {
            Some(deadline) if Instant::now() < deadline => true,
            Some(_) => {
                // Lockout elapsed; start over.
                map.remove(username);
                false
            }
            None => false,
        }
    }

    /// Record one failed attempt; returns `true` when this attempt tripped
    /// the lockout.
    pub fn record_failure(&self, username: &str) -> bool {
        let mut map = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        let attempts = map.entry(username.to_string()).or_insert(Attempts {
            count: 0,
            locked_until: None,
        });
        attempts.count += 1;
        if attempts.count >= self.limit {
            attempts.locked_until = Some(Instant::now() + self.lockout);
            true
        } else {
            false
        }
    }

    pub fn clear(&self, username: &str) {
        self.inner
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(username);
    }
}

impl Default for LoginGuard {
    fn default() -> Self {
        Self::new(
            FAILED_LOGIN_LIMIT,
            Duration::from_secs(FAILED_LOGIN_LOCKOUT_SECS),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_locks_after_limit() {
        let guard = LoginGuard::new(3, Duration::from_secs(60));
        assert!(!guard.record_failure("ada"));
        assert!(!guard.record_failure("ada"));
        assert!(guard.record_failure("ada"));
        assert!(guard.is_locked("ada"));
        assert!(!guard.is_locked("bob"));
    }

    #[test]
    fn test_success_clears_counter() {
        let guard = LoginGuard::new(2, Duration::from_secs(60));
        guard.record_failure("ada");
        guard.clear("ada");
        assert!(!guard.record_failure("ada"));
    }

    #[test]
    fn test_lockout_expires() {
        let guard = LoginGuard::new(1, Duration::from_millis(10));
        guard.record_failure("ada");
        assert!(guard.is_locked("ada"));

        std::thread::sleep(Duration::from_millis(20));
        assert!(!guard.is_locked("ada"));
    }
}
