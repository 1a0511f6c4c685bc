use crate::signal::Request;
use std::time::Duration;

/// Escalation schedule for a child that outlives its time budget
///
/// Once `timeout` has elapsed the child is asked to quit; if it is still
/// around `grace` later it is killed. Each step fires at most once.
#[derive(Debug, Clone)]
pub struct Watchdog {
    timeout: Duration,
    grace: Duration,
    quit_sent: bool,
    kill_sent: bool,
}

impl Watchdog {
    pub fn new(timeout: Duration, grace: Duration) -> Self {
        Self {
            timeout,
            grace,
            quit_sent: false,
            kill_sent: false,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Feed the time elapsed since launch and get the step now due, if any
    pub fn poll(&mut self, elapsed: Duration) -> Option<Request> {
        if !self.quit_sent {
            if elapsed >= self.timeout {
                self.quit_sent = true;
                return Some(Request::Quit);
            }
            return None;
        }

        if !self.kill_sent && elapsed >= self.timeout.saturating_add(self.grace) {
            self.kill_sent = true;
            return Some(Request::Kill);
        }
        None
    }

    /// Whether the timeout expired
    pub fn fired(&self) -> bool {
        self.quit_sent
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECOND: Duration = Duration::from_secs(1);

    #[test]
    fn test_quiet_before_timeout() {
        let mut dog = Watchdog::new(5 * SECOND, 2 * SECOND);
        assert_eq!(dog.poll(Duration::ZERO), None);
        assert_eq!(dog.poll(4 * SECOND), None);
        assert!(!dog.fired());
    }

    #[test]
    fn test_quit_then_kill_after_grace() {
        let mut dog = Watchdog::new(5 * SECOND, 2 * SECOND);
        assert_eq!(dog.poll(5 * SECOND), Some(Request::Quit));
        assert!(dog.fired());
        assert_eq!(dog.poll(6 * SECOND), None);
        assert_eq!(dog.poll(7 * SECOND), Some(Request::Kill));
        assert_eq!(dog.poll(60 * SECOND), None);
    }

    #[test]
    fn test_late_poll_still_quits_first() {
        let mut dog = Watchdog::new(SECOND, SECOND);
        assert_eq!(dog.poll(10 * SECOND), Some(Request::Quit));
        assert_eq!(dog.poll(10 * SECOND), Some(Request::Kill));
    }

    #[test]
    fn test_zero_grace_kills_on_next_poll() {
        let mut dog = Watchdog::new(SECOND, Duration::ZERO);
        assert_eq!(dog.poll(SECOND), Some(Request::Quit));
        assert_eq!(dog.poll(SECOND), Some(Request::Kill));
    }
}
