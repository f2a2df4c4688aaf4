//! Liveness supervision
//!
//! Each session carries three deadlines, all derived from its timestamps:
//!
//! - ping: `last_sent_at + ping_interval`, after which the server pings
//! - receive: `last_recv_at + receive_timeout`, after which the session is closed
//! - login: `connected_at + login_timeout`, only while not logged in
//!
//! The receive timeout is always longer than the ping interval, so a silent
//! peer gets at least one ping round trip before it is dropped.

use std::time::Duration;

use tokio::time::Instant;

use crate::config::LivenessConfig;
use crate::socket_server::session::{CloseReason, LivenessSnapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LivenessPolicy {
    pub ping_interval: Duration,
    pub receive_timeout: Duration,
    /// `None` disables the login deadline
    pub login_timeout: Option<Duration>,
}

impl LivenessPolicy {
    pub fn from_config(config: &LivenessConfig) -> Self {
        let ping_interval = Duration::from_millis(config.ping_interval_ms);
        Self {
            ping_interval,
            receive_timeout: ping_interval + Duration::from_millis(config.receive_margin_ms),
            login_timeout: match config.login_timeout_ms {
                0 => None,
                ms => Some(Duration::from_millis(ms)),
            },
        }
    }
}

/// What the connection should do when its timer fires
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Nothing due; check again at the given instant
    Wait(Instant),
    /// Send a ping
    Ping,
    /// Close the session
    Expire(CloseReason),
}

#[derive(Debug, Clone)]
pub struct Supervisor {
    policy: LivenessPolicy,
}

impl Supervisor {
    pub fn new(policy: LivenessPolicy) -> Self {
        Self { policy }
    }

    /// Earliest instant at which `check` may return something other than `Wait`
    pub fn next_deadline(&self, snap: &LivenessSnapshot) -> Instant {
        let mut deadline = (snap.last_recv_at + self.policy.receive_timeout)
            .min(snap.last_sent_at + self.policy.ping_interval);
        if let Some(login) = self.login_deadline(snap) {
            deadline = deadline.min(login);
        }
        deadline
    }

    pub fn check(&self, snap: &LivenessSnapshot, now: Instant) -> Verdict {
        if now >= snap.last_recv_at + self.policy.receive_timeout {
            return Verdict::Expire(CloseReason::LivenessTimeout);
        }
        if self.login_deadline(snap).is_some_and(|deadline| now >= deadline) {
            return Verdict::Expire(CloseReason::LoginTimeout);
        }
        if now >= snap.last_sent_at + self.policy.ping_interval {
            return Verdict::Ping;
        }
        Verdict::Wait(self.next_deadline(snap))
    }

    fn login_deadline(&self, snap: &LivenessSnapshot) -> Option<Instant> {
        if snap.logged_in {
            return None;
        }
        self.policy.login_timeout.map(|t| snap.connected_at + t)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PING: Duration = Duration::from_secs(10);
    const RECV: Duration = Duration::from_secs(15);
    const LOGIN: Duration = Duration::from_secs(2);

    fn supervisor() -> Supervisor {
        Supervisor::new(LivenessPolicy {
            ping_interval: PING,
            receive_timeout: RECV,
            login_timeout: Some(LOGIN),
        })
    }

    fn snapshot(start: Instant, logged_in: bool) -> LivenessSnapshot {
        LivenessSnapshot {
            connected_at: start,
            last_recv_at: start,
            last_sent_at: start,
            logged_in,
        }
    }

    #[test]
    fn test_policy_from_config() {
        let config = LivenessConfig {
            ping_interval_ms: 30_000,
            receive_margin_ms: 10_000,
            login_timeout_ms: 0,
        };
        let policy = LivenessPolicy::from_config(&config);
        assert_eq!(policy.ping_interval, Duration::from_secs(30));
        assert_eq!(policy.receive_timeout, Duration::from_secs(40));
        assert_eq!(policy.login_timeout, None);
    }

    #[test]
    fn test_idle_session_waits_then_pings() {
        let sup = supervisor();
        let start = Instant::now();
        let snap = snapshot(start, true);

        assert_eq!(sup.check(&snap, start + Duration::from_secs(1)), Verdict::Wait(start + PING));
        assert_eq!(sup.check(&snap, start + PING), Verdict::Ping);
    }

    #[test]
    fn test_ping_resets_with_sent_frames() {
        let sup = supervisor();
        let start = Instant::now();
        let mut snap = snapshot(start, true);
        snap.last_sent_at = start + Duration::from_secs(8);
        snap.last_recv_at = start + Duration::from_secs(8);

        assert!(matches!(sup.check(&snap, start + PING), Verdict::Wait(_)));
        assert_eq!(sup.next_deadline(&snap), start + Duration::from_secs(18));
    }

    #[test]
    fn test_silent_peer_expires_after_receive_timeout() {
        let sup = supervisor();
        let start = Instant::now();
        let mut snap = snapshot(start, true);
        // The server kept pinging, but nothing came back.
        snap.last_sent_at = start + Duration::from_secs(14);

        assert!(matches!(sup.check(&snap, start + Duration::from_secs(14)), Verdict::Wait(_)));
        assert_eq!(
            sup.check(&snap, start + RECV),
            Verdict::Expire(CloseReason::LivenessTimeout)
        );
    }

    #[test]
    fn test_receive_refresh_keeps_session_alive() {
        let sup = supervisor();
        let start = Instant::now();
        let mut snap = snapshot(start, true);
        snap.last_recv_at = start + Duration::from_secs(12);
        snap.last_sent_at = start + Duration::from_secs(12);

        assert!(matches!(sup.check(&snap, start + RECV), Verdict::Wait(_)));
    }

    #[test]
    fn test_login_deadline_only_before_login() {
        let sup = supervisor();
        let start = Instant::now();

        let anon = snapshot(start, false);
        assert_eq!(sup.next_deadline(&anon), start + LOGIN);
        assert_eq!(sup.check(&anon, start + LOGIN), Verdict::Expire(CloseReason::LoginTimeout));

        let active = snapshot(start, true);
        assert_eq!(sup.check(&active, start + LOGIN), Verdict::Wait(start + PING));
    }

    #[test]
    fn test_login_deadline_disabled() {
        let sup = Supervisor::new(LivenessPolicy {
            ping_interval: PING,
            receive_timeout: RECV,
            login_timeout: None,
        });
        let start = Instant::now();
        let anon = snapshot(start, false);
        assert_eq!(sup.check(&anon, start + LOGIN), Verdict::Wait(start + PING));
    }
}
