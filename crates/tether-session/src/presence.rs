//! Presence: how "here" a bound player is.

use std::time::Duration;

use tether_protocol::PresenceStatus;
use tokio::time::Instant;

/// Idle time after which a player stops being `Active`.
pub const IDLE_AFTER: Duration = Duration::from_secs(60);

/// Computes a player's presence at `now`.
///
/// Link death wins over idleness; otherwise the status is the whole
/// minutes since the client last pulled output.
pub fn presence_status(now: Instant, link_dead_at: Option<Instant>, last_activity: Instant) -> PresenceStatus {
    if link_dead_at.is_some() {
        return PresenceStatus::LinkDead;
    }
    let idle = now.saturating_duration_since(last_activity);
    if idle < IDLE_AFTER {
        PresenceStatus::Active
    } else {
        PresenceStatus::Idle(idle.as_secs() / 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    #[tokio::test(start_paused = true)]
    async fn test_presence_recent_activity_is_active() {
        let start = Instant::now();
        assert_eq!(presence_status(start + secs(59), None, start), PresenceStatus::Active);
    }

    #[tokio::test(start_paused = true)]
    async fn test_presence_idle_rounds_down_to_minutes() {
        let start = Instant::now();
        assert_eq!(presence_status(start + secs(60), None, start), PresenceStatus::Idle(1));
        assert_eq!(presence_status(start + secs(179), None, start), PresenceStatus::Idle(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_presence_link_dead_wins() {
        let start = Instant::now();
        assert_eq!(
            presence_status(start + secs(1), Some(start), start),
            PresenceStatus::LinkDead
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_presence_clock_before_activity_is_active() {
        let start = Instant::now();
        assert_eq!(presence_status(start, None, start + secs(5)), PresenceStatus::Active);
    }
}
