use dashmap::DashMap;
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tracing::debug;

/// Comandos permitidos por usuario dentro de cada ventana.
pub const COMMAND_RATE: usize = 5;
pub const COMMAND_WINDOW: Duration = Duration::from_secs(5);

/// Sliding-window limiter keyed by user id.
///
/// Each user keeps the instants of their last accepted commands; a command is
/// rejected while `rate` of them still fall inside `per`.
pub struct Cooldown {
    rate: usize,
    per: Duration,
    users: DashMap<u64, VecDeque<Instant>>,
}

impl Cooldown {
    pub fn new(rate: usize, per: Duration) -> Self {
        Self {
            rate,
            per,
            users: DashMap::new(),
        }
    }

    /// Records a command from `user_id` at `now`, or returns how long the user
    /// has to wait before the next one is accepted.
    pub fn check(&self, user_id: u64, now: Instant) -> Result<(), Duration> {
        let mut times = self.users.entry(user_id).or_default();

        while times
            .front()
            .is_some_and(|t| now.saturating_duration_since(*t) >= self.per)
        {
            times.pop_front();
        }

        if times.len() >= self.rate {
            let retry_after = times
                .front()
                .map(|oldest| self.per.saturating_sub(now.saturating_duration_since(*oldest)))
                .unwrap_or(self.per);
            debug!(user_id, ?retry_after, "Cooldown::check: rate exceeded");
            return Err(retry_after);
        }

        times.push_back(now);
        Ok(())
    }

    /// Drops users whose whole window has expired.
    pub fn prune(&self, now: Instant) {
        self.users.retain(|_, times| {
            times
                .back()
                .is_some_and(|t| now.saturating_duration_since(*t) < self.per)
        });
    }

    #[cfg(test)]
    fn tracked_users(&self) -> usize {
        self.users.len()
    }
}

impl Default for Cooldown {
    fn default() -> Self {
        Self::new(COMMAND_RATE, COMMAND_WINDOW)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn sixth_command_inside_the_window_is_rejected() {
        let cooldown = Cooldown::default();
        let start = Instant::now();

        for i in 0..5 {
            assert!(cooldown.check(1, start + Duration::from_millis(i * 100)).is_ok());
        }

        let retry = cooldown
            .check(1, start + Duration::from_secs(1))
            .unwrap_err();
        assert_eq!(retry, Duration::from_secs(4));
    }

    #[test]
    fn commands_are_accepted_again_once_the_window_slides() {
        let cooldown = Cooldown::default();
        let start = Instant::now();

        for _ in 0..5 {
            cooldown.check(1, start).unwrap();
        }
        assert!(cooldown.check(1, start + Duration::from_millis(4_999)).is_err());
        assert!(cooldown.check(1, start + Duration::from_secs(5)).is_ok());
    }

    #[test]
    fn rejected_commands_do_not_extend_the_wait() {
        let cooldown = Cooldown::default();
        let start = Instant::now();

        for _ in 0..5 {
            cooldown.check(1, start).unwrap();
        }
        for ms in [1_000, 2_000, 3_000] {
            assert!(cooldown.check(1, start + Duration::from_millis(ms)).is_err());
        }
        assert!(cooldown.check(1, start + Duration::from_secs(5)).is_ok());
    }

    #[test]
    fn users_have_independent_windows() {
        let cooldown = Cooldown::default();
        let now = Instant::now();

        for _ in 0..5 {
            cooldown.check(1, now).unwrap();
        }

        assert!(cooldown.check(1, now).is_err());
        assert!(cooldown.check(2, now).is_ok());
    }

    #[test]
    fn idle_users_are_pruned() {
        let cooldown = Cooldown::default();
        let start = Instant::now();
        cooldown.check(1, start).unwrap();
        cooldown.check(2, start + Duration::from_secs(3)).unwrap();

        cooldown.prune(start + Duration::from_secs(6));

        assert_eq!(cooldown.tracked_users(), 1);
    }
}
