use std::time::Duration;

use tokio::time::Instant;

/// Paces channel sends so no one-second window holds more than
/// `rate_per_second` of them.
///
/// One budget is shared by every send path of the dispatcher; a batch of
/// `n` sends therefore takes at least `ceil(n / rate * 1000)` ms.
#[derive(Debug)]
pub struct RateBudget {
    interval: Duration,
    next_slot: Option<Instant>,
}

impl RateBudget {
    pub fn per_second(rate_per_second: u32) -> Self {
        let rate = u64::from(rate_per_second.max(1));
        // Round up so `rate` intervals never add up to less than a second.
        let interval = Duration::from_nanos((1_000_000_000 + rate - 1) / rate);
        Self {
            interval,
            next_slot: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Wait for the next send slot.
    pub async fn acquire(&mut self) {
        if let Some(slot) = self.next_slot {
            tokio::time::sleep_until(slot).await;
        }
        self.next_slot = Some(Instant::now() + self.interval);
    }

    /// Hold the next slot back by at least `delay` from now.
    pub fn defer(&mut self, delay: Duration) {
        let until = Instant::now() + delay;
        self.next_slot = Some(self.next_slot.map_or(until, |slot| slot.max(until)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interval_rounds_up() {
        assert_eq!(RateBudget::per_second(25).interval(), Duration::from_millis(40));
        assert!(RateBudget::per_second(3).interval() * 3 >= Duration::from_secs(1));
        assert_eq!(RateBudget::per_second(0).interval(), Duration::from_secs(1));
    }

    #[tokio::test]
    async fn acquire_spaces_slots() {
        let mut budget = RateBudget::per_second(100);
        let start = Instant::now();
        for _ in 0..5 {
            budget.acquire().await;
        }
        // First slot is immediate, the next four wait one interval each.
        assert!(start.elapsed() >= Duration::from_millis(40));
    }

    #[tokio::test]
    async fn defer_pushes_the_next_slot() {
        let mut budget = RateBudget::per_second(100);
        budget.acquire().await;
        budget.defer(Duration::from_millis(150));
        // A shorter deferral never pulls the slot forward.
        budget.defer(Duration::from_millis(5));

        let start = Instant::now();
        budget.acquire().await;
        assert!(start.elapsed() >= Duration::from_millis(140));
    }
}
