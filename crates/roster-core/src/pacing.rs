use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::{sleep_until, Instant};

/// Enforces a fixed minimum spacing between remote calls.
///
/// The first call goes through immediately; every later call waits until
/// `interval` has passed since the previous slot.
#[derive(Debug)]
pub struct Pacer {
    interval: Duration,
    next_slot: Mutex<Instant>,
}

impl Pacer {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            next_slot: Mutex::new(Instant::now()),
        }
    }

    pub async fn pace(&self) {
        let ready_at = {
            let mut next = self.next_slot.lock().await;
            let slot = (*next).max(Instant::now());
            *next = slot + self.interval;
            slot
        };
        if ready_at > Instant::now() {
            sleep_until(ready_at).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn spaces_consecutive_calls() {
        let pacer = Pacer::new(Duration::from_millis(500));
        let started = Instant::now();
        pacer.pace().await;
        assert!(started.elapsed() < Duration::from_millis(1));
        pacer.pace().await;
        pacer.pace().await;
        assert!(started.elapsed() >= Duration::from_millis(1000));
    }

    #[tokio::test]
    async fn zero_interval_never_waits() {
        let pacer = Pacer::new(Duration::ZERO);
        for _ in 0..10 {
            pacer.pace().await;
        }
    }
}
