//! Async baud-rate delay.

use labsim_core::transmission_time;
use tokio::time::sleep;

/// Suspends the calling task for as long as `nb_bytes` would take at
/// `baudrate`.  Returns immediately when the baud rate is unset or zero.
///
/// Only the calling task waits; other connections keep running.
pub async fn delay(nb_bytes: usize, baudrate: Option<u32>) {
    if let Some(duration) = transmission_time(nb_bytes, baudrate) {
        sleep(duration).await;
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn test_delay_1000_bytes_at_9600_baud() {
        // Arrange
        let start = Instant::now();

        // Act
        delay(1000, Some(9600)).await;

        // Assert: 1000 / 960 s, rounded to the timer resolution.
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(1041), "{elapsed:?}");
        assert!(elapsed <= Duration::from_millis(1045), "{elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_without_baudrate_returns_immediately() {
        let start = Instant::now();
        delay(1000, None).await;
        delay(1000, Some(0)).await;
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_does_not_block_other_tasks() {
        // Arrange: a slow delay and a fast one started together.
        let start = Instant::now();
        let slow = tokio::spawn(delay(9600, Some(9600)));
        let fast = tokio::spawn(async move {
            delay(96, Some(9600)).await;
            start.elapsed()
        });

        // Act
        let fast_elapsed = fast.await.expect("fast task");
        slow.await.expect("slow task");

        // Assert: the short delay finished long before the ten-second one.
        assert!(fast_elapsed < Duration::from_secs(1), "{fast_elapsed:?}");
        assert!(start.elapsed() >= Duration::from_secs(10));
    }
}
