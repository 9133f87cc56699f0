//! Test helpers for timing-sensitive tests
//!
//! Disco behavior is driven by real timers, so assertions poll for a
//! condition instead of sleeping a fixed amount.

use std::time::Duration;
use tokio::time::Instant;

/// Check if running in a CI environment
///
/// Checks common CI environment variables.
pub fn is_ci_environment() -> bool {
    std::env::var("CI").is_ok()
        || std::env::var("GITHUB_ACTIONS").is_ok()
        || std::env::var("GITLAB_CI").is_ok()
}

/// Get CI-adjusted timeout duration
///
/// Returns a timeout that's longer in CI environments to account for
/// resource contention and slower machines.
pub fn ci_timeout(base_timeout: Duration) -> Duration {
    if is_ci_environment() {
        base_timeout.mul_f32(3.0)
    } else {
        base_timeout.mul_f32(1.5)
    }
}

/// Poll `condition` every 10ms until it holds or `limit` (CI-adjusted) passes.
///
/// Returns whether the condition was observed.
pub async fn wait_until<F>(limit: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = Instant::now() + ci_timeout(limit);

    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_ci_timeout() {
        let base = Duration::from_secs(10);
        let adjusted = ci_timeout(base);

        if is_ci_environment() {
            assert_eq!(adjusted, Duration::from_secs(30));
        } else {
            assert_eq!(adjusted, Duration::from_secs(15));
        }
    }

    #[tokio::test]
    async fn test_wait_until_observes_condition() {
        let polls = Arc::new(AtomicUsize::new(0));
        let counter = polls.clone();

        let seen = wait_until(Duration::from_secs(1), move || {
            counter.fetch_add(1, Ordering::SeqCst) >= 3
        })
        .await;

        assert!(seen);
        assert_eq!(polls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_wait_until_gives_up() {
        let start = Instant::now();
        assert!(!wait_until(Duration::from_millis(50), || false).await);
        assert!(start.elapsed() >= Duration::from_millis(50));
    }
}
