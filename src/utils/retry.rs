//! Retry utilities: backoff builders and retryable error classification.
//!
//! Uses `backon` for exponential backoff with jitter.

use std::time::Duration;

use backon::ExponentialBuilder;

/// Backoff for opening a store another process holds locked.
///
/// - Min delay: 100ms
/// - Max delay: 5s
/// - Max attempts: 10
/// - Jitter enabled
pub fn connection_backoff() -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(100))
        .with_max_delay(Duration::from_secs(5))
        .with_max_times(10)
        .with_jitter()
}

/// Determines if a storage error is retryable (lock contention only).
///
/// Retryable:
/// - SQLITE_BUSY and SQLITE_LOCKED, including their extended codes
/// - Pool acquire timeouts
pub fn is_busy(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => db
            .code()
            .and_then(|code| code.parse::<i32>().ok())
            .is_some_and(|code| matches!(code & 0xff, 5 | 6)),
        sqlx::Error::PoolTimedOut => true,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use backon::BackoffBuilder;

    #[test]
    fn test_connection_backoff_is_bounded() {
        let delays: Vec<Duration> = connection_backoff().build().collect();
        assert_eq!(delays.len(), 10);
        assert!(delays[0] >= Duration::from_millis(100));
    }

    #[test]
    fn test_is_busy() {
        assert!(is_busy(&sqlx::Error::PoolTimedOut));
        assert!(!is_busy(&sqlx::Error::RowNotFound));
        assert!(!is_busy(&sqlx::Error::PoolClosed));
    }
}
