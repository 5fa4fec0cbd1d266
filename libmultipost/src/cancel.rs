//! Cooperative cancellation
//!
//! A [`CancellationToken`] is handed to every adapter call that may touch the
//! network. Adapters call [`ensure_not_cancelled`] immediately before each
//! request; a request already in flight is allowed to finish.

use std::time::Duration;

pub use tokio_util::sync::CancellationToken;

use crate::error::WebsiteError;

/// Fail with [`WebsiteError::Cancelled`] once `token` has been signalled
pub fn ensure_not_cancelled(token: &CancellationToken) -> Result<(), WebsiteError> {
    if token.is_cancelled() {
        Err(WebsiteError::Cancelled)
    } else {
        Ok(())
    }
}

/// Sleep for `duration` unless the token is signalled first
pub async fn cancellable_sleep(token: &CancellationToken, duration: Duration) -> Result<(), WebsiteError> {
    if duration.is_zero() {
        return ensure_not_cancelled(token);
    }
    tokio::select! {
        _ = token.cancelled() => Err(WebsiteError::Cancelled),
        _ = tokio::time::sleep(duration) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_token_passes() {
        let token = CancellationToken::new();
        assert!(ensure_not_cancelled(&token).is_ok());
    }

    #[test]
    fn test_cancelled_token_fails_every_checkpoint() {
        let token = CancellationToken::new();
        token.cancel();
        for _ in 0..3 {
            assert!(matches!(
                ensure_not_cancelled(&token),
                Err(WebsiteError::Cancelled)
            ));
        }
    }

    #[test]
    fn test_child_token_sees_parent_cancel() {
        let parent = CancellationToken::new();
        let child = parent.child_token();
        parent.cancel();
        assert!(ensure_not_cancelled(&child).is_err());
    }

    #[tokio::test]
    async fn test_cancellable_sleep_interrupted() {
        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });

        let start = std::time::Instant::now();
        let result = cancellable_sleep(&token, Duration::from_secs(30)).await;
        assert!(matches!(result, Err(WebsiteError::Cancelled)));
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_cancellable_sleep_completes() {
        let token = CancellationToken::new();
        assert!(cancellable_sleep(&token, Duration::from_millis(5)).await.is_ok());
    }
}
