//! Defines the [`RetryPolicy`] trait and related types.

use async_trait::async_trait;

use crate::error::RegistryError;

/// Policy that determines whether a registry operation should be retried.
#[async_trait]
pub trait RetryPolicy: Send + 'static {
    /// Type of error produced by this policy.
    type Error: Send;

    /// Determines whether another attempt should be made.
    ///
    /// The given `error` is the reason the latest attempt failed. Returning
    /// `Ok(())` implies that another attempt should be made.
    async fn eval(&mut self, error: RegistryError) -> Result<(), Self::Error>;
}

#[async_trait]
impl<E: Send + 'static> RetryPolicy for Box<dyn RetryPolicy<Error = E> + Send> {
    type Error = E;

    async fn eval(&mut self, error: RegistryError) -> Result<(), Self::Error> {
        let p = &mut **self;
        p.eval(error).await
    }
}

/// Implementation of [`RetryPolicy`] that never retries.
#[derive(Clone, Copy, Debug, Default)]
pub struct DoNotRetry;

#[async_trait]
impl RetryPolicy for DoNotRetry {
    type Error = RegistryError;

    async fn eval(&mut self, err: RegistryError) -> Result<(), Self::Error> {
        Err(err)
    }
}

/// Retries up to a fixed number of times, immediately.
#[derive(Clone, Copy, Debug)]
pub struct RetryTimes(usize);

impl RetryTimes {
    pub fn new(retries: usize) -> Self {
        Self(retries)
    }
}

#[async_trait]
impl RetryPolicy for RetryTimes {
    type Error = AbortedError;

    async fn eval(&mut self, err: RegistryError) -> Result<(), Self::Error> {
        if self.0 > 0 && err.is_retryable() {
            self.0 -= 1;
            Ok(())
        } else {
            Err(AbortedError(err))
        }
    }
}

/// Operation was not retried.
#[derive(Debug, thiserror::Error)]
#[error("operation was aborted")]
pub struct AbortedError(#[source] pub RegistryError);

impl AbortedError {
    pub fn into_inner(self) -> RegistryError {
        self.0
    }
}

#[cfg(feature = "backoff")]
pub use cfg_backoff::RetryWithBackoff;

#[cfg(feature = "backoff")]
mod cfg_backoff {
    use async_trait::async_trait;
    use backoff::backoff::Backoff;
    use backoff::exponential::ExponentialBackoff;

    use crate::error::RegistryError;

    use super::AbortedError;
    use super::RetryPolicy;

    /// Retry policy based on a [`Backoff`] implementation.
    ///
    /// The default randomizes intervals, which spreads out contenders that
    /// failed each other's acquisitions.
    pub struct RetryWithBackoff<B>(B);

    impl<C> Default for RetryWithBackoff<ExponentialBackoff<C>>
    where
        C: backoff::Clock + Default + Send + 'static,
    {
        fn default() -> Self {
            Self(ExponentialBackoff::default())
        }
    }

    impl<B: Backoff> From<B> for RetryWithBackoff<B> {
        fn from(backoff: B) -> Self {
            Self(backoff)
        }
    }

    #[async_trait]
    impl<B: Backoff + Send + 'static> RetryPolicy for RetryWithBackoff<B> {
        type Error = AbortedError;

        async fn eval(&mut self, err: RegistryError) -> Result<(), Self::Error> {
            if !err.is_retryable() {
                return Err(AbortedError(err));
            }

            if let Some(d) = self.0.next_backoff() {
                futures_timer::Delay::new(d).await;
                Ok(())
            } else {
                Err(AbortedError(err))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use futures::executor::block_on;

    use super::DoNotRetry;
    use super::RetryPolicy;
    use super::RetryTimes;
    use crate::error::LockError;
    use crate::error::RegistryError;

    fn race_lost() -> RegistryError {
        LockError::RaceLost {
            key: "k-lock".to_string(),
        }
        .into()
    }

    #[test]
    fn test_do_not_retry() {
        let mut policy = DoNotRetry;

        assert!(block_on(policy.eval(race_lost())).is_err());
    }

    #[test]
    fn test_retry_times() {
        let mut policy = RetryTimes::new(2);

        block_on(async {
            assert!(policy.eval(race_lost()).await.is_ok());
            assert!(policy.eval(race_lost()).await.is_ok());

            let err = policy.eval(race_lost()).await.unwrap_err();
            assert!(matches!(
                err.into_inner(),
                RegistryError::LockFailed(LockError::RaceLost { .. })
            ));
        });
    }
}
