use std::fmt;
use std::future::Future;
use std::time::Duration;

#[async_trait::async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait::async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Outcome of a single failed attempt.
#[derive(Debug)]
pub enum AttemptError {
    Retryable(anyhow::Error),
    Fatal(anyhow::Error),
}

#[derive(Debug)]
pub enum RetryError {
    Fatal(anyhow::Error),
    Exhausted { attempts: u32, last: anyhow::Error },
}

impl fmt::Display for RetryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryError::Fatal(err) => write!(f, "{err:#}"),
            RetryError::Exhausted { attempts, last } => {
                write!(f, "gave up after {attempts} attempts: {last:#}")
            }
        }
    }
}

impl std::error::Error for RetryError {}

/// Bounded retry with linear backoff: attempt `n` failing sleeps `base_interval * n`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_interval: Duration,
}

impl RetryPolicy {
    pub fn linear(max_attempts: u32, base_interval: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_interval,
        }
    }

    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_interval.saturating_mul(attempt)
    }

    pub async fn run<T, F, Fut, S>(&self, sleeper: &S, mut op: F) -> Result<T, RetryError>
    where
        S: Sleeper + ?Sized,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, AttemptError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(AttemptError::Fatal(err)) => return Err(RetryError::Fatal(err)),
                Err(AttemptError::Retryable(err)) => {
                    if attempt >= max_attempts {
                        return Err(RetryError::Exhausted {
                            attempts: attempt,
                            last: err,
                        });
                    }
                    let backoff = self.backoff(attempt);
                    tracing::warn!(attempt, max_attempts, ?backoff, error = %err, "attempt failed; retrying");
                    sleeper.sleep(backoff).await;
                }
            }
        }
    }
}
