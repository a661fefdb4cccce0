use std::future::Future;
use std::time::Duration;

use semindex_core::Error;

/// Result of a bounded initialisation loop.
#[derive(Debug)]
pub enum InitOutcome<T> {
    Ready { value: T, attempts: usize },
    Exhausted { attempts: usize, last_error: Error },
}

impl<T> InitOutcome<T> {
    pub fn into_result(self) -> Result<T, Error> {
        match self {
            InitOutcome::Ready { value, .. } => Ok(value),
            InitOutcome::Exhausted { attempts, last_error } => {
                Err(Error::Initialization(format!("gave up after {attempts} attempts: {last_error}")))
            }
        }
    }
}

/// Run `op` up to `max_attempts` times (at least once), doubling `backoff`
/// between failures.
pub async fn init_with_retry<T, F, Fut>(max_attempts: usize, backoff: Duration, mut op: F) -> InitOutcome<T>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<T, Error>>,
{
    let max_attempts = max_attempts.max(1);
    let mut delay = backoff;
    let mut attempt = 0;
    loop {
        attempt += 1;
        match op(attempt).await {
            Ok(value) => return InitOutcome::Ready { value, attempts: attempt },
            Err(error) if attempt >= max_attempts => {
                tracing::error!(%error, attempts = attempt, "initialisation exhausted");
                return InitOutcome::Exhausted { attempts: attempt, last_error: error };
            }
            Err(error) => {
                tracing::warn!(%error, attempt, delay_ms = delay.as_millis() as u64, "initialisation failed; retrying");
                tokio::time::sleep(delay).await;
                delay = delay.saturating_mul(2);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let outcome = init_with_retry(3, Duration::from_millis(1), |attempt| async move {
            if attempt < 3 { Err(Error::Initialization("not yet".into())) } else { Ok(attempt) }
        })
        .await;
        match outcome {
            InitOutcome::Ready { value, attempts } => {
                assert_eq!(value, 3);
                assert_eq!(attempts, 3);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn reports_last_error_when_exhausted() {
        let outcome: InitOutcome<()> = init_with_retry(2, Duration::from_millis(1), |attempt| async move {
            Err(Error::Initialization(format!("boom {attempt}")))
        })
        .await;
        match outcome {
            InitOutcome::Exhausted { attempts, last_error } => {
                assert_eq!(attempts, 2);
                assert!(last_error.to_string().contains("boom 2"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
