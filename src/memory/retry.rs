//! Retrying with-transaction loop.
//!
//! Follows the convenient transaction API of MongoDB drivers: the whole
//! attempt is retried on `TransientTransactionError`, only the commit is
//! retried on `UnknownTransactionCommitResult`, and nothing is retried once
//! the time limit has elapsed.

use crate::driver::{DriverResult, Session, TransactionBody, TransactionOptions};
use log::{debug, warn};
use rand::Rng;
use std::time::{Duration, Instant};

/// Default time limit for retrying a transaction.
pub const DEFAULT_RETRY_TIME_LIMIT: Duration = Duration::from_secs(120);

const BACKOFF_INITIAL: Duration = Duration::from_millis(5);
const BACKOFF_MAX: Duration = Duration::from_millis(500);
const BACKOFF_GROWTH: f64 = 1.5;

/// Jittered exponential backoff before retry number `retry` (0-based).
pub fn backoff(retry: u32) -> Duration {
    let exponent = i32::try_from(retry).unwrap_or(i32::MAX);
    let ceiling = (BACKOFF_INITIAL.as_secs_f64() * BACKOFF_GROWTH.powi(exponent))
        .min(BACKOFF_MAX.as_secs_f64());
    Duration::from_secs_f64(rand::thread_rng().gen::<f64>() * ceiling)
}

/// Runs `body` in a transaction on `session` and commits, retrying on
/// transient failures until `time_limit` has elapsed.
pub fn run_with_retry<S: Session>(
    session: &mut S,
    body: &mut TransactionBody<'_, S>,
    options: &TransactionOptions,
    time_limit: Duration,
) -> DriverResult<()> {
    let started = Instant::now();
    let mut attempt: u32 = 0;

    'transaction: loop {
        if attempt > 0 {
            std::thread::sleep(backoff(attempt - 1));
        }
        attempt += 1;

        // A rejected start (e.g. a transaction already open) is not retried
        // and leaves the session untouched.
        session.start_transaction(options)?;

        if let Err(err) = body(&mut *session) {
            if session.is_in_transaction() {
                if let Err(abort_err) = session.abort_transaction() {
                    warn!("Failed to abort transaction on {}: {}", session.id(), abort_err);
                }
            }
            if err.is_transient() && started.elapsed() < time_limit {
                debug!(
                    "Transient error on {} (attempt {}), retrying: {}",
                    session.id(),
                    attempt,
                    err
                );
                continue 'transaction;
            }
            return Err(err);
        }

        // The body ended the transaction itself.
        if !session.is_in_transaction() {
            return Ok(());
        }

        loop {
            match session.commit_transaction() {
                Ok(()) => return Ok(()),
                Err(err)
                    if err.is_unknown_commit_result()
                        && !err.is_max_time_expired()
                        && started.elapsed() < time_limit =>
                {
                    debug!("Unknown commit result on {}, retrying commit: {}", session.id(), err);
                }
                Err(err) if err.is_transient() && started.elapsed() < time_limit => {
                    debug!(
                        "Transient commit error on {} (attempt {}), retrying: {}",
                        session.id(),
                        attempt,
                        err
                    );
                    continue 'transaction;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
