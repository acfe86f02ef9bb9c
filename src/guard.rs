use std::time::Duration;

use nix::errno::Errno;
use tracing::{debug, error, warn};

use crate::error::{Error, Result};
use crate::signal::Shutdown;
use crate::sync::{deadline_after, Acquire, NamedSemaphore};

/// Added to the error counter for each acquisition timeout.
pub const ERROR_STEP: u32 = 100;
/// Counter value at which the guard gives up.
pub const ERROR_CEILING: u32 = 1000;

/// Bounded count of recent semaphore timeouts. Successes slowly pay it back.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct ErrorCounter {
    value: u32,
}

impl ErrorCounter {
    pub fn record_timeout(&mut self) {
        self.value = (self.value + ERROR_STEP).min(ERROR_CEILING);
    }

    pub fn record_success(&mut self) {
        self.value = self.value.saturating_sub(1);
    }

    pub fn value(&self) -> u32 {
        self.value
    }

    pub fn exhausted(&self) -> bool {
        self.value >= ERROR_CEILING
    }
}

/// Longest single wait of a blocking acquire before the termination flag is
/// looked at again. Handlers installed with `SA_RESTART` may resume an
/// untimed `sem_wait` instead of interrupting it.
const BLOCKING_SLICE: Duration = Duration::from_millis(100);

enum Outcome {
    Held,
    /// Timed out; the body runs without the semaphore.
    Unheld,
    Skipped,
}

/// Posts the semaphore when dropped.
struct Held<'a>(&'a NamedSemaphore);

impl Drop for Held<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.0.post() {
            error!("failed to release semaphore '{}': {}", self.0.name(), e);
        }
    }
}

/// Brackets each tick with a semaphore acquire and release.
pub struct SemaphoreGuard {
    semaphore: NamedSemaphore,
    max_wait: Option<Duration>,
    shutdown: Shutdown,
    errors: ErrorCounter,
}

impl SemaphoreGuard {
    /// Without `max_wait` every acquire blocks until the semaphore is free.
    pub fn new(semaphore: NamedSemaphore, max_wait: Option<Duration>, shutdown: Shutdown) -> Self {
        SemaphoreGuard {
            semaphore,
            max_wait,
            shutdown,
            errors: ErrorCounter::default(),
        }
    }

    pub fn errors(&self) -> ErrorCounter {
        self.errors
    }

    /// True once enough timeouts piled up that the caller should stop.
    pub fn exhausted(&self) -> bool {
        self.errors.exhausted()
    }

    /// Runs `body` while holding the semaphore.
    ///
    /// With a maximum wait, a timed out acquire still runs `body`, just
    /// without the semaphore. Returns `None` if a termination request cut the
    /// acquire short; `body` did not run then.
    pub fn acquire_then<T, F>(&mut self, body: F) -> Result<Option<T>>
    where
        F: FnOnce() -> T,
    {
        let outcome = match self.max_wait {
            None => self.wait_blocking()?,
            Some(max_wait) => self.wait_bounded(max_wait)?,
        };

        let _release = match outcome {
            Outcome::Held => Some(Held(&self.semaphore)),
            Outcome::Unheld => None,
            Outcome::Skipped => return Ok(None),
        };
        Ok(Some(body()))
    }

    fn wait_blocking(&self) -> Result<Outcome> {
        loop {
            let deadline = deadline_after(BLOCKING_SLICE).map_err(|e| self.op_error(e))?;
            match self
                .semaphore
                .wait_until(&deadline)
                .map_err(|e| self.op_error(e))?
            {
                Acquire::Acquired => return Ok(Outcome::Held),
                Acquire::TimedOut | Acquire::Interrupted if self.shutdown.is_requested() => {
                    debug!("semaphore wait cut short by termination request");
                    return Ok(Outcome::Skipped);
                }
                Acquire::TimedOut | Acquire::Interrupted => continue,
            }
        }
    }

    fn wait_bounded(&mut self, max_wait: Duration) -> Result<Outcome> {
        let deadline = deadline_after(max_wait).map_err(|e| self.op_error(e))?;
        loop {
            match self
                .semaphore
                .wait_until(&deadline)
                .map_err(|e| self.op_error(e))?
            {
                Acquire::Acquired => {
                    self.errors.record_success();
                    return Ok(Outcome::Held);
                }
                Acquire::TimedOut => {
                    self.errors.record_timeout();
                    warn!(
                        "failed to acquire semaphore '{}' within {:?}, writing without it",
                        self.semaphore.name(),
                        max_wait
                    );
                    if self.errors.exhausted() {
                        error!(
                            "too many errors on semaphore '{}', terminating",
                            self.semaphore.name()
                        );
                    }
                    return Ok(Outcome::Unheld);
                }
                Acquire::Interrupted if self.shutdown.is_requested() => {
                    debug!("semaphore wait interrupted by termination request");
                    return Ok(Outcome::Skipped);
                }
                Acquire::Interrupted => continue,
            }
        }
    }

    fn op_error(&self, source: Errno) -> Error {
        Error::SemaphoreOp {
            name: self.semaphore.name().to_string(),
            source,
        }
    }
}
