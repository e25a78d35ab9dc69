//! Timed lock acquisition on top of [`StorageLock`].
//!
//! Two locks protect an index directory:
//!
//! - `write.lock` is held by the single writer for its whole lifetime, or by a
//!   reader from its first deletion until it closes.
//! - `commit.lock` is held briefly around every change to the `segments` file
//!   and around opening a reader, so readers never observe a half-committed
//!   segment list.
//!
//! Acquisition polls: one immediate attempt, then a retry every
//! `poll_interval` until `timeout` has elapsed. At least one retry happens
//! even when the timeout is shorter than the poll interval.

use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{FolioError, Result};
use crate::storage::{Storage, StorageLock};

/// Name of the lock held by the index writer.
pub const WRITE_LOCK_NAME: &str = "write.lock";

/// Name of the lock guarding segment list commits.
pub const COMMIT_LOCK_NAME: &str = "commit.lock";

/// Default interval between lock attempts.
pub const LOCK_POLL_INTERVAL_MS: u64 = 1000;

/// Timeouts used when obtaining the index locks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockTimeouts {
    /// How long to wait for `write.lock` (milliseconds).
    pub write_lock_timeout_ms: u64,
    /// How long to wait for `commit.lock` (milliseconds).
    pub commit_lock_timeout_ms: u64,
    /// Delay between attempts (milliseconds).
    pub poll_interval_ms: u64,
}

impl Default for LockTimeouts {
    fn default() -> Self {
        LockTimeouts {
            write_lock_timeout_ms: 1000,
            commit_lock_timeout_ms: 10_000,
            poll_interval_ms: LOCK_POLL_INTERVAL_MS,
        }
    }
}

impl LockTimeouts {
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_lock_timeout_ms)
    }

    pub fn commit_timeout(&self) -> Duration {
        Duration::from_millis(self.commit_lock_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

/// Obtain `lock`, waiting up to `timeout`.
pub fn obtain(lock: &mut dyn StorageLock, timeout: Duration, poll_interval: Duration) -> Result<()> {
    if lock.try_obtain()? {
        return Ok(());
    }

    let deadline = Instant::now() + timeout;
    loop {
        let now = Instant::now();
        let pause = poll_interval.min(deadline.saturating_duration_since(now));
        debug!(lock = lock.name(), ?pause, "lock busy, waiting");
        thread::sleep(pause);

        if lock.try_obtain()? {
            return Ok(());
        }
        if Instant::now() >= deadline {
            return Err(FolioError::lock_obtain_failed(lock.name()));
        }
    }
}

/// An obtained lock, released when dropped.
#[derive(Debug)]
pub struct LockGuard {
    lock: Box<dyn StorageLock>,
}

impl LockGuard {
    /// Obtain the named lock in `storage`, waiting up to `timeout`.
    pub fn obtain(
        storage: &dyn Storage,
        name: &str,
        timeout: Duration,
        poll_interval: Duration,
    ) -> Result<Self> {
        let mut lock = storage.lock_manager().make_lock(name);
        obtain(lock.as_mut(), timeout, poll_interval)?;
        Ok(LockGuard { lock })
    }

    /// Name of the held lock.
    pub fn name(&self) -> &str {
        self.lock.name()
    }

    /// Release the lock explicitly, surfacing any error.
    pub fn release(mut self) -> Result<()> {
        self.lock.release()
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let _ = self.lock.release();
    }
}

/// Run `body` while holding the named lock. The lock is released whether
/// or not `body` succeeds.
pub fn with_lock<T>(
    storage: &dyn Storage,
    name: &str,
    timeout: Duration,
    poll_interval: Duration,
    body: impl FnOnce() -> Result<T>,
) -> Result<T> {
    let guard = LockGuard::obtain(storage, name, timeout, poll_interval)?;
    let result = body();
    let released = guard.release();
    let value = result?;
    released?;
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryStorage;

    const SHORT: Duration = Duration::from_millis(20);
    const POLL: Duration = Duration::from_millis(5);

    #[test]
    fn test_guard_releases_on_drop() {
        let storage = MemoryStorage::new_default();
        {
            let guard = LockGuard::obtain(&storage, COMMIT_LOCK_NAME, SHORT, POLL).unwrap();
            assert_eq!(guard.name(), COMMIT_LOCK_NAME);
            assert!(storage.lock_manager().lock_exists(COMMIT_LOCK_NAME));
        }
        assert!(!storage.lock_manager().lock_exists(COMMIT_LOCK_NAME));
    }

    #[test]
    fn test_obtain_times_out() {
        let storage = MemoryStorage::new_default();
        let _held = LockGuard::obtain(&storage, WRITE_LOCK_NAME, SHORT, POLL).unwrap();

        let started = Instant::now();
        let err = LockGuard::obtain(&storage, WRITE_LOCK_NAME, SHORT, POLL).unwrap_err();
        assert!(err.is_lock_timeout());
        assert!(started.elapsed() >= SHORT);
    }

    #[test]
    fn test_obtain_after_release_by_other_thread() {
        let storage = std::sync::Arc::new(MemoryStorage::new_default());
        let held = LockGuard::obtain(storage.as_ref(), WRITE_LOCK_NAME, SHORT, POLL).unwrap();

        let waiter = {
            let storage = std::sync::Arc::clone(&storage);
            thread::spawn(move || {
                LockGuard::obtain(
                    storage.as_ref(),
                    WRITE_LOCK_NAME,
                    Duration::from_secs(5),
                    POLL,
                )
                .map(|_| ())
            })
        };

        thread::sleep(Duration::from_millis(30));
        held.release().unwrap();
        waiter.join().unwrap().unwrap();
    }

    #[test]
    fn test_with_lock_releases_on_error() {
        let storage = MemoryStorage::new_default();

        let result: Result<()> = with_lock(&storage, COMMIT_LOCK_NAME, SHORT, POLL, || {
            Err(FolioError::other("boom"))
        });
        assert!(result.is_err());
        assert!(!storage.lock_manager().lock_exists(COMMIT_LOCK_NAME));

        let value = with_lock(&storage, COMMIT_LOCK_NAME, SHORT, POLL, || Ok(5)).unwrap();
        assert_eq!(value, 5);
    }
}
