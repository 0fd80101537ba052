use std::sync::{Mutex, MutexGuard, TryLockError};
use std::thread;
use std::time::Duration;

/// Default pause between lock attempts.
pub const DEFAULT_LOCK_INTERVAL: Duration = Duration::from_nanos(10);

/// Scoped lock acquired by retrying with a short sleep instead of parking.
///
/// Waiters never block inside the OS mutex; they poll `try_lock` and sleep
/// `interval` between attempts. Released when the guard drops. A panic while
/// the lock is held does not poison it for later callers.
pub struct SpinLock<T> {
    inner: Mutex<T>,
    interval: Duration,
}

impl<T> SpinLock<T> {
    /// Create a lock with the default retry interval.
    pub fn new(value: T) -> Self {
        Self::with_interval(value, DEFAULT_LOCK_INTERVAL)
    }

    /// Create a lock with an explicit retry interval.
    pub fn with_interval(value: T, interval: Duration) -> Self {
        Self {
            inner: Mutex::new(value),
            interval,
        }
    }

    /// Acquire the lock, sleeping `interval` between attempts.
    pub fn lock(&self) -> MutexGuard<'_, T> {
        loop {
            if let Some(guard) = self.try_lock() {
                return guard;
            }
            thread::sleep(self.interval);
        }
    }

    /// Acquire the lock only if it is free right now.
    pub fn try_lock(&self) -> Option<MutexGuard<'_, T>> {
        match self.inner.try_lock() {
            Ok(guard) => Some(guard),
            Err(TryLockError::Poisoned(poisoned)) => Some(poisoned.into_inner()),
            Err(TryLockError::WouldBlock) => None,
        }
    }

    /// Retry interval.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Mutable access without locking; requires exclusive ownership.
    pub fn get_mut(&mut self) -> &mut T {
        match self.inner.get_mut() {
            Ok(value) => value,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Consume the lock and return the protected value.
    pub fn into_inner(self) -> T {
        match self.inner.into_inner() {
            Ok(value) => value,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl<T: Default> Default for SpinLock<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T> std::fmt::Debug for SpinLock<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpinLock")
            .field("interval", &self.interval)
            .field("locked", &self.inner.try_lock().is_err())
            .finish()
    }
}
