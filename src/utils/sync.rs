//! Utilities for concurrency.

use std::sync::{Mutex as StdMutex, RwLock as StdRwLock};
use std::thread;
use std::time::{Duration, Instant};


pub use std::sync::{MutexGuard, RwLockReadGuard, RwLockWriteGuard};


//------------ RwLock --------------------------------------------------------

/// A wrapper around a std read-write lock that panics if it is poisoned.
#[derive(Debug, Default)]
pub struct RwLock<T: ?Sized>(StdRwLock<T>);

impl<T> RwLock<T> {
    /// Creates a new read/write lock in unlocked state.
    pub fn new(t: T) -> Self {
        RwLock(StdRwLock::new(t))
    }
}

impl<T: ?Sized> RwLock<T> {
    /// Acquires the lock for shared read access.
    ///
    /// The calling thread will be blocked until there are no more writers
    /// holding the lock. Multiple readers may access the lock concurrently.
    ///
    /// # Panics
    ///
    /// The method panics if the lock is poisoned, i.e., if a writer panicked
    /// while holding the write lock.
    pub fn read(&self) -> RwLockReadGuard<T> {
        self.0.read().expect("acquiring a poisoned rwlock")
    }

    /// Acquires the lock for exclusive write access.
    ///
    /// The calling thread will be blocked until there are no more read or
    /// write locks.
    ///
    /// # Panics
    ///
    /// The method panics if the lock is poisoned, i.e., if a writer panicked
    /// while holding the write lock.
    pub fn write(&self) -> RwLockWriteGuard<T> {
        self.0.write().expect("acquiring a poisoned rwlock")
    }
}


//------------ Mutex ---------------------------------------------------------

/// A wrapper around a std mutex that panics if it is poisoned.
#[derive(Debug, Default)]
pub struct Mutex<T: ?Sized>(StdMutex<T>);

impl<T> Mutex<T> {
    /// Creates a new mutex in unlocked state.
    pub fn new(t: T) -> Self {
        Mutex(StdMutex::new(t))
    }
}

impl<T: ?Sized> Mutex<T> {
    /// Acquires the mutex, blocking until it is available.
    ///
    /// # Panics
    ///
    /// The method panics if the mutex is poisoned, i.e., if a thread
    /// panicked while holding it.
    pub fn lock(&self) -> MutexGuard<T> {
        self.0.lock().expect("acquiring a poisoned mutex")
    }

    /// Tries to acquire the mutex, giving up after `timeout`.
    ///
    /// Returns `None` if the mutex could not be acquired within the given
    /// duration. The wait is a bounded spin with short sleeps which is fine
    /// for the rare case of a stalled consumer; uncontended acquisition
    /// succeeds on the first attempt.
    ///
    /// # Panics
    ///
    /// The method panics if the mutex is poisoned.
    pub fn lock_timeout(&self, timeout: Duration) -> Option<MutexGuard<T>> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.0.try_lock() {
                Ok(guard) => return Some(guard),
                Err(std::sync::TryLockError::Poisoned(_)) => {
                    panic!("acquiring a poisoned mutex")
                }
                Err(std::sync::TryLockError::WouldBlock) => { }
            }
            if Instant::now() >= deadline {
                return None
            }
            thread::sleep(Duration::from_millis(1));
        }
    }
}
