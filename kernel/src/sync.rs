//! Synchronization primitives
//!
//! The subsystem's shared state sits behind [`spin::Mutex`] guards. Inode
//! data additionally uses [`SleepLock`], the long-hold lock acquired at the
//! subsystem's only suspension points (file-backed page-in and file-backed
//! mmap). In the hosted machine model no one actually sleeps, but the
//! acquisition points are the same as on real hardware so the lock discipline
//! carries over.

use spin::{Mutex, MutexGuard};

/// A lock intended to be held across an operation that may block, such as a
/// disk read.
///
/// Lock ordering: address space, then frame pool, then `SleepLock`, always
/// in that order. When more than one inode lock is needed they are acquired
/// in inode-number order.
pub struct SleepLock<T> {
    inner: Mutex<T>,
}

impl<T> SleepLock<T> {
    pub const fn new(value: T) -> Self {
        Self {
            inner: Mutex::new(value),
        }
    }

    /// Acquire the lock, blocking until it is available.
    pub fn lock(&self) -> MutexGuard<'_, T> {
        self.inner.lock()
    }
}
