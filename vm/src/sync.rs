//! Kernel lock with ownership checks.
//!
//! The thread layer's lock can answer "does the current thread hold me?". This
//! wraps `parking_lot::Mutex` with the same introspection so the paging code can
//! assert on it.

use std::{
    ops::{Deref, DerefMut},
    thread::{self, ThreadId},
};

use parking_lot::{Mutex, MutexGuard};

pub struct KernelLock<T> {
    inner: Mutex<T>,
    owner: Mutex<Option<ThreadId>>,
}

pub struct KernelLockGuard<'a, T> {
    guard: MutexGuard<'a, T>,
    owner: &'a Mutex<Option<ThreadId>>,
}

impl<T> KernelLock<T> {
    pub fn new(value: T) -> Self {
        KernelLock {
            inner: Mutex::new(value),
            owner: Mutex::new(None),
        }
    }

    /// Blocks until the lock is free. Re-acquiring on the owning thread is a bug.
    pub fn acquire(&self) -> KernelLockGuard<'_, T> {
        assert!(
            !self.is_held_by_current_thread(),
            "kernel lock re-acquired by its owner"
        );

        let guard = self.inner.lock();
        *self.owner.lock() = Some(thread::current().id());

        KernelLockGuard {
            guard,
            owner: &self.owner,
        }
    }

    pub fn is_held_by_current_thread(&self) -> bool {
        *self.owner.lock() == Some(thread::current().id())
    }
}

impl<'a, T> Deref for KernelLockGuard<'a, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<'a, T> DerefMut for KernelLockGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

impl<'a, T> Drop for KernelLockGuard<'a, T> {
    fn drop(&mut self) {
        // cleared while the data mutex is still held
        *self.owner.lock() = None;
    }
}
