//! Injectable locking capability.
//!
//! Callers who want cluster-state locking folded into their own monitoring
//! scheme supply a [`LockHooks`] implementation at cluster creation; the
//! default is backed by `parking_lot`. Critical sections guarded this way
//! are short-held and never span network I/O.

use parking_lot::lock_api::RawMutex as _;
use std::cell::UnsafeCell;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

/// A raw mutual-exclusion primitive. `unlock` is only called after a
/// matching `lock` on the same thread of execution.
pub trait RawLock: Send + Sync {
    fn lock(&self);
    fn unlock(&self);
}

/// Factory for raw locks. The equivalent of lock allocation hooks:
/// allocate is `alloc`, free is `Drop`.
pub trait LockHooks: Send + Sync {
    fn alloc(&self) -> Box<dyn RawLock>;
}

/// Default lock implementation over `parking_lot`.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultLockHooks;

impl LockHooks for DefaultLockHooks {
    fn alloc(&self) -> Box<dyn RawLock> {
        Box::new(DefaultLock(parking_lot::RawMutex::INIT))
    }
}

struct DefaultLock(parking_lot::RawMutex);

impl RawLock for DefaultLock {
    fn lock(&self) {
        self.0.lock();
    }

    fn unlock(&self) {
        // SAFETY: RawLock's contract pairs every unlock with a prior lock.
        unsafe { self.0.unlock() }
    }
}

/// Data guarded by an injected raw lock, with an RAII guard.
pub struct Guarded<T> {
    lock: Box<dyn RawLock>,
    cell: UnsafeCell<T>,
}

// SAFETY: access to the cell is serialized by the raw lock; T crossing
// threads inside requires T: Send.
unsafe impl<T: Send> Send for Guarded<T> {}
unsafe impl<T: Send> Sync for Guarded<T> {}

impl<T> Guarded<T> {
    /// Wrap `value`, allocating its lock from `hooks`.
    pub fn new(hooks: &Arc<dyn LockHooks>, value: T) -> Self {
        Self {
            lock: hooks.alloc(),
            cell: UnsafeCell::new(value),
        }
    }

    /// Acquire the lock; released when the guard drops.
    pub fn lock(&self) -> GuardedRef<'_, T> {
        self.lock.lock();
        GuardedRef { owner: self }
    }
}

/// RAII guard over a [`Guarded`] value.
pub struct GuardedRef<'a, T> {
    owner: &'a Guarded<T>,
}

impl<T> Deref for GuardedRef<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: the lock is held for the guard's lifetime.
        unsafe { &*self.owner.cell.get() }
    }
}

impl<T> DerefMut for GuardedRef<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: the lock is held for the guard's lifetime.
        unsafe { &mut *self.owner.cell.get() }
    }
}

impl<T> Drop for GuardedRef<'_, T> {
    fn drop(&mut self) {
        self.owner.lock.unlock();
    }
}
