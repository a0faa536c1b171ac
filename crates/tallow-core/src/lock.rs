//! Execution lock
//!
//! One thread at a time may run script code. The lock owns the
//! [`ScriptState`]; holding an [`ExecGuard`] is the only way to reach it.
//! Calls that re-enter the engine while the lock is held (script calling
//! native code, native code calling a script handler) are handed the state
//! through a [`Reentry`](crate::dispatch::Reentry) scope and never acquire
//! the lock again. A thread acquiring a lock it already holds is a
//! discipline violation and panics with an [`InternalFault`].

use crate::state::{InternalFault, ScriptState};
use parking_lot::{ArcMutexGuard, Mutex, RawMutex};
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_THREAD_TOKEN: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static THREAD_TOKEN: u64 = NEXT_THREAD_TOKEN.fetch_add(1, Ordering::Relaxed);
}

fn current_thread_token() -> u64 {
    THREAD_TOKEN.with(|t| *t)
}

/// Mutual exclusion over the shared engine state
#[derive(Debug, Clone)]
pub struct ExecutionLock {
    state: Arc<Mutex<ScriptState>>,
    owner: Arc<AtomicU64>,
}

impl ExecutionLock {
    /// Wrap a state
    pub fn new(state: ScriptState) -> Self {
        Self {
            state: Arc::new(Mutex::new(state)),
            owner: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Block until the lock is free and take it
    ///
    /// # Panics
    ///
    /// Panics with an [`InternalFault`] if the calling thread already holds
    /// the lock.
    pub fn acquire(&self) -> ExecGuard {
        let token = current_thread_token();
        if self.owner.load(Ordering::Acquire) == token {
            InternalFault::raise("execution lock re-acquired by the thread holding it");
        }
        let guard = self.state.lock_arc();
        self.owner.store(token, Ordering::Release);
        ExecGuard {
            guard,
            owner: Arc::clone(&self.owner),
        }
    }

    /// Take the lock if it is free
    ///
    /// Returns `None` if another thread holds it; panics like
    /// [`acquire`](Self::acquire) if the calling thread does.
    pub fn try_acquire(&self) -> Option<ExecGuard> {
        let token = current_thread_token();
        if self.owner.load(Ordering::Acquire) == token {
            InternalFault::raise("execution lock re-acquired by the thread holding it");
        }
        let guard = self.state.try_lock_arc()?;
        self.owner.store(token, Ordering::Release);
        Some(ExecGuard {
            guard,
            owner: Arc::clone(&self.owner),
        })
    }

    /// Whether the calling thread holds the lock
    pub fn is_held_by_current_thread(&self) -> bool {
        self.owner.load(Ordering::Acquire) == current_thread_token()
    }

    /// Whether any thread holds the lock
    pub fn is_locked(&self) -> bool {
        self.state.is_locked()
    }

    /// Run `f` with the lock held
    pub fn with<R>(&self, f: impl FnOnce(&mut ScriptState) -> R) -> R {
        let mut guard = self.acquire();
        f(&mut guard)
    }
}

/// Scoped ownership of the execution lock
///
/// The lock is released when the guard is dropped.
pub struct ExecGuard {
    guard: ArcMutexGuard<RawMutex, ScriptState>,
    owner: Arc<AtomicU64>,
}

impl Deref for ExecGuard {
    type Target = ScriptState;

    fn deref(&self) -> &ScriptState {
        &self.guard
    }
}

impl DerefMut for ExecGuard {
    fn deref_mut(&mut self) -> &mut ScriptState {
        &mut self.guard
    }
}

impl std::fmt::Debug for ExecGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecGuard")
            .field("depth", &self.guard.depth())
            .finish()
    }
}

impl Drop for ExecGuard {
    fn drop(&mut self) {
        // Cleared before the mutex guard field unlocks
        self.owner.store(0, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::ScriptValue;
    use std::panic::{catch_unwind, AssertUnwindSafe};
    use std::thread;

    #[test]
    fn test_acquire_release() {
        let lock = ExecutionLock::new(ScriptState::new());
        {
            let mut guard = lock.acquire();
            guard.push(ScriptValue::Integer(1)).unwrap();
            assert!(lock.is_held_by_current_thread());
        }
        assert!(!lock.is_held_by_current_thread());
        assert!(!lock.is_locked());
        assert_eq!(lock.with(|s| s.depth()), 1);
    }

    #[test]
    fn test_reacquire_panics_with_internal_fault() {
        let lock = ExecutionLock::new(ScriptState::new());
        let _guard = lock.acquire();
        let payload = catch_unwind(AssertUnwindSafe(|| lock.acquire())).unwrap_err();
        let fault = payload.downcast_ref::<InternalFault>().unwrap();
        assert!(fault.message.contains("re-acquired"));
    }

    #[test]
    fn test_other_thread_waits() {
        let lock = ExecutionLock::new(ScriptState::new());
        let guard = lock.acquire();

        let other = lock.clone();
        let busy = thread::spawn(move || other.try_acquire().is_none())
            .join()
            .unwrap();
        assert!(busy);

        drop(guard);
        let other = lock.clone();
        let depth = thread::spawn(move || {
            let mut g = other.acquire();
            g.push(ScriptValue::Nil).unwrap();
            g.depth()
        })
        .join()
        .unwrap();
        assert_eq!(depth, 1);
    }
}
