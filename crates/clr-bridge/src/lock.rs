//! Guest Execution Lock
//!
//! The guest interpreter is single-threaded-cooperative: every bridge
//! operation runs while the embedding host holds the guest's global
//! execution lock. This module tracks that lock and provides the one
//! sanctioned yield point: blocking external I/O (assembly loading, path
//! resolution) may release the lock for its duration and re-acquires it
//! before any guest state is touched again.
//!
//! ## Strategies
//!
//! - **LockGuard**: RAII guard for lock acquisition (nestable)
//! - **LockState**: Thread-local lock state tracking
//! - **allow_threads**: cooperative release around a blocking call

use std::cell::Cell;
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tracing::trace;

use crate::error::{BridgeError, BridgeResult};

// ============================================================================
// Lock State Tracking
// ============================================================================

/// Global flag indicating if the guest runtime is initialized
static RUNTIME_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Counter for lock acquisitions (for debugging)
static LOCK_ACQUIRE_COUNT: AtomicU64 = AtomicU64::new(0);

/// Counter for cooperative releases around blocking calls
static LOCK_RELEASE_COUNT: AtomicU64 = AtomicU64::new(0);

thread_local! {
    /// Thread-local lock hold count
    static LOCK_DEPTH: Cell<usize> = const { Cell::new(0) };

    /// Thread-local flag for whether this thread holds the lock
    static LOCK_HELD: Cell<bool> = const { Cell::new(false) };
}

/// State of the execution lock for the current thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockState {
    /// Lock is not held by this thread
    NotHeld,
    /// Lock is held by this thread
    Held,
    /// Lock was already held when we entered (nested)
    NestedHeld,
}

impl LockState {
    /// Get the current lock state for this thread
    pub fn current() -> Self {
        match (Self::is_held(), Self::depth()) {
            (false, _) => LockState::NotHeld,
            (true, depth) if depth > 1 => LockState::NestedHeld,
            (true, _) => LockState::Held,
        }
    }

    /// Check if the lock is currently held
    pub fn is_held() -> bool {
        LOCK_HELD.with(|held| held.get())
    }

    /// Get the current nesting depth
    pub fn depth() -> usize {
        LOCK_DEPTH.with(|depth| depth.get())
    }
}

impl fmt::Display for LockState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockState::NotHeld => write!(f, "NotHeld"),
            LockState::Held => write!(f, "Held"),
            LockState::NestedHeld => write!(f, "NestedHeld"),
        }
    }
}

// ============================================================================
// Runtime Initialization
// ============================================================================

/// Mark the guest runtime as initialized. Idempotent.
pub fn initialize_runtime() {
    if !RUNTIME_INITIALIZED.swap(true, Ordering::AcqRel) {
        trace!("guest runtime initialized");
    }
}

/// Check if the guest runtime is initialized
pub fn is_runtime_initialized() -> bool {
    RUNTIME_INITIALIZED.load(Ordering::Acquire)
}

// ============================================================================
// LockGuard - RAII Lock Acquisition
// ============================================================================

/// RAII guard for the guest execution lock.
///
/// Acquires the lock when created, releases when dropped. A [`Bridge`]
/// holds one for its whole lifetime, which is why it is neither `Send`
/// nor `Sync`.
///
/// [`Bridge`]: crate::Bridge
#[derive(Debug)]
pub struct LockGuard {
    /// State when we acquired the lock
    previous_state: LockState,
    /// Marker to prevent Send/Sync
    _marker: PhantomData<*mut ()>,
}

impl LockGuard {
    /// Acquire the lock.
    ///
    /// If the lock is already held by this thread, this increments
    /// the nesting depth but doesn't actually re-acquire.
    pub fn acquire() -> BridgeResult<Self> {
        if !is_runtime_initialized() {
            return Err(BridgeError::RuntimeNotInitialized);
        }

        let previous_state = LockState::current();

        LOCK_DEPTH.with(|depth| depth.set(depth.get() + 1));
        LOCK_HELD.with(|held| held.set(true));
        LOCK_ACQUIRE_COUNT.fetch_add(1, Ordering::Relaxed);

        Ok(Self {
            previous_state,
            _marker: PhantomData,
        })
    }

    /// Check if this is a nested acquisition
    pub fn is_nested(&self) -> bool {
        self.previous_state != LockState::NotHeld
    }

    /// Release the lock around a blocking call and re-acquire it afterwards.
    ///
    /// The closure must not touch guest state.
    pub fn allow_threads<F, T>(&self, f: F) -> T
    where
        F: FnOnce() -> T,
    {
        LOCK_HELD.with(|held| held.set(false));
        LOCK_RELEASE_COUNT.fetch_add(1, Ordering::Relaxed);

        let result = f();

        LOCK_HELD.with(|held| held.set(true));
        result
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        LOCK_DEPTH.with(|depth| {
            let new_depth = depth.get().saturating_sub(1);
            depth.set(new_depth);

            // Only release if we're at depth 0
            if new_depth == 0 {
                LOCK_HELD.with(|held| held.set(false));
            }
        });
    }
}

// ============================================================================
// Debug Utilities
// ============================================================================

/// Get statistics about lock usage (for debugging).
pub fn lock_stats() -> LockStats {
    LockStats {
        total_acquires: LOCK_ACQUIRE_COUNT.load(Ordering::Relaxed),
        total_releases: LOCK_RELEASE_COUNT.load(Ordering::Relaxed),
        current_depth: LockState::depth(),
        is_held: LockState::is_held(),
    }
}

/// Execution lock usage statistics.
#[derive(Debug, Clone)]
pub struct LockStats {
    /// Total number of lock acquisitions
    pub total_acquires: u64,
    /// Total number of cooperative releases
    pub total_releases: u64,
    /// Current nesting depth
    pub current_depth: usize,
    /// Whether the lock is currently held
    pub is_held: bool,
}

impl fmt::Display for LockStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Lock Stats: acquires={}, releases={}, depth={}, held={}",
            self.total_acquires, self.total_releases, self.current_depth, self.is_held
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reset_state() {
        LOCK_DEPTH.with(|d| d.set(0));
        LOCK_HELD.with(|h| h.set(false));
    }

    #[test]
    fn test_lock_guard_basic() {
        reset_state();
        initialize_runtime();

        assert!(!LockState::is_held());
        assert_eq!(LockState::depth(), 0);

        {
            let _lock = LockGuard::acquire().unwrap();
            assert!(LockState::is_held());
            assert_eq!(LockState::current(), LockState::Held);
        }

        assert!(!LockState::is_held());
        assert_eq!(LockState::depth(), 0);
    }

    #[test]
    fn test_lock_guard_nested() {
        reset_state();
        initialize_runtime();

        let outer = LockGuard::acquire().unwrap();
        assert!(!outer.is_nested());

        {
            let inner = LockGuard::acquire().unwrap();
            assert!(inner.is_nested());
            assert_eq!(LockState::current(), LockState::NestedHeld);
        }

        assert_eq!(LockState::depth(), 1);
        assert!(LockState::is_held());
        drop(outer);
        assert!(!LockState::is_held());
    }

    #[test]
    fn test_allow_threads_releases_and_reacquires() {
        reset_state();
        initialize_runtime();

        let lock = LockGuard::acquire().unwrap();
        let before = lock_stats().total_releases;

        let held_inside = lock.allow_threads(LockState::is_held);

        assert!(!held_inside);
        assert!(LockState::is_held());
        assert!(lock_stats().total_releases > before);
    }

    #[test]
    fn test_lock_stats_display() {
        reset_state();
        initialize_runtime();

        let _lock = LockGuard::acquire().unwrap();
        let stats = lock_stats();
        assert!(stats.is_held);
        assert_eq!(stats.current_depth, 1);
        assert!(stats.to_string().starts_with("Lock Stats:"));
    }
}
