//! Versioned write-locks, one per alignment word.
//!
//! A `VersionedLock` packs a lock bit and a version counter into a single
//! `AtomicU64`: bit 0 is the lock flag, bits 63..1 hold the version. The
//! version is bumped on every commit that publishes through the word, which
//! is what lets readers detect that a word changed under them.
//!
//! Acquisition is always `try`-style: a committer that cannot take a lock
//! gives up and aborts rather than waiting on the holder, so two
//! transactions locking in opposite orders can never deadlock. The only
//! waiting anywhere is the bounded [`Backoff`] between retry attempts.

use std::sync::atomic::{AtomicU64, Ordering};

/// Lock-bit mask within the packed word.
const LOCKED: u64 = 1;

/// Snapshot of a lock's state at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockSample {
    /// Version at the time of the sample.
    pub version: u64,
    /// Whether the lock was held.
    pub locked: bool,
}

/// A word-granular versioned write-lock.
#[derive(Debug)]
pub struct VersionedLock {
    raw: AtomicU64,
}

impl VersionedLock {
    /// New unlocked lock at version 0.
    pub fn new() -> Self {
        VersionedLock {
            raw: AtomicU64::new(0),
        }
    }

    /// Atomically sample the current version and lock state.
    pub fn sample(&self) -> LockSample {
        let raw = self.raw.load(Ordering::Acquire);
        LockSample {
            version: raw >> 1,
            locked: raw & LOCKED != 0,
        }
    }

    /// One non-blocking acquisition attempt.
    ///
    /// Returns `true` if the caller now exclusively holds the lock.
    pub fn try_lock(&self) -> bool {
        let raw = self.raw.load(Ordering::Relaxed);
        if raw & LOCKED != 0 {
            return false;
        }
        self.raw
            .compare_exchange(raw, raw | LOCKED, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
    }

    /// Acquisition with a bounded retry budget.
    ///
    /// Retries `attempts` times with exponential backoff between tries,
    /// then reports failure. Callers abort on failure; they never wait for
    /// the holder to finish.
    pub fn try_lock_with_budget(&self, attempts: u32) -> bool {
        let mut backoff = Backoff::new();
        for _ in 0..attempts {
            if self.try_lock() {
                return true;
            }
            backoff.snooze();
        }
        false
    }

    /// Release the lock without changing the version.
    ///
    /// Used on abort paths: the protected word was not modified, so
    /// readers that sampled the old version remain valid.
    pub fn unlock(&self) {
        let raw = self.raw.load(Ordering::Relaxed);
        debug_assert!(raw & LOCKED != 0, "unlock of an unheld lock");
        self.raw.store(raw & !LOCKED, Ordering::Release);
    }

    /// Release the lock and publish a new version in the same store.
    ///
    /// Used on commit paths after the tentative value has been written
    /// through: the version bump is what invalidates concurrent readers.
    pub fn unlock_with_version(&self, version: u64) {
        debug_assert!(
            self.raw.load(Ordering::Relaxed) & LOCKED != 0,
            "publish on an unheld lock"
        );
        self.raw.store(version << 1, Ordering::Release);
    }
}

impl Default for VersionedLock {
    fn default() -> Self {
        Self::new()
    }
}

/// Bounded exponential backoff for contended retry loops.
///
/// Early steps spin with `spin_loop` hints (doubling each step); once the
/// spin budget is spent, each step yields the thread instead. The step
/// count saturates, so a single `snooze` never pauses for more than one
/// scheduler quantum.
#[derive(Debug)]
pub struct Backoff {
    step: u32,
}

/// Steps that busy-spin before escalating to yields.
const SPIN_STEPS: u32 = 6;

/// Cap on the step counter; beyond this every snooze is a plain yield.
const MAX_STEPS: u32 = 10;

impl Backoff {
    /// Fresh backoff at the shortest delay.
    pub fn new() -> Self {
        Backoff { step: 0 }
    }

    /// Pause briefly, escalating the delay on each call.
    pub fn snooze(&mut self) {
        if self.step <= SPIN_STEPS {
            for _ in 0..(1u32 << self.step) {
                std::hint::spin_loop();
            }
        } else {
            std::thread::yield_now();
        }
        if self.step < MAX_STEPS {
            self.step += 1;
        }
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new()
    }
}
