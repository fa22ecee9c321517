// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! The process-wide critical section used when a network backend runs its
//! own threads.
//!
//! The default analytical backend is single-threaded and cooperative, so the
//! flag is never contended there; backends that deliver completions from
//! worker threads must hold the section around any mutation of shared
//! kernel structures (event queue, pending-send map).

use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering::{Acquire, Release};

/// A spin flag acquired with acquire semantics and released with release
/// semantics.
pub struct CriticalSection {
    locked: AtomicBool,
}

impl CriticalSection {
    /// Create an unlocked critical section.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            locked: AtomicBool::new(false),
        }
    }

    /// Spin until the section is acquired.
    pub fn enter(&self) -> CriticalSectionGuard<'_> {
        while self
            .locked
            .compare_exchange_weak(false, true, Acquire, Acquire)
            .is_err()
        {
            std::hint::spin_loop();
        }
        CriticalSectionGuard { section: self }
    }
}

impl Default for CriticalSection {
    fn default() -> Self {
        Self::new()
    }
}

/// Releases the section when dropped.
pub struct CriticalSectionGuard<'a> {
    section: &'a CriticalSection,
}

impl Drop for CriticalSectionGuard<'_> {
    fn drop(&mut self) {
        self.section.locked.store(false, Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enter_and_release() {
        let section = CriticalSection::new();
        {
            let _guard = section.enter();
        }
        // Released on drop, so a second enter must not spin forever.
        let _guard = section.enter();
    }
}
