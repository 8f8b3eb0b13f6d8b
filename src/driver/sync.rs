// src/driver/sync.rs
//! Completion latches and the load semaphore.

use std::sync::{Condvar, Mutex};

/// A one-shot completion signal with any number of waiters.
///
/// Opening twice panics: loader and executor fire each signal exactly
/// once, and a second open means the task lifecycle is broken.
pub struct Latch {
    open: Mutex<bool>,
    cv: Condvar,
}

impl Latch {
    pub fn new() -> Self {
        Latch {
            open: Mutex::new(false),
            cv: Condvar::new(),
        }
    }

    pub fn open(&self) {
        let mut open = self.open.lock().unwrap_or_else(|e| e.into_inner());
        if *open {
            panic!("completion signal fired twice");
        }
        *open = true;
        self.cv.notify_all();
    }

    pub fn wait(&self) {
        let mut open = self.open.lock().unwrap_or_else(|e| e.into_inner());
        while !*open {
            open = self.cv.wait(open).unwrap_or_else(|e| e.into_inner());
        }
    }

    pub fn is_open(&self) -> bool {
        *self.open.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for Latch {
    fn default() -> Self {
        Self::new()
    }
}

/// Counting semaphore bounding concurrent package loads.
pub struct Semaphore {
    permits: Mutex<usize>,
    cv: Condvar,
}

pub struct SemaphorePermit<'a> {
    sem: &'a Semaphore,
}

impl Semaphore {
    pub fn new(permits: usize) -> Self {
        Semaphore {
            permits: Mutex::new(permits),
            cv: Condvar::new(),
        }
    }

    /// Block until a permit is free; the permit releases on drop.
    pub fn acquire(&self) -> SemaphorePermit<'_> {
        let mut permits = self.permits.lock().unwrap_or_else(|e| e.into_inner());
        while *permits == 0 {
            permits = self.cv.wait(permits).unwrap_or_else(|e| e.into_inner());
        }
        *permits -= 1;
        SemaphorePermit { sem: self }
    }
}

impl Drop for SemaphorePermit<'_> {
    fn drop(&mut self) {
        let mut permits = self
            .sem
            .permits
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        *permits += 1;
        self.sem.cv.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn latch_releases_all_waiters() {
        let latch = Arc::new(Latch::new());
        let woken = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let latch = latch.clone();
                let woken = woken.clone();
                std::thread::spawn(move || {
                    latch.wait();
                    woken.fetch_add(1, Ordering::SeqCst);
                })
            })
            .collect();

        assert!(!latch.is_open());
        latch.open();
        for h in handles {
            h.join().expect("join");
        }
        assert_eq!(woken.load(Ordering::SeqCst), 4);
    }

    #[test]
    #[should_panic(expected = "fired twice")]
    fn latch_panics_on_double_open() {
        let latch = Latch::new();
        latch.open();
        latch.open();
    }

    #[test]
    fn semaphore_bounds_concurrency() {
        let sem = Arc::new(Semaphore::new(2));
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let sem = sem.clone();
                let running = running.clone();
                let peak = peak.clone();
                std::thread::spawn(move || {
                    let _permit = sem.acquire();
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    std::thread::sleep(std::time::Duration::from_millis(5));
                    running.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();
        for h in handles {
            h.join().expect("join");
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }
}
