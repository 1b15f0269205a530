//! A reader/writer lock where a writer never waits behind a background reader: any thread about
//! to take a write lock first raises a flag background readers check before (re-)acquiring their
//! own lock, so a long read doesn't stall the organizer behind it. Foreground reads that need the
//! current state right now (not the next consistent state) use `read` and don't defer to anyone.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

pub struct PrioritizedRwLock<T> {
    inner: RwLock<T>,
    waiting_writers: AtomicUsize,
    gate: Condvar,
    gate_mutex: Mutex<()>,
}

impl<T> PrioritizedRwLock<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: RwLock::new(value),
            waiting_writers: AtomicUsize::new(0),
            gate: Condvar::new(),
            gate_mutex: Mutex::new(()),
        }
    }

    /// Organizer access: registers as a waiting writer so background readers yield, then takes
    /// the underlying write lock.
    pub fn write(&self) -> PriorityWriteGuard<'_, T> {
        self.waiting_writers.fetch_add(1, Ordering::SeqCst);
        let guard = self.inner.write().expect("chaindb lock poisoned");
        PriorityWriteGuard { guard: Some(guard), lock: self }
    }

    /// Foreground read access: proceeds immediately, same as a plain `RwLock::read`.
    pub fn read(&self) -> RwLockReadGuard<'_, T> {
        self.inner.read().expect("chaindb lock poisoned")
    }

    /// Background read access (indexing scans, stats collection): waits out any writer that is
    /// currently waiting for or holding the lock before taking its own read lock.
    pub fn background_read(&self) -> RwLockReadGuard<'_, T> {
        loop {
            let guard = self.gate_mutex.lock().expect("gate mutex poisoned");
            if self.waiting_writers.load(Ordering::SeqCst) == 0 {
                break;
            }
            let _ = self.gate.wait(guard);
        }
        self.inner.read().expect("chaindb lock poisoned")
    }
}

pub struct PriorityWriteGuard<'a, T> {
    guard: Option<RwLockWriteGuard<'a, T>>,
    lock: &'a PrioritizedRwLock<T>,
}

impl<'a, T> std::ops::Deref for PriorityWriteGuard<'a, T> {
    type Target = T;
    fn deref(&self) -> &T {
        self.guard.as_ref().expect("guard dropped twice")
    }
}

impl<'a, T> std::ops::DerefMut for PriorityWriteGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.guard.as_mut().expect("guard dropped twice")
    }
}

impl<'a, T> Drop for PriorityWriteGuard<'a, T> {
    fn drop(&mut self) {
        self.guard.take();
        self.lock.waiting_writers.fetch_sub(1, Ordering::SeqCst);
        let _g = self.lock.gate_mutex.lock().expect("gate mutex poisoned");
        self.lock.gate.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn write_completes_even_with_background_readers_waiting() {
        let lock = Arc::new(PrioritizedRwLock::new(0));
        {
            let mut w = lock.write();
            *w = 1;
        }
        assert_eq!(*lock.read(), 1);
    }

    #[test]
    fn background_read_waits_while_a_writer_holds_the_lock() {
        let lock = Arc::new(PrioritizedRwLock::new(0));
        let lock2 = Arc::clone(&lock);

        let writer = thread::spawn(move || {
            let mut w = lock2.write();
            thread::sleep(Duration::from_millis(30));
            *w = 42;
        });
        thread::sleep(Duration::from_millis(5));
        writer.join().unwrap();
        assert_eq!(*lock.background_read(), 42);
    }
}
