use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex, PoisonError};

/// Parking primitive for the ring's not-empty / not-full edges.
///
/// The ring fast path never touches the mutex: `notify` takes the lock only
/// when a waiter count says someone is actually parked. Waiters register
/// under the lock and re-check their predicate there, so a state change
/// published before `notify` is never missed.
#[derive(Debug, Default)]
pub(crate) struct Gate {
    lock: Mutex<()>,
    cond: Condvar,
    waiters: AtomicUsize,
}

impl Gate {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Wakes all parked waiters, if any.
    ///
    /// The empty critical section orders this call after a waiter's
    /// predicate check: either the waiter is already parked (and is woken),
    /// or it has not yet taken the lock and will observe the new state when
    /// it does.
    pub(crate) fn notify(&self) {
        if self.waiters.load(Ordering::SeqCst) > 0 {
            drop(self.lock.lock().unwrap_or_else(PoisonError::into_inner));
            self.cond.notify_all();
        }
    }

    /// Parks the calling thread while `keep_waiting` returns `true`.
    ///
    /// The predicate is evaluated under the gate lock; it must read the
    /// watched state with at least `SeqCst` loads so the registration in
    /// `waiters` and the state check cannot both pass stale against a
    /// concurrent publisher.
    pub(crate) fn wait_while(&self, mut keep_waiting: impl FnMut() -> bool) {
        let mut guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.waiters.fetch_add(1, Ordering::SeqCst);
        while keep_waiting() {
            guard = self
                .cond
                .wait(guard)
                .unwrap_or_else(PoisonError::into_inner);
        }
        self.waiters.fetch_sub(1, Ordering::SeqCst);
        drop(guard);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_gate_wakes_parked_waiter() {
        let gate = Arc::new(Gate::new());
        let flag = Arc::new(AtomicBool::new(false));

        let waiter = {
            let gate = Arc::clone(&gate);
            let flag = Arc::clone(&flag);
            thread::spawn(move || {
                gate.wait_while(|| !flag.load(Ordering::SeqCst));
            })
        };

        thread::sleep(Duration::from_millis(10));
        flag.store(true, Ordering::SeqCst);
        gate.notify();
        waiter.join().unwrap();
    }

    #[test]
    fn test_gate_no_wait_when_ready() {
        let gate = Gate::new();
        gate.wait_while(|| false);
    }
}
