//! Process-wide platform hooks.
//!
//! One idempotent initialization point and a SIGINT waiter, so pipeline
//! mains and testers can set up once and block until the operator
//! interrupts.

use crate::error::{Error, Result};
use std::sync::{Condvar, Mutex, OnceLock, PoisonError};
use tracing::debug;

static INTERRUPTED: Mutex<bool> = Mutex::new(false);
static INTERRUPT_CV: Condvar = Condvar::new();

/// Initializes process-wide state: installs the interrupt handler feeding
/// [`wait_for_interrupt`].
///
/// Idempotent: calling twice has the same effect as once, and every call
/// reports the outcome of the first.
pub fn initialize() -> Result<()> {
    static OUTCOME: OnceLock<std::result::Result<(), String>> = OnceLock::new();

    let outcome = OUTCOME.get_or_init(|| {
        debug!("installing interrupt handler");
        ctrlc::set_handler(|| {
            *INTERRUPTED
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = true;
            INTERRUPT_CV.notify_all();
        })
        .map_err(|e| e.to_string())
    });

    outcome
        .clone()
        .map_err(|msg| Error::block(anyhow::anyhow!("platform initialization failed: {msg}")))
}

/// Blocks until SIGINT has been observed. Sticky: once interrupted, returns
/// immediately forever after.
pub fn wait_for_interrupt() {
    let mut interrupted = INTERRUPTED.lock().unwrap_or_else(PoisonError::into_inner);
    while !*interrupted {
        interrupted = INTERRUPT_CV
            .wait(interrupted)
            .unwrap_or_else(PoisonError::into_inner);
    }
}
