//! Drivers that run a block's process step to exhaustion.
//!
//! A [`ThreadedRunner`] owns a worker thread and repeatedly dispatches
//! `process` until the block reports end-of-stream, an error terminates it,
//! or a cooperative stop is observed between iterations. A [`RawRunner`]
//! merely brackets a self-driven block's `start`/`stop`.

use crate::block::{Block, BlockKind, ProcessStatus};
use crate::error::{Error, Result};
use crate::mux::SampleMux;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, trace};

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Shared {
    block: Mutex<Block>,
    mux: Arc<dyn SampleMux>,
    /// Raised by a caller wanting the block mutex; the worker backs off.
    call_pending: AtomicBool,
    /// Cooperative stop, observed between process iterations.
    stop: AtomicBool,
    running: AtomicBool,
    /// Terminal error, if the worker exited on one.
    error: Mutex<Option<Error>>,
}

/// Drives a typed block on a dedicated worker thread.
///
/// # Out-of-band calls
///
/// [`ThreadedRunner::call`] executes a closure against the block's user
/// value while the worker keeps running. The block mutex serializes one
/// whole process iteration against one call; the worker never holds it
/// across a blocking bus wait, and a pending call biases the mutex toward
/// the caller, so calls land between iterations rather than starving.
pub struct ThreadedRunner {
    shared: Arc<Shared>,
    handle: Option<JoinHandle<()>>,
}

impl ThreadedRunner {
    /// Binds a typed block to its bus.
    ///
    /// # Panics
    ///
    /// Panics if the block is raw, or if the bus port counts do not match
    /// the block signature.
    #[must_use]
    pub fn new(block: Block, mux: Arc<dyn SampleMux>) -> Self {
        assert_eq!(
            block.kind(),
            BlockKind::Typed,
            "raw blocks take a RawRunner"
        );
        assert_eq!(
            mux.num_inputs(),
            block.signature().num_inputs(),
            "bus input ports do not match signature {}",
            block.signature()
        );
        assert_eq!(
            mux.num_outputs(),
            block.signature().num_outputs(),
            "bus output ports do not match signature {}",
            block.signature()
        );

        Self {
            shared: Arc::new(Shared {
                block: Mutex::new(block),
                mux,
                call_pending: AtomicBool::new(false),
                stop: AtomicBool::new(false),
                running: AtomicBool::new(false),
                error: Mutex::new(None),
            }),
            handle: None,
        }
    }

    /// Initializes the block and launches the worker thread.
    ///
    /// An initialization error aborts startup: no thread is spawned and the
    /// error is returned to the caller.
    pub fn spawn(&mut self) -> Result<()> {
        assert!(self.handle.is_none(), "runner already spawned");

        {
            let mut block = lock(&self.shared.block);
            block.initialize()?;
            debug!(block = block.type_name(), signature = %block.signature(), "runner spawning");
        }

        self.shared.running.store(true, Ordering::SeqCst);
        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name("sigflow-runner".into())
            .spawn(move || worker(&shared))
            .map_err(|e| {
                self.shared.running.store(false, Ordering::SeqCst);
                Error::block(anyhow::Error::new(e))
            })?;
        self.handle = Some(handle);
        Ok(())
    }

    /// Requests a cooperative stop. Observed between process iterations;
    /// worst-case latency is one process call. A no-op after `join`.
    pub fn stop(&self) {
        self.shared.stop.store(true, Ordering::SeqCst);
    }

    /// Waits for the worker to exit. Always completes once the worker does;
    /// the bus is finalized on every exit path.
    pub fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                let mut slot = lock(&self.shared.error);
                if slot.is_none() {
                    *slot = Some(Error::block(anyhow::anyhow!("worker thread panicked")));
                }
                self.shared.running.store(false, Ordering::SeqCst);
            }
        }
    }

    /// Returns `true` while the worker is alive.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// The terminal error, if the worker exited on one. End-of-stream is a
    /// clean exit and never recorded.
    #[must_use]
    pub fn error(&self) -> Option<Error> {
        lock(&self.shared.error).clone()
    }

    /// Executes `f` against the block's user value, serialized against the
    /// process loop.
    ///
    /// The call completes between two whole process iterations; it is never
    /// interleaved within one. Returns [`Error::TypeMismatch`] if `U` is
    /// not the wrapped type. Works before `spawn` and after `join` too,
    /// where the mutex is simply uncontended.
    pub fn call<U: 'static, R>(&self, f: impl FnOnce(&mut U) -> Result<R>) -> Result<R> {
        self.shared.call_pending.store(true, Ordering::SeqCst);
        let mut block = lock(&self.shared.block);
        trace!(block = block.type_name(), "out-of-band call");
        let result = match block.downcast_mut::<U>() {
            Some(user) => f(user),
            None => Err(block.type_mismatch::<U>()),
        };
        self.shared.call_pending.store(false, Ordering::SeqCst);
        drop(block);
        result
    }
}

fn worker(shared: &Shared) {
    let outcome = run_loop(shared);

    lock(&shared.block).deinitialize();
    shared.mux.finalize();

    match outcome {
        Ok(()) | Err(Error::EndOfStream) => {
            trace!("runner finished cleanly");
        }
        Err(e) => {
            error!(error = %e, "runner terminated on error");
            *lock(&shared.error) = Some(e);
        }
    }
    shared.running.store(false, Ordering::SeqCst);
}

fn run_loop(shared: &Shared) -> Result<()> {
    loop {
        if shared.stop.load(Ordering::SeqCst) {
            return Ok(());
        }

        // Block for samples/space outside the call mutex, so an
        // out-of-band call never waits behind a stalled stream.
        shared.mux.wait_ready()?;

        if shared.call_pending.load(Ordering::SeqCst) {
            // Bias the mutex toward the caller, then retry.
            thread::sleep(Duration::from_micros(1));
            thread::yield_now();
            continue;
        }

        let mut block = lock(&shared.block);
        if block.process_step(&*shared.mux)? == ProcessStatus::Eof {
            return Ok(());
        }
    }
}

/// Brackets a self-driven block: `spawn` starts it, `stop` stops it, `join`
/// tears it down.
pub struct RawRunner {
    block: Block,
    mux: Arc<dyn SampleMux>,
    running: bool,
    error: Option<Error>,
}

impl RawRunner {
    /// Binds a raw block to its bus.
    ///
    /// # Panics
    ///
    /// Panics if the block is typed.
    #[must_use]
    pub fn new(block: Block, mux: Arc<dyn SampleMux>) -> Self {
        assert_eq!(
            block.kind(),
            BlockKind::Raw,
            "typed blocks take a ThreadedRunner"
        );
        Self {
            block,
            mux,
            running: false,
            error: None,
        }
    }

    /// Initializes the block and hands it the bus via `start`.
    pub fn spawn(&mut self) -> Result<()> {
        self.block.initialize()?;
        self.block.start(Arc::clone(&self.mux))?;
        self.running = true;
        Ok(())
    }

    /// Stops the block's machinery. Errors from `stop` are recorded.
    pub fn stop(&mut self) {
        if self.running {
            if let Err(e) = self.block.stop() {
                error!(error = %e, "raw block stop failed");
                self.error = Some(e);
            }
        }
    }

    /// Marks not-running and tears the block down.
    pub fn join(&mut self) {
        self.running = false;
        self.block.deinitialize();
    }

    /// Returns `true` between a successful `spawn` and `join`.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// The error surfaced by `start`/`stop`, if any.
    #[must_use]
    pub fn error(&self) -> Option<Error> {
        self.error.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{BlockImpl, ProcessResult, RawBlockImpl};
    use crate::error::Result;
    use crate::mux::RingMux;
    use crate::ring::RingBuffer;
    use crate::signature::{PortDesc, Signature};

    struct ShortSource {
        next: u32,
        limit: u32,
    }

    impl BlockImpl for ShortSource {
        type Inputs = ();
        type Outputs = (u32,);

        fn process(&mut self, _i: (), (out,): (&mut [u32],)) -> Result<ProcessResult> {
            let remaining = (self.limit - self.next) as usize;
            let n = remaining.min(out.len());
            for o in &mut out[..n] {
                *o = self.next;
                self.next += 1;
            }
            if self.next == self.limit {
                Ok(ProcessResult::done(&[], &[n]))
            } else {
                Ok(ProcessResult::new(&[], &[n]))
            }
        }
    }

    #[test]
    fn test_runner_runs_source_to_eof() {
        let ring = Arc::new(RingBuffer::with_default_capacity().unwrap());
        let block = Block::new(ShortSource { next: 0, limit: 10 });
        let mux = Arc::new(
            RingMux::new(vec![], vec![Arc::clone(&ring)], block.signature()).unwrap(),
        );

        let mut runner = ThreadedRunner::new(block, mux);
        runner.spawn().unwrap();
        runner.join();

        assert!(runner.error().is_none());
        assert!(!runner.is_running());
        // EOS reached the output ring.
        assert!(ring.is_eos());
        assert_eq!(ring.len(), 40);
    }

    #[test]
    fn test_stop_after_join_is_noop() {
        let ring = Arc::new(RingBuffer::with_default_capacity().unwrap());
        let block = Block::new(ShortSource { next: 0, limit: 1 });
        let mux = Arc::new(
            RingMux::new(vec![], vec![Arc::clone(&ring)], block.signature()).unwrap(),
        );

        let mut runner = ThreadedRunner::new(block, mux);
        runner.spawn().unwrap();
        runner.join();
        runner.stop();
        assert!(runner.error().is_none());
    }

    #[test]
    fn test_init_error_aborts_startup() {
        struct FailsInit;
        impl BlockImpl for FailsInit {
            type Inputs = ();
            type Outputs = (u8,);
            fn process(&mut self, _i: (), _o: (&mut [u8],)) -> Result<ProcessResult> {
                Ok(ProcessResult::done(&[], &[0]))
            }
            fn initialize(&mut self) -> Result<()> {
                Err(Error::block(anyhow::anyhow!("no hardware")))
            }
        }

        let ring = Arc::new(RingBuffer::with_default_capacity().unwrap());
        let block = Block::new(FailsInit);
        let mux = Arc::new(
            RingMux::new(vec![], vec![ring], block.signature()).unwrap(),
        );

        let mut runner = ThreadedRunner::new(block, mux);
        assert!(runner.spawn().is_err());
        assert!(!runner.is_running());
    }

    #[test]
    fn test_call_before_spawn() {
        struct Param {
            gain: u32,
        }
        impl BlockImpl for Param {
            type Inputs = (u32,);
            type Outputs = (u32,);
            fn process(&mut self, (i,): (&[u32],), (o,): (&mut [u32],)) -> Result<ProcessResult> {
                let n = i.len().min(o.len());
                for (dst, src) in o[..n].iter_mut().zip(&i[..n]) {
                    *dst = src * self.gain;
                }
                Ok(ProcessResult::new(&[n], &[n]))
            }
        }

        let in_ring = Arc::new(RingBuffer::with_default_capacity().unwrap());
        let out_ring = Arc::new(RingBuffer::with_default_capacity().unwrap());
        let block = Block::new(Param { gain: 1 });
        let mux = Arc::new(
            RingMux::new(vec![in_ring], vec![out_ring], block.signature()).unwrap(),
        );

        let runner = ThreadedRunner::new(block, mux);
        runner
            .call::<Param, _>(|p| {
                p.gain = 3;
                Ok(())
            })
            .unwrap();
        let gain = runner.call::<Param, _>(|p| Ok(p.gain)).unwrap();
        assert_eq!(gain, 3);

        // Wrong type is a mismatch, not a panic.
        let err = runner.call::<ShortSource, _>(|_| Ok(())).unwrap_err();
        assert!(matches!(err, Error::TypeMismatch { .. }));
    }

    #[test]
    fn test_raw_runner_brackets_start_stop() {
        #[derive(Default)]
        struct SelfDriven {
            started: bool,
            stopped: bool,
        }
        impl RawBlockImpl for SelfDriven {
            fn start(&mut self, _mux: Arc<dyn SampleMux>) -> Result<()> {
                self.started = true;
                Ok(())
            }
            fn stop(&mut self) -> Result<()> {
                self.stopped = true;
                Ok(())
            }
        }

        let ring = Arc::new(RingBuffer::with_default_capacity().unwrap());
        let block = Block::new_raw(
            SelfDriven::default(),
            vec![],
            vec![PortDesc::of::<u8>()],
        );
        let sig = Signature::new(vec![], vec![PortDesc::of::<u8>()]);
        let mux = Arc::new(RingMux::new(vec![], vec![ring], &sig).unwrap());

        let mut runner = RawRunner::new(block, mux);
        runner.spawn().unwrap();
        assert!(runner.is_running());
        runner.stop();
        runner.join();
        assert!(!runner.is_running());
        assert!(runner.error().is_none());
    }
}
