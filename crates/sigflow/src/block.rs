//! The block abstraction: a user type with a typed process step behind a
//! uniform dynamic dispatch surface.
//!
//! [`Block::new`] erases a [`BlockImpl`] behind a trait object whose v-table
//! carries the typed dispatch shim: slice views are pulled from the bus,
//! cast to the block's compile-time element types, handed to the user's
//! `process`, and the reported consumption/production is committed back.
//! Raw blocks ([`RawBlockImpl`]) declare their ports explicitly and drive
//! themselves from `start`/`stop` instead.

use crate::error::{Error, Result};
use crate::mux::SampleMux;
use crate::signature::{PortDesc, Ports, Signature, MAX_PORTS};
use std::any::Any;
use std::sync::Arc;

/// What one process invocation did: samples consumed per input port,
/// produced per output port, and whether the block is finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessResult {
    consumed: [usize; MAX_PORTS],
    produced: [usize; MAX_PORTS],
    eof: bool,
}

impl ProcessResult {
    fn build(consumed: &[usize], produced: &[usize], eof: bool) -> Self {
        assert!(consumed.len() <= MAX_PORTS && produced.len() <= MAX_PORTS);
        let mut c = [0; MAX_PORTS];
        let mut p = [0; MAX_PORTS];
        c[..consumed.len()].copy_from_slice(consumed);
        p[..produced.len()].copy_from_slice(produced);
        Self {
            consumed: c,
            produced: p,
            eof,
        }
    }

    /// An ordinary iteration: the block wants to run again.
    #[must_use]
    pub fn new(consumed: &[usize], produced: &[usize]) -> Self {
        Self::build(consumed, produced, false)
    }

    /// A final iteration: commit these counts, then shut the block down.
    #[must_use]
    pub fn done(consumed: &[usize], produced: &[usize]) -> Self {
        Self::build(consumed, produced, true)
    }

    /// Samples consumed from input `port`.
    #[must_use]
    pub fn consumed(&self, port: usize) -> usize {
        self.consumed[port]
    }

    /// Samples produced onto output `port`.
    #[must_use]
    pub fn produced(&self, port: usize) -> usize {
        self.produced[port]
    }

    /// Returns `true` if this was the block's final iteration.
    #[must_use]
    pub fn is_eof(&self) -> bool {
        self.eof
    }
}

/// Outcome of one dispatched process iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    /// Run another iteration.
    Continue,
    /// The block reported end-of-stream.
    Eof,
}

/// A user-defined block with a typed process step.
///
/// The input and output port tuples are the block's static signature;
/// everything the runtime needs is derived from them at construction. The
/// lifecycle hooks default to no-ops so simple blocks implement only
/// `process`.
pub trait BlockImpl: Send + 'static {
    /// Input element types, in port order.
    type Inputs: Ports;
    /// Output element types, in port order.
    type Outputs: Ports;

    /// One processing step over the currently available samples.
    ///
    /// Any view may be empty; report zero for that port. The reported
    /// counts must not exceed the view lengths.
    fn process(
        &mut self,
        inputs: <Self::Inputs as Ports>::Refs<'_>,
        outputs: <Self::Outputs as Ports>::Muts<'_>,
    ) -> Result<ProcessResult>;

    /// One-time setup before the first process call.
    fn initialize(&mut self) -> Result<()> {
        Ok(())
    }

    /// One-time teardown; runs exactly once if `initialize` succeeded.
    fn deinitialize(&mut self) {}

    /// Decides this block's output rate given the upstream rate. The
    /// default adopts the upstream rate unchanged.
    fn set_rate(&mut self, parent_rate: f64) -> f64 {
        parent_rate
    }
}

/// A self-driven block: no typed process step, explicit port declarations,
/// its own internal threading behind `start`/`stop`.
pub trait RawBlockImpl: Send + 'static {
    /// Launches the block's own machinery against the bus.
    fn start(&mut self, mux: Arc<dyn SampleMux>) -> Result<()>;

    /// Stops whatever `start` launched.
    fn stop(&mut self) -> Result<()> {
        Ok(())
    }

    /// One-time setup before `start`.
    fn initialize(&mut self) -> Result<()> {
        Ok(())
    }

    /// One-time teardown.
    fn deinitialize(&mut self) {}

    /// Rate decision, as in [`BlockImpl::set_rate`].
    fn set_rate(&mut self, parent_rate: f64) -> f64 {
        parent_rate
    }
}

/// Lifecycle state of a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockState {
    /// Built, rate not yet propagated.
    Constructed,
    /// Rate decided.
    RateSet,
    /// `initialize` succeeded.
    Initialized,
    /// At least one process iteration ran (or `start` was called).
    Running,
    /// Finished or externally stopped.
    Stopped,
    /// `deinitialize` ran.
    Deinitialized,
}

/// How the block is driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    /// Typed process step, driven by a runner loop.
    Typed,
    /// Self-driven via `start`/`stop`.
    Raw,
}

/// Dynamic face of a block implementation. One impl per flavor; the
/// trait-object v-table is the bound method table.
trait DynBlock: Send {
    fn process(&mut self, mux: &dyn SampleMux) -> Result<ProcessStatus>;
    fn initialize(&mut self) -> Result<()>;
    fn deinitialize(&mut self);
    fn set_rate(&mut self, parent_rate: f64) -> f64;
    fn start(&mut self, mux: Arc<dyn SampleMux>) -> Result<()>;
    fn stop(&mut self) -> Result<()>;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

struct TypedAdapter<U: BlockImpl> {
    inner: U,
}

impl<U: BlockImpl> DynBlock for TypedAdapter<U> {
    fn process(&mut self, mux: &dyn SampleMux) -> Result<ProcessStatus> {
        let inputs = <U::Inputs as Ports>::bind_readable(mux);
        let outputs = <U::Outputs as Ports>::bind_writable(mux);
        let in_lens = <U::Inputs as Ports>::ref_lens(&inputs);
        let out_lens = <U::Outputs as Ports>::mut_lens(&outputs);

        let result = self.inner.process(inputs, outputs)?;

        for port in 0..<U::Inputs as Ports>::ARITY {
            let n = result.consumed(port);
            assert!(
                n <= in_lens[port],
                "block consumed {n} samples on input {port} but only {} were readable",
                in_lens[port]
            );
            mux.advance_read(port, n);
        }
        for port in 0..<U::Outputs as Ports>::ARITY {
            let n = result.produced(port);
            assert!(
                n <= out_lens[port],
                "block produced {n} samples on output {port} but only {} were writable",
                out_lens[port]
            );
            mux.advance_write(port, n);
        }

        Ok(if result.is_eof() {
            ProcessStatus::Eof
        } else {
            ProcessStatus::Continue
        })
    }

    fn initialize(&mut self) -> Result<()> {
        self.inner.initialize()
    }

    fn deinitialize(&mut self) {
        self.inner.deinitialize();
    }

    fn set_rate(&mut self, parent_rate: f64) -> f64 {
        self.inner.set_rate(parent_rate)
    }

    fn start(&mut self, _mux: Arc<dyn SampleMux>) -> Result<()> {
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        Ok(())
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        &mut self.inner
    }
}

struct RawAdapter<U: RawBlockImpl> {
    inner: U,
}

impl<U: RawBlockImpl> DynBlock for RawAdapter<U> {
    fn process(&mut self, _mux: &dyn SampleMux) -> Result<ProcessStatus> {
        unreachable!("raw blocks have no process step")
    }

    fn initialize(&mut self) -> Result<()> {
        self.inner.initialize()
    }

    fn deinitialize(&mut self) {
        self.inner.deinitialize();
    }

    fn set_rate(&mut self, parent_rate: f64) -> f64 {
        self.inner.set_rate(parent_rate)
    }

    fn start(&mut self, mux: Arc<dyn SampleMux>) -> Result<()> {
        self.inner.start(mux)
    }

    fn stop(&mut self) -> Result<()> {
        self.inner.stop()
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        &mut self.inner
    }
}

/// Type-erased block: the user value, its derived signature, the configured
/// sample rate, and the lifecycle state.
pub struct Block {
    imp: Box<dyn DynBlock>,
    signature: Signature,
    type_name: &'static str,
    rate: f64,
    state: BlockState,
    kind: BlockKind,
}

impl Block {
    /// Wraps a typed block, deriving its signature from the port tuples of
    /// its `process` step.
    ///
    /// # Panics
    ///
    /// Panics if the block has no ports at all.
    #[must_use]
    pub fn new<U: BlockImpl>(imp: U) -> Self {
        let signature = Signature::of::<U::Inputs, U::Outputs>();
        assert!(
            signature.num_inputs() + signature.num_outputs() > 0,
            "a block must have at least one port"
        );
        Self {
            imp: Box::new(TypedAdapter { inner: imp }),
            signature,
            type_name: std::any::type_name::<U>(),
            rate: 0.0,
            state: BlockState::Constructed,
            kind: BlockKind::Typed,
        }
    }

    /// Wraps a raw block with explicitly declared ports.
    #[must_use]
    pub fn new_raw<U: RawBlockImpl>(
        imp: U,
        inputs: Vec<PortDesc>,
        outputs: Vec<PortDesc>,
    ) -> Self {
        let signature = Signature::new(inputs, outputs);
        assert!(
            signature.num_inputs() + signature.num_outputs() > 0,
            "a block must have at least one port"
        );
        Self {
            imp: Box::new(RawAdapter { inner: imp }),
            signature,
            type_name: std::any::type_name::<U>(),
            rate: 0.0,
            state: BlockState::Constructed,
            kind: BlockKind::Raw,
        }
    }

    /// The derived (or declared) port signature.
    #[must_use]
    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    /// Type name of the wrapped user value.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// How this block is driven.
    #[must_use]
    pub fn kind(&self) -> BlockKind {
        self.kind
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> BlockState {
        self.state
    }

    /// The configured sample rate. Zero until [`Self::set_rate`] runs.
    #[must_use]
    pub fn rate(&self) -> f64 {
        self.rate
    }

    /// Propagates the upstream rate; the block decides and stores its own.
    pub fn set_rate(&mut self, parent_rate: f64) -> f64 {
        self.rate = self.imp.set_rate(parent_rate);
        if self.state == BlockState::Constructed {
            self.state = BlockState::RateSet;
        }
        self.rate
    }

    /// Runs one-time setup. Exactly once per block.
    ///
    /// # Panics
    ///
    /// Panics on a second call; lifecycle violations are wiring bugs.
    pub fn initialize(&mut self) -> Result<()> {
        assert!(
            matches!(self.state, BlockState::Constructed | BlockState::RateSet),
            "initialize called twice (state {:?})",
            self.state
        );
        self.imp.initialize()?;
        self.state = BlockState::Initialized;
        Ok(())
    }

    /// Runs one-time teardown, once, if setup ever succeeded.
    pub fn deinitialize(&mut self) {
        if matches!(
            self.state,
            BlockState::Initialized | BlockState::Running | BlockState::Stopped
        ) {
            self.imp.deinitialize();
            self.state = BlockState::Deinitialized;
        }
    }

    /// Dispatches one typed process iteration against the bus.
    pub fn process_step(&mut self, mux: &dyn SampleMux) -> Result<ProcessStatus> {
        debug_assert!(
            matches!(self.state, BlockState::Initialized | BlockState::Running),
            "process on a block in state {:?}",
            self.state
        );
        self.state = BlockState::Running;
        let status = self.imp.process(mux)?;
        if status == ProcessStatus::Eof {
            self.state = BlockState::Stopped;
        }
        Ok(status)
    }

    pub(crate) fn start(&mut self, mux: Arc<dyn SampleMux>) -> Result<()> {
        self.state = BlockState::Running;
        self.imp.start(mux)
    }

    pub(crate) fn stop(&mut self) -> Result<()> {
        self.state = BlockState::Stopped;
        self.imp.stop()
    }

    /// Borrows the wrapped user value for an out-of-band call.
    pub fn downcast_mut<U: 'static>(&mut self) -> Option<&mut U> {
        self.imp.as_any_mut().downcast_mut::<U>()
    }

    pub(crate) fn type_mismatch<U>(&self) -> Error {
        Error::TypeMismatch {
            expected: self.type_name.to_owned(),
            actual: std::any::type_name::<U>().to_owned(),
        }
    }
}

impl std::fmt::Debug for Block {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Block")
            .field("type", &self.type_name)
            .field("signature", &self.signature.to_string())
            .field("state", &self.state)
            .field("rate", &self.rate)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mux::TestMux;

    struct Doubler;

    impl BlockImpl for Doubler {
        type Inputs = (u16,);
        type Outputs = (u16,);

        fn process(
            &mut self,
            (input,): (&[u16],),
            (output,): (&mut [u16],),
        ) -> Result<ProcessResult> {
            let n = input.len().min(output.len());
            for (o, i) in output[..n].iter_mut().zip(&input[..n]) {
                *o = i * 2;
            }
            Ok(ProcessResult::new(&[n], &[n]))
        }
    }

    #[test]
    fn test_signature_derived_from_impl() {
        let block = Block::new(Doubler);
        assert_eq!(block.signature().num_inputs(), 1);
        assert_eq!(block.signature().num_outputs(), 1);
        assert_eq!(block.signature().inputs()[0].tag.name(), "Unsigned16");
        assert_eq!(block.kind(), BlockKind::Typed);
    }

    #[test]
    fn test_dispatch_commits_counts() {
        let mut block = Block::new(Doubler);
        block.initialize().unwrap();

        let mux = TestMux::builder()
            .input::<u16>(&[1, 2, 3])
            .output::<u16>()
            .build();

        assert_eq!(block.process_step(&mux).unwrap(), ProcessStatus::Continue);
        assert_eq!(mux.take_output::<u16>(0), vec![2, 4, 6]);
        assert_eq!(mux.input_remaining(0), 0);
        assert_eq!(block.state(), BlockState::Running);
    }

    #[test]
    fn test_rate_default_adopts_parent() {
        let mut block = Block::new(Doubler);
        assert_eq!(block.rate(), 0.0);
        assert_eq!(block.set_rate(48_000.0), 48_000.0);
        assert_eq!(block.rate(), 48_000.0);
        assert_eq!(block.state(), BlockState::RateSet);
    }

    struct Decimator;

    impl BlockImpl for Decimator {
        type Inputs = (f32,);
        type Outputs = (f32,);

        fn process(&mut self, _i: (&[f32],), _o: (&mut [f32],)) -> Result<ProcessResult> {
            Ok(ProcessResult::done(&[0], &[0]))
        }

        fn set_rate(&mut self, parent_rate: f64) -> f64 {
            parent_rate / 4.0
        }
    }

    #[test]
    fn test_custom_rate_decision() {
        let mut block = Block::new(Decimator);
        assert_eq!(block.set_rate(1_000_000.0), 250_000.0);
    }

    #[test]
    fn test_lifecycle_deinit_only_after_init() {
        struct Hooked {
            inits: usize,
            deinits: usize,
        }
        impl BlockImpl for Hooked {
            type Inputs = (u8,);
            type Outputs = ();
            fn process(&mut self, _i: (&[u8],), _o: ()) -> Result<ProcessResult> {
                Ok(ProcessResult::done(&[0], &[]))
            }
            fn initialize(&mut self) -> Result<()> {
                self.inits += 1;
                Ok(())
            }
            fn deinitialize(&mut self) {
                self.deinits += 1;
            }
        }

        let mut block = Block::new(Hooked { inits: 0, deinits: 0 });
        // Deinit before init is a no-op.
        block.deinitialize();
        block.initialize().unwrap();
        block.deinitialize();
        block.deinitialize();

        let hooked = block.downcast_mut::<Hooked>().unwrap();
        assert_eq!(hooked.inits, 1);
        assert_eq!(hooked.deinits, 1);
    }

    #[test]
    fn test_downcast_wrong_type() {
        let mut block = Block::new(Doubler);
        assert!(block.downcast_mut::<Decimator>().is_none());
        assert!(block.downcast_mut::<Doubler>().is_some());
    }

    #[test]
    #[should_panic(expected = "at least one port")]
    fn test_portless_block_rejected() {
        struct Idle;
        impl BlockImpl for Idle {
            type Inputs = ();
            type Outputs = ();
            fn process(&mut self, _i: (), _o: ()) -> Result<ProcessResult> {
                Ok(ProcessResult::done(&[], &[]))
            }
        }
        let _ = Block::new(Idle);
    }
}
