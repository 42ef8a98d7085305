//! Sample buses: the multi-port I/O surface a block processes through.
//!
//! Two implementations share one interface: [`RingMux`] views live ring
//! buffers for pipeline execution, [`TestMux`] replays in-memory vectors for
//! harness runs. The bus is byte-level and object-safe; typed views are
//! produced by the [`crate::Ports`] shims on top of it.

use crate::error::{Error, Result};
use crate::invariants::debug_assert_whole_samples;
use crate::ring::RingBuffer;
use crate::signature::Signature;
use crate::types::{cast_slice, sample_bytes, Sample};
use std::cell::UnsafeCell;
use std::mem;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Multi-port sample bus presented to a block's process step.
///
/// Ports are indexed in signature order. Views returned by
/// [`Self::readable`] and [`Self::writable`] are always rounded down to
/// whole samples and may be empty; a block seeing an empty view reports
/// zero consumed/produced for that port.
///
/// View validity contract (same single-owner discipline as the ring): each
/// port has exactly one driving thread, and a view is valid only until the
/// next `advance_*` call on its port.
pub trait SampleMux: Send + Sync {
    /// Number of input ports.
    fn num_inputs(&self) -> usize;

    /// Number of output ports.
    fn num_outputs(&self) -> usize;

    /// Blocks until every input port has at least one readable sample and
    /// every output port has space for at least one.
    ///
    /// Returns [`Error::EndOfStream`] once any input is closed and drained,
    /// [`Error::BrokenStream`] once any output has been closed from the
    /// consuming side. Runners call this outside their call mutex, so an
    /// out-of-band call never waits behind a stalled stream.
    fn wait_ready(&self) -> Result<()>;

    /// Readable bytes currently available on an input port.
    fn readable(&self, port: usize) -> &[u8];

    /// Writable bytes currently available on an output port.
    #[allow(clippy::mut_from_ref)]
    fn writable(&self, port: usize) -> &mut [u8];

    /// Releases `samples` consumed samples on an input port.
    fn advance_read(&self, port: usize, samples: usize);

    /// Publishes `samples` produced samples on an output port. Ignored once
    /// the port's stream is closed.
    fn advance_write(&self, port: usize, samples: usize);

    /// Signals end-of-stream on all output ports. Sticky.
    fn set_eos(&self);

    /// Closes every stream attached to this bus, both directions. Called by
    /// runners on exit so downstream sees EOF and upstream producers fail
    /// fast with a broken stream.
    fn finalize(&self) {
        self.set_eos();
    }

    /// Returns `true` once any input stream is closed and fully drained.
    fn is_eos(&self) -> bool;
}

// ---------------------------------------------------------------------
// RING-BACKED BUS
// ---------------------------------------------------------------------

struct RingPort {
    ring: Arc<RingBuffer>,
    elem_size: usize,
}

impl RingPort {
    fn bind(ring: Arc<RingBuffer>, elem_size: usize) -> Result<Self> {
        if ring.capacity() % elem_size != 0 {
            return Err(Error::CapacityMisaligned {
                capacity: ring.capacity(),
                elem_size,
            });
        }
        Ok(Self { ring, elem_size })
    }
}

/// Sample bus over live SPSC ring buffers.
///
/// Holds the consuming end of each input ring and the producing end of each
/// output ring. Constructing the mux is the single-producer/single-consumer
/// ownership point: exactly one mux consumes a given ring and exactly one
/// produces into it.
pub struct RingMux {
    inputs: Vec<RingPort>,
    outputs: Vec<RingPort>,
}

impl std::fmt::Debug for RingMux {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingMux")
            .field("inputs", &self.inputs.len())
            .field("outputs", &self.outputs.len())
            .finish()
    }
}

impl RingMux {
    /// Binds input and output rings to the ports of `signature`.
    ///
    /// Every ring capacity must hold a whole number of the wired element
    /// size.
    ///
    /// # Panics
    ///
    /// Panics if the ring counts do not match the signature's port counts;
    /// that is a wiring bug, not a runtime condition.
    pub fn new(
        inputs: Vec<Arc<RingBuffer>>,
        outputs: Vec<Arc<RingBuffer>>,
        signature: &Signature,
    ) -> Result<Self> {
        assert_eq!(
            inputs.len(),
            signature.num_inputs(),
            "input ring count does not match signature {signature}"
        );
        assert_eq!(
            outputs.len(),
            signature.num_outputs(),
            "output ring count does not match signature {signature}"
        );

        let inputs = inputs
            .into_iter()
            .zip(signature.inputs())
            .map(|(ring, desc)| RingPort::bind(ring, desc.elem_size))
            .collect::<Result<Vec<_>>>()?;
        let outputs = outputs
            .into_iter()
            .zip(signature.outputs())
            .map(|(ring, desc)| RingPort::bind(ring, desc.elem_size))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { inputs, outputs })
    }
}

impl SampleMux for RingMux {
    fn num_inputs(&self) -> usize {
        self.inputs.len()
    }

    fn num_outputs(&self) -> usize {
        self.outputs.len()
    }

    fn wait_ready(&self) -> Result<()> {
        for port in &self.inputs {
            port.ring.wait_readable(port.elem_size)?;
        }
        for port in &self.outputs {
            port.ring.wait_writable(port.elem_size)?;
        }
        Ok(())
    }

    fn readable(&self, port: usize) -> &[u8] {
        let p = &self.inputs[port];
        let bytes = p.ring.read_slice();
        let whole = bytes.len() - bytes.len() % p.elem_size;
        &bytes[..whole]
    }

    fn writable(&self, port: usize) -> &mut [u8] {
        let p = &self.outputs[port];
        let bytes = p.ring.write_slice();
        let whole = bytes.len() - bytes.len() % p.elem_size;
        &mut bytes[..whole]
    }

    fn advance_read(&self, port: usize, samples: usize) {
        let p = &self.inputs[port];
        let bytes = samples * p.elem_size;
        debug_assert_whole_samples!(bytes, p.elem_size);
        p.ring.consume(bytes);
    }

    fn advance_write(&self, port: usize, samples: usize) {
        let p = &self.outputs[port];
        if p.ring.is_eos() {
            return;
        }
        p.ring.commit_write(samples * p.elem_size);
    }

    fn set_eos(&self) {
        for port in &self.outputs {
            port.ring.set_eos();
        }
    }

    fn finalize(&self) {
        for port in &self.inputs {
            port.ring.set_eos();
        }
        for port in &self.outputs {
            port.ring.set_eos();
        }
    }

    fn is_eos(&self) -> bool {
        self.inputs.iter().any(|p| p.ring.is_finished())
    }
}

// ---------------------------------------------------------------------
// IN-MEMORY TEST BUS
// ---------------------------------------------------------------------

/// 16-byte-aligned growable byte storage, so sample views cast out of it
/// are aligned for every element type the runtime carries.
struct AlignedBytes {
    words: Vec<u128>,
    len: usize,
}

impl AlignedBytes {
    fn from_bytes(bytes: &[u8]) -> Self {
        let mut buf = Self {
            words: Vec::new(),
            len: 0,
        };
        buf.push_bytes(bytes);
        buf
    }

    fn with_len(len: usize) -> Self {
        Self {
            words: vec![0; len.div_ceil(mem::size_of::<u128>())],
            len,
        }
    }

    fn push_bytes(&mut self, bytes: &[u8]) {
        let new_len = self.len + bytes.len();
        self.words.resize(new_len.div_ceil(mem::size_of::<u128>()), 0);
        // SAFETY: the word vector spans at least new_len bytes.
        unsafe {
            self.as_mut_ptr()
                .add(self.len)
                .copy_from_nonoverlapping(bytes.as_ptr(), bytes.len());
        }
        self.len = new_len;
    }

    fn as_slice(&self) -> &[u8] {
        // SAFETY: words spans at least len initialized bytes.
        unsafe { std::slice::from_raw_parts(self.words.as_ptr().cast(), self.len) }
    }

    fn as_mut_ptr(&mut self) -> *mut u8 {
        self.words.as_mut_ptr().cast()
    }
}

struct TestInput {
    data: AlignedBytes,
    elem_size: usize,
    cursor: usize,
}

struct TestOutput {
    data: AlignedBytes,
    scratch: AlignedBytes,
    elem_size: usize,
}

struct TestState {
    inputs: Vec<TestInput>,
    outputs: Vec<TestOutput>,
    single_input_samples: bool,
    single_output_samples: bool,
}

/// In-memory sample bus for exercising blocks without threads or rings.
///
/// Inputs replay caller-supplied vectors; outputs grow as the block
/// produces. The single-sample knobs cap every view at one sample, forcing
/// the degenerate chunking that flushes out batching bugs.
///
/// SAFETY: state lives in an `UnsafeCell` so views can be handed out from
/// `&self` like the ring bus does. This is sound under the bus contract:
/// a single thread drives the mux, and views die before the next
/// `advance_*` on their port.
pub struct TestMux {
    state: UnsafeCell<TestState>,
    eos: AtomicBool,
}

// SAFETY: see the type-level contract; the test bus is driven by one thread
// at a time.
unsafe impl Send for TestMux {}
unsafe impl Sync for TestMux {}

/// Scratch sizing for test outputs: enough to make vectorized runs batch
/// meaningfully.
const SCRATCH_SAMPLES: usize = 1024;

impl TestMux {
    /// Starts building a test bus.
    #[must_use]
    pub fn builder() -> TestMuxBuilder {
        TestMuxBuilder {
            inputs: Vec::new(),
            output_elems: Vec::new(),
            single_input_samples: false,
            single_output_samples: false,
        }
    }

    /// Builds a test bus from serialized port data: `(bytes, elem_size)`
    /// per input, element sizes per output. The byte lengths must be whole
    /// numbers of samples.
    #[must_use]
    pub fn from_raw_parts(
        inputs: Vec<(Vec<u8>, usize)>,
        output_elems: Vec<usize>,
        single_input_samples: bool,
        single_output_samples: bool,
    ) -> Self {
        let inputs = inputs
            .into_iter()
            .map(|(bytes, elem_size)| {
                assert!(elem_size > 0);
                assert_eq!(bytes.len() % elem_size, 0, "partial trailing sample");
                TestInput {
                    data: AlignedBytes::from_bytes(&bytes),
                    elem_size,
                    cursor: 0,
                }
            })
            .collect();
        let outputs = output_elems
            .into_iter()
            .map(|elem_size| {
                assert!(elem_size > 0);
                TestOutput {
                    data: AlignedBytes::with_len(0),
                    scratch: AlignedBytes::with_len(elem_size * SCRATCH_SAMPLES),
                    elem_size,
                }
            })
            .collect();
        Self {
            state: UnsafeCell::new(TestState {
                inputs,
                outputs,
                single_input_samples,
                single_output_samples,
            }),
            eos: AtomicBool::new(false),
        }
    }

    /// Copies the samples collected on an output port.
    ///
    /// # Panics
    ///
    /// Panics if `T` does not match the port's element size.
    #[must_use]
    pub fn take_output<T: Sample>(&self, port: usize) -> Vec<T> {
        // SAFETY: single-thread contract; no views outstanding across this
        // read-only copy.
        let state = unsafe { &*self.state.get() };
        let out = &state.outputs[port];
        assert_eq!(
            mem::size_of::<T>(),
            out.elem_size,
            "output port {port} carries {}-byte samples",
            out.elem_size
        );
        cast_slice::<T>(out.data.as_slice()).to_vec()
    }

    /// Samples not yet consumed on an input port.
    #[must_use]
    pub fn input_remaining(&self, port: usize) -> usize {
        // SAFETY: single-thread contract.
        let state = unsafe { &*self.state.get() };
        let inp = &state.inputs[port];
        (inp.data.len - inp.cursor) / inp.elem_size
    }
}

impl SampleMux for TestMux {
    fn num_inputs(&self) -> usize {
        // SAFETY: single-thread contract.
        unsafe { &*self.state.get() }.inputs.len()
    }

    fn num_outputs(&self) -> usize {
        // SAFETY: single-thread contract.
        unsafe { &*self.state.get() }.outputs.len()
    }

    fn wait_ready(&self) -> Result<()> {
        // SAFETY: single-thread contract.
        let state = unsafe { &*self.state.get() };
        // Any drained input ends the run, matching the ring-backed bus.
        if state.inputs.iter().any(|i| i.cursor == i.data.len) {
            return Err(Error::EndOfStream);
        }
        Ok(())
    }

    fn readable(&self, port: usize) -> &[u8] {
        // SAFETY: single-thread contract; the view dies before the next
        // advance_read on this port.
        let state = unsafe { &*self.state.get() };
        let inp = &state.inputs[port];
        let mut avail = inp.data.len - inp.cursor;
        if state.single_input_samples {
            avail = avail.min(inp.elem_size);
        }
        &inp.data.as_slice()[inp.cursor..inp.cursor + avail]
    }

    fn writable(&self, port: usize) -> &mut [u8] {
        // SAFETY: single-thread contract; the view dies before the next
        // advance_write on this port.
        let state = unsafe { &mut *self.state.get() };
        let single = state.single_output_samples;
        let out = &mut state.outputs[port];
        let cap = if single { out.elem_size } else { out.scratch.len };
        let ptr = out.scratch.as_mut_ptr();
        // SAFETY: cap <= scratch.len by construction.
        unsafe { std::slice::from_raw_parts_mut(ptr, cap) }
    }

    fn advance_read(&self, port: usize, samples: usize) {
        // SAFETY: single-thread contract.
        let state = unsafe { &mut *self.state.get() };
        let inp = &mut state.inputs[port];
        let bytes = samples * inp.elem_size;
        assert!(inp.cursor + bytes <= inp.data.len, "consumed past input end");
        inp.cursor += bytes;
    }

    fn advance_write(&self, port: usize, samples: usize) {
        if self.eos.load(Ordering::SeqCst) {
            return;
        }
        // SAFETY: single-thread contract; no writable view outstanding when
        // a well-behaved block commits.
        let state = unsafe { &mut *self.state.get() };
        let out = &mut state.outputs[port];
        let bytes = samples * out.elem_size;
        assert!(bytes <= out.scratch.len, "produced past the writable view");
        let committed = out.scratch.as_slice()[..bytes].to_vec();
        out.data.push_bytes(&committed);
    }

    fn set_eos(&self) {
        self.eos.store(true, Ordering::SeqCst);
    }

    fn is_eos(&self) -> bool {
        if self.eos.load(Ordering::SeqCst) {
            return true;
        }
        // SAFETY: single-thread contract.
        let state = unsafe { &*self.state.get() };
        state.inputs.iter().any(|i| i.cursor == i.data.len)
    }
}

/// Builder for [`TestMux`] with typed ports.
pub struct TestMuxBuilder {
    inputs: Vec<(Vec<u8>, usize)>,
    output_elems: Vec<usize>,
    single_input_samples: bool,
    single_output_samples: bool,
}

impl TestMuxBuilder {
    /// Adds an input port fed with `samples`.
    #[must_use]
    pub fn input<T: Sample>(mut self, samples: &[T]) -> Self {
        self.inputs.push((sample_bytes(samples), mem::size_of::<T>()));
        self
    }

    /// Adds an output port carrying `T`.
    #[must_use]
    pub fn output<T: Sample>(mut self) -> Self {
        self.output_elems.push(mem::size_of::<T>());
        self
    }

    /// Caps every readable view at one sample.
    #[must_use]
    pub fn single_input_samples(mut self, on: bool) -> Self {
        self.single_input_samples = on;
        self
    }

    /// Caps every writable view at one sample.
    #[must_use]
    pub fn single_output_samples(mut self, on: bool) -> Self {
        self.single_output_samples = on;
        self
    }

    /// Builds the bus.
    #[must_use]
    pub fn build(self) -> TestMux {
        TestMux::from_raw_parts(
            self.inputs,
            self.output_elems,
            self.single_input_samples,
            self.single_output_samples,
        )
    }
}
