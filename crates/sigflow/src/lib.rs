//! sigflow - Core runtime for typed signal-processing dataflow graphs.
//!
//! User-defined **blocks** carry a statically typed `process` step; **sample
//! buses** present multi-port slice views over lock-free SPSC byte rings;
//! **runners** drive each block on its own thread until end-of-stream.
//! Progress is entirely data-driven: there is no scheduler, only
//! backpressure through the rings and a sticky end-of-stream flag that
//! travels forward.
//!
//! # Key features
//!
//! - Compile-time port signatures (tuples of sample types) mapped to
//!   canonical runtime tags
//! - Byte-granular SPSC rings with the mirrored ("magic") mapping for
//!   contiguous wraparound views
//! - Blocking with adaptive backoff before parking; lock-free fast path
//! - Out-of-band parameter calls serialized against the process loop
//!
//! # Example
//!
//! ```
//! use sigflow::{Block, BlockImpl, ProcessResult, SampleMux, TestMux};
//!
//! struct Gain {
//!     factor: f32,
//! }
//!
//! impl BlockImpl for Gain {
//!     type Inputs = (f32,);
//!     type Outputs = (f32,);
//!
//!     fn process(
//!         &mut self,
//!         (input,): (&[f32],),
//!         (output,): (&mut [f32],),
//!     ) -> sigflow::Result<ProcessResult> {
//!         let n = input.len().min(output.len());
//!         for (o, i) in output[..n].iter_mut().zip(&input[..n]) {
//!             *o = i * self.factor;
//!         }
//!         Ok(ProcessResult::new(&[n], &[n]))
//!     }
//! }
//!
//! let mut block = Block::new(Gain { factor: 2.0 });
//! block.initialize().unwrap();
//!
//! let mux = TestMux::builder()
//!     .input::<f32>(&[1.0, 2.0, 3.0])
//!     .output::<f32>()
//!     .build();
//!
//! while mux.wait_ready().is_ok() {
//!     block.process_step(&mux).unwrap();
//! }
//! block.deinitialize();
//!
//! assert_eq!(mux.take_output::<f32>(0), vec![2.0, 4.0, 6.0]);
//! ```

mod backoff;
mod block;
mod error;
mod gate;
mod invariants;
mod mapping;
mod mux;
pub mod platform;
mod ring;
mod runner;
mod signature;
mod types;

pub use backoff::Backoff;
pub use block::{
    Block, BlockImpl, BlockKind, BlockState, ProcessResult, ProcessStatus, RawBlockImpl,
};
pub use error::{Error, Result};
pub use mapping::page_size;
pub use mux::{RingMux, SampleMux, TestMux, TestMuxBuilder};
pub use ring::RingBuffer;
pub use runner::{RawRunner, ThreadedRunner};
pub use signature::{PortDesc, Ports, Signature, MAX_PORTS};
pub use types::{cast_slice, cast_slice_mut, Bit, RefCounted, Sample, TypeTag};
