//! Block test harness for sigflow.
//!
//! [`BlockTester`] runs a typed block against in-memory buses and compares
//! the collected outputs with typed expectations. Every check runs in
//! several chunking modes - whole vectors at once and one sample at a time
//! in each direction - because batching bugs hide in whichever mode a block
//! was not developed against.
//!
//! # Example
//!
//! ```
//! use sigflow::{BlockImpl, ProcessResult};
//! use sigflow_testing::BlockTester;
//!
//! struct Negate;
//!
//! impl BlockImpl for Negate {
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
//!             *o = -i;
//!         }
//!         Ok(ProcessResult::new(&[n], &[n]))
//!     }
//! }
//!
//! BlockTester::new()
//!     .check(|| Negate, &(vec![1.0f32, -2.0],), &(vec![-1.0f32, 2.0],))
//!     .unwrap();
//! ```

use sigflow::{Block, BlockImpl, Error, Ports, ProcessStatus, Result, SampleMux, TestMux};

/// Sample rate handed to blocks under test before initialization.
const TEST_RATE: f64 = 8_000.0;

/// Chunking modes every check runs in: (single input samples, single output
/// samples).
const MODES: [(bool, bool); 4] = [(false, false), (true, false), (false, true), (true, true)];

/// Harness that drives one block to exhaustion per chunking mode and
/// compares its outputs against expectations.
pub struct BlockTester {
    epsilon: f64,
    max_iterations: usize,
}

impl BlockTester {
    /// A tester with exact integer comparison and a tight float epsilon.
    #[must_use]
    pub fn new() -> Self {
        Self {
            epsilon: 1e-6,
            max_iterations: 1_000_000,
        }
    }

    /// Sets the tolerance used for float and complex comparisons.
    #[must_use]
    pub fn epsilon(mut self, epsilon: f64) -> Self {
        self.epsilon = epsilon;
        self
    }

    /// Runs a fresh block instance per chunking mode over `inputs` and
    /// compares the collected outputs with `expected`.
    ///
    /// `make` builds the block; a fresh instance per mode keeps stateful
    /// blocks honest.
    pub fn check<U, F>(
        &self,
        make: F,
        inputs: &<U::Inputs as Ports>::Vecs,
        expected: &<U::Outputs as Ports>::Vecs,
    ) -> Result<()>
    where
        U: BlockImpl,
        F: Fn() -> U,
    {
        for (single_in, single_out) in MODES {
            self.run_mode::<U>(make(), inputs, expected, single_in, single_out)?;
        }
        Ok(())
    }

    fn run_mode<U: BlockImpl>(
        &self,
        imp: U,
        inputs: &<U::Inputs as Ports>::Vecs,
        expected: &<U::Outputs as Ports>::Vecs,
        single_in: bool,
        single_out: bool,
    ) -> Result<()> {
        let mut block = Block::new(imp);
        block.set_rate(TEST_RATE);
        block.initialize()?;

        let output_elems = <U::Outputs as Ports>::descs()
            .iter()
            .map(|d| d.elem_size)
            .collect();
        let mux = TestMux::from_raw_parts(
            <U::Inputs as Ports>::vecs_to_bytes(inputs),
            output_elems,
            single_in,
            single_out,
        );

        let mut iterations = 0usize;
        loop {
            match mux.wait_ready() {
                Ok(()) => {}
                Err(Error::EndOfStream) => break,
                Err(e) => return Err(e),
            }
            if block.process_step(&mux)? == ProcessStatus::Eof {
                break;
            }
            iterations += 1;
            if iterations > self.max_iterations {
                return Err(Error::block(anyhow::anyhow!(
                    "block made no progress after {iterations} iterations \
                     (single_in={single_in}, single_out={single_out})"
                )));
            }
        }
        block.deinitialize();

        <U::Outputs as Ports>::outputs_approx_eq(expected, &mux, self.epsilon).map_err(|msg| {
            Error::block(anyhow::anyhow!(
                "{msg} (single_in={single_in}, single_out={single_out})"
            ))
        })
    }
}

impl Default for BlockTester {
    fn default() -> Self {
        Self::new()
    }
}
