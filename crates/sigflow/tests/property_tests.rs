//! Property tests for the ring index protocol and chunked dispatch.

use proptest::prelude::*;
use sigflow::{page_size, Block, BlockImpl, ProcessResult, RingBuffer, SampleMux, TestMux};

proptest! {
    /// Occupancy never exceeds capacity and bytes are conserved across any
    /// interleaving of writes and reads.
    #[test]
    fn prop_bounded_occupancy_and_conservation(
        ops in proptest::collection::vec((0usize..512, 0usize..512), 1..200),
    ) {
        let ring = RingBuffer::new(page_size()).unwrap();
        let capacity = ring.capacity();
        let mut written = 0u64;
        let mut read = 0u64;

        for (w_req, r_req) in ops {
            let w = ring.write_slice();
            let n = w_req.min(w.len());
            ring.commit_write(n);
            written += n as u64;

            prop_assert!(ring.len() <= capacity,
                "occupancy {} exceeds capacity {}", ring.len(), capacity);

            let r = ring.read_slice();
            let m = r_req.min(r.len());
            ring.consume(m);
            read += m as u64;

            prop_assert!(read <= written);
            prop_assert_eq!(written - read, ring.len() as u64);
        }
    }

    /// The byte stream survives arbitrary chunking: whatever sizes the
    /// producer commits in, the consumer sees the identical sequence.
    #[test]
    fn prop_fifo_content_any_chunking(
        chunks in proptest::collection::vec(1usize..300, 1..50),
    ) {
        let ring = RingBuffer::new(page_size()).unwrap();
        let mut next_in = 0u8;
        let mut next_out = 0u8;

        for chunk in chunks {
            let w = ring.write_slice();
            let n = chunk.min(w.len());
            for b in &mut w[..n] {
                *b = next_in;
                next_in = next_in.wrapping_add(1);
            }
            ring.commit_write(n);

            let r = ring.read_slice();
            for &b in r {
                prop_assert_eq!(b, next_out);
                next_out = next_out.wrapping_add(1);
            }
            let m = r.len();
            ring.consume(m);
        }
    }
}

struct Accumulator {
    sum: u64,
}

impl BlockImpl for Accumulator {
    type Inputs = (u32,);
    type Outputs = (u64,);

    fn process(
        &mut self,
        (input,): (&[u32],),
        (output,): (&mut [u64],),
    ) -> sigflow::Result<ProcessResult> {
        let n = input.len().min(output.len());
        for (o, i) in output[..n].iter_mut().zip(&input[..n]) {
            self.sum += u64::from(*i);
            *o = self.sum;
        }
        Ok(ProcessResult::new(&[n], &[n]))
    }
}

fn run_accumulator(input: &[u32], single_in: bool, single_out: bool) -> Vec<u64> {
    let mut block = Block::new(Accumulator { sum: 0 });
    block.initialize().unwrap();
    let mux = TestMux::builder()
        .input::<u32>(input)
        .output::<u64>()
        .single_input_samples(single_in)
        .single_output_samples(single_out)
        .build();
    while mux.wait_ready().is_ok() {
        block.process_step(&mux).unwrap();
    }
    block.deinitialize();
    mux.take_output::<u64>(0)
}

proptest! {
    /// A stateful block produces the identical output stream whether it is
    /// fed whole vectors or one sample at a time.
    #[test]
    fn prop_chunking_equivalence(input in proptest::collection::vec(any::<u32>(), 0..200)) {
        let vectorized = run_accumulator(&input, false, false);
        let one_in = run_accumulator(&input, true, false);
        let one_both = run_accumulator(&input, true, true);

        prop_assert_eq!(&vectorized, &one_in);
        prop_assert_eq!(&vectorized, &one_both);
    }
}
