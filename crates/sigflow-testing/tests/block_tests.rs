//! Typed block checks across chunking modes.

use num_complex::Complex32;
use sigflow::{BlockImpl, ProcessResult};
use sigflow_testing::BlockTester;

struct Adder;

impl BlockImpl for Adder {
    type Inputs = (u32, u16);
    type Outputs = (u32,);

    fn process(
        &mut self,
        (a, b): (&[u32], &[u16]),
        (out,): (&mut [u32],),
    ) -> sigflow::Result<ProcessResult> {
        let n = a.len().min(b.len()).min(out.len());
        for i in 0..n {
            out[i] = a[i] + u32::from(b[i]);
        }
        Ok(ProcessResult::new(&[n, n], &[n]))
    }
}

#[test]
fn adder_sums_mixed_width_inputs() {
    BlockTester::new()
        .check(
            || Adder,
            &(vec![1u32, 2, 3], vec![2u16, 3, 4]),
            &(vec![3u32, 5, 7],),
        )
        .unwrap();
}

/// The run ends as soon as the shorter input drains; the surplus on the
/// longer port is never consumed.
#[test]
fn adder_stops_at_the_shorter_input() {
    BlockTester::new()
        .check(
            || Adder,
            &(vec![1u32, 2, 3, 4], vec![2u16, 3]),
            &(vec![3u32, 5],),
        )
        .unwrap();
}

#[test]
fn adder_catches_wrong_expectations() {
    let err = BlockTester::new()
        .check(
            || Adder,
            &(vec![1u32, 2, 3], vec![2u16, 3, 4]),
            &(vec![3u32, 5, 8],),
        )
        .unwrap_err();
    assert!(err.to_string().contains("mismatch"));
}

struct ComplexSubtractor;

impl BlockImpl for ComplexSubtractor {
    type Inputs = (Complex32, Complex32);
    type Outputs = (Complex32,);

    fn process(
        &mut self,
        (a, b): (&[Complex32], &[Complex32]),
        (out,): (&mut [Complex32],),
    ) -> sigflow::Result<ProcessResult> {
        let n = a.len().min(b.len()).min(out.len());
        for i in 0..n {
            out[i] = a[i] - b[i];
        }
        Ok(ProcessResult::new(&[n, n], &[n]))
    }
}

#[test]
fn complex_subtractor_within_epsilon() {
    BlockTester::new()
        .epsilon(0.1)
        .check(
            || ComplexSubtractor,
            &(
                vec![
                    Complex32::new(1.0, 2.0),
                    Complex32::new(3.0, 4.0),
                    Complex32::new(5.0, 6.0),
                ],
                vec![
                    Complex32::new(0.5, 0.5),
                    Complex32::new(0.25, 0.25),
                    Complex32::new(0.75, 0.75),
                ],
            ),
            &(vec![
                Complex32::new(0.5, 1.5),
                Complex32::new(2.75, 3.75),
                Complex32::new(4.25, 5.25),
            ],),
        )
        .unwrap();
}

struct HalfRate {
    carry: Option<u16>,
}

impl BlockImpl for HalfRate {
    type Inputs = (u16,);
    type Outputs = (u16,);

    fn process(
        &mut self,
        (input,): (&[u16],),
        (output,): (&mut [u16],),
    ) -> sigflow::Result<ProcessResult> {
        let mut consumed = 0;
        let mut produced = 0;
        for &sample in input {
            if produced == output.len() {
                break;
            }
            consumed += 1;
            match self.carry.take() {
                None => self.carry = Some(sample),
                Some(first) => {
                    output[produced] = ((u32::from(first) + u32::from(sample)) / 2) as u16;
                    produced += 1;
                }
            }
        }
        Ok(ProcessResult::new(&[consumed], &[produced]))
    }
}

/// A block whose consumption and production rates differ must behave the
/// same under every chunking, including one sample at a time.
#[test]
fn rate_changing_block_is_chunking_invariant() {
    BlockTester::new()
        .check(
            || HalfRate { carry: None },
            &(vec![0u16, 10, 20, 30, 40, 50],),
            &(vec![5u16, 25, 45],),
        )
        .unwrap();
}

#[test]
fn platform_initialize_twice_is_once() {
    let first = sigflow::platform::initialize();
    let second = sigflow::platform::initialize();
    assert_eq!(first.is_ok(), second.is_ok());
}
