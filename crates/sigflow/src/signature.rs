//! Compile-time port lists and their runtime signatures.
//!
//! A block's typed `process` signature is expressed as two tuples of
//! [`Sample`] element types, one per direction. The [`Ports`] trait turns
//! those tuples into everything the dynamic dispatch layer needs: ordered
//! runtime tags, element sizes, and the slice views pulled from a
//! [`SampleMux`] for each invocation. Parameter order is the authoritative
//! schema; there is no name metadata.

use crate::mux::{SampleMux, TestMux};
use crate::types::{cast_slice, cast_slice_mut, sample_bytes, Sample, TypeTag};
use std::fmt;
use std::mem;

/// Maximum ports per direction.
pub const MAX_PORTS: usize = 4;

/// Runtime description of one port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortDesc {
    /// Canonical element type tag.
    pub tag: TypeTag,
    /// Element size in bytes.
    pub elem_size: usize,
}

impl PortDesc {
    /// Describes a port carrying `T`.
    #[must_use]
    pub fn of<T: Sample>() -> Self {
        Self {
            tag: T::type_tag(),
            elem_size: mem::size_of::<T>(),
        }
    }
}

/// Ordered input and output port descriptions of a block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    inputs: Vec<PortDesc>,
    outputs: Vec<PortDesc>,
}

impl Signature {
    /// Builds a signature from explicit port descriptions (raw blocks).
    #[must_use]
    pub fn new(inputs: Vec<PortDesc>, outputs: Vec<PortDesc>) -> Self {
        assert!(
            inputs.len() <= MAX_PORTS && outputs.len() <= MAX_PORTS,
            "at most {MAX_PORTS} ports per direction"
        );
        Self { inputs, outputs }
    }

    /// Derives the signature of a typed block from its port tuples.
    #[must_use]
    pub fn of<I: Ports, O: Ports>() -> Self {
        Self::new(I::descs(), O::descs())
    }

    /// Input port descriptions, in parameter order.
    #[must_use]
    pub fn inputs(&self) -> &[PortDesc] {
        &self.inputs
    }

    /// Output port descriptions, in parameter order.
    #[must_use]
    pub fn outputs(&self) -> &[PortDesc] {
        &self.outputs
    }

    /// Number of input ports.
    #[must_use]
    pub fn num_inputs(&self) -> usize {
        self.inputs.len()
    }

    /// Number of output ports.
    #[must_use]
    pub fn num_outputs(&self) -> usize {
        self.outputs.len()
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let join = |ports: &[PortDesc]| {
            ports
                .iter()
                .map(|p| p.tag.name().to_owned())
                .collect::<Vec<_>>()
                .join(", ")
        };
        write!(f, "({}) -> ({})", join(&self.inputs), join(&self.outputs))
    }
}

/// A tuple of sample element types forming one direction of a block's
/// typed signature.
///
/// Implemented for tuples of arity 0 through [`MAX_PORTS`]. The associated
/// slice types are what a block's `process` receives: `Refs` for inputs,
/// `Muts` for outputs.
pub trait Ports: 'static {
    /// Number of ports in this direction.
    const ARITY: usize;

    /// Read-only slice views, one per port: `(&[A], &[B], ...)`.
    type Refs<'a>;

    /// Mutable slice views, one per port: `(&mut [A], &mut [B], ...)`.
    type Muts<'a>;

    /// Owned vectors, one per port: `(Vec<A>, Vec<B>, ...)`. Used by test
    /// harnesses to feed and compare whole streams.
    type Vecs;

    /// Runtime port descriptions, in order.
    fn descs() -> Vec<PortDesc>;

    /// Pulls one readable view per port from the bus and casts it.
    fn bind_readable(mux: &dyn SampleMux) -> Self::Refs<'_>;

    /// Pulls one writable view per port from the bus and casts it.
    fn bind_writable(mux: &dyn SampleMux) -> Self::Muts<'_>;

    /// Sample counts of the bound readable views.
    fn ref_lens(refs: &Self::Refs<'_>) -> [usize; MAX_PORTS];

    /// Sample counts of the bound writable views.
    fn mut_lens(muts: &Self::Muts<'_>) -> [usize; MAX_PORTS];

    /// Serializes owned vectors into `(bytes, elem_size)` pairs for a test
    /// bus.
    fn vecs_to_bytes(vecs: &Self::Vecs) -> Vec<(Vec<u8>, usize)>;

    /// Compares collected test-bus outputs against expectations, port by
    /// port, with tolerant equality. Returns a description of the first
    /// mismatch.
    fn outputs_approx_eq(
        expected: &Self::Vecs,
        mux: &TestMux,
        epsilon: f64,
    ) -> std::result::Result<(), String>;
}

fn port_approx_eq<T: Sample>(
    port: usize,
    expected: &[T],
    actual: &[T],
    epsilon: f64,
) -> std::result::Result<(), String> {
    if expected.len() != actual.len() {
        return Err(format!(
            "output port {port}: expected {} samples, got {}",
            expected.len(),
            actual.len()
        ));
    }
    for (i, (e, a)) in expected.iter().zip(actual).enumerate() {
        if !T::approx_eq(e, a, epsilon) {
            return Err(format!("output port {port}: mismatch at sample {i}"));
        }
    }
    Ok(())
}

macro_rules! impl_ports {
    ($arity:expr => $( $T:ident : $idx:tt ),*) => {
        #[allow(unused_variables, unused_mut, clippy::unused_unit)]
        impl<$($T: Sample),*> Ports for ($($T,)*) {
            const ARITY: usize = $arity;

            type Refs<'a> = ($(&'a [$T],)*);
            type Muts<'a> = ($(&'a mut [$T],)*);
            type Vecs = ($(Vec<$T>,)*);

            fn descs() -> Vec<PortDesc> {
                vec![$(PortDesc::of::<$T>()),*]
            }

            fn bind_readable(mux: &dyn SampleMux) -> Self::Refs<'_> {
                ($(cast_slice::<$T>(mux.readable($idx)),)*)
            }

            fn bind_writable(mux: &dyn SampleMux) -> Self::Muts<'_> {
                ($(cast_slice_mut::<$T>(mux.writable($idx)),)*)
            }

            fn ref_lens(refs: &Self::Refs<'_>) -> [usize; MAX_PORTS] {
                let mut lens = [0; MAX_PORTS];
                $(lens[$idx] = refs.$idx.len();)*
                lens
            }

            fn mut_lens(muts: &Self::Muts<'_>) -> [usize; MAX_PORTS] {
                let mut lens = [0; MAX_PORTS];
                $(lens[$idx] = muts.$idx.len();)*
                lens
            }

            fn vecs_to_bytes(vecs: &Self::Vecs) -> Vec<(Vec<u8>, usize)> {
                vec![$((sample_bytes(&vecs.$idx), mem::size_of::<$T>())),*]
            }

            fn outputs_approx_eq(
                expected: &Self::Vecs,
                mux: &TestMux,
                epsilon: f64,
            ) -> std::result::Result<(), String> {
                $(port_approx_eq($idx, &expected.$idx, &mux.take_output::<$T>($idx), epsilon)?;)*
                Ok(())
            }
        }
    };
}

impl_ports!(0 =>);
impl_ports!(1 => A:0);
impl_ports!(2 => A:0, B:1);
impl_ports!(3 => A:0, B:1, C:2);
impl_ports!(4 => A:0, B:1, C:2, D:3);
