//! Square matrix multiplication on a [`Session`].

use std::mem::size_of;

use tracing::debug;

use crate::driver::ComputeDriver;
use crate::error::{ClStatus, FatalError, Result, Stage};
use crate::kernels::{matmul_source, ElementType, MatrixLayout};
use crate::reference::MatrixElement;
use crate::session::Session;

/// Element types the bundled matrix kernels are written for.
pub trait KernelElement: MatrixElement {
    const ELEMENT: ElementType;
}

impl KernelElement for i32 {
    const ELEMENT: ElementType = ElementType::Int;
}

impl KernelElement for f64 {
    const ELEMENT: ElementType = ElementType::Double;
}

/// Build the matrix kernel for `T` and `layout` on an initialized session.
pub fn build<D: ComputeDriver, T: KernelElement>(
    session: &mut Session<D>,
    layout: MatrixLayout,
) -> Result<()> {
    session.build_kernel(matmul_source(T::ELEMENT, layout), layout.entry_point())
}

/// `c = a * b` for `m × m` row-major matrices, using the kernel already built
/// on `session`. With [`MatrixLayout::Transposed`], `b` must hold Bᵀ.
///
/// Releases the buffers of any earlier run, binds A and B as read-only
/// buffers, C as a write-only buffer and `M` as a scalar, runs one work item
/// per element of C and reads C back.
pub fn run<D: ComputeDriver, T: KernelElement>(
    session: &mut Session<D>,
    a: &[T],
    b: &[T],
    c: &mut [T],
    m: usize,
) -> Result<()> {
    let invalid = |message: String| {
        FatalError::new(Stage::SetArgument, message, ClStatus::InvalidValue.into())
    };
    let (elements, out_bytes) = m
        .checked_mul(m)
        .and_then(|elements| Some((elements, elements.checked_mul(size_of::<T>())?)))
        .ok_or_else(|| invalid(format!("matrix dimension {m} overflows the buffer size")))?;
    if m == 0 || a.len() != elements || b.len() != elements || c.len() != elements {
        return Err(invalid(format!("matrix operands must all hold {m}x{m} elements")).into());
    }
    let dimension =
        i32::try_from(m).map_err(|_| invalid("matrix dimension exceeds i32".to_string()))?;

    session.release_buffers();
    session.bind_buffer(0, a)?;
    session.bind_buffer(1, b)?;
    let out = session.bind_output(2, out_bytes)?;
    session.bind_scalar(3, dimension)?;

    debug!(m, element = %T::ELEMENT, "matmul dispatch");
    session.execute(&[m, m], None)?;
    session.read_result(out, c)
}

/// Build and run in one step.
pub fn multiply<D: ComputeDriver, T: KernelElement>(
    session: &mut Session<D>,
    a: &[T],
    b: &[T],
    c: &mut [T],
    m: usize,
    layout: MatrixLayout,
) -> Result<()> {
    build::<D, T>(session, layout)?;
    run(session, a, b, c, m)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::DeviceSelection;
    use crate::host::{HandleKind, HostDriver};
    use crate::reference::{ref_matmul, transpose};

    fn session() -> Session<HostDriver> {
        let mut session = Session::new(HostDriver::new());
        session.initialize(DeviceSelection::first()).unwrap();
        session
    }

    #[test]
    fn int_product_matches_reference() {
        let a: Vec<i32> = (1..=9).collect();
        let b: Vec<i32> = (1..=9).rev().collect();
        let mut c = vec![0; 9];
        multiply(&mut session(), &a, &b, &mut c, 3, MatrixLayout::Plain).unwrap();
        assert_eq!(c, [30, 24, 18, 84, 69, 54, 138, 114, 90]);
    }

    #[test]
    fn transposed_double_product_matches_reference() {
        let a: Vec<f64> = (0..16).map(f64::from).collect();
        let b: Vec<f64> = (0..16).map(|v| f64::from(v) * 0.5).collect();
        let mut expected = vec![0.0; 16];
        ref_matmul(&a, &b, &mut expected, 4);

        let mut c = vec![0.0; 16];
        let b_trans = transpose(&b, 4);
        multiply(&mut session(), &a, &b_trans, &mut c, 4, MatrixLayout::Transposed).unwrap();
        assert_eq!(c, expected);
    }

    #[test]
    fn mismatched_operands_are_rejected_before_binding() {
        let mut session = session();
        build::<_, i32>(&mut session, MatrixLayout::Plain).unwrap();
        let mut c = vec![0; 4];
        let err = run(&mut session, &[1, 2, 3], &[1, 2, 3, 4], &mut c, 2).unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(session.buffer_count(), 0);
    }

    #[test]
    fn repeated_runs_reuse_three_buffers() {
        let mut session = session();
        let ledger = session.driver().ledger();
        build::<_, i32>(&mut session, MatrixLayout::Plain).unwrap();
        let a: Vec<i32> = (1..=16).collect();
        let b: Vec<i32> = (1..=16).rev().collect();
        let mut expected = vec![0; 16];
        ref_matmul(&a, &b, &mut expected, 4);

        for _ in 0..5 {
            let mut c = vec![0; 16];
            run(&mut session, &a, &b, &mut c, 4).unwrap();
            assert_eq!(c, expected);
            assert_eq!(session.buffer_count(), 3);
            assert!(ledger.live(HandleKind::Buffer) <= 3);
        }
        assert_eq!(ledger.created(HandleKind::Buffer), 15);
        drop(session);
        assert_eq!(ledger.live_total(), 0);
        assert_eq!(ledger.double_releases(), 0);
    }

    #[test]
    fn overflowing_dimension_is_fatal() {
        let mut session = session();
        build::<_, i32>(&mut session, MatrixLayout::Plain).unwrap();
        let err = run::<_, i32>(&mut session, &[], &[], &mut [], usize::MAX).unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(session.buffer_count(), 0);
    }
}
