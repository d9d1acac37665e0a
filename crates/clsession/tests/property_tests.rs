//! Property-based tests for device selection, buffer bookkeeping and the
//! matrix kernels.
//!
//! - **Selection**: any in-range index pair selects exactly that device;
//!   negative indices select position 0.
//! - **Buffers**: handles number buffers in bind order and every buffer is
//!   released exactly once.
//! - **Matmul**: device results equal the CPU reference for both layouts.

use clsession::host::{HandleKind, HostDriver, HostPlatformSpec};
use clsession::kernels::{copy_source, ElementType, MatrixLayout, COPY_ENTRY};
use clsession::matmul;
use clsession::reference::{ref_matmul, transpose};
use clsession::{DeviceSelection, InitOutcome, Session};
use proptest::prelude::*;

// ── Topology strategy ────────────────────────────────────────────────

fn arb_topology() -> impl Strategy<Value = Vec<usize>> {
    prop::collection::vec(1_usize..=4, 1..=4)
}

fn driver_for(device_counts: &[usize]) -> HostDriver {
    let specs = device_counts
        .iter()
        .enumerate()
        .map(|(p, &n)| {
            let names: Vec<String> = (0..n).map(|d| format!("dev-{p}-{d}")).collect();
            let refs: Vec<&str> = names.iter().map(String::as_str).collect();
            HostPlatformSpec::new(&format!("plat-{p}"), &refs)
        })
        .collect();
    HostDriver::with_topology(specs)
}

// ── Selection invariants ─────────────────────────────────────────────

proptest! {
    #[test]
    fn in_range_indices_select_that_device(
        counts in arb_topology(),
        p_seed in any::<prop::sample::Index>(),
        d_seed in any::<prop::sample::Index>(),
    ) {
        let p = p_seed.index(counts.len());
        let d = d_seed.index(counts[p]);
        let mut session = Session::new(driver_for(&counts));
        let outcome = session.initialize(DeviceSelection::at(p, d)).unwrap();
        let InitOutcome::Selected(selected) = outcome else {
            return Err(TestCaseError::fail("expected selection"));
        };
        prop_assert_eq!(selected.platform_name, format!("plat-{p}"));
        prop_assert_eq!(selected.device_name, format!("dev-{p}-{d}"));
    }

    #[test]
    fn negative_indices_select_position_zero(
        counts in arb_topology(),
        p in i32::MIN..0,
        d in i32::MIN..0,
    ) {
        let mut session = Session::new(driver_for(&counts));
        session.initialize(DeviceSelection::from_raw(p, d, false)).unwrap();
        let selected = session.selected().unwrap();
        prop_assert_eq!(&selected.device_name, "dev-0-0");
    }

    #[test]
    fn out_of_range_platform_is_always_fatal(counts in arb_topology(), extra in 0_usize..8) {
        let mut session = Session::new(driver_for(&counts));
        let err = session.initialize(DeviceSelection::at(counts.len() + extra, 0)).unwrap_err();
        prop_assert!(err.is_fatal());
        prop_assert_eq!(session.driver().ledger().created(HandleKind::Context), 0);
    }
}

// ── Buffer invariants ────────────────────────────────────────────────

proptest! {
    #[test]
    fn buffer_positions_follow_bind_order(outputs in prop::collection::vec(any::<bool>(), 0..12)) {
        let mut session = Session::new(HostDriver::new());
        let ledger = session.driver().ledger();
        session.initialize(DeviceSelection::first()).unwrap();
        session.build_kernel(copy_source(ElementType::Int), COPY_ENTRY).unwrap();

        for (i, &is_output) in outputs.iter().enumerate() {
            let handle = if is_output {
                session.bind_output(1, 4 * (i + 1)).unwrap()
            } else {
                session.bind_buffer(0, &vec![i as i32; i + 1]).unwrap()
            };
            prop_assert_eq!(handle.position(), i);
            prop_assert_eq!(handle.byte_len(), 4 * (i + 1));
        }
        prop_assert_eq!(session.buffer_count(), outputs.len());

        // Reading any input handle returns what was bound there.
        for (i, &is_output) in outputs.iter().enumerate() {
            if !is_output {
                let mut out = vec![0i32; i + 1];
                session.read_result(session.buffer_handle(i).unwrap(), &mut out).unwrap();
                prop_assert!(out.iter().all(|&v| v == i as i32));
            }
        }

        drop(session);
        prop_assert_eq!(ledger.released(HandleKind::Buffer), outputs.len());
        prop_assert_eq!(ledger.live_total(), 0);
        prop_assert_eq!(ledger.double_releases(), 0);
    }
}

// ── Matmul invariants ────────────────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn int_matmul_matches_reference(
        (m, a, b) in (1_usize..=7).prop_flat_map(|m| (
            Just(m),
            prop::collection::vec(-50_i32..50, m * m),
            prop::collection::vec(-50_i32..50, m * m),
        )),
        transposed in any::<bool>(),
    ) {
        let mut expected = vec![0; m * m];
        ref_matmul(&a, &b, &mut expected, m);

        let mut session = Session::new(HostDriver::new());
        session.initialize(DeviceSelection::first()).unwrap();
        let (layout, b_dev) = if transposed {
            (MatrixLayout::Transposed, transpose(&b, m))
        } else {
            (MatrixLayout::Plain, b.clone())
        };
        let mut c = vec![0; m * m];
        matmul::multiply(&mut session, &a, &b_dev, &mut c, m, layout).unwrap();
        prop_assert_eq!(c, expected);
    }

    #[test]
    fn double_matmul_matches_reference(
        (m, a, b) in (1_usize..=6).prop_flat_map(|m| (
            Just(m),
            prop::collection::vec(-1.0e3_f64..1.0e3, m * m),
            prop::collection::vec(-1.0e3_f64..1.0e3, m * m),
        )),
    ) {
        let mut expected = vec![0.0; m * m];
        ref_matmul(&a, &b, &mut expected, m);

        let mut session = Session::new(HostDriver::new());
        session.initialize(DeviceSelection::first()).unwrap();
        let mut c = vec![0.0; m * m];
        matmul::multiply(&mut session, &a, &b, &mut c, m, MatrixLayout::Plain).unwrap();
        prop_assert_eq!(c, expected);
    }
}
