// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Reports, removals and subframe pulls racing on one scheduler.

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use enb_sched::testing::{TEST_DRB_LCID, TestSetup};
use enb_sched::{
    GrantSource, Rnti, SchedConfigurator, SchedError, SchedReportSink, Scheduler, TtiPoint,
};

const NOF_STABLE: u16 = 8;
const NOF_CHURN: u16 = 8;

fn stable(i: u16) -> Rnti {
    Rnti(0x100 + i)
}

fn churn(i: u16) -> Rnti {
    Rnti(0x200 + i)
}

fn setup() -> (TestSetup, Scheduler) {
    let setup = TestSetup::builder().build().unwrap();
    let sched = setup.build_scheduler();
    for i in 0..NOF_STABLE {
        setup.add_ue(&sched, stable(i));
    }
    (setup, sched)
}

#[test]
fn test_removal_during_reports_leaves_others_intact() {
    let (setup, sched) = setup();
    for i in 0..NOF_CHURN {
        setup.add_ue(&sched, churn(i));
    }
    let stop = AtomicBool::new(false);

    thread::scope(|s| {
        // hammers the terminals that are about to disappear
        s.spawn(|| {
            while !stop.load(Ordering::Relaxed) {
                for i in 0..NOF_CHURN {
                    match sched.dl_rlc_buffer_state(churn(i), TEST_DRB_LCID, 10_000, 0) {
                        Ok(()) | Err(SchedError::UnknownRnti(_)) => {}
                        Err(e) => panic!("unexpected report error: {e}"),
                    }
                    let _ = sched.ul_sr_info(TtiPoint::new(0), churn(i));
                }
            }
        });

        // the stable terminals each get a distinct occupancy
        s.spawn(|| {
            for round in 0..200u32 {
                for i in 0..NOF_STABLE {
                    let bytes = 100 * (u32::from(i) + 1) + round % 2;
                    sched
                        .dl_rlc_buffer_state(stable(i), TEST_DRB_LCID, bytes, 0)
                        .unwrap();
                }
            }
        });

        s.spawn(|| {
            for i in 0..NOF_CHURN {
                sched.ue_rem(churn(i)).unwrap();
                thread::yield_now();
            }
            stop.store(true, Ordering::Relaxed);
        });
    });

    assert_eq!(sched.nof_ues(), NOF_STABLE as usize);
    for i in 0..NOF_CHURN {
        assert!(!sched.ue_exists(churn(i)));
    }
    // last writer round was odd: 100 * (i + 1) + 1 plus the RLC subheader
    for i in 0..NOF_STABLE {
        let expected = 100 * (u32::from(i) + 1) + 1 + 3;
        assert_eq!(sched.dl_pending_bytes(stable(i)).unwrap(), expected);
        let metrics = sched.ue_metrics(stable(i)).unwrap();
        assert!(!metrics.sr_pending());
        assert_eq!(metrics.dl_bytes_granted(), 0);
    }
}

#[test]
fn test_pulls_race_with_reports() {
    let (_setup, sched) = setup();
    let nof_ttis = 64u32;
    for i in 0..NOF_STABLE {
        sched
            .dl_rlc_buffer_state(stable(i), TEST_DRB_LCID, 400, 0)
            .unwrap();
    }

    thread::scope(|s| {
        s.spawn(|| {
            for tti in 0..nof_ttis {
                let rx = TtiPoint::new(tti);
                for i in 0..NOF_STABLE {
                    sched.dl_cqi_info(rx, stable(i), 0, 12).unwrap();
                    sched
                        .dl_rlc_buffer_state(stable(i), TEST_DRB_LCID, 400, 0)
                        .unwrap();
                }
            }
        });

        s.spawn(|| {
            for tti in 0..nof_ttis {
                let rx = TtiPoint::new(tti);
                let dl = sched.dl_sched(rx, 0).unwrap();
                let ul = sched.ul_sched(rx, 0).unwrap();
                for (n, a) in dl.iter().enumerate() {
                    assert_eq!(a.tti_tx, rx.to_tx_dl());
                    for b in &dl[n + 1..] {
                        assert_ne!(a.rnti, b.rnti);
                        assert!(!a.mask.overlaps(&b.mask));
                        assert!(!a.dci.overlaps(&b.dci));
                    }
                    for u in ul.iter().filter_map(|u| u.dci) {
                        assert!(!a.dci.overlaps(&u));
                    }
                }
            }
        });
    });

    let metrics = sched.metrics();
    assert_eq!(metrics.nof_ues, NOF_STABLE as usize);
    assert!(metrics.dl_bytes_granted > 0);
}
