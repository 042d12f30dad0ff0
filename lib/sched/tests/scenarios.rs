// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! End-to-end scheduling scenarios through the public scheduler surface.

use rstest::rstest;

use enb_sched::testing::{TEST_DRB_LCID, TestSetup};
use enb_sched::{
    AckOutcome, Direction, DlPdu, GrantSource, MacCe, PrbInterval, Rnti, SchedConfigurator,
    SchedReportSink, Scheduler, TtiPoint,
};

const UE_A: Rnti = Rnti(0x46);
const UE_B: Rnti = Rnti(0x47);

fn default_sched() -> (TestSetup, Scheduler) {
    let setup = TestSetup::builder().build().unwrap();
    let sched = setup.build_scheduler();
    (setup, sched)
}

fn pusch_region(sched: &Scheduler) -> PrbInterval {
    sched.cells().unwrap().params()[0].pusch_region()
}

#[test]
fn test_pending_bytes_get_one_fresh_grant() {
    let (setup, sched) = default_sched();
    let rx = TtiPoint::new(100);
    setup.add_ue_with_dl(&sched, UE_A, 500);
    sched.dl_cqi_info(rx, UE_A, 0, 15).unwrap();

    let dl = sched.dl_sched(rx, 0).unwrap();
    assert_eq!(dl.len(), 1);
    let grant = &dl[0];
    assert_eq!(grant.rnti, UE_A);
    assert_eq!(grant.tti_tx, rx.to_tx_dl());
    assert!(grant.total_bytes() >= 500);
    assert!(!grant.is_retx());
    assert_eq!(grant.tbs.len(), 1);
    // processes start with NDI cleared
    assert!(grant.tbs[0].ndi);
    assert_eq!(grant.tbs[0].rv, 0);
    let first_pid = grant.pid;
    assert_eq!(sched.dl_pending_bytes(UE_A).unwrap(), 0);

    // acknowledge, then reuse the same process one round trip later
    let next = rx + 8;
    assert!(matches!(
        sched.dl_ack_info(next, UE_A, 0, 0, true).unwrap(),
        AckOutcome::Acked { .. }
    ));
    sched.dl_rlc_buffer_state(UE_A, TEST_DRB_LCID, 500, 0).unwrap();
    let dl = sched.dl_sched(next, 0).unwrap();
    assert_eq!(dl.len(), 1);
    assert_eq!(dl[0].pid, first_pid);
    assert!(!dl[0].tbs[0].ndi);
}

#[test]
fn test_retransmission_served_before_new_data() {
    let (setup, sched) = default_sched();
    let rx = TtiPoint::new(200);
    setup.add_ue_with_dl(&sched, UE_A, 1000);
    setup.add_ue(&sched, UE_B);
    for rnti in [UE_A, UE_B] {
        sched.dl_cqi_info(rx, rnti, 0, 15).unwrap();
    }

    let first = sched.dl_sched(rx, 0).unwrap();
    assert_eq!(first.len(), 1);
    let original = first[0].mask;

    // NACK arrives 4 TTIs after transmission, retransmission is due one
    // round trip after the original
    let retx_rx = rx + 8;
    assert!(matches!(
        sched.dl_ack_info(retx_rx, UE_A, 0, 0, false).unwrap(),
        AckOutcome::Retransmit { .. }
    ));
    // B now wants the whole carrier
    sched.dl_rlc_buffer_state(UE_B, TEST_DRB_LCID, 100_000, 0).unwrap();

    let dl = sched.dl_sched(retx_rx, 0).unwrap();
    assert_eq!(dl.len(), 2);
    let a = dl.iter().find(|g| g.rnti == UE_A).unwrap();
    let b = dl.iter().find(|g| g.rnti == UE_B).unwrap();
    assert!(a.is_retx());
    assert_eq!(a.pid, first[0].pid);
    assert_eq!(a.mask.count(), original.count());
    assert_eq!(a.tti_tx, first[0].tti_tx + 8);
    assert!(!b.is_retx());
    assert!(!a.mask.overlaps(&b.mask));
    assert_eq!(a.mask.count() + b.mask.count(), a.mask.size());
}

#[test]
fn test_control_region_exhaustion_keeps_bytes() {
    let setup = TestSetup::builder().nof_cce(4).build().unwrap();
    let sched = setup.build_scheduler();
    let rx = TtiPoint::new(30);
    setup.add_ue_with_dl(&sched, UE_A, 500);
    let before = sched.dl_pending_bytes(UE_A).unwrap();

    // no CQI yet: the DCI needs the largest aggregation level, which does
    // not fit in 4 CCEs
    assert!(sched.dl_sched(rx, 0).unwrap().is_empty());
    assert_eq!(sched.dl_pending_bytes(UE_A).unwrap(), before);

    // a good CQI shrinks the DCI and the data goes out on the next TTI
    sched.dl_cqi_info(rx + 1, UE_A, 0, 15).unwrap();
    let dl = sched.dl_sched(rx + 1, 0).unwrap();
    assert_eq!(dl.len(), 1);
    assert!(dl[0].dci.ncce + dl[0].dci.nof_cce() <= 4);
}

#[rstest]
#[case::start(0)]
#[case::mid(5000)]
#[case::wraps(10_230)]
fn test_nack_retransmits_one_round_trip_later(#[case] start: u32) {
    let (setup, sched) = default_sched();
    let rx = TtiPoint::new(start);
    setup.add_ue_with_dl(&sched, UE_A, 300);
    sched.dl_cqi_info(rx, UE_A, 0, 12).unwrap();

    let first = sched.dl_sched(rx, 0).unwrap();
    assert_eq!(first.len(), 1);

    let ack_rx = first[0].tti_tx + 4;
    let outcome = sched.dl_ack_info(ack_rx, UE_A, 0, 0, false).unwrap();
    assert_eq!(outcome, AckOutcome::Retransmit { at: first[0].tti_tx + 8 });

    let dl = sched.dl_sched(ack_rx, 0).unwrap();
    assert_eq!(dl.len(), 1);
    assert!(dl[0].is_retx());
    assert_eq!(dl[0].tti_tx, first[0].tti_tx + 8);
    assert_eq!(dl[0].tbs[0].rv, 2);
}

#[test]
fn test_retransmission_bound_drops_block() {
    let setup = TestSetup::builder().max_retx(2).build().unwrap();
    let sched = setup.build_scheduler();
    let mut rx = TtiPoint::new(40);
    setup.add_ue_with_dl(&sched, UE_A, 300);
    sched.dl_cqi_info(rx, UE_A, 0, 12).unwrap();

    let mut grants = sched.dl_sched(rx, 0).unwrap();
    for _ in 0..2 {
        assert_eq!(grants.len(), 1);
        rx = rx + 8;
        sched.dl_ack_info(rx, UE_A, 0, 0, false).unwrap();
        grants = sched.dl_sched(rx, 0).unwrap();
        assert!(grants[0].is_retx());
    }

    // third NACK exceeds the bound
    rx = rx + 8;
    assert!(matches!(
        sched.dl_ack_info(rx, UE_A, 0, 0, false).unwrap(),
        AckOutcome::Dropped { .. }
    ));
    assert!(sched.dl_sched(rx, 0).unwrap().is_empty());
    let metrics = sched.ue_metrics(UE_A).unwrap();
    assert_eq!(metrics.dl_harq_failures(), 1);
    assert_eq!(metrics.carriers()[0].dl_harq_bytes(), 0);
}

#[test]
fn test_duplicate_feedback_is_ignored() {
    let (setup, sched) = default_sched();
    let rx = TtiPoint::new(60);
    setup.add_ue_with_dl(&sched, UE_A, 300);
    sched.dl_cqi_info(rx, UE_A, 0, 10).unwrap();
    assert_eq!(sched.dl_sched(rx, 0).unwrap().len(), 1);

    let ack_rx = rx + 8;
    sched.dl_ack_info(ack_rx, UE_A, 0, 0, true).unwrap();
    assert_eq!(
        sched.dl_ack_info(ack_rx, UE_A, 0, 0, true).unwrap(),
        AckOutcome::Ignored
    );
    // feedback for a TTI with no transmission
    assert!(sched.dl_ack_info(ack_rx + 1, UE_A, 0, 0, true).is_err());
}

#[test]
fn test_sr_pool_occupancy_bounded() {
    let (setup, sched) = default_sched();
    let cells = sched.cells().unwrap();
    let pool = cells.pools().sr.clone();
    let capacity = pool.max_users() * pool.nof_slots() as u32;

    let rntis: Vec<Rnti> = (0..capacity as u16 + 8).map(|i| Rnti(0x100 + i)).collect();
    for &rnti in &rntis {
        setup.add_ue(&sched, rnti);
        assert!(pool.occupancy().iter().all(|&users| users <= pool.max_users()));
    }
    assert_eq!(pool.nof_leased(), capacity);
    let without: Vec<Rnti> = rntis
        .iter()
        .copied()
        .filter(|&r| sched.ue_metrics(r).unwrap().sr_resource().is_none())
        .collect();
    assert_eq!(without.len(), 8);

    // freed slots are picked up at the next TTI boundary
    for &rnti in &rntis[..10] {
        sched.ue_rem(rnti).unwrap();
    }
    sched.dl_sched(TtiPoint::new(0), 0).unwrap();
    assert_eq!(pool.nof_leased(), capacity - 2);
    for rnti in without {
        assert!(sched.ue_metrics(rnti).unwrap().sr_resource().is_some());
    }
    assert!(pool.occupancy().iter().all(|&users| users <= pool.max_users()));
}

#[test]
fn test_ul_grant_from_sr() {
    let (setup, sched) = default_sched();
    let rx = TtiPoint::new(10);
    setup.add_ue(&sched, UE_A);
    sched.ul_sr_info(rx, UE_A).unwrap();
    sched.ul_snr_info(rx, UE_A, 0, 20.0).unwrap();
    sched.tpc_inc(UE_A, Direction::Ul).unwrap();

    let ul = sched.ul_sched(rx, 0).unwrap();
    assert_eq!(ul.len(), 1);
    let grant = &ul[0];
    assert_eq!(grant.tti_tx, rx.to_tx_ul());
    assert!(grant.dci.is_some());
    assert_eq!(grant.tpc_pusch, 1);
    assert!(grant.cqi_request);
    let pusch = pusch_region(&sched);
    assert!(grant.interval.start >= pusch.start && grant.interval.stop() <= pusch.stop());
    assert!(!sched.ue_metrics(UE_A).unwrap().sr_pending());

    // lost PUSCH: retransmitted in place without a DCI
    let crc_rx = grant.tti_tx;
    assert!(matches!(
        sched.ul_crc_info(crc_rx, UE_A, 0, false).unwrap(),
        AckOutcome::Retransmit { .. }
    ));
    let ul = sched.ul_sched(crc_rx, 0).unwrap();
    assert_eq!(ul.len(), 1);
    assert!(ul[0].tb.is_retx);
    assert_eq!(ul[0].interval, grant.interval);
    assert!(ul[0].dci.is_none());
    assert_eq!(ul[0].tti_tx, grant.tti_tx + 8);
}

#[test]
fn test_scell_carries_data_after_activation() {
    let setup = TestSetup::builder().nof_carriers(2).build().unwrap();
    let sched = setup.build_scheduler();
    setup.add_ue_with_dl(&sched, UE_A, 50_000);
    let rx = TtiPoint::new(0);
    for cc in 0..2 {
        sched.dl_cqi_info(rx, UE_A, cc, 15).unwrap();
    }

    // the activation CE rides on the primary carrier first
    let dl = sched.dl_sched(rx, 1).unwrap();
    assert!(dl.is_empty());
    let pcell = sched.dl_sched(rx, 0).unwrap();
    assert_eq!(pcell.len(), 1);
    assert!(
        pcell[0]
            .pdus
            .iter()
            .any(|p| matches!(p, DlPdu::Ce(MacCe::ScellActivation(0b10))))
    );

    let next = rx + 1;
    sched.dl_sched(next, 0).unwrap();
    let scell = sched.dl_sched(next, 1).unwrap();
    assert_eq!(scell.len(), 1);
    assert_eq!(scell[0].enb_cc_idx, 1);
}
