// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Per-carrier scheduling pass.
//!
//! One pass per reception TTI:
//!
//! 1. advance every terminal to the TTI and take a [`UeSnapshot`] of each;
//! 2. plan the subframe over those snapshots without touching terminal
//!    state: retransmissions first (ascending RNTI), then new data in the
//!    order chosen by the [`SchedPolicy`];
//! 3. commit the plan by asking each selected terminal for its grant.
//!
//! The DL and UL pulls of a subframe share one control region, so the pass
//! produces both grant lists and caches them until the other pull arrives.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::error::SchedError;
use crate::mask::{PrbInterval, PrbMask, RbgMask};
use crate::params::CellParams;
use crate::pdcch::{PdcchAlloc, PdcchAllocator, PdcchRequest};
use crate::policy::{PolicyCandidate, SchedPolicy};
use crate::protocols::{DciLocation, Direction, DlGrant, Rnti, UlGrant};
use crate::tti::TtiPoint;
use crate::ue::{SchedUe, UeSnapshot};

/// Grants and control-channel usage of one subframe.
#[derive(Debug, Clone, Default)]
pub struct SfResult {
    pub tti_rx: TtiPoint,
    pub dl: Vec<DlGrant>,
    pub ul: Vec<UlGrant>,
    pub pdcch: Vec<PdcchAlloc>,
    /// `(elapsed_us, budget_us)` when the pass overran its deadline.
    pub deadline_missed: Option<(u64, u64)>,
}

impl SfResult {
    fn check_deadline(&self) -> Result<(), SchedError> {
        match self.deadline_missed {
            Some((elapsed_us, budget_us)) => Err(SchedError::DeadlineMissed {
                tti: self.tti_rx,
                elapsed_us,
                budget_us,
            }),
            None => Ok(()),
        }
    }

    /// Resources handed to different terminals must never overlap; a clash
    /// means the occupancy tables are out of sync with the grants.
    fn verify(&self) -> Result<(), SchedError> {
        for (n, a) in self.dl.iter().enumerate() {
            if let Some(b) = self.dl[n + 1..].iter().find(|b| a.mask.overlaps(&b.mask)) {
                return Err(SchedError::Corrupted(format!(
                    "RBG masks of {} and {} overlap at TTI {}",
                    a.rnti, b.rnti, self.tti_rx
                )));
            }
        }
        for (n, a) in self.ul.iter().enumerate() {
            if let Some(b) = self.ul[n + 1..].iter().find(|b| a.interval.overlaps(&b.interval)) {
                return Err(SchedError::Corrupted(format!(
                    "PUSCH intervals of {} and {} overlap at TTI {}",
                    a.rnti, b.rnti, self.tti_rx
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DlPlan {
    pub rnti: Rnti,
    pub pid: u32,
    pub mask: RbgMask,
    pub dci: DciLocation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UlPlan {
    pub rnti: Rnti,
    pub pid: u32,
    pub interval: PrbInterval,
    pub dci: Option<DciLocation>,
}

/// Decisions of one pass, before any terminal state changes.
#[derive(Debug, Clone)]
pub struct SfPlan {
    pub dl: Vec<DlPlan>,
    pub ul: Vec<UlPlan>,
    pub pdcch: PdcchAllocator,
    /// Every new-data candidate, so the policy also hears about those left
    /// out.
    pub dl_candidates: Vec<Rnti>,
    pub ul_candidates: Vec<Rnti>,
}

/// Plans a subframe over immutable snapshots. `snapshots` must be in
/// ascending RNTI order.
pub fn plan_subframe(
    params: &CellParams,
    policy: &dyn SchedPolicy,
    tti_rx: TtiPoint,
    snapshots: &[UeSnapshot],
) -> SfPlan {
    let cc = params.enb_cc_idx;
    let mut pdcch = PdcchAllocator::new(params.nof_cce());
    let mut rbg_used = RbgMask::new(params.nof_rbg);
    let mut prb_used = PrbMask::new(params.nof_prb());
    let pusch = params.pusch_region();
    prb_used.fill(&PrbInterval::new(0, pusch.start));
    prb_used.fill(&PrbInterval::new(pusch.stop(), params.nof_prb() - pusch.stop()));

    let by_rnti: HashMap<Rnti, &UeSnapshot> = snapshots.iter().map(|s| (s.rnti, s)).collect();
    let mut dl = Vec::new();
    let mut ul = Vec::new();

    // ------------------------------------------------------------------
    // Retransmissions: same size as the original, placed before new data
    // ------------------------------------------------------------------
    let mut requests = Vec::new();
    for snap in snapshots {
        if let Some(retx) = snap.dl_retx {
            let mask = if rbg_used.overlaps(&retx.alloc) {
                rbg_used.pick_free(retx.alloc.count())
            } else {
                retx.alloc
            };
            if mask.count() == retx.alloc.count() {
                rbg_used.insert(&mask);
                dl.push((snap.rnti, retx.pid, mask));
                requests.push(PdcchRequest {
                    rnti: snap.rnti,
                    dir: Direction::Dl,
                    l: snap.aggr_level,
                    candidates: snap.cce_candidates.clone(),
                });
            } else {
                tracing::debug!(rnti = %snap.rnti, cc, tti = %tti_rx, pid = retx.pid, "no room for DL retransmission");
            }
        }
        if let Some(retx) = snap.ul_retx {
            let (interval, adaptive) = if prb_used.is_free(&retx.alloc) {
                (Some(retx.alloc), false)
            } else {
                (prb_used.find_exact(retx.alloc.len), true)
            };
            let Some(interval) = interval else {
                tracing::debug!(rnti = %snap.rnti, cc, tti = %tti_rx, pid = retx.pid, "no room for UL retransmission");
                continue;
            };
            prb_used.fill(&interval);
            ul.push((snap.rnti, retx.pid, interval, adaptive));
            if adaptive {
                requests.push(PdcchRequest {
                    rnti: snap.rnti,
                    dir: Direction::Ul,
                    l: snap.aggr_level,
                    candidates: snap.cce_candidates.clone(),
                });
            }
        }
    }

    let placed = pdcch.alloc_batch(&requests);
    let dci_of = |rnti: Rnti, dir: Direction| {
        placed
            .iter()
            .find(|(r, d, _)| *r == rnti && *d == dir)
            .and_then(|(_, _, loc)| *loc)
    };
    let mut plan = SfPlan {
        dl: Vec::new(),
        ul: Vec::new(),
        pdcch: PdcchAllocator::new(0),
        dl_candidates: Vec::new(),
        ul_candidates: Vec::new(),
    };
    for (rnti, pid, mask) in dl {
        match dci_of(rnti, Direction::Dl) {
            Some(dci) => plan.dl.push(DlPlan { rnti, pid, mask, dci }),
            None => {
                tracing::debug!(%rnti, cc, tti = %tti_rx, pid, "no CCE for DL retransmission");
                rbg_used.remove(&mask);
            }
        }
    }
    for (rnti, pid, interval, adaptive) in ul {
        let dci = adaptive.then(|| dci_of(rnti, Direction::Ul));
        match dci {
            Some(None) => {
                tracing::debug!(%rnti, cc, tti = %tti_rx, pid, "no CCE for adaptive UL retransmission");
                prb_used.clear(&interval);
            }
            dci => plan.ul.push(UlPlan {
                rnti,
                pid,
                interval,
                dci: dci.flatten(),
            }),
        }
    }

    // ------------------------------------------------------------------
    // New data in policy order
    // ------------------------------------------------------------------
    let candidates = |dir: Direction| -> Vec<PolicyCandidate> {
        let mut out: Vec<PolicyCandidate> = snapshots
            .iter()
            .filter_map(|s| {
                let req = match dir {
                    Direction::Dl => s.dl_new,
                    Direction::Ul => s.ul_new,
                }?;
                Some(PolicyCandidate {
                    rnti: s.rnti,
                    pending_bytes: req.pending_bytes,
                    units: req.units,
                    bytes_per_unit: req.bytes_per_unit,
                })
            })
            .collect();
        policy.prioritize(tti_rx, cc, dir, &mut out);
        out
    };

    let dl_cands = candidates(Direction::Dl);
    for cand in &dl_cands {
        let free = params.nof_rbg - rbg_used.count();
        if free == 0 {
            break;
        }
        let Some(snap) = by_rnti.get(&cand.rnti) else {
            continue;
        };
        let Some(req) = snap.dl_new else {
            continue;
        };
        let mask = rbg_used.pick_free(cand.units.clamp(1, free));
        let Some(dci) = pdcch.try_alloc(snap.rnti, Direction::Dl, snap.aggr_level, &snap.cce_candidates) else {
            tracing::debug!(rnti = %snap.rnti, cc, tti = %tti_rx, "no CCE for DL new data");
            continue;
        };
        rbg_used.insert(&mask);
        plan.dl.push(DlPlan {
            rnti: snap.rnti,
            pid: req.pid,
            mask,
            dci,
        });
    }

    let ul_cands = candidates(Direction::Ul);
    for cand in &ul_cands {
        let Some(snap) = by_rnti.get(&cand.rnti) else {
            continue;
        };
        let Some(req) = snap.ul_new else {
            continue;
        };
        let Some(interval) = prb_used.find_up_to(cand.units.max(1)) else {
            break;
        };
        let Some(dci) = pdcch.try_alloc(snap.rnti, Direction::Ul, snap.aggr_level, &snap.cce_candidates) else {
            tracing::debug!(rnti = %snap.rnti, cc, tti = %tti_rx, "no CCE for UL new data");
            continue;
        };
        prb_used.fill(&interval);
        plan.ul.push(UlPlan {
            rnti: snap.rnti,
            pid: req.pid,
            interval,
            dci: Some(dci),
        });
    }

    plan.dl_candidates = dl_cands.iter().map(|c| c.rnti).collect();
    plan.ul_candidates = ul_cands.iter().map(|c| c.rnti).collect();
    plan.pdcch = pdcch;
    plan
}

#[derive(Debug, Default)]
struct SfCache {
    last_tti: Option<TtiPoint>,
    result: Option<Arc<SfResult>>,
}

/// Runs the per-TTI pass for one eNB carrier.
pub struct CarrierScheduler {
    params: Arc<CellParams>,
    policy: Arc<dyn SchedPolicy>,
    deadline: Option<Duration>,
    cache: Mutex<SfCache>,
}

impl std::fmt::Debug for CarrierScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CarrierScheduler")
            .field("enb_cc_idx", &self.params.enb_cc_idx)
            .field("policy", &self.policy.name())
            .field("deadline", &self.deadline)
            .finish()
    }
}

impl CarrierScheduler {
    pub fn new(params: Arc<CellParams>, policy: Arc<dyn SchedPolicy>, deadline: Option<Duration>) -> Self {
        Self {
            params,
            policy,
            deadline,
            cache: Mutex::new(SfCache::default()),
        }
    }

    pub fn params(&self) -> &Arc<CellParams> {
        &self.params
    }

    /// Runs (or returns the cached) pass for `tti_rx`.
    pub fn run(&self, tti_rx: TtiPoint, ues: &HashMap<Rnti, SchedUe>) -> Result<Arc<SfResult>, SchedError> {
        let mut cache = self.cache.lock();
        if let Some(result) = cache.result.as_ref().filter(|r| r.tti_rx == tti_rx) {
            result.check_deadline()?;
            return Ok(result.clone());
        }
        if let Some(last) = cache.last_tti
            && !tti_rx.is_after(last)
        {
            tracing::error!(cc = self.params.enb_cc_idx, tti = %tti_rx, %last, "TTI out of order");
            return Err(SchedError::TtiOutOfOrder { tti: tti_rx, last });
        }
        cache.last_tti = Some(tti_rx);

        let start = Instant::now();
        let result = self.schedule(tti_rx, ues, start);
        if let Err(e) = result.verify() {
            tracing::error!(cc = self.params.enb_cc_idx, tti = %tti_rx, "{e}");
            return Err(e);
        }
        let result = Arc::new(result);
        cache.result = Some(result.clone());
        result.check_deadline()?;
        Ok(result)
    }

    fn schedule(&self, tti_rx: TtiPoint, ues: &HashMap<Rnti, SchedUe>, start: Instant) -> SfResult {
        let cc = self.params.enb_cc_idx;
        let mut rntis: Vec<Rnti> = ues.keys().copied().collect();
        rntis.sort_unstable();

        let snapshots: Vec<UeSnapshot> = rntis
            .iter()
            .filter_map(|rnti| {
                let ue = ues.get(rnti)?;
                ue.new_tti(tti_rx);
                ue.snapshot(tti_rx, cc)
            })
            .collect();

        let mut plan = plan_subframe(&self.params, self.policy.as_ref(), tti_rx, &snapshots);
        let mut result = SfResult {
            tti_rx,
            ..Default::default()
        };

        // commit
        let tti_tx_dl = tti_rx.to_tx_dl();
        let mut dl_served: HashMap<Rnti, u32> = HashMap::new();
        for p in &plan.dl {
            let Some(ue) = ues.get(&p.rnti) else {
                continue;
            };
            match ue.generate_dl_grant(tti_tx_dl, cc, p.pid, p.mask, p.dci) {
                Ok(grant) => {
                    if !grant.is_retx() {
                        dl_served.insert(p.rnti, grant.total_bytes());
                    }
                    result.dl.push(grant);
                }
                Err(e) => {
                    tracing::debug!(rnti = %p.rnti, cc, tti = %tti_rx, pid = p.pid, "DL grant not generated: {e}");
                    plan.pdcch.rollback(p.rnti, Direction::Dl);
                }
            }
        }

        let tti_tx_ul = tti_rx.to_tx_ul();
        let mut ul_served: HashMap<Rnti, u32> = HashMap::new();
        for p in &plan.ul {
            let Some(ue) = ues.get(&p.rnti) else {
                continue;
            };
            match ue.generate_ul_grant(tti_tx_ul, cc, p.pid, p.interval, p.dci) {
                Ok(grant) => {
                    if !grant.tb.is_retx {
                        ul_served.insert(p.rnti, grant.tb.tbs);
                    }
                    result.ul.push(grant);
                }
                Err(e) => {
                    tracing::debug!(rnti = %p.rnti, cc, tti = %tti_rx, pid = p.pid, "UL grant not generated: {e}");
                    if p.dci.is_some() {
                        plan.pdcch.rollback(p.rnti, Direction::Ul);
                    }
                }
            }
        }

        let served = |cands: &[Rnti], granted: &HashMap<Rnti, u32>| -> Vec<(Rnti, u32)> {
            cands
                .iter()
                .map(|r| (*r, granted.get(r).copied().unwrap_or(0)))
                .collect()
        };
        self.policy
            .record(cc, Direction::Dl, &served(&plan.dl_candidates, &dl_served));
        self.policy
            .record(cc, Direction::Ul, &served(&plan.ul_candidates, &ul_served));
        result.pdcch = plan.pdcch.allocs().to_vec();

        let elapsed = start.elapsed();
        tracing::trace!(
            cc,
            tti = %tti_rx,
            nof_dl = result.dl.len(),
            nof_ul = result.ul.len(),
            cce_used = plan.pdcch.nof_used(),
            elapsed_us = elapsed.as_micros() as u64,
            "subframe scheduled"
        );
        if let Some(budget) = self.deadline
            && elapsed > budget
        {
            let elapsed_us = elapsed.as_micros() as u64;
            let budget_us = budget.as_micros() as u64;
            tracing::error!(cc, tti = %tti_rx, elapsed_us, budget_us, "TTI deadline missed");
            result.deadline_missed = Some((elapsed_us, budget_us));
        }
        result
    }
}
