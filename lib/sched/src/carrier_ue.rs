// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Per-terminal per-carrier link adaptation, sizing and HARQ state.

use std::sync::Arc;

use bytes::BytesMut;
use serde::{Deserialize, Serialize};

use crate::error::{GrantError, HarqError};
use crate::harq::{DroppedTb, HarqEntity, MAX_TB};
use crate::mask::{PrbInterval, RbgMask};
use crate::params::CellParams;
use crate::pdcch::ue_search_space;
use crate::protocols::{Direction, Rnti, TbGrant, MAX_AGGR_LEVEL};
use crate::tables::{aggr_level_for_cqi, cqi_to_mcs, min_mcs_for_bytes, snr_to_cqi, tbs_bytes};
use crate::tti::TtiPoint;

/// Secondary-carrier activation state. Commands move it at TTI boundaries
/// only: `Idle -> Activating -> Active -> Deactivating -> Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CarrierState {
    Idle,
    Activating,
    Active,
    Deactivating,
}

/// A channel report tagged with the TTI it was received.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Measured<T> {
    pub value: T,
    pub tti: TtiPoint,
}

/// Outcome of transport-block sizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TbsDecision {
    pub mcs: u32,
    /// Bytes per transport block.
    pub tbs: u32,
    pub nof_tb: u32,
}

impl TbsDecision {
    const ZERO: TbsDecision = TbsDecision {
        mcs: 0,
        tbs: 0,
        nof_tb: 1,
    };

    pub fn total(&self) -> u32 {
        self.tbs * self.nof_tb
    }
}

type SearchSpace = [[Vec<u32>; (MAX_AGGR_LEVEL + 1) as usize]; 10];

pub struct CarrierUe {
    rnti: Rnti,
    ue_cc_idx: u32,
    params: Arc<CellParams>,
    state: CarrierState,
    now: TtiPoint,

    dl_cqi: Option<Measured<u32>>,
    dl_pmi: Option<Measured<u32>>,
    dl_ri: Option<Measured<u32>>,
    ul_cqi: Option<Measured<u32>>,

    max_aggr_level: u32,
    max_mcs_dl: u32,
    max_mcs_ul: u32,

    /// Candidate first CCEs per CFI, subframe and aggregation level.
    search_space: Vec<SearchSpace>,

    pub harq: HarqEntity,
    tb_buffers: Vec<[BytesMut; MAX_TB]>,
}

impl std::fmt::Debug for CarrierUe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CarrierUe")
            .field("rnti", &self.rnti)
            .field("enb_cc_idx", &self.params.enb_cc_idx)
            .field("ue_cc_idx", &self.ue_cc_idx)
            .field("state", &self.state)
            .field("dl_cqi", &self.dl_cqi)
            .finish()
    }
}

impl CarrierUe {
    pub fn new(
        rnti: Rnti,
        ue_cc_idx: u32,
        params: Arc<CellParams>,
        active: bool,
        max_aggr_level: u32,
        max_mcs_dl: Option<u32>,
        max_mcs_ul: Option<u32>,
    ) -> Self {
        let search_space = params
            .nof_cce_per_cfi
            .iter()
            .map(|&nof_cce| {
                std::array::from_fn(|sf| {
                    std::array::from_fn(|l| ue_search_space(rnti, nof_cce, sf as u32, l as u32))
                })
            })
            .collect();
        let nof_procs = params.round_trip_delay as usize;

        Self {
            rnti,
            ue_cc_idx,
            state: if active {
                CarrierState::Active
            } else {
                CarrierState::Idle
            },
            now: TtiPoint::default(),
            dl_cqi: None,
            dl_pmi: None,
            dl_ri: None,
            ul_cqi: None,
            max_aggr_level: max_aggr_level.min(MAX_AGGR_LEVEL),
            max_mcs_dl: max_mcs_dl.map_or(params.cfg.max_mcs_dl, |m| m.min(params.cfg.max_mcs_dl)),
            max_mcs_ul: max_mcs_ul.map_or(params.cfg.max_mcs_ul, |m| m.min(params.cfg.max_mcs_ul)),
            search_space,
            harq: HarqEntity::new(params.round_trip_delay, params.max_retx),
            tb_buffers: (0..nof_procs).map(|_| Default::default()).collect(),
            params,
        }
    }

    pub fn enb_cc_idx(&self) -> u32 {
        self.params.enb_cc_idx
    }

    pub fn ue_cc_idx(&self) -> u32 {
        self.ue_cc_idx
    }

    pub fn params(&self) -> &CellParams {
        &self.params
    }

    pub fn state(&self) -> CarrierState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: CarrierState) {
        self.state = state;
    }

    pub fn is_active(&self) -> bool {
        self.state == CarrierState::Active
    }

    /// Advances HARQ to the transmission TTIs of reception TTI `tti_rx` and
    /// returns the blocks given up on.
    pub fn new_tti(&mut self, tti_rx: TtiPoint) -> Vec<(Direction, DroppedTb)> {
        self.now = tti_rx;
        let bound = self.params.cqi_staleness_ttis as i32;
        for report in [&mut self.dl_cqi, &mut self.dl_pmi, &mut self.dl_ri, &mut self.ul_cqi] {
            // expired reports are forgotten before the clock can wrap back onto them
            if report.as_ref().is_some_and(|m| tti_rx.diff(m.tti) > bound) {
                *report = None;
            }
        }
        self.harq.advance(tti_rx.to_tx_dl(), tti_rx.to_tx_ul());
        let dl = self.harq.dl.take_dropped().into_iter().map(|d| (Direction::Dl, d));
        let ul = self.harq.ul.take_dropped().into_iter().map(|d| (Direction::Ul, d));
        dl.chain(ul).collect()
    }

    // ========================================================================
    // Channel quality
    // ========================================================================

    pub fn set_dl_cqi(&mut self, tti: TtiPoint, cqi: u32) {
        self.dl_cqi = Some(Measured { value: cqi, tti });
    }

    pub fn set_dl_pmi(&mut self, tti: TtiPoint, pmi: u32) {
        self.dl_pmi = Some(Measured { value: pmi, tti });
    }

    pub fn set_dl_ri(&mut self, tti: TtiPoint, ri: u32) {
        self.dl_ri = Some(Measured { value: ri, tti });
    }

    pub fn set_ul_snr(&mut self, tti: TtiPoint, snr_db: f32) {
        self.ul_cqi = Some(Measured {
            value: snr_to_cqi(snr_db),
            tti,
        });
    }

    fn fresh(&self, m: Option<Measured<u32>>) -> Option<u32> {
        let m = m?;
        let age = self.now.diff(m.tti);
        (0..=self.params.cqi_staleness_ttis as i32)
            .contains(&age)
            .then_some(m.value)
    }

    pub fn dl_cqi(&self) -> Option<u32> {
        self.dl_cqi.map(|m| m.value)
    }

    pub fn dl_pmi(&self) -> Option<u32> {
        self.dl_pmi.map(|m| m.value)
    }

    pub fn dl_ri(&self) -> Option<u32> {
        self.dl_ri.map(|m| m.value)
    }

    pub fn ul_cqi(&self) -> Option<u32> {
        self.ul_cqi.map(|m| m.value)
    }

    pub fn is_dl_cqi_stale(&self) -> bool {
        self.fresh(self.dl_cqi).is_none()
    }

    fn max_mcs(&self, dir: Direction) -> u32 {
        let (report, cap) = match dir {
            Direction::Dl => (self.dl_cqi, self.max_mcs_dl),
            Direction::Ul => (self.ul_cqi, self.max_mcs_ul),
        };
        match self.fresh(report) {
            Some(cqi) => cqi_to_mcs(cqi).min(cap),
            None => self.params.fallback_mcs.min(cap),
        }
    }

    fn nof_layers(&self, dir: Direction) -> u32 {
        match dir {
            Direction::Dl if self.fresh(self.dl_ri) == Some(2) => 2,
            _ => 1,
        }
    }

    // ========================================================================
    // Sizing
    // ========================================================================

    /// Resource units of the direction: RBGs for DL, PRBs for UL.
    pub fn max_units(&self, dir: Direction) -> u32 {
        match dir {
            Direction::Dl => self.params.nof_rbg,
            Direction::Ul => self.params.pusch_region().len,
        }
    }

    fn units_to_prbs(&self, nof_units: u32, dir: Direction) -> u32 {
        match dir {
            Direction::Dl => (nof_units * self.params.rbg_size).min(self.params.nof_prb()),
            Direction::Ul => nof_units,
        }
    }

    /// MCS and TBS for `req_bytes` on `nof_prb` PRBs: the lowest MCS whose
    /// size covers the request, saturating at the MCS limit.
    pub fn size_for_prbs(&self, nof_prb: u32, req_bytes: u32, dir: Direction) -> TbsDecision {
        if nof_prb == 0 || req_bytes == 0 {
            return TbsDecision::ZERO;
        }
        let nof_tb = self.nof_layers(dir);
        let per_tb = req_bytes.div_ceil(nof_tb);
        let mcs = min_mcs_for_bytes(per_tb, nof_prb, self.max_mcs(dir), dir);
        TbsDecision {
            mcs,
            tbs: tbs_bytes(mcs, nof_prb, dir),
            nof_tb,
        }
    }

    /// MCS and TBS for `req_bytes` given `nof_units` resource units.
    pub fn size_for_bytes(&self, nof_units: u32, req_bytes: u32, dir: Direction) -> TbsDecision {
        self.size_for_prbs(self.units_to_prbs(nof_units, dir), req_bytes, dir)
    }

    /// Fewest resource units whose TBS covers `req_bytes`; saturates at the
    /// carrier size when no allocation is large enough.
    pub fn resources_for_bytes(&self, req_bytes: u32, dir: Direction) -> u32 {
        let max_units = self.max_units(dir);
        if req_bytes == 0 || max_units == 0 {
            return 0;
        }
        let (mut lo, mut hi) = (1, max_units);
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if self.size_for_bytes(mid, req_bytes, dir).total() < req_bytes {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        lo
    }

    // ========================================================================
    // Control channel
    // ========================================================================

    /// Aggregation level index for the next DCI.
    pub fn aggr_level(&self) -> u32 {
        match self.fresh(self.dl_cqi) {
            Some(cqi) => aggr_level_for_cqi(cqi, self.params.dci_bits, self.max_aggr_level),
            None => self.max_aggr_level,
        }
    }

    /// Search-space candidates for subframe `sf_idx` at level `l`.
    pub fn cce_candidates(&self, sf_idx: u32, l: u32) -> &[u32] {
        let cfi_idx = (self.params.cfi().clamp(1, 3) - 1) as usize;
        self.search_space
            .get(cfi_idx)
            .and_then(|per_sf| per_sf.get(sf_idx as usize % 10))
            .and_then(|per_l| per_l.get(l as usize))
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    // ========================================================================
    // Grant primitives
    // ========================================================================

    pub fn alloc_dl_tx(
        &mut self,
        tti_tx: TtiPoint,
        pid: u32,
        mask: RbgMask,
        req_bytes: u32,
    ) -> Result<Vec<TbGrant>, GrantError> {
        if !self.is_active() {
            return Err(GrantError::CarrierInactive(self.enb_cc_idx()));
        }
        let nof_prb = mask.nof_prb(self.params.nof_prb());
        let size = self.size_for_prbs(nof_prb, req_bytes, Direction::Dl);
        if size.tbs == 0 {
            return Err(GrantError::ZeroTbs);
        }
        let tbs = vec![(size.tbs, size.mcs); size.nof_tb as usize];
        let grants = self
            .harq
            .dl
            .new_tx(pid, tti_tx, &tbs, mask)
            .map_err(|_| GrantError::NoHarq)?;
        for (tb, grant) in grants.iter().enumerate() {
            let buf = &mut self.tb_buffers[pid as usize][tb];
            buf.clear();
            buf.resize(grant.tbs as usize, 0);
        }
        Ok(grants)
    }

    pub fn alloc_dl_retx(&mut self, tti_tx: TtiPoint, pid: u32, mask: RbgMask) -> Result<Vec<TbGrant>, GrantError> {
        if matches!(self.state, CarrierState::Idle | CarrierState::Activating) {
            return Err(GrantError::CarrierInactive(self.enb_cc_idx()));
        }
        let expected = self
            .harq
            .dl
            .get(pid)
            .and_then(|p| p.alloc())
            .map(RbgMask::count)
            .ok_or(GrantError::NoHarq)?;
        if mask.count() != expected {
            return Err(GrantError::SizeMismatch {
                expected,
                got: mask.count(),
            });
        }
        self.harq
            .dl
            .new_retx(pid, tti_tx, mask)
            .map_err(|_| GrantError::NoHarq)
    }

    pub fn alloc_ul_tx(
        &mut self,
        tti_tx: TtiPoint,
        pid: u32,
        interval: PrbInterval,
        req_bytes: u32,
    ) -> Result<TbGrant, GrantError> {
        if !self.is_active() {
            return Err(GrantError::CarrierInactive(self.enb_cc_idx()));
        }
        let size = self.size_for_prbs(interval.len, req_bytes, Direction::Ul);
        if size.tbs == 0 {
            return Err(GrantError::ZeroTbs);
        }
        self.harq
            .ul
            .new_tx(pid, tti_tx, &[(size.tbs, size.mcs)], interval)
            .map_err(|_| GrantError::NoHarq)?
            .pop()
            .ok_or(GrantError::NoHarq)
    }

    pub fn alloc_ul_retx(
        &mut self,
        tti_tx: TtiPoint,
        pid: u32,
        interval: PrbInterval,
    ) -> Result<TbGrant, GrantError> {
        if matches!(self.state, CarrierState::Idle | CarrierState::Activating) {
            return Err(GrantError::CarrierInactive(self.enb_cc_idx()));
        }
        let expected = self
            .harq
            .ul
            .get(pid)
            .and_then(|p| p.alloc())
            .map(|a| a.len)
            .ok_or(GrantError::NoHarq)?;
        if interval.len != expected {
            return Err(GrantError::SizeMismatch {
                expected,
                got: interval.len,
            });
        }
        self.harq
            .ul
            .new_retx(pid, tti_tx, interval)
            .map_err(|_| GrantError::NoHarq)?
            .pop()
            .ok_or(GrantError::NoHarq)
    }

    /// Runs `f` on the DL transport-block buffer of `(pid, tb)`.
    pub fn with_tb_buffer<R>(
        &mut self,
        pid: u32,
        tb: u32,
        f: impl FnOnce(&mut BytesMut) -> R,
    ) -> Result<R, HarqError> {
        let nof_procs = self.tb_buffers.len() as u32;
        let bufs = self
            .tb_buffers
            .get_mut(pid as usize)
            .ok_or(HarqError::InvalidPid { pid, nof_procs })?;
        let buf = bufs.get_mut(tb as usize).ok_or(HarqError::InvalidTb {
            tb,
            nof_tbs: MAX_TB as u32,
        })?;
        Ok(f(buf))
    }
}
