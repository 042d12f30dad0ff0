// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Per-terminal scheduling context.
//!
//! A [`SchedUe`] serializes every mutation of one terminal behind its own
//! mutex, so reporting threads working on different terminals never
//! contend. The carrier scheduler reads a [`UeSnapshot`] at the start of a
//! pass and only mutates the terminal again when it commits a grant.

use std::collections::BTreeSet;
use std::sync::Arc;

use bytes::BytesMut;
use parking_lot::Mutex;

use crate::carrier_ue::{CarrierState, CarrierUe};
use crate::error::{GrantError, HarqError, PucchError, SchedError};
use crate::harq::AckOutcome;
use crate::lch::LchManager;
use crate::mask::{PrbInterval, RbgMask};
use crate::metrics::{CarrierMetrics, UeMetrics};
use crate::params::CellParams;
use crate::protocols::{
    DciLocation, Direction, DlGrant, MacCe, Rnti, UeConfig, UlGrant, MAX_AGGR_LEVEL,
};
use crate::pucch::{PucchLease, PucchPool};
use crate::tti::TtiPoint;

/// UL grant size for a scheduling request without a buffer report.
pub const SR_GRANT_BYTES: u32 = 512;

const MAX_TPC: i8 = 3;
const MIN_TPC: i8 = -1;

/// The SR and CQI pools of the primary cell.
#[derive(Debug, Clone)]
pub struct UePools {
    pub sr: Arc<PucchPool>,
    pub cqi: Arc<PucchPool>,
}

/// What the carrier scheduler needs to know about a terminal for one pass.
#[derive(Debug, Clone)]
pub struct UeSnapshot {
    pub rnti: Rnti,
    pub aggr_level: u32,
    /// Search-space candidates in the subframe carrying this pass's DCIs.
    pub cce_candidates: Vec<u32>,
    pub dl_retx: Option<RetxRequest<RbgMask>>,
    pub dl_new: Option<NewTxRequest>,
    pub ul_retx: Option<RetxRequest<PrbInterval>>,
    pub ul_new: Option<NewTxRequest>,
}

#[derive(Debug, Clone, Copy)]
pub struct RetxRequest<A> {
    pub pid: u32,
    pub alloc: A,
}

#[derive(Debug, Clone, Copy)]
pub struct NewTxRequest {
    pub pid: u32,
    pub pending_bytes: u32,
    /// Resource units needed to empty the buffer.
    pub units: u32,
    pub bytes_per_unit: f64,
}

#[derive(Debug, Default)]
struct Counters {
    dl_bytes_granted: u64,
    ul_bytes_granted: u64,
    nof_dl_grants: u64,
    nof_ul_grants: u64,
}

#[derive(Debug)]
struct UeState {
    rnti: Rnti,
    cfg: UeConfig,
    carriers: Vec<CarrierUe>,
    lch: LchManager,
    sr_pending: bool,
    phr: Option<i32>,
    tpc_pucch: i8,
    tpc_pusch: i8,
    pools: UePools,
    sr_lease: Option<PucchLease>,
    cqi_lease: Option<PucchLease>,
    /// Activation commands applied at the next TTI boundary.
    pending_cmds: Vec<(usize, bool)>,
    last_tti: Option<TtiPoint>,
    counters: Counters,
}

/// Checks a terminal configuration against the configured cells without
/// touching any state.
pub fn validate_ue_config(cfg: &UeConfig, cells: &[Arc<CellParams>]) -> Result<(), SchedError> {
    if cfg.carriers.is_empty() {
        return Err(SchedError::InvalidCarrier(u32::MAX));
    }
    let mut seen = BTreeSet::new();
    for carrier in &cfg.carriers {
        if carrier.enb_cc_idx as usize >= cells.len() || !seen.insert(carrier.enb_cc_idx) {
            return Err(SchedError::InvalidCarrier(carrier.enb_cc_idx));
        }
    }
    if let Some(p) = cfg.sr_period
        && !enb_sched_config::is_valid_sr_period(p)
    {
        return Err(SchedError::InvalidPeriod(p));
    }
    if let Some(p) = cfg.cqi_period
        && !enb_sched_config::is_valid_cqi_period(p)
    {
        return Err(SchedError::InvalidPeriod(p));
    }
    for (&lcid, bearer) in &cfg.bearers {
        LchManager::check_bearer(lcid, bearer)?;
    }
    Ok(())
}

fn lease(pool: &Arc<PucchPool>, period: Option<u32>, rnti: Rnti) -> Option<PucchLease> {
    let period = period.unwrap_or(pool.default_period());
    match pool.lease(period) {
        Ok(lease) => Some(lease),
        Err(PucchError::Exhausted) => {
            tracing::debug!(%rnti, kind = ?pool.kind(), "PUCCH pool exhausted; retrying next TTI");
            None
        }
        Err(e) => {
            tracing::warn!(%rnti, kind = ?pool.kind(), "PUCCH lease rejected: {e}");
            None
        }
    }
}

impl UeState {
    fn carrier(&self, enb_cc_idx: u32) -> Option<&CarrierUe> {
        self.carriers.iter().find(|c| c.enb_cc_idx() == enb_cc_idx)
    }

    fn carrier_mut(&mut self, enb_cc_idx: u32) -> Result<&mut CarrierUe, SchedError> {
        self.carriers
            .iter_mut()
            .find(|c| c.enb_cc_idx() == enb_cc_idx)
            .ok_or(SchedError::InvalidCarrier(enb_cc_idx))
    }

    fn ul_pending_bytes(&self) -> u32 {
        let bsr = self.lch.ul_pending_bytes();
        if bsr == 0 && self.sr_pending {
            SR_GRANT_BYTES
        } else {
            bsr
        }
    }

    fn scell_bitmap(&self) -> u8 {
        self.carriers
            .iter()
            .filter(|c| c.ue_cc_idx() > 0)
            .filter(|c| matches!(c.state(), CarrierState::Active | CarrierState::Activating))
            .fold(0u8, |acc, c| acc | (1u8 << c.ue_cc_idx().min(7)))
    }

    fn retry_leases(&mut self) {
        if self.sr_lease.is_none() {
            self.sr_lease = lease(&self.pools.sr, self.cfg.sr_period, self.rnti);
        }
        if self.cqi_lease.is_none() {
            self.cqi_lease = lease(&self.pools.cqi, self.cfg.cqi_period, self.rnti);
        }
    }

    fn apply_config(&mut self, cfg: UeConfig, cells: &[Arc<CellParams>]) -> Result<(), SchedError> {
        let mut old: Vec<CarrierUe> = std::mem::take(&mut self.carriers);
        let mut carriers = Vec::with_capacity(cfg.carriers.len());
        for (ue_cc_idx, cc) in cfg.carriers.iter().enumerate() {
            let is_pcell = ue_cc_idx == 0;
            let existing = old
                .iter()
                .position(|c| c.enb_cc_idx() == cc.enb_cc_idx)
                .map(|pos| old.swap_remove(pos));
            let carrier = match existing {
                Some(c) if c.ue_cc_idx() == ue_cc_idx as u32 => c,
                _ => {
                    let params = cells
                        .get(cc.enb_cc_idx as usize)
                        .cloned()
                        .ok_or(SchedError::InvalidCarrier(cc.enb_cc_idx))?;
                    CarrierUe::new(
                        self.rnti,
                        ue_cc_idx as u32,
                        params,
                        is_pcell,
                        cfg.max_aggr_level.min(MAX_AGGR_LEVEL),
                        cfg.max_mcs_dl,
                        cfg.max_mcs_ul,
                    )
                }
            };
            if !is_pcell {
                match (cc.active, carrier.state()) {
                    (true, CarrierState::Idle) => self.pending_cmds.push((ue_cc_idx, true)),
                    (false, CarrierState::Active | CarrierState::Activating) => {
                        self.pending_cmds.push((ue_cc_idx, false))
                    }
                    _ => {}
                }
            }
            carriers.push(carrier);
        }
        self.carriers = carriers;

        for lcid in 0..crate::protocols::MAX_NOF_LCIDS {
            if self.lch.is_configured(lcid) && !cfg.bearers.contains_key(&lcid) {
                self.lch.rem_lcid(lcid)?;
            }
        }
        for (&lcid, &bearer) in &cfg.bearers {
            self.lch.config_lcid(lcid, bearer)?;
        }

        if self.cfg.sr_period != cfg.sr_period {
            self.sr_lease = None;
        }
        if self.cfg.cqi_period != cfg.cqi_period {
            self.cqi_lease = None;
        }
        self.cfg = cfg;
        self.retry_leases();
        Ok(())
    }

    fn new_tti(&mut self, tti_rx: TtiPoint) {
        if self.last_tti == Some(tti_rx) {
            return;
        }
        self.last_tti = Some(tti_rx);
        let rnti = self.rnti;

        // transitions started at an earlier boundary complete once their
        // activation CE has left the queue
        let ce_queued = self
            .lch
            .has_pending_ce(|ce| matches!(ce, MacCe::ScellActivation(_)));
        for carrier in &mut self.carriers {
            match carrier.state() {
                CarrierState::Activating if !ce_queued => carrier.set_state(CarrierState::Active),
                CarrierState::Deactivating if !ce_queued => {
                    carrier.harq.reset();
                    carrier.set_state(CarrierState::Idle);
                }
                _ => {}
            }
        }

        let cmds = std::mem::take(&mut self.pending_cmds);
        let mut changed = false;
        for (ue_cc_idx, activate) in cmds {
            let Some(carrier) = self.carriers.get_mut(ue_cc_idx) else {
                continue;
            };
            match (activate, carrier.state()) {
                (true, CarrierState::Idle) => {
                    carrier.set_state(CarrierState::Activating);
                    changed = true;
                }
                (false, CarrierState::Active | CarrierState::Activating) => {
                    carrier.set_state(CarrierState::Deactivating);
                    changed = true;
                }
                _ => {}
            }
        }
        if changed {
            let bitmap = self.scell_bitmap();
            tracing::debug!(%rnti, tti = %tti_rx, bitmap, "queueing SCell activation CE");
            self.lch.push_ce(MacCe::ScellActivation(bitmap));
        }

        for carrier in &mut self.carriers {
            for (dir, dropped) in carrier.new_tti(tti_rx) {
                tracing::debug!(
                    %rnti,
                    cc = carrier.enb_cc_idx(),
                    pid = dropped.pid,
                    ?dir,
                    reason = ?dropped.reason,
                    "HARQ transport block dropped"
                );
                self.lch.record_harq_failure(dir, dropped.tbs);
            }
        }

        self.retry_leases();
    }
}

/// Scheduling context of one terminal.
#[derive(Debug)]
pub struct SchedUe {
    rnti: Rnti,
    inner: Mutex<UeState>,
}

impl SchedUe {
    pub fn new(rnti: Rnti, cfg: UeConfig, cells: &[Arc<CellParams>], pools: UePools) -> Result<Self, SchedError> {
        validate_ue_config(&cfg, cells)?;
        let mut state = UeState {
            rnti,
            cfg: UeConfig {
                carriers: Vec::new(),
                ..cfg.clone()
            },
            carriers: Vec::new(),
            lch: LchManager::new(),
            sr_pending: false,
            phr: None,
            tpc_pucch: 0,
            tpc_pusch: 0,
            pools,
            sr_lease: None,
            cqi_lease: None,
            pending_cmds: Vec::new(),
            last_tti: None,
            counters: Counters::default(),
        };
        state.apply_config(cfg, cells)?;
        Ok(Self {
            rnti,
            inner: Mutex::new(state),
        })
    }

    pub fn rnti(&self) -> Rnti {
        self.rnti
    }

    /// Applies a new configuration. Validation happens first; on error the
    /// terminal is unchanged.
    pub fn set_cfg(&self, cfg: UeConfig, cells: &[Arc<CellParams>]) -> Result<(), SchedError> {
        validate_ue_config(&cfg, cells)?;
        self.inner.lock().apply_config(cfg, cells)
    }

    pub fn config(&self) -> UeConfig {
        self.inner.lock().cfg.clone()
    }

    /// Advances every carrier to reception TTI `tti_rx` and applies queued
    /// activation commands. Idempotent per TTI.
    pub fn new_tti(&self, tti_rx: TtiPoint) {
        self.inner.lock().new_tti(tti_rx);
    }

    // ========================================================================
    // Configuration commands
    // ========================================================================

    pub fn bearer_cfg(&self, lcid: u32, cfg: crate::protocols::BearerConfig) -> Result<(), SchedError> {
        let mut state = self.inner.lock();
        state.lch.config_lcid(lcid, cfg)?;
        state.cfg.bearers.insert(lcid, cfg);
        Ok(())
    }

    pub fn bearer_rem(&self, lcid: u32) -> Result<(), SchedError> {
        let mut state = self.inner.lock();
        state.lch.rem_lcid(lcid)?;
        state.cfg.bearers.remove(&lcid);
        Ok(())
    }

    /// Queues an SCell activation change; it takes effect at the next TTI
    /// boundary.
    pub fn carrier_activation(&self, enb_cc_idx: u32, activate: bool) -> Result<(), SchedError> {
        let mut state = self.inner.lock();
        let ue_cc_idx = state
            .cfg
            .ue_cc_idx(enb_cc_idx)
            .ok_or(SchedError::InvalidCarrier(enb_cc_idx))?;
        if ue_cc_idx == 0 {
            // the primary carrier is always active
            return Err(SchedError::InvalidCarrier(enb_cc_idx));
        }
        state.pending_cmds.push((ue_cc_idx, activate));
        Ok(())
    }

    // ========================================================================
    // Reports
    // ========================================================================

    pub fn dl_buffer_state(&self, lcid: u32, tx: u32, retx: u32) -> bool {
        self.inner.lock().lch.dl_buffer_state(lcid, tx, retx)
    }

    pub fn dl_mac_ce(&self, ce: MacCe) {
        self.inner.lock().lch.push_ce(ce);
    }

    pub fn ul_buffer_state(&self, lcg: u32, bytes: u32) -> bool {
        self.inner.lock().lch.ul_bsr(lcg, bytes)
    }

    pub fn ul_phr(&self, phr: i32) {
        self.inner.lock().phr = Some(phr);
    }

    pub fn set_sr(&self) {
        self.inner.lock().sr_pending = true;
    }

    pub fn unset_sr(&self) {
        self.inner.lock().sr_pending = false;
    }

    pub fn dl_cqi(&self, tti: TtiPoint, enb_cc_idx: u32, cqi: u32) -> Result<(), SchedError> {
        self.inner.lock().carrier_mut(enb_cc_idx)?.set_dl_cqi(tti, cqi);
        Ok(())
    }

    pub fn dl_ri(&self, tti: TtiPoint, enb_cc_idx: u32, ri: u32) -> Result<(), SchedError> {
        self.inner.lock().carrier_mut(enb_cc_idx)?.set_dl_ri(tti, ri);
        Ok(())
    }

    pub fn dl_pmi(&self, tti: TtiPoint, enb_cc_idx: u32, pmi: u32) -> Result<(), SchedError> {
        self.inner.lock().carrier_mut(enb_cc_idx)?.set_dl_pmi(tti, pmi);
        Ok(())
    }

    pub fn ul_snr(&self, tti: TtiPoint, enb_cc_idx: u32, snr_db: f32) -> Result<(), SchedError> {
        self.inner.lock().carrier_mut(enb_cc_idx)?.set_ul_snr(tti, snr_db);
        Ok(())
    }

    /// DL HARQ feedback received at `tti_rx`.
    pub fn dl_ack(&self, tti_rx: TtiPoint, enb_cc_idx: u32, tb: u32, ack: bool) -> Result<AckOutcome, SchedError> {
        let mut state = self.inner.lock();
        let carrier = state.carrier_mut(enb_cc_idx)?;
        let tx_tti = tti_rx.to_dl_ack_tx();
        let pid = carrier
            .harq
            .dl
            .find_by_tx(tx_tti)
            .ok_or(HarqError::NotActive { pid: u32::MAX, tb })?;
        Ok(carrier.harq.dl.set_ack(pid, tb, ack)?)
    }

    /// UL decode outcome for the PUSCH received at `tti_rx`.
    pub fn ul_crc(&self, tti_rx: TtiPoint, enb_cc_idx: u32, crc: bool) -> Result<AckOutcome, SchedError> {
        let mut state = self.inner.lock();
        let carrier = state.carrier_mut(enb_cc_idx)?;
        let pid = carrier
            .harq
            .ul
            .find_by_tx(tti_rx)
            .ok_or(HarqError::NotActive { pid: u32::MAX, tb: 0 })?;
        Ok(carrier.harq.ul.set_ack(pid, 0, crc)?)
    }

    pub fn tpc_inc(&self, dir: Direction) {
        let mut state = self.inner.lock();
        let tpc = match dir {
            Direction::Dl => &mut state.tpc_pucch,
            Direction::Ul => &mut state.tpc_pusch,
        };
        *tpc = (*tpc + 1).min(MAX_TPC);
    }

    pub fn tpc_dec(&self, dir: Direction) {
        let mut state = self.inner.lock();
        let tpc = match dir {
            Direction::Dl => &mut state.tpc_pucch,
            Direction::Ul => &mut state.tpc_pusch,
        };
        *tpc = (*tpc - 1).max(MIN_TPC);
    }

    // ========================================================================
    // Read-only queries
    // ========================================================================

    pub fn dl_pending_bytes(&self) -> u32 {
        self.inner.lock().lch.dl_pending_bytes()
    }

    pub fn ul_pending_bytes(&self) -> u32 {
        self.inner.lock().ul_pending_bytes()
    }

    pub fn get_required_dl_rbgs(&self, enb_cc_idx: u32) -> u32 {
        let state = self.inner.lock();
        let pending = state.lch.dl_pending_bytes();
        state
            .carrier(enb_cc_idx)
            .map_or(0, |c| c.resources_for_bytes(pending, Direction::Dl))
    }

    pub fn get_required_ul_prbs(&self, enb_cc_idx: u32) -> u32 {
        let state = self.inner.lock();
        let pending = state.ul_pending_bytes();
        state
            .carrier(enb_cc_idx)
            .map_or(0, |c| c.resources_for_bytes(pending, Direction::Ul))
    }

    pub fn carrier_state(&self, enb_cc_idx: u32) -> Option<CarrierState> {
        self.inner.lock().carrier(enb_cc_idx).map(CarrierUe::state)
    }

    /// Everything the carrier scheduler needs for one pass on `enb_cc_idx`.
    /// Does not mutate HARQ or buffer state.
    pub fn snapshot(&self, tti_rx: TtiPoint, enb_cc_idx: u32) -> Option<UeSnapshot> {
        let state = self.inner.lock();
        let carrier = state.carrier(enb_cc_idx)?;
        let tti_tx_dl = tti_rx.to_tx_dl();
        let tti_tx_ul = tti_rx.to_tx_ul();
        let active = carrier.is_active();
        let retx_allowed = matches!(carrier.state(), CarrierState::Active | CarrierState::Deactivating);

        let dl_retx = retx_allowed
            .then(|| carrier.harq.dl.get_pending_process(tti_tx_dl))
            .flatten()
            .and_then(|pid| {
                let alloc = *carrier.harq.dl.get(pid)?.alloc()?;
                Some(RetxRequest { pid, alloc })
            });
        let ul_retx = retx_allowed
            .then(|| carrier.harq.ul.get_pending_process(tti_tx_ul))
            .flatten()
            .and_then(|pid| {
                let alloc = *carrier.harq.ul.get(pid)?.alloc()?;
                Some(RetxRequest { pid, alloc })
            });

        let new_tx = |dir: Direction, pending: u32, pid: Option<u32>| {
            if !active || pending == 0 {
                return None;
            }
            Some(NewTxRequest {
                pid: pid?,
                pending_bytes: pending,
                units: carrier.resources_for_bytes(pending, dir),
                bytes_per_unit: f64::from(carrier.size_for_bytes(1, u32::MAX, dir).total()),
            })
        };
        let dl_new = if dl_retx.is_some() {
            None
        } else {
            new_tx(
                Direction::Dl,
                state.lch.dl_pending_bytes(),
                carrier.harq.dl.get_empty_process(tti_tx_dl),
            )
        };
        let ul_new = if ul_retx.is_some() {
            None
        } else {
            new_tx(
                Direction::Ul,
                state.ul_pending_bytes(),
                carrier.harq.ul.get_empty_process(tti_tx_ul),
            )
        };

        let aggr_level = carrier.aggr_level();
        Some(UeSnapshot {
            rnti: self.rnti,
            aggr_level,
            cce_candidates: carrier.cce_candidates(tti_tx_dl.sf_idx(), aggr_level).to_vec(),
            dl_retx,
            dl_new,
            ul_retx,
            ul_new,
        })
    }

    // ========================================================================
    // Grant generation
    // ========================================================================

    /// Builds the DL grant for process `pid` on `enb_cc_idx`: a
    /// retransmission when the process has one due at `tti_tx`, otherwise
    /// new data sized from the pending buffers.
    pub fn generate_dl_grant(
        &self,
        tti_tx: TtiPoint,
        enb_cc_idx: u32,
        pid: u32,
        mask: RbgMask,
        dci: DciLocation,
    ) -> Result<DlGrant, GrantError> {
        let mut guard = self.inner.lock();
        let state = &mut *guard;
        let pending = state.lch.dl_pending_bytes();
        let carrier = state
            .carriers
            .iter_mut()
            .find(|c| c.enb_cc_idx() == enb_cc_idx)
            .ok_or(GrantError::CarrierInactive(enb_cc_idx))?;
        let nof_prb = mask.nof_prb(carrier.params().nof_prb());

        let is_retx = carrier
            .harq
            .dl
            .get(pid)
            .is_some_and(|p| p.has_pending_retx(tti_tx));
        let (tbs, pdus) = if is_retx {
            (carrier.alloc_dl_retx(tti_tx, pid, mask)?, Vec::new())
        } else {
            let tbs = carrier.alloc_dl_tx(tti_tx, pid, mask, pending)?;
            let total = tbs.iter().map(|tb| tb.tbs).sum();
            (tbs, state.lch.alloc_dl_pdus(total))
        };

        let tpc_pucch = std::mem::take(&mut state.tpc_pucch);
        let grant = DlGrant {
            rnti: self.rnti,
            enb_cc_idx,
            tti_tx,
            mask,
            nof_prb,
            dci,
            pid,
            tbs,
            tpc_pucch,
            pdus,
        };
        state.counters.nof_dl_grants += 1;
        if !is_retx {
            state.counters.dl_bytes_granted += u64::from(grant.total_bytes());
        }
        tracing::trace!(rnti = %self.rnti, cc = enb_cc_idx, tti = %tti_tx, pid, tbs = grant.total_bytes(), is_retx, "DL grant");
        Ok(grant)
    }

    /// Builds the UL grant for process `pid`. `dci` is None only for a
    /// non-adaptive retransmission.
    pub fn generate_ul_grant(
        &self,
        tti_tx: TtiPoint,
        enb_cc_idx: u32,
        pid: u32,
        interval: PrbInterval,
        dci: Option<DciLocation>,
    ) -> Result<UlGrant, GrantError> {
        let mut guard = self.inner.lock();
        let state = &mut *guard;
        let pending = state.ul_pending_bytes();
        let is_pcell = state.cfg.pcell() == Some(enb_cc_idx);
        let cqi_stale = state
            .cfg
            .pcell()
            .and_then(|pcell| state.carrier(pcell))
            .is_none_or(CarrierUe::is_dl_cqi_stale);
        let carrier = state
            .carriers
            .iter_mut()
            .find(|c| c.enb_cc_idx() == enb_cc_idx)
            .ok_or(GrantError::CarrierInactive(enb_cc_idx))?;

        let is_retx = carrier
            .harq
            .ul
            .get(pid)
            .is_some_and(|p| p.has_pending_retx(tti_tx));
        let tb = if is_retx {
            carrier.alloc_ul_retx(tti_tx, pid, interval)?
        } else {
            let tb = carrier.alloc_ul_tx(tti_tx, pid, interval, pending)?;
            state.lch.alloc_ul(tb.tbs);
            state.sr_pending = false;
            tb
        };

        let tpc_pusch = if dci.is_some() {
            std::mem::take(&mut state.tpc_pusch)
        } else {
            0
        };
        state.counters.nof_ul_grants += 1;
        if !is_retx {
            state.counters.ul_bytes_granted += u64::from(tb.tbs);
        }
        tracing::trace!(rnti = %self.rnti, cc = enb_cc_idx, tti = %tti_tx, pid, tbs = tb.tbs, is_retx, "UL grant");
        Ok(UlGrant {
            rnti: self.rnti,
            enb_cc_idx,
            tti_tx,
            interval,
            dci,
            pid,
            tb,
            tpc_pusch,
            cqi_request: is_pcell && !is_retx && cqi_stale,
        })
    }

    /// Runs `f` on the DL transport-block buffer of `(pid, tb)`.
    pub fn with_tb_buffer<R>(
        &self,
        enb_cc_idx: u32,
        pid: u32,
        tb: u32,
        f: impl FnOnce(&mut BytesMut) -> R,
    ) -> Result<R, SchedError> {
        let mut state = self.inner.lock();
        Ok(state.carrier_mut(enb_cc_idx)?.with_tb_buffer(pid, tb, f)?)
    }

    pub fn metrics(&self) -> UeMetrics {
        let state = self.inner.lock();
        UeMetrics {
            rnti: self.rnti.0,
            dl_pending_bytes: state.lch.dl_pending_bytes(),
            ul_pending_bytes: state.ul_pending_bytes(),
            dl_bytes_granted: state.counters.dl_bytes_granted,
            ul_bytes_granted: state.counters.ul_bytes_granted,
            nof_dl_grants: state.counters.nof_dl_grants,
            nof_ul_grants: state.counters.nof_ul_grants,
            dl_harq_failures: state.lch.harq_failures(Direction::Dl),
            ul_harq_failures: state.lch.harq_failures(Direction::Ul),
            phr: state.phr,
            sr_pending: state.sr_pending,
            sr_resource: state.sr_lease.as_ref().map(|l| *l.resource()),
            cqi_resource: state.cqi_lease.as_ref().map(|l| *l.resource()),
            carriers: state
                .carriers
                .iter()
                .map(|c| CarrierMetrics {
                    enb_cc_idx: c.enb_cc_idx(),
                    state: c.state(),
                    dl_cqi: c.dl_cqi(),
                    dl_ri: c.dl_ri(),
                    ul_cqi: c.ul_cqi(),
                    dl_harq_bytes: c.harq.dl.pending_bytes(),
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocols::{BearerConfig, BearerDirection, UeCarrierConfig};
    use enb_sched_config::SchedConfig;

    fn cells(nof_carriers: usize) -> (Vec<Arc<CellParams>>, UePools) {
        let config = SchedConfig {
            cells: vec![Default::default(); nof_carriers],
            ..Default::default()
        };
        let cells = (0..nof_carriers as u32)
            .map(|cc| Arc::new(CellParams::new(cc, &config).unwrap()))
            .collect();
        let pools = UePools {
            sr: Arc::new(PucchPool::sr_pool(&config.pucch, &config.cells[0])),
            cqi: Arc::new(PucchPool::cqi_pool(&config.pucch, &config.cells[0])),
        };
        (cells, pools)
    }

    fn drb() -> BearerConfig {
        BearerConfig {
            direction: BearerDirection::Both,
            priority: 5,
            lcg: 1,
        }
    }

    fn ue_with_drb(cells: &[Arc<CellParams>], pools: UePools) -> SchedUe {
        let mut cfg = UeConfig::default();
        cfg.bearers.insert(3, drb());
        SchedUe::new(Rnti(0x46), cfg, cells, pools).unwrap()
    }

    #[test]
    fn test_new_ue_leases_pucch() {
        let (cells, pools) = cells(1);
        let ue = ue_with_drb(&cells, pools.clone());
        let metrics = ue.metrics();
        assert!(metrics.sr_resource().is_some());
        assert!(metrics.cqi_resource().is_some());
        assert_eq!(pools.sr.nof_leased(), 1);

        drop(ue);
        assert_eq!(pools.sr.nof_leased(), 0);
        assert_eq!(pools.cqi.nof_leased(), 0);
    }

    #[test]
    fn test_invalid_config_rejected_without_side_effects() {
        let (cells, pools) = cells(1);
        let mut cfg = UeConfig::default();
        cfg.carriers.push(UeCarrierConfig {
            enb_cc_idx: 3,
            active: true,
        });
        assert!(matches!(
            SchedUe::new(Rnti(0x46), cfg, &cells, pools.clone()),
            Err(SchedError::InvalidCarrier(3))
        ));
        assert_eq!(pools.sr.nof_leased(), 0);

        let ue = ue_with_drb(&cells, pools);
        let bad = UeConfig {
            sr_period: Some(7),
            ..ue.config()
        };
        assert!(matches!(ue.set_cfg(bad, &cells), Err(SchedError::InvalidPeriod(7))));
        assert!(ue.dl_buffer_state(3, 100, 0));
    }

    #[test]
    fn test_sr_without_bsr_requests_default_grant() {
        let (cells, pools) = cells(1);
        let ue = ue_with_drb(&cells, pools);
        assert_eq!(ue.ul_pending_bytes(), 0);
        ue.set_sr();
        assert_eq!(ue.ul_pending_bytes(), SR_GRANT_BYTES);
        assert!(ue.ul_buffer_state(1, 80));
        assert_eq!(ue.ul_pending_bytes(), 80);
    }

    #[test]
    fn test_snapshot_reports_new_data() {
        let (cells, pools) = cells(1);
        let ue = ue_with_drb(&cells, pools);
        let tti = TtiPoint::new(100);
        ue.new_tti(tti);
        ue.dl_cqi(tti, 0, 12).unwrap();
        assert!(ue.snapshot(tti, 0).unwrap().dl_new.is_none());

        ue.dl_buffer_state(3, 400, 0);
        let snap = ue.snapshot(tti, 0).unwrap();
        let dl = snap.dl_new.unwrap();
        assert_eq!(dl.pending_bytes, 400 + crate::lch::RLC_SUBHEADER_BYTES);
        assert_eq!(dl.units, ue.get_required_dl_rbgs(0));
        assert!(dl.bytes_per_unit > 0.0);
        assert!(snap.dl_retx.is_none());
        assert!(ue.snapshot(tti, 1).is_none());
    }

    #[test]
    fn test_dl_grant_then_nack_retransmits() {
        let (cells, pools) = cells(1);
        let ue = ue_with_drb(&cells, pools);
        let rx = TtiPoint::new(10);
        ue.new_tti(rx);
        ue.dl_cqi(rx, 0, 15).unwrap();
        ue.dl_buffer_state(3, 300, 0);

        let snap = ue.snapshot(rx, 0).unwrap();
        let req = snap.dl_new.unwrap();
        let mask = RbgMask::with_range(13, 0, req.units);
        let dci = DciLocation { ncce: 0, l: 0 };
        let grant = ue.generate_dl_grant(rx.to_tx_dl(), 0, req.pid, mask, dci).unwrap();
        assert!(!grant.is_retx());
        assert!(grant.total_bytes() >= 300);
        assert_eq!(ue.dl_pending_bytes(), 0);

        // feedback arrives 4 TTIs after transmission
        let ack_rx = rx.to_tx_dl() + 4;
        let outcome = ue.dl_ack(ack_rx, 0, 0, false).unwrap();
        assert!(matches!(outcome, AckOutcome::Retransmit { .. }));
        assert!(matches!(ue.dl_ack(ack_rx, 0, 0, false).unwrap(), AckOutcome::Ignored));

        let retx_rx = rx + 8;
        ue.new_tti(retx_rx);
        let snap = ue.snapshot(retx_rx, 0).unwrap();
        let retx = snap.dl_retx.unwrap();
        assert_eq!(retx.pid, req.pid);
        assert_eq!(retx.alloc, mask);
        assert!(snap.dl_new.is_none());

        let grant = ue
            .generate_dl_grant(retx_rx.to_tx_dl(), 0, retx.pid, retx.alloc, dci)
            .unwrap();
        assert!(grant.is_retx());
        assert!(grant.pdus.is_empty());
    }

    #[test]
    fn test_ul_grant_clears_sr_and_consumes_tpc() {
        let (cells, pools) = cells(1);
        let ue = ue_with_drb(&cells, pools);
        let rx = TtiPoint::new(20);
        ue.new_tti(rx);
        ue.set_sr();
        ue.tpc_inc(Direction::Ul);
        ue.tpc_inc(Direction::Ul);

        let snap = ue.snapshot(rx, 0).unwrap();
        let req = snap.ul_new.unwrap();
        let interval = PrbInterval::new(2, req.units);
        let grant = ue
            .generate_ul_grant(rx.to_tx_ul(), 0, req.pid, interval, Some(DciLocation { ncce: 0, l: 2 }))
            .unwrap();
        assert_eq!(grant.tpc_pusch, 2);
        // no CQI report yet
        assert!(grant.cqi_request);
        assert!(!ue.metrics().sr_pending());
        assert_eq!(ue.metrics().nof_ul_grants(), 1);
    }

    #[test]
    fn test_tpc_saturates() {
        let (cells, pools) = cells(1);
        let ue = ue_with_drb(&cells, pools);
        for _ in 0..5 {
            ue.tpc_dec(Direction::Dl);
        }
        assert_eq!(ue.inner.lock().tpc_pucch, MIN_TPC);
        for _ in 0..10 {
            ue.tpc_inc(Direction::Dl);
        }
        assert_eq!(ue.inner.lock().tpc_pucch, MAX_TPC);
    }

    #[test]
    fn test_scell_activation_waits_for_ce() {
        let (cells, pools) = cells(2);
        let mut cfg = UeConfig::default();
        cfg.carriers.push(UeCarrierConfig {
            enb_cc_idx: 1,
            active: true,
        });
        let ue = SchedUe::new(Rnti(0x50), cfg, &cells, pools).unwrap();
        assert_eq!(ue.carrier_state(1), Some(CarrierState::Idle));

        let rx = TtiPoint::new(0);
        ue.new_tti(rx);
        assert_eq!(ue.carrier_state(1), Some(CarrierState::Activating));
        // the CE is still queued, so the carrier stays in transition
        ue.new_tti(rx + 1);
        assert_eq!(ue.carrier_state(1), Some(CarrierState::Activating));

        let pdus = ue.inner.lock().lch.alloc_dl_pdus(100);
        assert!(pdus.contains(&crate::protocols::DlPdu::Ce(MacCe::ScellActivation(0b10))));
        ue.new_tti(rx + 2);
        assert_eq!(ue.carrier_state(1), Some(CarrierState::Active));

        ue.carrier_activation(1, false).unwrap();
        ue.new_tti(rx + 3);
        assert_eq!(ue.carrier_state(1), Some(CarrierState::Deactivating));
        assert!(matches!(ue.carrier_activation(0, false), Err(SchedError::InvalidCarrier(0))));
    }

    #[test]
    fn test_feedback_on_unknown_carrier() {
        let (cells, pools) = cells(1);
        let ue = ue_with_drb(&cells, pools);
        assert!(matches!(
            ue.dl_cqi(TtiPoint::new(0), 2, 10),
            Err(SchedError::InvalidCarrier(2))
        ));
        assert!(matches!(
            ue.dl_ack(TtiPoint::new(8), 0, 0, true),
            Err(SchedError::Harq(HarqError::NotActive { .. }))
        ));
    }
}
