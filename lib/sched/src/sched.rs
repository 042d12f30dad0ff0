// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Top-level scheduler: the cell set and the RNTI map.
//!
//! Lock order is always cells, then the terminal map, then a carrier's
//! subframe cache, then a terminal's own mutex, then a PUCCH pool.
//! Reports only ever take the terminal map for reading, so workers
//! reporting for different terminals never wait on each other.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use parking_lot::RwLock;

use enb_sched_config::SchedConfig;

use crate::carrier::{CarrierScheduler, SfResult};
use crate::error::SchedError;
use crate::harq::AckOutcome;
use crate::interfaces::{GrantSource, SchedConfigurator, SchedReportSink};
use crate::metrics::{SchedMetrics, UeMetrics};
use crate::params::CellParams;
use crate::policy::{SchedPolicy, policy_from_config};
use crate::protocols::{BearerConfig, Direction, DlGrant, MacCe, Rnti, UeConfig, UlGrant};
use crate::pucch::PucchPool;
use crate::tti::TtiPoint;
use crate::ue::{SchedUe, UePools};

/// Everything derived from one cell configuration. Lives until the next
/// `cell_cfg`.
pub struct CellSet {
    config: SchedConfig,
    params: Vec<Arc<CellParams>>,
    carriers: Vec<CarrierScheduler>,
    pools: UePools,
    policy: Arc<dyn SchedPolicy>,
}

impl std::fmt::Debug for CellSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CellSet")
            .field("carriers", &self.carriers)
            .field("policy", &self.policy.name())
            .finish()
    }
}

impl CellSet {
    fn new(config: SchedConfig) -> Result<Self, SchedError> {
        config.check()?;
        let params = (0..config.nof_carriers() as u32)
            .map(|cc| CellParams::new(cc, &config).map(Arc::new).ok_or(SchedError::InvalidCarrier(cc)))
            .collect::<Result<Vec<_>, _>>()?;
        let policy = policy_from_config(&config.policy);
        let deadline = config.timing.tti_deadline_us.map(Duration::from_micros);
        let carriers = params
            .iter()
            .map(|p| CarrierScheduler::new(p.clone(), policy.clone(), deadline))
            .collect();
        // SR and CQI are signalled on the primary cell's PUCCH
        let pcell = &config.cells[0];
        let pools = UePools {
            sr: Arc::new(PucchPool::sr_pool(&config.pucch, pcell)),
            cqi: Arc::new(PucchPool::cqi_pool(&config.pucch, pcell)),
        };
        Ok(Self {
            config,
            params,
            carriers,
            pools,
            policy,
        })
    }

    pub fn config(&self) -> &SchedConfig {
        &self.config
    }

    pub fn params(&self) -> &[Arc<CellParams>] {
        &self.params
    }

    pub fn pools(&self) -> &UePools {
        &self.pools
    }

    pub fn policy_name(&self) -> &'static str {
        self.policy.name()
    }

    fn carrier(&self, enb_cc_idx: u32) -> Result<&CarrierScheduler, SchedError> {
        self.carriers
            .get(enb_cc_idx as usize)
            .ok_or(SchedError::InvalidCarrier(enb_cc_idx))
    }
}

#[derive(Debug, Default)]
pub struct Scheduler {
    cells: RwLock<Option<Arc<CellSet>>>,
    ues: RwLock<HashMap<Rnti, SchedUe>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: SchedConfig) -> Result<Self, SchedError> {
        let sched = Self::new();
        sched.cell_cfg(config)?;
        Ok(sched)
    }

    pub fn cells(&self) -> Result<Arc<CellSet>, SchedError> {
        self.cells.read().clone().ok_or(SchedError::NotConfigured)
    }

    pub fn nof_ues(&self) -> usize {
        self.ues.read().len()
    }

    fn with_ue<R>(&self, rnti: Rnti, f: impl FnOnce(&SchedUe) -> R) -> Result<R, SchedError> {
        let ues = self.ues.read();
        let ue = ues.get(&rnti).ok_or(SchedError::UnknownRnti(rnti))?;
        Ok(f(ue))
    }

    /// Report ingestion: protocol violations are logged here and handed
    /// back to the caller to drop.
    fn report<R>(
        &self,
        rnti: Rnti,
        what: &'static str,
        f: impl FnOnce(&SchedUe) -> Result<R, SchedError>,
    ) -> Result<R, SchedError> {
        let res = self.with_ue(rnti, f).and_then(|r| r);
        if let Err(e) = &res {
            if e.is_protocol_violation() {
                tracing::warn!(%rnti, what, "discarding report: {e}");
            } else {
                tracing::debug!(%rnti, what, "report rejected: {e}");
            }
        }
        res
    }

    // ========================================================================
    // Terminal commands outside the FAPI-like surface
    // ========================================================================

    /// Queues an SCell (de)activation; applied at the next TTI boundary.
    pub fn carrier_activation(&self, rnti: Rnti, enb_cc_idx: u32, activate: bool) -> Result<(), SchedError> {
        self.with_ue(rnti, |ue| ue.carrier_activation(enb_cc_idx, activate))?
    }

    pub fn tpc_inc(&self, rnti: Rnti, dir: Direction) -> Result<(), SchedError> {
        self.with_ue(rnti, |ue| ue.tpc_inc(dir))
    }

    pub fn tpc_dec(&self, rnti: Rnti, dir: Direction) -> Result<(), SchedError> {
        self.with_ue(rnti, |ue| ue.tpc_dec(dir))
    }

    pub fn dl_pending_bytes(&self, rnti: Rnti) -> Result<u32, SchedError> {
        self.with_ue(rnti, SchedUe::dl_pending_bytes)
    }

    pub fn ul_pending_bytes(&self, rnti: Rnti) -> Result<u32, SchedError> {
        self.with_ue(rnti, SchedUe::ul_pending_bytes)
    }

    pub fn get_required_dl_rbgs(&self, rnti: Rnti, enb_cc_idx: u32) -> Result<u32, SchedError> {
        self.with_ue(rnti, |ue| ue.get_required_dl_rbgs(enb_cc_idx))
    }

    pub fn get_required_ul_prbs(&self, rnti: Rnti, enb_cc_idx: u32) -> Result<u32, SchedError> {
        self.with_ue(rnti, |ue| ue.get_required_ul_prbs(enb_cc_idx))
    }

    /// Runs `f` on the DL buffer of `(pid, tb)` so the MAC can assemble the
    /// PDU in place.
    pub fn with_tb_buffer<R>(
        &self,
        rnti: Rnti,
        enb_cc_idx: u32,
        pid: u32,
        tb: u32,
        f: impl FnOnce(&mut BytesMut) -> R,
    ) -> Result<R, SchedError> {
        self.with_ue(rnti, |ue| ue.with_tb_buffer(enb_cc_idx, pid, tb, f))?
    }

    // ========================================================================
    // Scheduling
    // ========================================================================

    /// Full result of the pass for `tti_rx` on `enb_cc_idx`, running it if
    /// neither pull has yet.
    pub fn sf_result(&self, tti_rx: TtiPoint, enb_cc_idx: u32) -> Result<Arc<SfResult>, SchedError> {
        let cells = self.cells()?;
        let carrier = cells.carrier(enb_cc_idx)?;
        let ues = self.ues.read();
        carrier.run(tti_rx, &ues)
    }

    // ========================================================================
    // Metrics
    // ========================================================================

    pub fn ue_metrics(&self, rnti: Rnti) -> Result<UeMetrics, SchedError> {
        self.with_ue(rnti, SchedUe::metrics)
    }

    /// Per-terminal metrics in ascending RNTI order.
    pub fn all_ue_metrics(&self) -> Vec<UeMetrics> {
        let ues = self.ues.read();
        let mut out: Vec<UeMetrics> = ues.values().map(SchedUe::metrics).collect();
        out.sort_by_key(|m| m.rnti);
        out
    }

    pub fn metrics(&self) -> SchedMetrics {
        SchedMetrics::from_ues(&self.all_ue_metrics())
    }
}

impl SchedConfigurator for Scheduler {
    fn cell_cfg(&self, config: SchedConfig) -> Result<(), SchedError> {
        let mut cells = self.cells.write();
        let nof_ues = self.ues.read().len();
        if nof_ues > 0 {
            return Err(SchedError::CellsInUse(nof_ues));
        }
        let set = CellSet::new(config)?;
        tracing::info!(
            nof_carriers = set.params.len(),
            nof_prb = set.config.cells[0].nof_prb,
            policy = set.policy.name(),
            "cells configured"
        );
        *cells = Some(Arc::new(set));
        Ok(())
    }

    fn ue_cfg(&self, rnti: Rnti, config: UeConfig) -> Result<(), SchedError> {
        let cells = self.cells()?;
        {
            let ues = self.ues.read();
            if let Some(ue) = ues.get(&rnti) {
                ue.set_cfg(config, &cells.params)?;
                tracing::debug!(%rnti, "terminal reconfigured");
                return Ok(());
            }
        }

        // built outside the map lock; a concurrent add for the same RNTI
        // keeps the first one in
        let ue = SchedUe::new(rnti, config, &cells.params, cells.pools.clone())?;
        let mut ues = self.ues.write();
        match ues.entry(rnti) {
            std::collections::hash_map::Entry::Occupied(_) => {
                tracing::warn!(%rnti, "terminal added concurrently; keeping existing context");
            }
            std::collections::hash_map::Entry::Vacant(slot) => {
                slot.insert(ue);
                tracing::info!(%rnti, nof_ues = ues.len(), "terminal added");
            }
        }
        Ok(())
    }

    fn ue_rem(&self, rnti: Rnti) -> Result<(), SchedError> {
        let removed = self.ues.write().remove(&rnti);
        let Some(ue) = removed else {
            tracing::warn!(%rnti, "removal of unknown terminal");
            return Err(SchedError::UnknownRnti(rnti));
        };
        if let Ok(cells) = self.cells() {
            cells.policy.forget(rnti);
        }
        drop(ue);
        tracing::info!(%rnti, "terminal removed");
        Ok(())
    }

    fn ue_exists(&self, rnti: Rnti) -> bool {
        self.ues.read().contains_key(&rnti)
    }

    fn bearer_ue_cfg(&self, rnti: Rnti, lcid: u32, config: BearerConfig) -> Result<(), SchedError> {
        self.with_ue(rnti, |ue| ue.bearer_cfg(lcid, config))?
    }

    fn bearer_ue_rem(&self, rnti: Rnti, lcid: u32) -> Result<(), SchedError> {
        self.with_ue(rnti, |ue| ue.bearer_rem(lcid))?
    }
}

impl SchedReportSink for Scheduler {
    fn dl_rlc_buffer_state(&self, rnti: Rnti, lcid: u32, tx_bytes: u32, retx_bytes: u32) -> Result<(), SchedError> {
        self.report(rnti, "dl_rlc_buffer_state", |ue| {
            if ue.dl_buffer_state(lcid, tx_bytes, retx_bytes) {
                Ok(())
            } else {
                Err(SchedError::InvalidLcid(lcid))
            }
        })
    }

    fn dl_mac_buffer_state(&self, rnti: Rnti, ce: MacCe) -> Result<(), SchedError> {
        self.report(rnti, "dl_mac_buffer_state", |ue| {
            ue.dl_mac_ce(ce);
            Ok(())
        })
    }

    fn ul_bsr(&self, rnti: Rnti, lcg: u32, bytes: u32) -> Result<(), SchedError> {
        self.report(rnti, "ul_bsr", |ue| {
            if ue.ul_buffer_state(lcg, bytes) {
                Ok(())
            } else {
                Err(SchedError::InvalidLcid(lcg))
            }
        })
    }

    fn ul_phr(&self, rnti: Rnti, phr: i32) -> Result<(), SchedError> {
        self.report(rnti, "ul_phr", |ue| {
            ue.ul_phr(phr);
            Ok(())
        })
    }

    fn ul_sr_info(&self, tti_rx: TtiPoint, rnti: Rnti) -> Result<(), SchedError> {
        self.report(rnti, "ul_sr_info", |ue| {
            tracing::trace!(%rnti, tti = %tti_rx, "scheduling request");
            ue.set_sr();
            Ok(())
        })
    }

    fn dl_cqi_info(&self, tti_rx: TtiPoint, rnti: Rnti, enb_cc_idx: u32, cqi: u32) -> Result<(), SchedError> {
        self.report(rnti, "dl_cqi_info", |ue| ue.dl_cqi(tti_rx, enb_cc_idx, cqi))
    }

    fn dl_ri_info(&self, tti_rx: TtiPoint, rnti: Rnti, enb_cc_idx: u32, ri: u32) -> Result<(), SchedError> {
        self.report(rnti, "dl_ri_info", |ue| ue.dl_ri(tti_rx, enb_cc_idx, ri))
    }

    fn dl_pmi_info(&self, tti_rx: TtiPoint, rnti: Rnti, enb_cc_idx: u32, pmi: u32) -> Result<(), SchedError> {
        self.report(rnti, "dl_pmi_info", |ue| ue.dl_pmi(tti_rx, enb_cc_idx, pmi))
    }

    fn ul_snr_info(&self, tti_rx: TtiPoint, rnti: Rnti, enb_cc_idx: u32, snr_db: f32) -> Result<(), SchedError> {
        self.report(rnti, "ul_snr_info", |ue| ue.ul_snr(tti_rx, enb_cc_idx, snr_db))
    }

    fn dl_ack_info(
        &self,
        tti_rx: TtiPoint,
        rnti: Rnti,
        enb_cc_idx: u32,
        tb: u32,
        ack: bool,
    ) -> Result<AckOutcome, SchedError> {
        self.report(rnti, "dl_ack_info", |ue| ue.dl_ack(tti_rx, enb_cc_idx, tb, ack))
    }

    fn ul_crc_info(&self, tti_rx: TtiPoint, rnti: Rnti, enb_cc_idx: u32, crc: bool) -> Result<AckOutcome, SchedError> {
        self.report(rnti, "ul_crc_info", |ue| ue.ul_crc(tti_rx, enb_cc_idx, crc))
    }
}

impl GrantSource for Scheduler {
    fn dl_sched(&self, tti_rx: TtiPoint, enb_cc_idx: u32) -> Result<Vec<DlGrant>, SchedError> {
        Ok(self.sf_result(tti_rx, enb_cc_idx)?.dl.clone())
    }

    fn ul_sched(&self, tti_rx: TtiPoint, enb_cc_idx: u32) -> Result<Vec<UlGrant>, SchedError> {
        Ok(self.sf_result(tti_rx, enb_cc_idx)?.ul.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocols::BearerDirection;
    use crate::testing::TestSetupBuilder;

    #[test]
    fn test_not_configured() {
        let sched = Scheduler::new();
        assert!(matches!(
            sched.ue_cfg(Rnti(0x46), UeConfig::default()),
            Err(SchedError::NotConfigured)
        ));
        assert!(matches!(sched.dl_sched(TtiPoint::new(0), 0), Err(SchedError::NotConfigured)));
    }

    #[test]
    fn test_cell_cfg_refused_with_ues() {
        let sched = TestSetupBuilder::default().build().unwrap().build_scheduler();
        sched.ue_cfg(Rnti(0x46), UeConfig::default()).unwrap();
        assert!(matches!(
            sched.cell_cfg(SchedConfig::default()),
            Err(SchedError::CellsInUse(1))
        ));
        sched.ue_rem(Rnti(0x46)).unwrap();
        assert!(sched.cell_cfg(SchedConfig::default()).is_ok());
    }

    #[test]
    fn test_invalid_cell_config_keeps_previous() {
        let sched = TestSetupBuilder::default().nof_prb(50).build().unwrap().build_scheduler();
        let mut bad = SchedConfig::default();
        bad.cells[0].nof_prb = 42;
        assert!(matches!(sched.cell_cfg(bad), Err(SchedError::InvalidConfig(_))));
        assert_eq!(sched.cells().unwrap().config().cells[0].nof_prb, 50);
    }

    #[test]
    fn test_unknown_rnti_reports() {
        let sched = TestSetupBuilder::default().build().unwrap().build_scheduler();
        let rnti = Rnti(0x99);
        assert!(matches!(
            sched.dl_rlc_buffer_state(rnti, 3, 100, 0),
            Err(SchedError::UnknownRnti(_))
        ));
        assert!(matches!(sched.ue_rem(rnti), Err(SchedError::UnknownRnti(_))));
        assert!(matches!(
            sched.ul_crc_info(TtiPoint::new(0), rnti, 0, true),
            Err(SchedError::UnknownRnti(_))
        ));
    }

    #[test]
    fn test_bearer_lifecycle() {
        let sched = TestSetupBuilder::default().build().unwrap().build_scheduler();
        let rnti = Rnti(0x46);
        sched.ue_cfg(rnti, UeConfig::default()).unwrap();
        assert!(sched.dl_rlc_buffer_state(rnti, 4, 10, 0).is_err());

        let drb = BearerConfig {
            direction: BearerDirection::Dl,
            priority: 3,
            lcg: 2,
        };
        sched.bearer_ue_cfg(rnti, 4, drb).unwrap();
        sched.dl_rlc_buffer_state(rnti, 4, 10, 0).unwrap();
        assert_eq!(sched.dl_pending_bytes(rnti).unwrap(), 13);

        sched.bearer_ue_rem(rnti, 4).unwrap();
        assert_eq!(sched.dl_pending_bytes(rnti).unwrap(), 0);
        assert!(matches!(
            sched.bearer_ue_cfg(rnti, 1, drb),
            Err(SchedError::UnsupportedBearerDirection(1))
        ));
    }

    #[test]
    fn test_dl_and_ul_pulls_share_one_pass() {
        let setup = TestSetupBuilder::default().build().unwrap();
        let sched = setup.build_scheduler();
        let rnti = Rnti(0x46);
        setup.add_ue(&sched, rnti);
        let tti = TtiPoint::new(50);
        sched.dl_cqi_info(tti, rnti, 0, 12).unwrap();
        sched.dl_rlc_buffer_state(rnti, 3, 200, 0).unwrap();
        sched.ul_bsr(rnti, 1, 200).unwrap();

        let ul = sched.ul_sched(tti, 0).unwrap();
        let dl = sched.dl_sched(tti, 0).unwrap();
        assert_eq!(ul.len(), 1);
        assert_eq!(dl.len(), 1);
        // the DCIs come from one control region
        let dl_dci = dl[0].dci;
        let ul_dci = ul[0].dci.unwrap();
        assert!(!dl_dci.overlaps(&ul_dci));
        // a second pull returns the cached grants instead of scheduling again
        assert_eq!(sched.dl_sched(tti, 0).unwrap(), dl);
    }

    #[test]
    fn test_out_of_order_tti_is_fatal() {
        let sched = TestSetupBuilder::default().build().unwrap().build_scheduler();
        sched.dl_sched(TtiPoint::new(10), 0).unwrap();
        let err = sched.dl_sched(TtiPoint::new(9), 0).unwrap_err();
        assert!(err.is_fatal());
        assert!(matches!(sched.dl_sched(TtiPoint::new(0), 3), Err(SchedError::InvalidCarrier(3))));
    }
}
