// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Cell-wide PUCCH resource pools for scheduling requests and periodic CQI.
//!
//! A pool is a grid of `nof_prb x nof_subframes` slots. Each slot is shared
//! by at most `max_users` terminals, the bound set by the cyclic-shift
//! spacing. Leases are RAII: dropping a [`PucchLease`] returns its slot.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use enb_sched_config::{is_valid_cqi_period, is_valid_sr_period, CellConfig, PucchConfig};

use crate::error::PucchError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PucchKind {
    Sr,
    Cqi,
}

/// What a terminal needs to know about its leased resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PucchResource {
    pub kind: PucchKind,
    pub prb_idx: u32,
    pub sf_idx: u32,
    /// PUCCH resource index signalled to the terminal.
    pub n_pucch: u32,
    /// `I_sr` for SR, `pmi_idx` for CQI.
    pub config_idx: u32,
    pub period: u32,
}

/// CQI configuration index offset per reporting period.
fn cqi_pmi_base(period: u32) -> Option<u32> {
    match period {
        2 => Some(0),
        5 => Some(2),
        10 => Some(7),
        20 => Some(17),
        40 => Some(37),
        80 => Some(77),
        160 => Some(157),
        32 => Some(318),
        64 => Some(350),
        128 => Some(414),
        _ => None,
    }
}

#[derive(Debug)]
pub struct PucchPool {
    kind: PucchKind,
    nof_prb: u32,
    sf_mapping: Vec<u32>,
    max_users: u32,
    ncs_an: u32,
    default_period: u32,
    occupancy: Mutex<Vec<u32>>,
}

impl PucchPool {
    pub fn new(
        kind: PucchKind,
        nof_prb: u32,
        sf_mapping: Vec<u32>,
        default_period: u32,
        cell: &CellConfig,
    ) -> Self {
        let nof_slots = (nof_prb as usize) * sf_mapping.len();
        Self {
            kind,
            nof_prb,
            sf_mapping,
            max_users: cell.pucch_max_users(),
            ncs_an: cell.ncs_an,
            default_period,
            occupancy: Mutex::new(vec![0; nof_slots]),
        }
    }

    pub fn sr_pool(cfg: &PucchConfig, cell: &CellConfig) -> Self {
        let mapping = cfg.sr_sf_mapping.iter().copied().take(cfg.sr_nof_subframes as usize).collect();
        Self::new(PucchKind::Sr, cfg.sr_nof_prb, mapping, cfg.sr_period, cell)
    }

    pub fn cqi_pool(cfg: &PucchConfig, cell: &CellConfig) -> Self {
        let mapping = cfg.cqi_sf_mapping.iter().copied().take(cfg.cqi_nof_subframes as usize).collect();
        Self::new(PucchKind::Cqi, cfg.cqi_nof_prb, mapping, cfg.cqi_period, cell)
    }

    pub fn kind(&self) -> PucchKind {
        self.kind
    }

    pub fn max_users(&self) -> u32 {
        self.max_users
    }

    pub fn default_period(&self) -> u32 {
        self.default_period
    }

    pub fn nof_slots(&self) -> usize {
        self.sf_mapping.len() * self.nof_prb as usize
    }

    /// Current per-slot occupancy.
    pub fn occupancy(&self) -> Vec<u32> {
        self.occupancy.lock().clone()
    }

    pub fn nof_leased(&self) -> u32 {
        self.occupancy.lock().iter().sum()
    }

    fn config_idx(&self, period: u32, sf: u32) -> Result<u32, PucchError> {
        match self.kind {
            PucchKind::Sr if is_valid_sr_period(period) => Ok(period - 5 + sf),
            PucchKind::Cqi if is_valid_cqi_period(period) => cqi_pmi_base(period)
                .map(|base| base + sf)
                .ok_or(PucchError::InvalidPeriod(period)),
            _ => Err(PucchError::InvalidPeriod(period)),
        }
    }

    /// Leases the least loaded slot for a terminal reporting every
    /// `period` TTIs. Never blocks: a full pool is `Exhausted`.
    pub fn lease(self: &Arc<Self>, period: u32) -> Result<PucchLease, PucchError> {
        // validate before touching occupancy
        self.config_idx(period, 0)?;

        let mut occupancy = self.occupancy.lock();
        let (slot, users) = occupancy
            .iter()
            .copied()
            .enumerate()
            .min_by_key(|&(idx, users)| (users, idx))
            .ok_or(PucchError::Exhausted)?;
        if users >= self.max_users {
            return Err(PucchError::Exhausted);
        }

        let nof_sf = self.sf_mapping.len();
        let prb_idx = (slot / nof_sf) as u32;
        let sf_idx = self.sf_mapping[slot % nof_sf];
        let resource = PucchResource {
            kind: self.kind,
            prb_idx,
            sf_idx,
            n_pucch: prb_idx * self.max_users + users + self.ncs_an,
            config_idx: self.config_idx(period, sf_idx)?,
            period,
        };
        occupancy[slot] += 1;
        drop(occupancy);

        Ok(PucchLease {
            pool: Arc::clone(self),
            slot,
            resource,
        })
    }

    fn release(&self, slot: usize) {
        let mut occupancy = self.occupancy.lock();
        if let Some(users) = occupancy.get_mut(slot) {
            *users = users.saturating_sub(1);
        }
    }
}

/// A leased PUCCH slot; returned to the pool on drop.
#[derive(Debug)]
pub struct PucchLease {
    pool: Arc<PucchPool>,
    slot: usize,
    resource: PucchResource,
}

impl PucchLease {
    pub fn resource(&self) -> &PucchResource {
        &self.resource
    }
}

impl Drop for PucchLease {
    fn drop(&mut self) {
        self.pool.release(self.slot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn cell(delta_pucch_shift: u32) -> CellConfig {
        CellConfig {
            delta_pucch_shift,
            ..Default::default()
        }
    }

    fn sr_pool(nof_prb: u32, delta: u32) -> Arc<PucchPool> {
        Arc::new(PucchPool::new(PucchKind::Sr, nof_prb, vec![0, 1], 20, &cell(delta)))
    }

    #[test]
    fn test_least_loaded_spread() {
        let pool = sr_pool(1, 1);
        let a = pool.lease(20).unwrap();
        let b = pool.lease(20).unwrap();
        let c = pool.lease(20).unwrap();
        assert_eq!(a.resource().sf_idx, 0);
        assert_eq!(b.resource().sf_idx, 1);
        assert_eq!(c.resource().sf_idx, 0);
        assert_eq!(c.resource().n_pucch, 1);
        assert_eq!(pool.occupancy(), vec![2, 1]);
    }

    #[rstest]
    #[case(5, 1, 1)]
    #[case(10, 0, 5)]
    #[case(20, 1, 16)]
    #[case(80, 0, 75)]
    fn test_sr_config_index(#[case] period: u32, #[case] sf: u32, #[case] i_sr: u32) {
        let pool = sr_pool(1, 1);
        assert_eq!(pool.config_idx(period, sf).unwrap(), i_sr);
    }

    #[rstest]
    #[case(2, 1, 1)]
    #[case(40, 0, 37)]
    #[case(32, 1, 319)]
    #[case(128, 0, 414)]
    fn test_cqi_pmi_index(#[case] period: u32, #[case] sf: u32, #[case] pmi: u32) {
        let pool = PucchPool::new(PucchKind::Cqi, 1, vec![0, 1], 40, &cell(1));
        assert_eq!(pool.config_idx(period, sf).unwrap(), pmi);
    }

    #[test]
    fn test_invalid_period_rejected_without_lease() {
        let pool = sr_pool(1, 1);
        assert_eq!(pool.lease(7).unwrap_err(), PucchError::InvalidPeriod(7));
        assert_eq!(pool.nof_leased(), 0);
    }

    #[test]
    fn test_occupancy_never_exceeds_max_users() {
        // delta_pucch_shift 3: 12 terminals per slot
        let pool = sr_pool(2, 3);
        let max_users = pool.max_users();
        assert_eq!(max_users, 12);

        let mut leases = Vec::new();
        loop {
            match pool.lease(20) {
                Ok(lease) => leases.push(lease),
                Err(e) => {
                    assert_eq!(e, PucchError::Exhausted);
                    break;
                }
            }
            assert!(pool.occupancy().iter().all(|&u| u <= max_users));
        }
        assert_eq!(leases.len(), 4 * max_users as usize);

        leases.truncate(10);
        assert_eq!(pool.nof_leased(), 10);
        drop(leases);
        assert_eq!(pool.nof_leased(), 0);
    }

    #[test]
    fn test_n_pucch_offsets() {
        let cell = CellConfig {
            ncs_an: 2,
            ..Default::default()
        };
        let pool = Arc::new(PucchPool::new(PucchKind::Sr, 2, vec![3], 20, &cell));
        let first = pool.lease(20).unwrap();
        let second = pool.lease(20).unwrap();
        assert_eq!(first.resource().n_pucch, 2);
        assert_eq!(second.resource().prb_idx, 1);
        assert_eq!(second.resource().n_pucch, 36 + 2);
        assert_eq!(second.resource().config_idx, 18);
    }
}
