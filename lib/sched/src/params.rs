// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Derived per-carrier parameters, computed once at cell configuration.

use enb_sched_config::{CellConfig, SchedConfig};

use crate::mask::{nof_rbgs, rbg_size, PrbInterval};
use crate::pdcch::nof_cce;
use crate::protocols::Direction;
use crate::tables::dci_bits;

#[derive(Debug, Clone)]
pub struct CellParams {
    pub enb_cc_idx: u32,
    pub cfg: CellConfig,
    pub nof_rbg: u32,
    pub rbg_size: u32,
    /// CCEs per CFI value (index `cfi - 1`).
    pub nof_cce_per_cfi: [u32; 3],
    pub dci_bits: u32,
    pub round_trip_delay: u32,
    pub max_retx: u32,
    pub cqi_staleness_ttis: u32,
    pub fallback_mcs: u32,
}

impl CellParams {
    pub fn new(enb_cc_idx: u32, config: &SchedConfig) -> Option<Self> {
        let cfg = config.cells.get(enb_cc_idx as usize)?.clone();
        let nof_cce_per_cfi = [1, 2, 3].map(|cfi| cfg.nof_cce.unwrap_or_else(|| nof_cce(cfg.nof_prb, cfi)));
        Some(Self {
            enb_cc_idx,
            nof_rbg: nof_rbgs(cfg.nof_prb),
            rbg_size: rbg_size(cfg.nof_prb),
            nof_cce_per_cfi,
            dci_bits: dci_bits(cfg.nof_prb),
            round_trip_delay: config.harq.round_trip_delay,
            max_retx: config.harq.max_retx,
            cqi_staleness_ttis: config.timing.cqi_staleness_ttis,
            fallback_mcs: config.timing.fallback_mcs,
            cfg,
        })
    }

    pub fn nof_prb(&self) -> u32 {
        self.cfg.nof_prb
    }

    pub fn cfi(&self) -> u32 {
        self.cfg.cfi
    }

    /// CCEs in the control region at the configured CFI.
    pub fn nof_cce(&self) -> u32 {
        self.nof_cce_per_cfi[(self.cfg.cfi.clamp(1, 3) - 1) as usize]
    }

    /// UL PRBs available to PUSCH once the PUCCH band edges are removed.
    pub fn pusch_region(&self) -> PrbInterval {
        let edge = self.cfg.nrb_pucch.min(self.cfg.nof_prb / 2);
        PrbInterval::new(edge, self.cfg.nof_prb - 2 * edge)
    }

    pub fn max_mcs(&self, dir: Direction) -> u32 {
        match dir {
            Direction::Dl => self.cfg.max_mcs_dl,
            Direction::Ul => self.cfg.max_mcs_ul,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derived_geometry() {
        let params = CellParams::new(0, &SchedConfig::default()).unwrap();
        assert_eq!(params.nof_rbg, 13);
        assert_eq!(params.rbg_size, 2);
        assert_eq!(params.nof_cce(), 20);
        assert_eq!(params.pusch_region(), PrbInterval::new(2, 21));
        assert!(CellParams::new(1, &SchedConfig::default()).is_none());
    }

    #[test]
    fn test_cce_override() {
        let mut config = SchedConfig::default();
        config.cells[0].nof_cce = Some(4);
        let params = CellParams::new(0, &config).unwrap();
        assert_eq!(params.nof_cce(), 4);
    }
}
