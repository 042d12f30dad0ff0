// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Test fixtures shared by unit and integration tests.

use derive_builder::Builder;

use enb_sched_config::{CellConfig, HarqConfig, PolicyConfig, PolicyKind, SchedConfig, TimingConfig};

use crate::interfaces::{SchedConfigurator, SchedReportSink};
use crate::protocols::{BearerConfig, BearerDirection, Rnti, UeCarrierConfig, UeConfig};
use crate::sched::Scheduler;

/// Data bearer used by [`TestSetup::add_ue`].
pub const TEST_DRB_LCID: u32 = 3;

#[derive(Debug, Clone, Builder)]
#[builder(pattern = "owned")]
pub struct TestSetup {
    #[builder(default = "25")]
    pub nof_prb: u32,

    #[builder(default = "1")]
    pub nof_carriers: usize,

    #[builder(default = "3")]
    pub cfi: u32,

    /// Control-region override in CCEs.
    #[builder(default, setter(strip_option))]
    pub nof_cce: Option<u32>,

    #[builder(default = "8")]
    pub round_trip_delay: u32,

    #[builder(default = "4")]
    pub max_retx: u32,

    #[builder(default)]
    pub policy: PolicyKind,

    #[builder(default, setter(strip_option))]
    pub tti_deadline_us: Option<u64>,

    #[builder(default = "160")]
    pub cqi_staleness_ttis: u32,
}

impl TestSetup {
    pub fn builder() -> TestSetupBuilder {
        TestSetupBuilder::default()
    }

    pub fn build_config(&self) -> SchedConfig {
        let cell = CellConfig {
            nof_prb: self.nof_prb,
            cfi: self.cfi,
            nof_cce: self.nof_cce,
            ..Default::default()
        };
        SchedConfig {
            cells: vec![cell; self.nof_carriers],
            harq: HarqConfig {
                round_trip_delay: self.round_trip_delay,
                max_retx: self.max_retx,
            },
            policy: PolicyConfig {
                kind: self.policy,
                ..Default::default()
            },
            timing: TimingConfig {
                tti_deadline_us: self.tti_deadline_us,
                cqi_staleness_ttis: self.cqi_staleness_ttis,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    pub fn build_scheduler(&self) -> Scheduler {
        Scheduler::with_config(self.build_config()).expect("test cell configuration is valid")
    }

    pub fn drb() -> BearerConfig {
        BearerConfig {
            direction: BearerDirection::Both,
            priority: 5,
            lcg: 1,
        }
    }

    /// UE config with the data bearer and every configured carrier, SCells
    /// active.
    pub fn ue_config(&self) -> UeConfig {
        let mut cfg = UeConfig::default();
        cfg.bearers.insert(TEST_DRB_LCID, Self::drb());
        cfg.carriers = (0..self.nof_carriers as u32)
            .map(|enb_cc_idx| UeCarrierConfig {
                enb_cc_idx,
                active: true,
            })
            .collect();
        cfg
    }

    pub fn add_ue(&self, sched: &Scheduler, rnti: Rnti) {
        sched
            .ue_cfg(rnti, self.ue_config())
            .expect("test UE configuration is valid");
    }

    /// Adds a UE with `dl_bytes` queued on the data bearer.
    pub fn add_ue_with_dl(&self, sched: &Scheduler, rnti: Rnti, dl_bytes: u32) {
        self.add_ue(sched, rnti);
        sched
            .dl_rlc_buffer_state(rnti, TEST_DRB_LCID, dl_bytes, 0)
            .expect("data bearer is configured");
    }
}
