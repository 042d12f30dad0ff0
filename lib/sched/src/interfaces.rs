// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Capability interfaces between the MAC coordinator and the scheduler.
//!
//! The coordinator configures through [`SchedConfigurator`], pushes
//! per-TTI reports through [`SchedReportSink`] from any worker thread, and
//! pulls grant lists through [`GrantSource`] once per TTI and carrier.

use enb_sched_config::SchedConfig;

use crate::error::SchedError;
use crate::harq::AckOutcome;
use crate::protocols::{BearerConfig, DlGrant, MacCe, Rnti, UeConfig, UlGrant};
use crate::tti::TtiPoint;

/// Cell and terminal lifecycle.
pub trait SchedConfigurator: Send + Sync {
    /// Replaces the cell set. Refused while terminals are attached.
    fn cell_cfg(&self, config: SchedConfig) -> Result<(), SchedError>;

    /// Adds a terminal, or reconfigures it if the RNTI is known.
    fn ue_cfg(&self, rnti: Rnti, config: UeConfig) -> Result<(), SchedError>;

    fn ue_rem(&self, rnti: Rnti) -> Result<(), SchedError>;

    fn ue_exists(&self, rnti: Rnti) -> bool;

    fn bearer_ue_cfg(&self, rnti: Rnti, lcid: u32, config: BearerConfig) -> Result<(), SchedError>;

    fn bearer_ue_rem(&self, rnti: Rnti, lcid: u32) -> Result<(), SchedError>;
}

/// Asynchronous reports. Every call returns immediately; errors are
/// protocol violations the caller may log and drop.
pub trait SchedReportSink: Send + Sync {
    fn dl_rlc_buffer_state(&self, rnti: Rnti, lcid: u32, tx_bytes: u32, retx_bytes: u32) -> Result<(), SchedError>;

    fn dl_mac_buffer_state(&self, rnti: Rnti, ce: MacCe) -> Result<(), SchedError>;

    fn ul_bsr(&self, rnti: Rnti, lcg: u32, bytes: u32) -> Result<(), SchedError>;

    fn ul_phr(&self, rnti: Rnti, phr: i32) -> Result<(), SchedError>;

    fn ul_sr_info(&self, tti_rx: TtiPoint, rnti: Rnti) -> Result<(), SchedError>;

    fn dl_cqi_info(&self, tti_rx: TtiPoint, rnti: Rnti, enb_cc_idx: u32, cqi: u32) -> Result<(), SchedError>;

    fn dl_ri_info(&self, tti_rx: TtiPoint, rnti: Rnti, enb_cc_idx: u32, ri: u32) -> Result<(), SchedError>;

    fn dl_pmi_info(&self, tti_rx: TtiPoint, rnti: Rnti, enb_cc_idx: u32, pmi: u32) -> Result<(), SchedError>;

    fn ul_snr_info(&self, tti_rx: TtiPoint, rnti: Rnti, enb_cc_idx: u32, snr_db: f32) -> Result<(), SchedError>;

    /// HARQ feedback received at `tti_rx` for transport block `tb`.
    fn dl_ack_info(
        &self,
        tti_rx: TtiPoint,
        rnti: Rnti,
        enb_cc_idx: u32,
        tb: u32,
        ack: bool,
    ) -> Result<AckOutcome, SchedError>;

    /// Decode outcome of the PUSCH received at `tti_rx`.
    fn ul_crc_info(&self, tti_rx: TtiPoint, rnti: Rnti, enb_cc_idx: u32, crc: bool) -> Result<AckOutcome, SchedError>;
}

/// Per-TTI pull of grant lists.
pub trait GrantSource: Send + Sync {
    /// DL grants transmitted at `tti_rx + 4`.
    fn dl_sched(&self, tti_rx: TtiPoint, enb_cc_idx: u32) -> Result<Vec<DlGrant>, SchedError>;

    /// UL grants for PUSCH at `tti_rx + 8`.
    fn ul_sched(&self, tti_rx: TtiPoint, enb_cc_idx: u32) -> Result<Vec<UlGrant>, SchedError>;
}
