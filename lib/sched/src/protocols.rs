// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Types exchanged with the MAC coordination layer: terminal and bearer
//! configuration in, grant descriptors out.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::mask::{PrbInterval, RbgMask};
use crate::tti::TtiPoint;

/// Logical channels per terminal.
pub const MAX_NOF_LCIDS: u32 = 11;
/// Logical channel groups per terminal, the granularity of UL buffer reports.
pub const MAX_NOF_LCGS: u32 = 4;
/// Highest PDCCH aggregation level index (level 8).
pub const MAX_AGGR_LEVEL: u32 = 3;

/// Terminal scheduling identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Rnti(pub u16);

impl fmt::Display for Rnti {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Dl,
    Ul,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BearerDirection {
    #[default]
    Idle,
    Ul,
    Dl,
    Both,
}

impl BearerDirection {
    pub fn has_dl(self) -> bool {
        matches!(self, BearerDirection::Dl | BearerDirection::Both)
    }

    pub fn has_ul(self) -> bool {
        matches!(self, BearerDirection::Ul | BearerDirection::Both)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BearerConfig {
    pub direction: BearerDirection,
    /// Lower value is served first.
    pub priority: u32,
    /// Logical channel group used in UL buffer status reports.
    pub lcg: u32,
}

impl Default for BearerConfig {
    fn default() -> Self {
        Self {
            direction: BearerDirection::Both,
            priority: 1,
            lcg: 0,
        }
    }
}

/// One carrier configured for a terminal. The position in
/// [`UeConfig::carriers`] is the terminal-side carrier index; index 0 is the
/// primary carrier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UeCarrierConfig {
    pub enb_cc_idx: u32,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UeConfig {
    pub carriers: Vec<UeCarrierConfig>,

    /// Bearers keyed by logical channel id.
    pub bearers: BTreeMap<u32, BearerConfig>,

    /// Highest PDCCH aggregation level index the terminal may use.
    pub max_aggr_level: u32,

    /// Scheduling-request period; None = use the cell default.
    pub sr_period: Option<u32>,

    /// Periodic CQI report period; None = use the cell default.
    pub cqi_period: Option<u32>,

    /// Caps the CQI-derived MCS in each direction.
    pub max_mcs_dl: Option<u32>,
    pub max_mcs_ul: Option<u32>,
}

impl Default for UeConfig {
    fn default() -> Self {
        let mut bearers = BTreeMap::new();
        bearers.insert(
            0,
            BearerConfig {
                direction: BearerDirection::Both,
                priority: 0,
                lcg: 0,
            },
        );
        Self {
            carriers: vec![UeCarrierConfig {
                enb_cc_idx: 0,
                active: true,
            }],
            bearers,
            max_aggr_level: MAX_AGGR_LEVEL,
            sr_period: None,
            cqi_period: None,
            max_mcs_dl: None,
            max_mcs_ul: None,
        }
    }
}

impl UeConfig {
    pub fn pcell(&self) -> Option<u32> {
        self.carriers.first().map(|c| c.enb_cc_idx)
    }

    /// Terminal-side index of eNB carrier `enb_cc_idx`.
    pub fn ue_cc_idx(&self, enb_cc_idx: u32) -> Option<usize> {
        self.carriers.iter().position(|c| c.enb_cc_idx == enb_cc_idx)
    }
}

/// PDCCH placement: first CCE and aggregation level index (2^l CCEs).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DciLocation {
    pub ncce: u32,
    pub l: u32,
}

impl DciLocation {
    pub fn nof_cce(&self) -> u32 {
        1 << self.l
    }

    pub fn overlaps(&self, other: &DciLocation) -> bool {
        self.ncce < other.ncce + other.nof_cce() && other.ncce < self.ncce + self.nof_cce()
    }
}

/// MAC control elements multiplexed ahead of RLC data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MacCe {
    TimingAdvance(u8),
    /// Bitmap of activated secondary carriers, bit `i` = terminal carrier `i`.
    ScellActivation(u8),
}

impl MacCe {
    /// Subheader plus payload.
    pub const fn size(&self) -> u32 {
        2
    }
}

/// One element of a DL MAC PDU as decided by the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DlPdu {
    Ce(MacCe),
    Rlc { lcid: u32, nbytes: u32 },
}

/// Transport block part of a grant. Sizes are in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TbGrant {
    pub tbs: u32,
    pub mcs: u32,
    pub ndi: bool,
    /// Redundancy version.
    pub rv: u32,
    pub is_retx: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DlGrant {
    pub rnti: Rnti,
    pub enb_cc_idx: u32,
    pub tti_tx: TtiPoint,
    pub mask: RbgMask,
    pub nof_prb: u32,
    pub dci: DciLocation,
    pub pid: u32,
    /// One entry per enabled transport block.
    pub tbs: Vec<TbGrant>,
    pub tpc_pucch: i8,
    pub pdus: Vec<DlPdu>,
}

impl DlGrant {
    pub fn total_bytes(&self) -> u32 {
        self.tbs.iter().map(|tb| tb.tbs).sum()
    }

    pub fn is_retx(&self) -> bool {
        self.tbs.iter().any(|tb| tb.is_retx)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UlGrant {
    pub rnti: Rnti,
    pub enb_cc_idx: u32,
    /// PUSCH transmission TTI.
    pub tti_tx: TtiPoint,
    pub interval: PrbInterval,
    /// None for a non-adaptive retransmission, which needs no DCI.
    pub dci: Option<DciLocation>,
    pub pid: u32,
    pub tb: TbGrant,
    pub tpc_pusch: i8,
    pub cqi_request: bool,
}
