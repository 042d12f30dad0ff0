// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Read-only per-terminal metrics snapshots.

use derive_getters::Getters;
use serde::{Deserialize, Serialize};

use crate::carrier_ue::CarrierState;
use crate::pucch::PucchResource;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Getters)]
pub struct CarrierMetrics {
    #[getter(copy)]
    pub(crate) enb_cc_idx: u32,
    #[getter(copy)]
    pub(crate) state: CarrierState,
    #[getter(copy)]
    pub(crate) dl_cqi: Option<u32>,
    #[getter(copy)]
    pub(crate) dl_ri: Option<u32>,
    #[getter(copy)]
    pub(crate) ul_cqi: Option<u32>,
    /// Bytes held in unresolved DL HARQ processes.
    #[getter(copy)]
    pub(crate) dl_harq_bytes: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Getters)]
pub struct UeMetrics {
    #[getter(copy)]
    pub(crate) rnti: u16,
    #[getter(copy)]
    pub(crate) dl_pending_bytes: u32,
    #[getter(copy)]
    pub(crate) ul_pending_bytes: u32,
    #[getter(copy)]
    pub(crate) dl_bytes_granted: u64,
    #[getter(copy)]
    pub(crate) ul_bytes_granted: u64,
    #[getter(copy)]
    pub(crate) nof_dl_grants: u64,
    #[getter(copy)]
    pub(crate) nof_ul_grants: u64,
    #[getter(copy)]
    pub(crate) dl_harq_failures: u64,
    #[getter(copy)]
    pub(crate) ul_harq_failures: u64,
    #[getter(copy)]
    pub(crate) phr: Option<i32>,
    #[getter(copy)]
    pub(crate) sr_pending: bool,
    #[getter(copy)]
    pub(crate) sr_resource: Option<PucchResource>,
    #[getter(copy)]
    pub(crate) cqi_resource: Option<PucchResource>,
    pub(crate) carriers: Vec<CarrierMetrics>,
}

/// Totals over every attached terminal.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchedMetrics {
    pub nof_ues: usize,
    pub dl_bytes_granted: u64,
    pub ul_bytes_granted: u64,
    pub dl_harq_failures: u64,
    pub ul_harq_failures: u64,
}

impl SchedMetrics {
    pub fn from_ues<'a>(ues: impl IntoIterator<Item = &'a UeMetrics>) -> Self {
        ues.into_iter().fold(Self::default(), |mut acc, ue| {
            acc.nof_ues += 1;
            acc.dl_bytes_granted += ue.dl_bytes_granted;
            acc.ul_bytes_granted += ue.ul_bytes_granted;
            acc.dl_harq_failures += ue.dl_harq_failures;
            acc.ul_harq_failures += ue.ul_harq_failures;
            acc
        })
    }
}
