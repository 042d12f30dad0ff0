// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Real-time budget and channel-quality aging.

use serde::{Deserialize, Serialize};
use validator::Validate;

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct TimingConfig {
    /// Wall-clock budget for one subframe scheduling pass, in microseconds.
    /// None disables the deadline check.
    #[validate(range(min = 50))]
    pub tti_deadline_us: Option<u64>,

    /// Channel-quality reports older than this many TTIs are stale. Ages are
    /// measured on the wrapping TTI clock, so the bound stays below half of it.
    #[validate(range(min = 1, max = 5119))]
    pub cqi_staleness_ttis: u32,

    /// MCS used while no fresh channel-quality report is available.
    #[validate(range(max = 28))]
    pub fallback_mcs: u32,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            tti_deadline_us: Some(1000),
            cqi_staleness_ttis: 160,
            fallback_mcs: 0,
        }
    }
}
