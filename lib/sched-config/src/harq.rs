// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! HARQ timing configuration.

use serde::{Deserialize, Serialize};
use validator::Validate;

/// Stop-and-wait HARQ parameters shared by every carrier.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct HarqConfig {
    /// Round-trip delay in TTIs; also the number of HARQ processes per
    /// direction. Must cover the transmit-to-feedback and
    /// feedback-to-retransmission delays (4 TTIs each in FDD).
    #[validate(range(min = 8, max = 16))]
    pub round_trip_delay: u32,

    /// Retransmissions allowed before a transport block is dropped.
    #[validate(range(min = 1, max = 28))]
    pub max_retx: u32,
}

impl Default for HarqConfig {
    fn default() -> Self {
        Self {
            round_trip_delay: 8,
            max_retx: 4,
        }
    }
}
