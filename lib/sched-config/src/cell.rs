// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Per-carrier (cell) configuration.

use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

/// Channel bandwidths supported by the scheduler, in PRBs.
pub const VALID_NOF_PRB: [u32; 6] = [6, 15, 25, 50, 75, 100];

/// Static parameters of one eNB carrier.
///
/// The control-region size is derived from `nof_prb` and `cfi` unless
/// `nof_cce` pins it explicitly.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
#[validate(schema(function = "validate_cell"))]
pub struct CellConfig {
    /// Carrier bandwidth in physical resource blocks.
    #[validate(custom(function = "validate_nof_prb"))]
    pub nof_prb: u32,

    /// Number of OFDM symbols used by the control region.
    #[validate(range(min = 1, max = 3))]
    pub cfi: u32,

    /// Explicit number of control-channel elements per subframe.
    /// None = derived from `nof_prb` and `cfi`.
    #[validate(range(min = 1, max = 88))]
    pub nof_cce: Option<u32>,

    /// PRBs reserved for PUCCH at each edge of the uplink band.
    pub nrb_pucch: u32,

    #[validate(range(max = 28))]
    pub max_mcs_dl: u32,

    #[validate(range(max = 28))]
    pub max_mcs_ul: u32,

    /// PUCCH collision-avoidance shift; bounds the users per PUCCH slot.
    #[validate(range(min = 1, max = 3))]
    pub delta_pucch_shift: u32,

    pub extended_cp: bool,

    /// Cyclic shifts reserved for mixed PUCCH formats.
    pub ncs_an: u32,
}

impl Default for CellConfig {
    fn default() -> Self {
        Self {
            nof_prb: 25,
            cfi: 3,
            nof_cce: None,
            nrb_pucch: 2,
            max_mcs_dl: 28,
            max_mcs_ul: 28,
            delta_pucch_shift: 1,
            extended_cp: false,
            ncs_an: 0,
        }
    }
}

impl CellConfig {
    /// Maximum number of terminals sharing one PUCCH time-frequency slot.
    pub fn pucch_max_users(&self) -> u32 {
        let c = if self.extended_cp { 2 } else { 3 };
        12 * c / self.delta_pucch_shift.max(1)
    }
}

fn validate_nof_prb(nof_prb: u32) -> Result<(), ValidationError> {
    if VALID_NOF_PRB.contains(&nof_prb) {
        Ok(())
    } else {
        Err(ValidationError::new("invalid_nof_prb"))
    }
}

fn validate_cell(cell: &CellConfig) -> Result<(), ValidationError> {
    if 2 * cell.nrb_pucch >= cell.nof_prb {
        return Err(ValidationError::new("nrb_pucch_exceeds_bandwidth"));
    }
    Ok(())
}
