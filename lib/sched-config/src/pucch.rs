// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! PUCCH resource pools for scheduling requests and periodic CQI.
//!
//! Each pool spans `nof_prb` PUCCH resource blocks and the subframes listed
//! in `sf_mapping`. Terminals are spread across the resulting slots; the
//! period is the default reporting periodicity handed to new terminals.

use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

/// Scheduling-request periodicities, in TTIs.
pub const VALID_SR_PERIODS: [u32; 5] = [5, 10, 20, 40, 80];

/// Periodic CQI report periodicities, in TTIs.
pub const VALID_CQI_PERIODS: [u32; 10] = [2, 5, 10, 20, 32, 40, 64, 80, 128, 160];

pub fn is_valid_sr_period(period: u32) -> bool {
    VALID_SR_PERIODS.contains(&period)
}

pub fn is_valid_cqi_period(period: u32) -> bool {
    VALID_CQI_PERIODS.contains(&period)
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
#[validate(schema(function = "validate_pucch"))]
pub struct PucchConfig {
    #[validate(range(min = 1, max = 4))]
    pub sr_nof_prb: u32,

    #[validate(range(min = 1, max = 10))]
    pub sr_nof_subframes: u32,

    /// Subframe offsets (within the period) used by the SR pool.
    pub sr_sf_mapping: Vec<u32>,

    #[validate(custom(function = "validate_sr_period"))]
    pub sr_period: u32,

    #[validate(range(min = 1, max = 4))]
    pub cqi_nof_prb: u32,

    #[validate(range(min = 1, max = 10))]
    pub cqi_nof_subframes: u32,

    pub cqi_sf_mapping: Vec<u32>,

    #[validate(custom(function = "validate_cqi_period"))]
    pub cqi_period: u32,
}

impl Default for PucchConfig {
    fn default() -> Self {
        Self {
            sr_nof_prb: 1,
            sr_nof_subframes: 2,
            sr_sf_mapping: vec![0, 1],
            sr_period: 20,
            cqi_nof_prb: 1,
            cqi_nof_subframes: 2,
            cqi_sf_mapping: vec![0, 1],
            cqi_period: 40,
        }
    }
}

fn validate_sr_period(period: u32) -> Result<(), ValidationError> {
    if is_valid_sr_period(period) {
        Ok(())
    } else {
        Err(ValidationError::new("invalid_sr_period"))
    }
}

fn validate_cqi_period(period: u32) -> Result<(), ValidationError> {
    if is_valid_cqi_period(period) {
        Ok(())
    } else {
        Err(ValidationError::new("invalid_cqi_period"))
    }
}

fn validate_pucch(config: &PucchConfig) -> Result<(), ValidationError> {
    if config.sr_sf_mapping.len() < config.sr_nof_subframes as usize {
        return Err(ValidationError::new("sr_sf_mapping_too_short"));
    }
    if config.cqi_sf_mapping.len() < config.cqi_nof_subframes as usize {
        return Err(ValidationError::new("cqi_sf_mapping_too_short"));
    }
    // offsets must fall inside the shortest period they are used with
    let sr_limit = VALID_SR_PERIODS[0];
    if config.sr_sf_mapping.iter().any(|&sf| sf >= sr_limit) {
        return Err(ValidationError::new("sr_sf_mapping_out_of_range"));
    }
    let cqi_limit = config.cqi_period;
    if config.cqi_sf_mapping.iter().any(|&sf| sf >= cqi_limit) {
        return Err(ValidationError::new("cqi_sf_mapping_out_of_range"));
    }
    Ok(())
}
