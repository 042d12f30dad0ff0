// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Allocation policy selection.

use serde::{Deserialize, Serialize};
use validator::Validate;

/// Which metric orders new-data candidates each TTI.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyKind {
    #[default]
    RoundRobin,
    ProportionalFair,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct PolicyConfig {
    pub kind: PolicyKind,

    /// Weight of the newest sample in the proportional-fair throughput
    /// average.
    #[validate(range(exclusive_min = 0.0, max = 1.0))]
    pub pf_ewma_coeff: f64,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            kind: PolicyKind::RoundRobin,
            pf_ewma_coeff: 0.1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_coeff_rejected() {
        let config = PolicyConfig {
            pf_ewma_coeff: 0.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_kind_serde_names() {
        let kind: PolicyKind = serde_json::from_str(r#""proportional_fair""#).unwrap();
        assert_eq!(kind, PolicyKind::ProportionalFair);
        assert_eq!(
            serde_json::to_string(&PolicyKind::RoundRobin).unwrap(),
            r#""round_robin""#
        );
    }
}
