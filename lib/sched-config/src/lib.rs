// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! MAC Scheduler Configuration Library
//!
//! Provides centralized configuration for the eNodeB MAC scheduler: carrier
//! (cell) parameters, HARQ timing, PUCCH resource pools, allocation policy
//! and real-time budget.

mod cell;
mod harq;
mod policy;
mod pucch;
mod timing;

pub use cell::{CellConfig, VALID_NOF_PRB};
pub use harq::HarqConfig;
pub use policy::{PolicyConfig, PolicyKind};
pub use pucch::{PucchConfig, VALID_CQI_PERIODS, VALID_SR_PERIODS, is_valid_cqi_period, is_valid_sr_period};
pub use timing::TimingConfig;

use figment::{
    Figment, Metadata, Profile, Provider,
    providers::{Env, Format, Json, Serialized, Toml},
    value::{Dict, Map},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use validator::{Validate, ValidationErrors};

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to extract configuration: {0}")]
    Extraction(#[from] Box<figment::Error>),

    #[error("Configuration validation failed: {0}")]
    Validation(#[from] ValidationErrors),

    #[error("Configuration error: {0}")]
    Other(#[from] anyhow::Error),
}

/// Top-level scheduler configuration.
///
/// One [`CellConfig`] per eNB carrier; the position in `cells` is the eNB
/// carrier index used by every per-carrier report and grant.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SchedConfig {
    #[validate(length(min = 1, max = 8), nested)]
    pub cells: Vec<CellConfig>,

    #[validate(nested)]
    #[serde(default)]
    pub harq: HarqConfig,

    #[validate(nested)]
    #[serde(default)]
    pub pucch: PucchConfig,

    #[validate(nested)]
    #[serde(default)]
    pub policy: PolicyConfig,

    #[validate(nested)]
    #[serde(default)]
    pub timing: TimingConfig,
}

impl Default for SchedConfig {
    fn default() -> Self {
        Self {
            cells: vec![CellConfig::default()],
            harq: HarqConfig::default(),
            pucch: PucchConfig::default(),
            policy: PolicyConfig::default(),
            timing: TimingConfig::default(),
        }
    }
}

impl SchedConfig {
    /// Create a Figment configuration with all sources merged.
    ///
    /// Configuration sources in priority order (lowest to highest):
    /// 1. Code defaults
    /// 2. System config file at /etc/enb-sched/sched.toml
    /// 3. TOML file from ENB_SCHED_CONFIG_PATH environment variable
    /// 4. Environment variables (ENB_SCHED_* prefixed)
    pub fn figment() -> Figment {
        let config_path = std::env::var("ENB_SCHED_CONFIG_PATH").unwrap_or_default();

        Figment::new()
            .merge(Serialized::defaults(SchedConfig::default()))
            .merge(Toml::file("/etc/enb-sched/sched.toml"))
            .merge(Toml::file(&config_path))
            // HARQ config: ENB_SCHED_HARQ_ROUND_TRIP_DELAY, ENB_SCHED_HARQ_MAX_RETX
            .merge(
                Env::prefixed("ENB_SCHED_HARQ_")
                    .map(|k| format!("harq.{}", k.as_str().to_lowercase()).into()),
            )
            // Policy config: ENB_SCHED_POLICY_KIND, ENB_SCHED_POLICY_PF_EWMA_COEFF
            .merge(
                Env::prefixed("ENB_SCHED_POLICY_")
                    .map(|k| format!("policy.{}", k.as_str().to_lowercase()).into()),
            )
            // Timing config: ENB_SCHED_TIMING_TTI_DEADLINE_US, etc.
            .merge(
                Env::prefixed("ENB_SCHED_TIMING_")
                    .map(|k| format!("timing.{}", k.as_str().to_lowercase()).into()),
            )
            // PUCCH pools: ENB_SCHED_PUCCH_SR_PERIOD, ENB_SCHED_PUCCH_CQI_PERIOD, etc.
            .merge(
                Env::prefixed("ENB_SCHED_PUCCH_")
                    .map(|k| format!("pucch.{}", k.as_str().to_lowercase()).into()),
            )
    }

    /// Load configuration from default figment (env and files).
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::extract_from(Self::figment())
    }

    /// Extract configuration from any provider.
    ///
    /// # Example
    /// ```rust,ignore
    /// let config = SchedConfig::extract_from(
    ///     SchedConfig::figment()
    ///         .merge(("harq.max_retx", 2u32))
    ///         .merge(("policy.kind", "proportional_fair"))
    /// )?;
    /// ```
    pub fn extract_from<T: Provider>(provider: T) -> Result<Self, ConfigError> {
        let config: Self = Figment::from(provider)
            .extract()
            .map_err(|e| ConfigError::Extraction(Box::new(e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Build a figment from defaults, then merge a custom provider.
    pub fn figment_with<T: Provider>(extra: T) -> Figment {
        Self::figment().merge(extra)
    }

    /// Load configuration merging JSON overrides.
    ///
    /// JSON has highest priority - overrides env vars, TOML files, and defaults.
    pub fn from_figment_with_json(json: &str) -> Result<Self, ConfigError> {
        Self::extract_from(Self::figment().merge(Json::string(json)))
    }

    /// Runs validation on a configuration built in code.
    pub fn check(&self) -> Result<(), ConfigError> {
        Ok(self.validate()?)
    }

    /// Number of configured eNB carriers.
    pub fn nof_carriers(&self) -> usize {
        self.cells.len()
    }
}

impl Provider for SchedConfig {
    fn metadata(&self) -> Metadata {
        Metadata::named("SchedConfig")
    }

    fn data(&self) -> Result<Map<Profile, Dict>, figment::Error> {
        Serialized::defaults(self).data()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ENV_VARS: [&str; 5] = [
        "ENB_SCHED_CONFIG_PATH",
        "ENB_SCHED_HARQ_MAX_RETX",
        "ENB_SCHED_HARQ_ROUND_TRIP_DELAY",
        "ENB_SCHED_POLICY_KIND",
        "ENB_SCHED_TIMING_TTI_DEADLINE_US",
    ];

    #[test]
    fn test_default_config() {
        let config = SchedConfig::default();
        assert_eq!(config.cells.len(), 1);
        assert_eq!(config.harq.round_trip_delay, 8);
        assert_eq!(config.policy.kind, PolicyKind::RoundRobin);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_figment_defaults() {
        temp_env::with_vars_unset(ENV_VARS, || {
            let config: SchedConfig = SchedConfig::figment().extract().unwrap();
            assert_eq!(config.harq.max_retx, 4);
            assert_eq!(config.cells[0].nof_prb, 25);
        });
    }

    #[test]
    fn test_env_override_harq() {
        temp_env::with_vars(
            vec![
                ("ENB_SCHED_HARQ_MAX_RETX", Some("2")),
                ("ENB_SCHED_HARQ_ROUND_TRIP_DELAY", Some("10")),
            ],
            || {
                let config = SchedConfig::from_env().unwrap();
                assert_eq!(config.harq.max_retx, 2);
                assert_eq!(config.harq.round_trip_delay, 10);
            },
        );
    }

    #[test]
    fn test_env_override_policy() {
        temp_env::with_vars(
            vec![("ENB_SCHED_POLICY_KIND", Some("proportional_fair"))],
            || {
                let config = SchedConfig::from_env().unwrap();
                assert_eq!(config.policy.kind, PolicyKind::ProportionalFair);
            },
        );
    }

    #[test]
    fn test_extract_from_with_tuple_override() {
        temp_env::with_vars_unset(ENV_VARS, || {
            let figment = SchedConfig::figment()
                .merge(("harq.max_retx", 1u32))
                .merge(("timing.cqi_staleness_ttis", 20u32));

            let config = SchedConfig::extract_from(figment).unwrap();
            assert_eq!(config.harq.max_retx, 1);
            assert_eq!(config.timing.cqi_staleness_ttis, 20);
        });
    }

    #[test]
    fn test_from_figment_with_json_cells() {
        temp_env::with_vars_unset(ENV_VARS, || {
            let json = r#"{"cells": [{"nof_prb": 50, "cfi": 2}, {"nof_prb": 25}]}"#;
            let config = SchedConfig::from_figment_with_json(json).unwrap();

            assert_eq!(config.nof_carriers(), 2);
            assert_eq!(config.cells[0].nof_prb, 50);
            assert_eq!(config.cells[0].cfi, 2);
            // fields absent from JSON fall back to the serde defaults
            assert_eq!(config.cells[1].cfi, 3);
        });
    }

    #[test]
    fn test_invalid_round_trip_rejected() {
        temp_env::with_vars_unset(ENV_VARS, || {
            let figment = SchedConfig::figment_with(("harq.round_trip_delay", 4u32));
            let err = SchedConfig::extract_from(figment).unwrap_err();
            assert!(matches!(err, ConfigError::Validation(_)));
        });
    }

    #[test]
    fn test_invalid_nof_prb_rejected() {
        temp_env::with_vars_unset(ENV_VARS, || {
            let json = r#"{"cells": [{"nof_prb": 42}]}"#;
            let err = SchedConfig::from_figment_with_json(json).unwrap_err();
            assert!(matches!(err, ConfigError::Validation(_)));
        });
    }

    #[test]
    fn test_empty_cell_list_rejected() {
        temp_env::with_vars_unset(ENV_VARS, || {
            let err = SchedConfig::from_figment_with_json(r#"{"cells": []}"#).unwrap_err();
            assert!(matches!(err, ConfigError::Validation(_)));
        });
    }

    #[test]
    fn test_config_as_provider() {
        let original = SchedConfig {
            harq: HarqConfig {
                round_trip_delay: 12,
                max_retx: 3,
            },
            ..Default::default()
        };

        let figment = Figment::from(&original);
        let extracted: SchedConfig = figment.extract().unwrap();

        assert_eq!(extracted.harq.round_trip_delay, 12);
        assert_eq!(extracted.harq.max_retx, 3);
    }

    #[test]
    fn test_toml_file_source() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "sched.toml",
                r#"
                [harq]
                max_retx = 6

                [policy]
                kind = "proportional_fair"
                pf_ewma_coeff = 0.25

                [[cells]]
                nof_prb = 100
                "#,
            )?;

            let figment =
                Figment::from(Serialized::defaults(SchedConfig::default())).merge(Toml::file("sched.toml"));
            let config = SchedConfig::extract_from(figment).map_err(|e| e.to_string())?;
            assert_eq!(config.harq.max_retx, 6);
            assert_eq!(config.policy.kind, PolicyKind::ProportionalFair);
            assert_eq!(config.cells[0].nof_prb, 100);
            Ok(())
        });
    }
}
