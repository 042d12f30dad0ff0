// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! eNB Sched - LTE MAC radio-resource scheduler.
//!
//! Each TTI the scheduler decides which attached terminals receive DL and
//! UL resources on every configured carrier, tracks their HARQ
//! retransmissions, and returns the grants for the MAC to encode.

pub mod carrier;
pub mod carrier_ue;
pub mod error;
pub mod harq;
pub mod interfaces;
pub mod lch;
pub mod logging;
pub mod mask;
pub mod metrics;
pub mod params;
pub mod pdcch;
pub mod policy;
pub mod protocols;
pub mod pucch;
pub mod sched;
pub mod tables;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod tti;
pub mod ue;

pub use enb_sched_config as config;

// Re-export key types for convenience
pub use carrier::{CarrierScheduler, SfResult};
pub use carrier_ue::CarrierState;
pub use error::{GrantError, HarqError, PucchError, SchedError};
pub use harq::AckOutcome;
pub use interfaces::{GrantSource, SchedConfigurator, SchedReportSink};
pub use mask::{PrbInterval, RbgMask};
pub use metrics::{SchedMetrics, UeMetrics};
pub use policy::{ProportionalFair, RoundRobin, SchedPolicy};
pub use protocols::{
    BearerConfig, BearerDirection, DciLocation, Direction, DlGrant, DlPdu, MacCe, Rnti, TbGrant,
    UeCarrierConfig, UeConfig, UlGrant,
};
pub use sched::Scheduler;
pub use tti::TtiPoint;
