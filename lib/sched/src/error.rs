// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

use thiserror::Error;

use crate::protocols::Rnti;
use crate::tti::TtiPoint;

/// HARQ bookkeeping errors. Always caller or protocol mistakes; state is
/// left untouched when one is returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum HarqError {
    #[error("HARQ process id {pid} out of range (0..{nof_procs})")]
    InvalidPid { pid: u32, nof_procs: u32 },

    #[error("transport block index {tb} out of range (0..{nof_tbs})")]
    InvalidTb { tb: u32, nof_tbs: u32 },

    #[error("HARQ process {pid} TB {tb} is not awaiting feedback")]
    NotActive { pid: u32, tb: u32 },
}

/// Reasons a grant could not be generated for a selected terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum GrantError {
    #[error("carrier {0} is not active for this terminal")]
    CarrierInactive(u32),

    #[error("computed transport block size is zero")]
    ZeroTbs,

    #[error("no HARQ process available")]
    NoHarq,

    #[error("retransmission needs {expected} resource units, got {got}")]
    SizeMismatch { expected: u32, got: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PucchError {
    #[error("invalid PUCCH reporting period {0}")]
    InvalidPeriod(u32),

    #[error("PUCCH pool exhausted")]
    Exhausted,
}

/// Top-level scheduler errors.
///
/// Configuration errors leave the previous state unchanged. Protocol
/// violations are logged and discarded by callers. Fatal errors mean the
/// retransmission state may no longer be trusted.
#[derive(Debug, Error)]
pub enum SchedError {
    #[error("invalid eNB carrier index {0}")]
    InvalidCarrier(u32),

    #[error("invalid reporting period {0}")]
    InvalidPeriod(u32),

    #[error("unsupported bearer direction for lcid {0}")]
    UnsupportedBearerDirection(u32),

    #[error("invalid logical channel id {0}")]
    InvalidLcid(u32),

    #[error("cell configuration cannot change while {0} terminals are attached")]
    CellsInUse(usize),

    #[error("cells are not configured")]
    NotConfigured,

    #[error("invalid cell configuration: {0}")]
    InvalidConfig(#[from] enb_sched_config::ConfigError),

    #[error("unknown rnti {0}")]
    UnknownRnti(Rnti),

    #[error(transparent)]
    Harq(#[from] HarqError),

    #[error("TTI {tti} deadline missed: pass took {elapsed_us}us, budget {budget_us}us")]
    DeadlineMissed {
        tti: TtiPoint,
        elapsed_us: u64,
        budget_us: u64,
    },

    #[error("TTI {tti} arrived after TTI {last}")]
    TtiOutOfOrder { tti: TtiPoint, last: TtiPoint },

    #[error("corrupted scheduler state: {0}")]
    Corrupted(String),
}

impl SchedError {
    /// True when continuing would risk inconsistent retransmission state.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SchedError::DeadlineMissed { .. }
                | SchedError::TtiOutOfOrder { .. }
                | SchedError::Corrupted(_)
        )
    }

    pub fn is_protocol_violation(&self) -> bool {
        matches!(self, SchedError::UnknownRnti(_) | SchedError::Harq(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        let err = SchedError::TtiOutOfOrder {
            tti: TtiPoint::new(3),
            last: TtiPoint::new(5),
        };
        assert!(err.is_fatal());
        assert!(!SchedError::UnknownRnti(Rnti(70)).is_fatal());
        assert!(SchedError::from(HarqError::NotActive { pid: 0, tb: 0 }).is_protocol_violation());
        assert!(!SchedError::InvalidCarrier(4).is_fatal());
    }
}
