// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Pluggable ordering of new-data candidates.
//!
//! Retransmissions are always served first by the carrier scheduler; a
//! [`SchedPolicy`] only decides the order in which terminals with fresh data
//! compete for what is left.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use enb_sched_config::{PolicyConfig, PolicyKind};

use crate::protocols::{Direction, Rnti};
use crate::tti::TtiPoint;

/// A terminal competing for new-data resources this TTI.
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyCandidate {
    pub rnti: Rnti,
    pub pending_bytes: u32,
    /// Resource units the terminal asks for.
    pub units: u32,
    /// Achievable bytes per resource unit at the current MCS.
    pub bytes_per_unit: f64,
}

/// A trait that users can implement to define custom candidate ordering.
pub trait SchedPolicy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Reorders `candidates` in place, highest priority first.
    fn prioritize(&self, tti: TtiPoint, enb_cc_idx: u32, dir: Direction, candidates: &mut [PolicyCandidate]);

    /// Feedback after allocation: bytes granted to every candidate of the
    /// pass, zero for those left out.
    fn record(&self, _enb_cc_idx: u32, _dir: Direction, _served: &[(Rnti, u32)]) {}

    /// Drops any state held for a released terminal.
    fn forget(&self, _rnti: Rnti) {}
}

/// Rotates the starting terminal every TTI.
#[derive(Debug, Default)]
pub struct RoundRobin;

impl SchedPolicy for RoundRobin {
    fn name(&self) -> &'static str {
        "round_robin"
    }

    fn prioritize(&self, tti: TtiPoint, _enb_cc_idx: u32, _dir: Direction, candidates: &mut [PolicyCandidate]) {
        if candidates.is_empty() {
            return;
        }
        candidates.sort_by_key(|c| c.rnti);
        let start = tti.to_uint() as usize % candidates.len();
        candidates.rotate_left(start);
    }
}

/// Achievable rate over an exponentially averaged served throughput.
#[derive(Debug)]
pub struct ProportionalFair {
    coeff: f64,
    avg: Mutex<HashMap<(Rnti, u32, Direction), f64>>,
}

impl ProportionalFair {
    pub fn new(coeff: f64) -> Self {
        Self {
            coeff: coeff.clamp(f64::EPSILON, 1.0),
            avg: Mutex::new(HashMap::new()),
        }
    }

    pub fn average(&self, rnti: Rnti, enb_cc_idx: u32, dir: Direction) -> f64 {
        self.avg
            .lock()
            .get(&(rnti, enb_cc_idx, dir))
            .copied()
            .unwrap_or(0.0)
    }
}

impl SchedPolicy for ProportionalFair {
    fn name(&self) -> &'static str {
        "proportional_fair"
    }

    fn prioritize(&self, _tti: TtiPoint, enb_cc_idx: u32, dir: Direction, candidates: &mut [PolicyCandidate]) {
        let avg = self.avg.lock();
        let metric = |c: &PolicyCandidate| {
            let served = avg.get(&(c.rnti, enb_cc_idx, dir)).copied().unwrap_or(0.0);
            c.bytes_per_unit / served.max(1.0)
        };
        candidates.sort_by(|a, b| metric(b).total_cmp(&metric(a)).then(a.rnti.cmp(&b.rnti)));
    }

    fn record(&self, enb_cc_idx: u32, dir: Direction, served: &[(Rnti, u32)]) {
        let mut avg = self.avg.lock();
        for &(rnti, bytes) in served {
            let entry = avg.entry((rnti, enb_cc_idx, dir)).or_insert(0.0);
            *entry = (1.0 - self.coeff) * *entry + self.coeff * f64::from(bytes);
        }
    }

    fn forget(&self, rnti: Rnti) {
        self.avg.lock().retain(|(r, _, _), _| *r != rnti);
    }
}

pub fn policy_from_config(config: &PolicyConfig) -> Arc<dyn SchedPolicy> {
    match config.kind {
        PolicyKind::RoundRobin => Arc::new(RoundRobin),
        PolicyKind::ProportionalFair => Arc::new(ProportionalFair::new(config.pf_ewma_coeff)),
    }
}
