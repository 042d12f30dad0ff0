// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Per-terminal logical channel buffer accounting.

use std::collections::VecDeque;

use crate::error::SchedError;
use crate::protocols::{
    BearerConfig, BearerDirection, Direction, DlPdu, MacCe, MAX_NOF_LCGS, MAX_NOF_LCIDS,
};

/// RLC PDU subheader overhead in a MAC PDU.
pub const RLC_SUBHEADER_BYTES: u32 = 3;

/// Signalling bearers must carry traffic both ways.
const MAX_SRB_LCID: u32 = 2;

#[derive(Debug, Clone, Copy, Default)]
struct Lch {
    cfg: Option<BearerConfig>,
    buf_tx: u32,
    buf_retx: u32,
}

impl Lch {
    fn dl_bytes(&self) -> u32 {
        match self.cfg {
            Some(cfg) if cfg.direction.has_dl() => self.buf_tx + self.buf_retx,
            _ => 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LchManager {
    lch: [Lch; MAX_NOF_LCIDS as usize],
    lcg_bsr: [u32; MAX_NOF_LCGS as usize],
    ces: VecDeque<MacCe>,
    dl_harq_failures: u64,
    ul_harq_failures: u64,
    dl_dropped_bytes: u64,
}

impl Default for LchManager {
    fn default() -> Self {
        Self::new()
    }
}

impl LchManager {
    pub fn new() -> Self {
        Self {
            lch: [Lch::default(); MAX_NOF_LCIDS as usize],
            lcg_bsr: [0; MAX_NOF_LCGS as usize],
            ces: VecDeque::new(),
            dl_harq_failures: 0,
            ul_harq_failures: 0,
            dl_dropped_bytes: 0,
        }
    }

    /// Validates a bearer configuration without applying it.
    pub fn check_bearer(lcid: u32, cfg: &BearerConfig) -> Result<(), SchedError> {
        if lcid >= MAX_NOF_LCIDS || cfg.lcg >= MAX_NOF_LCGS {
            return Err(SchedError::InvalidLcid(lcid));
        }
        match cfg.direction {
            BearerDirection::Idle => Err(SchedError::UnsupportedBearerDirection(lcid)),
            BearerDirection::Both => Ok(()),
            _ if lcid <= MAX_SRB_LCID => Err(SchedError::UnsupportedBearerDirection(lcid)),
            _ => Ok(()),
        }
    }

    pub fn config_lcid(&mut self, lcid: u32, cfg: BearerConfig) -> Result<(), SchedError> {
        Self::check_bearer(lcid, &cfg)?;
        self.lch[lcid as usize].cfg = Some(cfg);
        Ok(())
    }

    pub fn rem_lcid(&mut self, lcid: u32) -> Result<(), SchedError> {
        let Some(lch) = self.lch.get_mut(lcid as usize) else {
            return Err(SchedError::InvalidLcid(lcid));
        };
        *lch = Lch::default();
        Ok(())
    }

    pub fn is_configured(&self, lcid: u32) -> bool {
        self.lch
            .get(lcid as usize)
            .is_some_and(|lch| lch.cfg.is_some())
    }

    /// Latest RLC buffer occupancy for a DL bearer. Returns false when the
    /// bearer does not exist or carries no DL traffic.
    pub fn dl_buffer_state(&mut self, lcid: u32, tx: u32, retx: u32) -> bool {
        match self.lch.get_mut(lcid as usize) {
            Some(lch) if lch.cfg.is_some_and(|c| c.direction.has_dl()) => {
                lch.buf_tx = tx;
                lch.buf_retx = retx;
                true
            }
            _ => false,
        }
    }

    /// Buffer status report for one logical channel group.
    pub fn ul_bsr(&mut self, lcg: u32, bytes: u32) -> bool {
        match self.lcg_bsr.get_mut(lcg as usize) {
            Some(slot) => {
                *slot = bytes;
                true
            }
            None => false,
        }
    }

    pub fn push_ce(&mut self, ce: MacCe) {
        self.ces.push_back(ce);
    }

    pub fn has_pending_ce(&self, pred: impl Fn(&MacCe) -> bool) -> bool {
        self.ces.iter().any(pred)
    }

    pub fn dl_buffer_bytes(&self, lcid: u32) -> Option<(u32, u32)> {
        self.lch
            .get(lcid as usize)
            .map(|lch| (lch.buf_tx, lch.buf_retx))
    }

    /// DL bytes needed to empty every buffer, including MAC CEs and RLC
    /// subheaders.
    pub fn dl_pending_bytes(&self) -> u32 {
        let ce_bytes: u32 = self.ces.iter().map(MacCe::size).sum();
        let rlc_bytes: u32 = self
            .lch
            .iter()
            .map(Lch::dl_bytes)
            .filter(|&b| b > 0)
            .map(|b| b + RLC_SUBHEADER_BYTES)
            .sum();
        ce_bytes + rlc_bytes
    }

    pub fn ul_pending_bytes(&self) -> u32 {
        self.lcg_bsr.iter().sum()
    }

    /// Fills a transport block of `tbs` bytes: MAC CEs first, then bearers
    /// in priority order with retransmission bytes ahead of new data.
    /// Buffers are decremented by what was placed.
    pub fn alloc_dl_pdus(&mut self, tbs: u32) -> Vec<DlPdu> {
        let mut rem = tbs;
        let mut pdus = Vec::new();

        while let Some(ce) = self.ces.front().copied() {
            if ce.size() > rem {
                break;
            }
            rem -= ce.size();
            pdus.push(DlPdu::Ce(ce));
            self.ces.pop_front();
        }

        let mut order: Vec<u32> = (0..MAX_NOF_LCIDS)
            .filter(|&lcid| self.lch[lcid as usize].dl_bytes() > 0)
            .collect();
        order.sort_by_key(|&lcid| {
            let prio = self.lch[lcid as usize].cfg.map_or(u32::MAX, |c| c.priority);
            (prio, lcid)
        });

        for lcid in order {
            if rem <= RLC_SUBHEADER_BYTES {
                break;
            }
            let lch = &mut self.lch[lcid as usize];
            let room = rem - RLC_SUBHEADER_BYTES;
            let from_retx = lch.buf_retx.min(room);
            let from_tx = lch.buf_tx.min(room - from_retx);
            let nbytes = from_retx + from_tx;
            if nbytes == 0 {
                continue;
            }
            lch.buf_retx -= from_retx;
            lch.buf_tx -= from_tx;
            rem -= nbytes + RLC_SUBHEADER_BYTES;
            pdus.push(DlPdu::Rlc { lcid, nbytes });
        }
        pdus
    }

    /// Accounts an UL grant of `bytes` against the reported groups, lowest
    /// group first.
    pub fn alloc_ul(&mut self, bytes: u32) {
        let mut rem = bytes;
        for slot in self.lcg_bsr.iter_mut() {
            let used = (*slot).min(rem);
            *slot -= used;
            rem -= used;
            if rem == 0 {
                break;
            }
        }
    }

    pub fn record_harq_failure(&mut self, dir: Direction, bytes: u32) {
        match dir {
            Direction::Dl => {
                self.dl_harq_failures += 1;
                self.dl_dropped_bytes += u64::from(bytes);
            }
            Direction::Ul => self.ul_harq_failures += 1,
        }
    }

    pub fn harq_failures(&self, dir: Direction) -> u64 {
        match dir {
            Direction::Dl => self.dl_harq_failures,
            Direction::Ul => self.ul_harq_failures,
        }
    }

    pub fn dl_dropped_bytes(&self) -> u64 {
        self.dl_dropped_bytes
    }
}
