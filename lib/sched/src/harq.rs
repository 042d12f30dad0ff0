// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Stop-and-wait HARQ bookkeeping.
//!
//! One [`HarqTable`] per direction per carrier. Each process carries up to
//! two transport blocks. A transmission at TTI `T` that is negatively
//! acknowledged (or never acknowledged) becomes eligible for retransmission
//! at exactly `T + round_trip_delay`. Missing that window drops the block.

use serde::Serialize;

use crate::error::HarqError;
use crate::mask::{PrbInterval, RbgMask};
use crate::protocols::TbGrant;
use crate::tti::TtiPoint;

pub const MAX_TB: usize = 2;

/// Redundancy version sequence indexed by retransmission count.
const RV_SEQ: [u32; 4] = [0, 2, 3, 1];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TbState {
    Empty,
    ActiveNew,
    ActiveRetx,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// Negative acknowledgments exceeded the retransmission bound.
    MaxRetx,
    /// The retransmission was not granted in its TTI.
    MissedWindow,
}

/// A transport block given up on; surfaced to the buffer manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DroppedTb {
    pub pid: u32,
    pub tb: u32,
    pub tbs: u32,
    pub reason: DropReason,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    Acked { tbs: u32 },
    Retransmit { at: TtiPoint },
    Dropped { tbs: u32 },
    /// Repeated feedback for a block already resolved.
    Ignored,
}

#[derive(Debug, Clone, Copy)]
struct Tb {
    state: TbState,
    ndi: bool,
    nof_retx: u32,
    tbs: u32,
    mcs: u32,
    awaiting_ack: bool,
    last_ack: Option<bool>,
}

impl Default for Tb {
    fn default() -> Self {
        Self {
            state: TbState::Empty,
            ndi: false,
            nof_retx: 0,
            tbs: 0,
            mcs: 0,
            awaiting_ack: false,
            last_ack: None,
        }
    }
}

/// One HARQ process; `A` is the frequency allocation type of the direction.
#[derive(Debug, Clone)]
pub struct HarqProc<A> {
    pid: u32,
    tb: [Tb; MAX_TB],
    alloc: Option<A>,
    tx_tti: Option<TtiPoint>,
    retx_tti: Option<TtiPoint>,
}

pub type DlHarqProc = HarqProc<RbgMask>;
pub type UlHarqProc = HarqProc<PrbInterval>;

impl<A: Clone> HarqProc<A> {
    fn new(pid: u32) -> Self {
        Self {
            pid,
            tb: [Tb::default(); MAX_TB],
            alloc: None,
            tx_tti: None,
            retx_tti: None,
        }
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn is_empty(&self) -> bool {
        self.tb.iter().all(|tb| tb.state == TbState::Empty)
    }

    pub fn tb_state(&self, tb: usize) -> TbState {
        self.tb[tb].state
    }

    pub fn ndi(&self, tb: usize) -> bool {
        self.tb[tb].ndi
    }

    pub fn nof_retx(&self, tb: usize) -> u32 {
        self.tb[tb].nof_retx
    }

    pub fn tbs(&self, tb: usize) -> u32 {
        self.tb[tb].tbs
    }

    pub fn alloc(&self) -> Option<&A> {
        self.alloc.as_ref()
    }

    pub fn tx_tti(&self) -> Option<TtiPoint> {
        self.tx_tti
    }

    pub fn retx_tti(&self) -> Option<TtiPoint> {
        self.retx_tti
    }

    pub fn has_pending_retx(&self, tti: TtiPoint) -> bool {
        self.retx_tti == Some(tti)
            && self
                .tb
                .iter()
                .any(|tb| tb.state == TbState::ActiveRetx && !tb.awaiting_ack)
    }

    /// Bytes held by blocks that are not yet resolved.
    pub fn pending_bytes(&self) -> u32 {
        self.tb
            .iter()
            .filter(|tb| tb.state != TbState::Empty)
            .map(|tb| tb.tbs)
            .sum()
    }

    fn finish_if_empty(&mut self) {
        if self.is_empty() {
            self.alloc = None;
            self.retx_tti = None;
        }
    }
}

/// Fixed-size process table for one direction of one carrier.
#[derive(Debug, Clone)]
pub struct HarqTable<A> {
    procs: Vec<HarqProc<A>>,
    nof_tbs: u32,
    max_retx: u32,
    last_tti: Option<TtiPoint>,
    dropped: Vec<DroppedTb>,
}

pub type DlHarqTable = HarqTable<RbgMask>;
pub type UlHarqTable = HarqTable<PrbInterval>;

impl<A: Clone> HarqTable<A> {
    /// `round_trip_delay` processes, each with up to `nof_tbs` blocks.
    pub fn new(round_trip_delay: u32, nof_tbs: u32, max_retx: u32) -> Self {
        Self {
            procs: (0..round_trip_delay).map(HarqProc::new).collect(),
            nof_tbs: nof_tbs.clamp(1, MAX_TB as u32),
            max_retx,
            last_tti: None,
            dropped: Vec::new(),
        }
    }

    pub fn nof_procs(&self) -> u32 {
        self.procs.len() as u32
    }

    pub fn round_trip_delay(&self) -> u32 {
        self.procs.len() as u32
    }

    pub fn nof_tbs(&self) -> u32 {
        self.nof_tbs
    }

    pub fn max_retx(&self) -> u32 {
        self.max_retx
    }

    /// Process id the synchronous timeline maps to `tti`.
    pub fn pid_for(&self, tti: TtiPoint) -> u32 {
        tti.to_uint() % self.nof_procs()
    }

    pub fn get(&self, pid: u32) -> Option<&HarqProc<A>> {
        self.procs.get(pid as usize)
    }

    pub fn iter(&self) -> impl Iterator<Item = &HarqProc<A>> {
        self.procs.iter()
    }

    fn check(&self, pid: u32, tb: u32) -> Result<(), HarqError> {
        if pid >= self.nof_procs() {
            return Err(HarqError::InvalidPid {
                pid,
                nof_procs: self.nof_procs(),
            });
        }
        if tb >= self.nof_tbs {
            return Err(HarqError::InvalidTb {
                tb,
                nof_tbs: self.nof_tbs,
            });
        }
        Ok(())
    }

    /// Moves the table to `tti`. Unacknowledged transmissions whose feedback
    /// window closed are treated as negatively acknowledged; retransmissions
    /// whose TTI passed without a grant are dropped.
    ///
    /// Returns the number of blocks dropped. Calling twice with the same TTI
    /// is a no-op.
    pub fn advance(&mut self, tti: TtiPoint) -> usize {
        if self.last_tti.is_some_and(|last| !tti.is_after(last)) {
            return 0;
        }
        self.last_tti = Some(tti);

        let rtt = self.round_trip_delay() as i32;
        let max_retx = self.max_retx;
        let before = self.dropped.len();

        for proc in &mut self.procs {
            let Some(tx_tti) = proc.tx_tti else {
                continue;
            };
            for (idx, tb) in proc.tb.iter_mut().enumerate() {
                if tb.awaiting_ack && tti.diff(tx_tti) >= rtt {
                    tb.awaiting_ack = false;
                    tb.last_ack = Some(false);
                    if tb.nof_retx < max_retx {
                        tb.state = TbState::ActiveRetx;
                        proc.retx_tti = Some(tx_tti + rtt as u32);
                    } else {
                        tb.state = TbState::Empty;
                        self.dropped.push(DroppedTb {
                            pid: proc.pid,
                            tb: idx as u32,
                            tbs: tb.tbs,
                            reason: DropReason::MaxRetx,
                        });
                    }
                }
                if tb.state == TbState::ActiveRetx
                    && !tb.awaiting_ack
                    && proc.retx_tti.is_some_and(|at| at.is_before(tti))
                {
                    tb.state = TbState::Empty;
                    self.dropped.push(DroppedTb {
                        pid: proc.pid,
                        tb: idx as u32,
                        tbs: tb.tbs,
                        reason: DropReason::MissedWindow,
                    });
                }
            }
            proc.finish_if_empty();
        }

        self.dropped.len() - before
    }

    /// Process whose retransmission is due at `tti`.
    pub fn get_pending_process(&self, tti: TtiPoint) -> Option<u32> {
        self.procs
            .iter()
            .find(|p| p.has_pending_retx(tti))
            .map(|p| p.pid)
    }

    /// An empty process for fresh data, preferring the one mapped to `tti`.
    pub fn get_empty_process(&self, tti: TtiPoint) -> Option<u32> {
        let preferred = self.pid_for(tti);
        if self.procs[preferred as usize].is_empty() {
            return Some(preferred);
        }
        self.procs.iter().find(|p| p.is_empty()).map(|p| p.pid)
    }

    /// Process whose latest transmission happened at `tti`. After the TTI
    /// clock wraps an idle process may still carry the same TTI, so a busy
    /// process wins over an empty one.
    pub fn find_by_tx(&self, tti: TtiPoint) -> Option<u32> {
        self.procs
            .iter()
            .filter(|p| p.tx_tti == Some(tti))
            .min_by_key(|p| p.is_empty())
            .map(|p| p.pid)
    }

    /// Starts a new transmission on empty process `pid`. `tbs` holds
    /// `(tbs, mcs)` per transport block; the new-data indicator of each
    /// block is toggled.
    pub fn new_tx(
        &mut self,
        pid: u32,
        tti: TtiPoint,
        tbs: &[(u32, u32)],
        alloc: A,
    ) -> Result<Vec<TbGrant>, HarqError> {
        self.check(pid, tbs.len().saturating_sub(1) as u32)?;
        let proc = &mut self.procs[pid as usize];
        if !proc.is_empty() {
            return Err(HarqError::NotActive { pid, tb: 0 });
        }

        let mut grants = Vec::with_capacity(tbs.len());
        for (tb, &(size, mcs)) in proc.tb.iter_mut().zip(tbs) {
            tb.state = TbState::ActiveNew;
            tb.ndi = !tb.ndi;
            tb.nof_retx = 0;
            tb.tbs = size;
            tb.mcs = mcs;
            tb.awaiting_ack = true;
            tb.last_ack = None;
            grants.push(TbGrant {
                tbs: size,
                mcs,
                ndi: tb.ndi,
                rv: RV_SEQ[0],
                is_retx: false,
            });
        }
        proc.alloc = Some(alloc);
        proc.tx_tti = Some(tti);
        proc.retx_tti = None;
        Ok(grants)
    }

    /// Retransmits every negatively acknowledged block of `pid` at `tti`,
    /// possibly on a new allocation of the same size. Blocks still waiting
    /// for feedback are left alone.
    pub fn new_retx(&mut self, pid: u32, tti: TtiPoint, alloc: A) -> Result<Vec<TbGrant>, HarqError> {
        self.check(pid, 0)?;
        let proc = &mut self.procs[pid as usize];
        if !proc.has_pending_retx(tti) {
            return Err(HarqError::NotActive { pid, tb: 0 });
        }

        let mut grants = Vec::new();
        for tb in proc.tb.iter_mut() {
            if tb.state != TbState::ActiveRetx || tb.awaiting_ack {
                continue;
            }
            tb.nof_retx += 1;
            tb.awaiting_ack = true;
            grants.push(TbGrant {
                tbs: tb.tbs,
                mcs: tb.mcs,
                ndi: tb.ndi,
                rv: RV_SEQ[(tb.nof_retx % 4) as usize],
                is_retx: true,
            });
        }
        proc.alloc = Some(alloc);
        proc.tx_tti = Some(tti);
        proc.retx_tti = None;
        Ok(grants)
    }

    /// Records feedback for block `tb` of process `pid`.
    pub fn set_ack(&mut self, pid: u32, tb: u32, ack: bool) -> Result<AckOutcome, HarqError> {
        self.check(pid, tb)?;
        let rtt = self.round_trip_delay();
        let max_retx = self.max_retx;
        let proc = &mut self.procs[pid as usize];
        let idx = tb as usize;

        // an ACK that lands after the feedback window was closed as a NACK
        // still cancels the retransmission, as long as it has not been sent
        if ack && !proc.tb[idx].awaiting_ack && proc.tb[idx].state == TbState::ActiveRetx {
            let entry = &mut proc.tb[idx];
            entry.state = TbState::Empty;
            entry.last_ack = Some(true);
            let tbs = entry.tbs;
            proc.finish_if_empty();
            return Ok(AckOutcome::Acked { tbs });
        }

        if !proc.tb[idx].awaiting_ack {
            let entry = &proc.tb[idx];
            let repeated = match entry.state {
                TbState::Empty => entry.last_ack == Some(ack),
                TbState::ActiveRetx => !ack,
                TbState::ActiveNew => false,
            };
            return if repeated {
                Ok(AckOutcome::Ignored)
            } else {
                Err(HarqError::NotActive { pid, tb })
            };
        }

        let Some(tx_tti) = proc.tx_tti else {
            return Err(HarqError::NotActive { pid, tb });
        };
        let entry = &mut proc.tb[idx];
        entry.awaiting_ack = false;
        entry.last_ack = Some(ack);

        let outcome = if ack {
            entry.state = TbState::Empty;
            AckOutcome::Acked { tbs: entry.tbs }
        } else if entry.nof_retx < max_retx {
            entry.state = TbState::ActiveRetx;
            let at = tx_tti + rtt;
            proc.retx_tti = Some(at);
            AckOutcome::Retransmit { at }
        } else {
            entry.state = TbState::Empty;
            let tbs = entry.tbs;
            self.dropped.push(DroppedTb {
                pid,
                tb,
                tbs,
                reason: DropReason::MaxRetx,
            });
            AckOutcome::Dropped { tbs }
        };

        proc.finish_if_empty();
        Ok(outcome)
    }

    /// Drains the blocks dropped since the last call.
    pub fn take_dropped(&mut self) -> Vec<DroppedTb> {
        std::mem::take(&mut self.dropped)
    }

    /// Bytes in unresolved blocks across all processes.
    pub fn pending_bytes(&self) -> u32 {
        self.procs.iter().map(|p| p.pending_bytes()).sum()
    }

    /// Empties every process, keeping the new-data indicators.
    pub fn reset(&mut self) {
        for proc in &mut self.procs {
            for tb in &mut proc.tb {
                let ndi = tb.ndi;
                *tb = Tb { ndi, ..Tb::default() };
            }
            proc.alloc = None;
            proc.tx_tti = None;
            proc.retx_tti = None;
        }
        self.dropped.clear();
    }
}

/// The DL and UL process tables of one terminal on one carrier.
#[derive(Debug, Clone)]
pub struct HarqEntity {
    pub dl: DlHarqTable,
    pub ul: UlHarqTable,
}

impl HarqEntity {
    pub fn new(round_trip_delay: u32, max_retx: u32) -> Self {
        Self {
            dl: HarqTable::new(round_trip_delay, MAX_TB as u32, max_retx),
            ul: HarqTable::new(round_trip_delay, 1, max_retx),
        }
    }

    /// Advances both tables: DL to its transmission TTI, UL to its PUSCH
    /// TTI.
    pub fn advance(&mut self, tti_tx_dl: TtiPoint, tti_tx_ul: TtiPoint) -> usize {
        self.dl.advance(tti_tx_dl) + self.ul.advance(tti_tx_ul)
    }

    pub fn reset(&mut self) {
        self.dl.reset();
        self.ul.reset();
    }
}
