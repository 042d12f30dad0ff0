// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Control-channel element allocation for one subframe.

use crate::protocols::{DciLocation, Direction, Rnti, MAX_AGGR_LEVEL};

/// Upper bound on CCEs in any supported control region.
pub const MAX_NOF_CCE: u32 = 128;

/// PDCCH candidates per aggregation level in the UE-specific search space.
const NOF_CANDIDATES: [u32; 4] = [6, 6, 2, 2];

const HASH_A: u32 = 39827;
const HASH_D: u32 = 65537;

/// CCEs available for `cfi` control symbols on `nof_prb` PRBs, after the
/// PCFICH and one PHICH group per 8 PRBs.
pub fn nof_cce(nof_prb: u32, cfi: u32) -> u32 {
    let nof_reg = nof_prb * (2 + 3 * cfi.saturating_sub(1));
    let pcfich = 4;
    let phich = 3 * nof_prb.div_ceil(8);
    nof_reg.saturating_sub(pcfich + phich) / 9
}

/// Candidate first CCEs of `rnti` at aggregation level index `l` in
/// subframe `sf_idx`, ascending and without duplicates.
pub fn ue_search_space(rnti: Rnti, nof_cce: u32, sf_idx: u32, l: u32) -> Vec<u32> {
    let level = 1u32 << l;
    let nof_positions = nof_cce / level;
    if nof_positions == 0 {
        return Vec::new();
    }

    let mut y = u64::from(rnti.0);
    for _ in 0..=sf_idx {
        y = (u64::from(HASH_A) * y) % u64::from(HASH_D);
    }

    let mut candidates: Vec<u32> = (0..NOF_CANDIDATES[l as usize])
        .map(|m| level * (((y as u32) + m) % nof_positions))
        .collect();
    candidates.sort_unstable();
    candidates.dedup();
    candidates
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PdcchAlloc {
    pub rnti: Rnti,
    pub dir: Direction,
    pub loc: DciLocation,
}

/// A terminal asking for a control-channel location.
#[derive(Debug, Clone)]
pub struct PdcchRequest {
    pub rnti: Rnti,
    pub dir: Direction,
    pub l: u32,
    pub candidates: Vec<u32>,
}

/// Tracks CCE occupancy of one subframe's control region.
#[derive(Debug, Clone)]
pub struct PdcchAllocator {
    nof_cce: u32,
    used: u128,
    allocs: Vec<PdcchAlloc>,
}

impl PdcchAllocator {
    pub fn new(nof_cce: u32) -> Self {
        Self {
            nof_cce: nof_cce.min(MAX_NOF_CCE),
            used: 0,
            allocs: Vec::new(),
        }
    }

    pub fn nof_cce(&self) -> u32 {
        self.nof_cce
    }

    pub fn nof_used(&self) -> u32 {
        self.used.count_ones()
    }

    pub fn allocs(&self) -> &[PdcchAlloc] {
        &self.allocs
    }

    fn span(loc: &DciLocation) -> u128 {
        let n = loc.nof_cce();
        let ones = if n >= 128 { u128::MAX } else { (1u128 << n) - 1 };
        ones << loc.ncce
    }

    fn fits(&self, loc: &DciLocation) -> bool {
        loc.l <= MAX_AGGR_LEVEL
            && loc.ncce + loc.nof_cce() <= self.nof_cce
            && self.used & Self::span(loc) == 0
    }

    /// Takes the first collision-free candidate, probing in increasing
    /// order. None leaves the allocator unchanged.
    pub fn try_alloc(&mut self, rnti: Rnti, dir: Direction, l: u32, candidates: &[u32]) -> Option<DciLocation> {
        let loc = candidates
            .iter()
            .map(|&ncce| DciLocation { ncce, l })
            .find(|loc| self.fits(loc))?;
        self.used |= Self::span(&loc);
        self.allocs.push(PdcchAlloc { rnti, dir, loc });
        Some(loc)
    }

    /// Releases the location taken for `(rnti, dir)`.
    pub fn rollback(&mut self, rnti: Rnti, dir: Direction) -> bool {
        let Some(pos) = self
            .allocs
            .iter()
            .position(|a| a.rnti == rnti && a.dir == dir)
        else {
            return false;
        };
        let alloc = self.allocs.remove(pos);
        self.used &= !Self::span(&alloc.loc);
        true
    }

    /// Places a batch of requests in ascending RNTI order (DL before UL for
    /// the same terminal). Terminals left without a location get None.
    pub fn alloc_batch(&mut self, reqs: &[PdcchRequest]) -> Vec<(Rnti, Direction, Option<DciLocation>)> {
        let mut order: Vec<&PdcchRequest> = reqs.iter().collect();
        order.sort_by_key(|r| (r.rnti, r.dir == Direction::Ul));
        order
            .into_iter()
            .map(|r| (r.rnti, r.dir, self.try_alloc(r.rnti, r.dir, r.l, &r.candidates)))
            .collect()
    }
}
