// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Frequency-domain allocation units: RBG bitmaps for DL, contiguous PRB
//! intervals for UL.

use serde::{Deserialize, Serialize};

/// PRBs per resource-block group for a given bandwidth (type-0 allocation).
pub const fn rbg_size(nof_prb: u32) -> u32 {
    match nof_prb {
        0..=10 => 1,
        11..=26 => 2,
        27..=63 => 3,
        _ => 4,
    }
}

pub const fn nof_rbgs(nof_prb: u32) -> u32 {
    nof_prb.div_ceil(rbg_size(nof_prb))
}

/// Bitmap over resource-block groups; bit `i` is RBG `i`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RbgMask {
    bits: u64,
    nof_rbg: u32,
}

impl RbgMask {
    pub fn new(nof_rbg: u32) -> Self {
        debug_assert!(nof_rbg <= 64);
        Self { bits: 0, nof_rbg }
    }

    /// Mask with RBGs `start..start + len` set, clamped to the mask size.
    pub fn with_range(nof_rbg: u32, start: u32, len: u32) -> Self {
        let mut mask = Self::new(nof_rbg);
        for i in start..(start + len).min(nof_rbg) {
            mask.set(i);
        }
        mask
    }

    fn valid_bits(&self) -> u64 {
        if self.nof_rbg >= 64 {
            u64::MAX
        } else {
            (1u64 << self.nof_rbg) - 1
        }
    }

    pub fn size(&self) -> u32 {
        self.nof_rbg
    }

    pub fn set(&mut self, i: u32) {
        if i < self.nof_rbg {
            self.bits |= 1 << i;
        }
    }

    pub fn test(&self, i: u32) -> bool {
        i < self.nof_rbg && self.bits & (1 << i) != 0
    }

    pub fn count(&self) -> u32 {
        self.bits.count_ones()
    }

    pub fn none(&self) -> bool {
        self.bits == 0
    }

    pub fn all(&self) -> bool {
        self.bits == self.valid_bits()
    }

    pub fn overlaps(&self, other: &RbgMask) -> bool {
        self.bits & other.bits != 0
    }

    pub fn insert(&mut self, other: &RbgMask) {
        self.bits |= other.bits;
    }

    pub fn remove(&mut self, other: &RbgMask) {
        self.bits &= !other.bits;
    }

    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        (0..self.nof_rbg).filter(|&i| self.test(i))
    }

    /// Picks up to `n` free RBGs, lowest index first. Returns an empty mask
    /// if nothing is free.
    pub fn pick_free(&self, n: u32) -> RbgMask {
        let mut out = RbgMask::new(self.nof_rbg);
        for i in (0..self.nof_rbg).filter(|&i| !self.test(i)).take(n as usize) {
            out.set(i);
        }
        out
    }

    /// PRBs covered by this mask; the last RBG may be shorter than `P`.
    pub fn nof_prb(&self, cell_nof_prb: u32) -> u32 {
        let p = rbg_size(cell_nof_prb);
        self.iter()
            .map(|i| p.min(cell_nof_prb.saturating_sub(i * p)))
            .sum()
    }
}

/// Contiguous PRB range `[start, start + len)`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PrbInterval {
    pub start: u32,
    pub len: u32,
}

impl PrbInterval {
    pub fn new(start: u32, len: u32) -> Self {
        Self { start, len }
    }

    pub fn stop(&self) -> u32 {
        self.start + self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn overlaps(&self, other: &PrbInterval) -> bool {
        !self.is_empty() && !other.is_empty() && self.start < other.stop() && other.start < self.stop()
    }
}

/// Occupancy bitmap over UL PRBs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PrbMask {
    bits: u128,
    nof_prb: u32,
}

impl PrbMask {
    pub fn new(nof_prb: u32) -> Self {
        debug_assert!(nof_prb <= 128);
        Self { bits: 0, nof_prb }
    }

    pub fn is_free(&self, interval: &PrbInterval) -> bool {
        interval.stop() <= self.nof_prb && (interval.start..interval.stop()).all(|i| self.bits & (1 << i) == 0)
    }

    pub fn fill(&mut self, interval: &PrbInterval) {
        for i in interval.start..interval.stop().min(self.nof_prb) {
            self.bits |= 1 << i;
        }
    }

    pub fn clear(&mut self, interval: &PrbInterval) {
        for i in interval.start..interval.stop().min(self.nof_prb) {
            self.bits &= !(1 << i);
        }
    }

    pub fn count(&self) -> u32 {
        self.bits.count_ones()
    }

    /// First free run of exactly `len` PRBs, if any.
    pub fn find_exact(&self, len: u32) -> Option<PrbInterval> {
        if len == 0 {
            return None;
        }
        let mut run_start = 0;
        let mut run_len = 0;
        for i in 0..self.nof_prb {
            if self.bits & (1 << i) == 0 {
                if run_len == 0 {
                    run_start = i;
                }
                run_len += 1;
                if run_len == len {
                    return Some(PrbInterval::new(run_start, len));
                }
            } else {
                run_len = 0;
            }
        }
        None
    }

    /// First-fit run of `len` PRBs, or the longest free run when no run is
    /// long enough.
    pub fn find_up_to(&self, len: u32) -> Option<PrbInterval> {
        if let Some(found) = self.find_exact(len) {
            return Some(found);
        }
        let mut best = PrbInterval::default();
        let mut run = PrbInterval::default();
        for i in 0..self.nof_prb {
            if self.bits & (1 << i) == 0 {
                if run.is_empty() {
                    run.start = i;
                }
                run.len += 1;
                if run.len > best.len {
                    best = run;
                }
            } else {
                run = PrbInterval::default();
            }
        }
        (!best.is_empty()).then_some(best)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(6, 1, 6)]
    #[case(15, 2, 8)]
    #[case(25, 2, 13)]
    #[case(50, 3, 17)]
    #[case(75, 4, 19)]
    #[case(100, 4, 25)]
    fn test_rbg_geometry(#[case] nof_prb: u32, #[case] p: u32, #[case] nof_rbg: u32) {
        assert_eq!(rbg_size(nof_prb), p);
        assert_eq!(nof_rbgs(nof_prb), nof_rbg);
    }

    #[test]
    fn test_pick_free_skips_used() {
        let used = RbgMask::with_range(13, 0, 3);
        let picked = used.pick_free(4);
        assert_eq!(picked.iter().collect::<Vec<_>>(), vec![3, 4, 5, 6]);
        assert!(!picked.overlaps(&used));
    }

    #[test]
    fn test_last_rbg_is_short() {
        // 25 PRBs with P = 2: RBG 12 holds a single PRB
        let mask = RbgMask::with_range(13, 11, 2);
        assert_eq!(mask.nof_prb(25), 3);
    }

    #[test]
    fn test_prb_mask_search() {
        let mut used = PrbMask::new(25);
        used.fill(&PrbInterval::new(0, 2));
        used.fill(&PrbInterval::new(23, 2));
        used.fill(&PrbInterval::new(10, 1));

        assert_eq!(used.find_exact(5), Some(PrbInterval::new(2, 5)));
        assert_eq!(used.find_up_to(20), Some(PrbInterval::new(11, 12)));
        assert!(used.is_free(&PrbInterval::new(2, 8)));
        assert!(!used.is_free(&PrbInterval::new(9, 2)));
        assert!(!used.is_free(&PrbInterval::new(24, 2)));
    }
}
