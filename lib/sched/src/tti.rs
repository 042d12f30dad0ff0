// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Wrap-aware TTI arithmetic and FDD timing relations.

use std::fmt;
use std::ops::{Add, Sub};

use serde::{Deserialize, Serialize};

/// TTI counter period: 1024 radio frames of 10 subframes.
pub const TTI_PERIOD: u32 = 10240;

/// Subframes between DL transmission and its HARQ feedback, and between
/// an UL grant and the PUSCH it schedules.
pub const FDD_HARQ_DELAY: u32 = 4;

/// A point on the wrapping TTI axis.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TtiPoint(u32);

impl TtiPoint {
    pub const fn new(tti: u32) -> Self {
        Self(tti % TTI_PERIOD)
    }

    pub const fn to_uint(self) -> u32 {
        self.0
    }

    /// Subframe index within the radio frame.
    pub const fn sf_idx(self) -> u32 {
        self.0 % 10
    }

    /// System frame number.
    pub const fn sfn(self) -> u32 {
        self.0 / 10
    }

    /// Signed distance `self - other`, taking the shorter way around the
    /// wrap. The result lies in `[-TTI_PERIOD / 2, TTI_PERIOD / 2)`.
    pub fn diff(self, other: TtiPoint) -> i32 {
        let half = (TTI_PERIOD / 2) as i32;
        let raw = self.0 as i32 - other.0 as i32;
        (raw + half).rem_euclid(TTI_PERIOD as i32) - half
    }

    pub fn is_after(self, other: TtiPoint) -> bool {
        self.diff(other) > 0
    }

    pub fn is_before(self, other: TtiPoint) -> bool {
        self.diff(other) < 0
    }

    /// DL transmission TTI for a subframe scheduled at reception TTI `self`.
    pub fn to_tx_dl(self) -> TtiPoint {
        self + FDD_HARQ_DELAY
    }

    /// PUSCH TTI for an UL grant decided at reception TTI `self`.
    pub fn to_tx_ul(self) -> TtiPoint {
        self + 2 * FDD_HARQ_DELAY
    }

    /// DL transmission acknowledged by feedback received at `self`.
    pub fn to_dl_ack_tx(self) -> TtiPoint {
        self - FDD_HARQ_DELAY
    }
}

impl Add<u32> for TtiPoint {
    type Output = TtiPoint;

    fn add(self, rhs: u32) -> TtiPoint {
        TtiPoint::new(self.0 + rhs % TTI_PERIOD)
    }
}

impl Sub<u32> for TtiPoint {
    type Output = TtiPoint;

    fn sub(self, rhs: u32) -> TtiPoint {
        TtiPoint::new(self.0 + TTI_PERIOD - rhs % TTI_PERIOD)
    }
}

impl Sub<TtiPoint> for TtiPoint {
    type Output = i32;

    fn sub(self, rhs: TtiPoint) -> i32 {
        self.diff(rhs)
    }
}

impl From<u32> for TtiPoint {
    fn from(tti: u32) -> Self {
        TtiPoint::new(tti)
    }
}

impl fmt::Display for TtiPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.sfn(), self.sf_idx())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(0, 0, 0)]
    #[case(10, 3, 7)]
    #[case(3, 10, -7)]
    #[case(2, 10238, 4)]
    #[case(10238, 2, -4)]
    fn test_wrapping_diff(#[case] a: u32, #[case] b: u32, #[case] expected: i32) {
        assert_eq!(TtiPoint::new(a).diff(TtiPoint::new(b)), expected);
    }

    #[test]
    fn test_add_sub_wrap() {
        let t = TtiPoint::new(10238);
        assert_eq!((t + 4).to_uint(), 2);
        assert_eq!((TtiPoint::new(1) - 4).to_uint(), 10237);
        assert!((t + 4).is_after(t));
    }

    #[test]
    fn test_fdd_timing() {
        let rx = TtiPoint::new(100);
        assert_eq!(rx.to_tx_dl().to_uint(), 104);
        assert_eq!(rx.to_tx_ul().to_uint(), 108);
        assert_eq!(rx.to_dl_ack_tx().to_uint(), 96);
        assert_eq!(rx.to_tx_dl().sf_idx(), 4);
    }
}
