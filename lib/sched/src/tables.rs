// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Link-adaptation tables: CQI to MCS, MCS to transport-block size, SNR to
//! CQI and PDCCH aggregation level selection.

use crate::mask::nof_rbgs;
use crate::protocols::Direction;

pub const MAX_MCS: u32 = 28;
pub const MAX_CQI: u32 = 15;

/// Largest single-layer transport block, in bits.
pub const MAX_TBS_BITS: u32 = 75376;

const CQI_TO_MCS: [u32; 16] = [0, 0, 1, 3, 5, 7, 9, 11, 13, 15, 17, 19, 21, 23, 25, 27];

/// Spectral efficiency (bits per resource element) of each CQI index.
const CQI_EFFICIENCY: [f32; 16] = [
    0.0, 0.1523, 0.2344, 0.3770, 0.6016, 0.8770, 1.1758, 1.4766, 1.9141, 2.4063, 2.7305,
    3.3223, 3.9023, 4.5234, 5.1152, 5.5547,
];

/// Transport block bits carried by one PRB for each TBS index.
const TBS_PER_PRB: [u32; 27] = [
    16, 24, 32, 40, 56, 72, 88, 104, 120, 136, 144, 176, 208, 224, 256, 280, 328, 336, 376, 408,
    440, 488, 520, 552, 584, 616, 712,
];

/// Minimum UL SINR (dB) for each CQI index above 0.
const SNR_TO_CQI_DB: [f32; 15] = [
    -6.7, -4.7, -2.3, 0.2, 2.4, 4.3, 5.9, 8.1, 10.3, 11.7, 14.1, 16.3, 18.7, 21.0, 22.7,
];

/// Highest PDCCH code rate accepted for any aggregation level.
const MAX_PDCCH_CODERATE: f32 = 0.75;

/// QPSK bits per CCE (36 resource elements).
const BITS_PER_CCE: u32 = 72;

pub fn cqi_to_mcs(cqi: u32) -> u32 {
    CQI_TO_MCS[cqi.min(MAX_CQI) as usize]
}

pub fn snr_to_cqi(snr_db: f32) -> u32 {
    SNR_TO_CQI_DB.iter().take_while(|&&th| snr_db >= th).count() as u32
}

pub fn mcs_to_itbs(mcs: u32, dir: Direction) -> u32 {
    let mcs = mcs.min(MAX_MCS);
    match dir {
        Direction::Dl => match mcs {
            0..=9 => mcs,
            10..=16 => mcs - 1,
            _ => mcs - 2,
        },
        Direction::Ul => match mcs {
            0..=10 => mcs,
            11..=20 => mcs - 1,
            _ => mcs - 2,
        },
    }
}

/// Transport block size in bytes for `nof_prb` PRBs at `mcs`.
pub fn tbs_bytes(mcs: u32, nof_prb: u32, dir: Direction) -> u32 {
    if nof_prb == 0 {
        return 0;
    }
    let itbs = mcs_to_itbs(mcs, dir) as usize;
    let bits = TBS_PER_PRB[itbs].saturating_mul(nof_prb).min(MAX_TBS_BITS);
    bits / 8
}

/// Smallest MCS in `0..=max_mcs` whose TBS on `nof_prb` PRBs holds
/// `req_bytes`, or `max_mcs` when none does.
pub fn min_mcs_for_bytes(req_bytes: u32, nof_prb: u32, max_mcs: u32, dir: Direction) -> u32 {
    let max_mcs = max_mcs.min(MAX_MCS);
    (0..=max_mcs)
        .find(|&mcs| tbs_bytes(mcs, nof_prb, dir) >= req_bytes)
        .unwrap_or(max_mcs)
}

/// Approximate DCI payload for a format-1 grant on this bandwidth.
pub fn dci_bits(cell_nof_prb: u32) -> u32 {
    15 + nof_rbgs(cell_nof_prb)
}

/// Smallest aggregation level index whose code rate fits the CQI-derived
/// limit, capped at `max_level`.
pub fn aggr_level_for_cqi(cqi: u32, dci_bits: u32, max_level: u32) -> u32 {
    let limit = (CQI_EFFICIENCY[cqi.min(MAX_CQI) as usize] / 2.0).min(MAX_PDCCH_CODERATE);
    (0..=max_level)
        .find(|&l| {
            let coderate = (dci_bits + 16) as f32 / (BITS_PER_CCE << l) as f32;
            coderate <= limit
        })
        .unwrap_or(max_level)
}
