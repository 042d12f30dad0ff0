// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Drives the scheduler with synthetic traffic.
//!
//! Each simulated TTI, a pool of reporting threads pushes buffer reports,
//! CQI and HARQ feedback for disjoint sets of terminals, then the DL and UL
//! grant lists are pulled for every carrier. Feedback is drawn against a
//! fixed block error rate.
//!
//! Run with: cargo run --package enb-sched --bin sched-sim -- --help

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use figment::providers::{Format, Toml};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;

use enb_sched::config::SchedConfig;
use enb_sched::{
    BearerConfig, BearerDirection, GrantSource, Rnti, SchedConfigurator, SchedError, SchedReportSink,
    Scheduler, TtiPoint, UeCarrierConfig, UeConfig, UeMetrics, logging,
};

const FIRST_RNTI: u16 = 0x46;
const DRB_LCID: u32 = 3;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum PolicyArg {
    RoundRobin,
    ProportionalFair,
}

impl PolicyArg {
    fn as_config(self) -> &'static str {
        match self {
            PolicyArg::RoundRobin => "round_robin",
            PolicyArg::ProportionalFair => "proportional_fair",
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "sched-sim")]
#[command(about = "Synthetic-traffic driver for the eNB MAC scheduler")]
struct Args {
    /// Number of attached terminals
    #[arg(long, default_value = "8")]
    ues: u16,

    /// Number of TTIs to simulate
    #[arg(long, default_value = "2000")]
    ttis: u32,

    /// New-data ordering policy
    #[arg(long, value_enum, default_value = "round-robin")]
    policy: PolicyArg,

    /// Block error rate applied to every transmission (0.0 to 1.0)
    #[arg(long, default_value = "0.1")]
    bler: f64,

    /// Mean DL RLC occupancy reported per terminal per TTI
    #[arg(long, default_value = "300")]
    dl_load: u32,

    /// Mean UL bytes arriving per terminal per TTI
    #[arg(long, default_value = "100")]
    ul_load: u32,

    /// Threads delivering reports
    #[arg(long, default_value = "4")]
    workers: usize,

    /// Random seed for reproducibility
    #[arg(long, default_value = "42")]
    seed: u64,

    /// TOML file merged over the default configuration
    #[arg(long, env = "ENB_SCHED_CONFIG_PATH")]
    config: Option<PathBuf>,

    /// Print the summary as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Default, Serialize)]
struct Summary {
    ttis: u32,
    nof_ues: usize,
    nof_carriers: usize,
    policy: &'static str,
    dl_grants: u64,
    ul_grants: u64,
    dl_retx_grants: u64,
    ul_retx_grants: u64,
    dl_bytes: u64,
    ul_bytes: u64,
    dl_acks: u64,
    dl_nacks: u64,
    feedback_violations: u64,
    deadline_misses: u64,
    mean_pass_us: f64,
    max_pass_us: u64,
    ues: Vec<UeMetrics>,
}

/// Feedback owed to one terminal.
#[derive(Debug, Clone, Copy)]
struct Feedback {
    rnti: Rnti,
    enb_cc_idx: u32,
    nof_tb: u32,
}

fn load_config(args: &Args) -> Result<SchedConfig> {
    let mut figment = SchedConfig::figment();
    if let Some(path) = &args.config {
        figment = figment.merge(Toml::file(path));
    }
    let figment = figment.merge(("policy.kind", args.policy.as_config()));
    SchedConfig::extract_from(figment).context("loading scheduler configuration")
}

fn ue_config(nof_carriers: usize) -> UeConfig {
    let mut cfg = UeConfig::default();
    cfg.bearers.insert(
        DRB_LCID,
        BearerConfig {
            direction: BearerDirection::Both,
            priority: 5,
            lcg: 1,
        },
    );
    cfg.carriers = (0..nof_carriers as u32)
        .map(|enb_cc_idx| UeCarrierConfig {
            enb_cc_idx,
            active: true,
        })
        .collect();
    cfg
}

/// Reports for one TTI from one worker: traffic arrivals, periodic CQI and
/// the HARQ feedback due at `tti_rx`.
fn deliver_reports(
    sched: &Scheduler,
    args: &Args,
    tti_rx: TtiPoint,
    rntis: &[Rnti],
    dl_feedback: &[Feedback],
    ul_feedback: &[Feedback],
    rng: &mut StdRng,
) -> (u64, u64, u64) {
    let (mut acks, mut nacks, mut violations) = (0, 0, 0);
    let nof_carriers = sched.cells().map_or(1, |c| c.params().len()) as u32;

    for &rnti in rntis {
        // RLC reports its whole occupancy, not the arrivals
        let occupancy = rng.random_range(0..=args.dl_load * 2);
        let _ = sched.dl_rlc_buffer_state(rnti, DRB_LCID, occupancy, 0);
        if rng.random_bool(0.2) {
            let _ = sched.ul_bsr(rnti, 1, rng.random_range(0..=args.ul_load * 10));
        }
        if rng.random_bool(0.01) {
            let _ = sched.ul_sr_info(tti_rx, rnti);
        }
        if tti_rx.to_uint() % 5 == u32::from(rnti.0) % 5 {
            for cc in 0..nof_carriers {
                let _ = sched.dl_cqi_info(tti_rx, rnti, cc, rng.random_range(7..=15));
                let _ = sched.ul_snr_info(tti_rx, rnti, cc, rng.random_range(0.0..25.0));
                let _ = sched.dl_ri_info(tti_rx, rnti, cc, rng.random_range(1..=2));
            }
        }
    }

    for fb in dl_feedback.iter().filter(|fb| rntis.contains(&fb.rnti)) {
        for tb in 0..fb.nof_tb {
            let ack = !rng.random_bool(args.bler);
            match sched.dl_ack_info(tti_rx, fb.rnti, fb.enb_cc_idx, tb, ack) {
                Ok(_) if ack => acks += 1,
                Ok(_) => nacks += 1,
                Err(_) => violations += 1,
            }
        }
    }
    for fb in ul_feedback.iter().filter(|fb| rntis.contains(&fb.rnti)) {
        let crc = !rng.random_bool(args.bler);
        if sched.ul_crc_info(tti_rx, fb.rnti, fb.enb_cc_idx, crc).is_err() {
            violations += 1;
        }
    }
    (acks, nacks, violations)
}

fn main() -> Result<()> {
    logging::init();
    let args = Args::parse();
    anyhow::ensure!((0.0..=1.0).contains(&args.bler), "--bler must be within [0, 1]");

    let config = load_config(&args)?;
    let nof_carriers = config.nof_carriers();
    let sched = Scheduler::with_config(config)?;
    let policy = sched.cells()?.policy_name();

    let rntis: Vec<Rnti> = (0..args.ues).map(|i| Rnti(FIRST_RNTI + i)).collect();
    for &rnti in &rntis {
        sched.ue_cfg(rnti, ue_config(nof_carriers))?;
    }
    tracing::info!(nof_ues = rntis.len(), ttis = args.ttis, policy, "simulation started");

    let mut summary = Summary {
        ttis: args.ttis,
        nof_ues: rntis.len(),
        nof_carriers,
        policy,
        ..Default::default()
    };
    // feedback keyed by the TTI it is received at
    let mut dl_pending: HashMap<u32, Vec<Feedback>> = HashMap::new();
    let mut ul_pending: HashMap<u32, Vec<Feedback>> = HashMap::new();
    let mut total_pass = Duration::ZERO;
    let chunk = rntis.len().div_ceil(args.workers.max(1)).max(1);

    for t in 0..args.ttis {
        let tti_rx = TtiPoint::from(t);
        let dl_fb = dl_pending.remove(&tti_rx.to_uint()).unwrap_or_default();
        let ul_fb = ul_pending.remove(&tti_rx.to_uint()).unwrap_or_default();

        let totals: Vec<(u64, u64, u64)> = std::thread::scope(|s| {
            let handles: Vec<_> = rntis
                .chunks(chunk)
                .enumerate()
                .map(|(w, part)| {
                    let (sched, args, dl_fb, ul_fb) = (&sched, &args, &dl_fb, &ul_fb);
                    s.spawn(move || {
                        let mut rng = StdRng::seed_from_u64(args.seed ^ (u64::from(t) << 8) ^ w as u64);
                        deliver_reports(sched, args, tti_rx, part, dl_fb, ul_fb, &mut rng)
                    })
                })
                .collect();
            handles.into_iter().filter_map(|h| h.join().ok()).collect()
        });
        for (acks, nacks, violations) in totals {
            summary.dl_acks += acks;
            summary.dl_nacks += nacks;
            summary.feedback_violations += violations;
        }

        for cc in 0..nof_carriers as u32 {
            let start = Instant::now();
            let dl = match sched.dl_sched(tti_rx, cc) {
                Ok(dl) => dl,
                Err(SchedError::DeadlineMissed { .. }) => {
                    summary.deadline_misses += 1;
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            let ul = sched.ul_sched(tti_rx, cc)?;
            let elapsed = start.elapsed();
            total_pass += elapsed;
            summary.max_pass_us = summary.max_pass_us.max(elapsed.as_micros() as u64);

            for grant in &dl {
                summary.dl_grants += 1;
                if grant.is_retx() {
                    summary.dl_retx_grants += 1;
                } else {
                    summary.dl_bytes += u64::from(grant.total_bytes());
                    for tb in 0..grant.tbs.len() as u32 {
                        // the MAC would assemble the PDU here
                        let _ = sched.with_tb_buffer(grant.rnti, cc, grant.pid, tb, |buf| buf.fill(0));
                    }
                }
                dl_pending
                    .entry((grant.tti_tx + 4).to_uint())
                    .or_default()
                    .push(Feedback {
                        rnti: grant.rnti,
                        enb_cc_idx: cc,
                        nof_tb: grant.tbs.len() as u32,
                    });
            }
            for grant in &ul {
                summary.ul_grants += 1;
                if grant.tb.is_retx {
                    summary.ul_retx_grants += 1;
                } else {
                    summary.ul_bytes += u64::from(grant.tb.tbs);
                }
                ul_pending.entry(grant.tti_tx.to_uint()).or_default().push(Feedback {
                    rnti: grant.rnti,
                    enb_cc_idx: cc,
                    nof_tb: 1,
                });
            }
        }
    }

    let passes = u64::from(args.ttis) * nof_carriers as u64;
    summary.mean_pass_us = total_pass.as_micros() as f64 / passes.max(1) as f64;
    summary.ues = sched.all_ue_metrics();
    tracing::info!(
        dl_grants = summary.dl_grants,
        ul_grants = summary.ul_grants,
        deadline_misses = summary.deadline_misses,
        "simulation finished"
    );

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!(
            "{} TTIs, {} UEs, {} carrier(s), policy {}",
            summary.ttis, summary.nof_ues, summary.nof_carriers, summary.policy
        );
        println!(
            "DL: {} grants ({} retx), {} bytes; acks {} / nacks {}",
            summary.dl_grants, summary.dl_retx_grants, summary.dl_bytes, summary.dl_acks, summary.dl_nacks
        );
        println!(
            "UL: {} grants ({} retx), {} bytes",
            summary.ul_grants, summary.ul_retx_grants, summary.ul_bytes
        );
        println!(
            "pass time: mean {:.1}us, max {}us; deadline misses {}; feedback violations {}",
            summary.mean_pass_us, summary.max_pass_us, summary.deadline_misses, summary.feedback_violations
        );
        for ue in &summary.ues {
            println!(
                "  rnti=0x{:x} dl_bytes={} ul_bytes={} dl_harq_fail={} ul_harq_fail={}",
                ue.rnti(),
                ue.dl_bytes_granted(),
                ue.ul_bytes_granted(),
                ue.dl_harq_failures(),
                ue.ul_harq_failures()
            );
        }
    }
    Ok(())
}
