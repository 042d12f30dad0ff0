// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Scheduler logging.
//!
//! Logging can take two forms: `READABLE` or `JSONL`. The default is `READABLE`. `JSONL`
//! can be enabled by setting the `ENB_SCHED_LOGGING_JSONL` environment variable to `1`.
//!
//! Filters are read from `ENB_SCHED_LOG` using the usual `EnvFilter` syntax, for example
//! `ENB_SCHED_LOG=info,enb_sched::carrier=trace`. The default level is `info`.
//!
//! To use local timezone for logging timestamps, set `ENB_SCHED_LOG_USE_LOCAL_TZ` to `1`.

use std::sync::Once;

use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::fmt::time::{FormatTime, LocalTime, UtcTime};
use tracing_subscriber::prelude::*;

/// ENV used to set the log level
const FILTER_ENV: &str = "ENB_SCHED_LOG";

/// ENV switching output to one JSON object per line
const JSONL_ENV: &str = "ENB_SCHED_LOGGING_JSONL";

const LOCAL_TZ_ENV: &str = "ENB_SCHED_LOG_USE_LOCAL_TZ";

/// Once instance to ensure the logger is only initialized once
static INIT: Once = Once::new();

fn env_is_truthy(name: &str) -> bool {
    std::env::var(name).is_ok_and(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "on" | "yes"))
}

pub fn jsonl_logging_enabled() -> bool {
    env_is_truthy(JSONL_ENV)
}

/// Initialize the logger
pub fn init() {
    INIT.call_once(setup_logging);
}

fn filters() -> EnvFilter {
    EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .with_env_var(FILTER_ENV)
        .from_env_lossy()
}

fn setup_logging() {
    let filter_layer = filters();
    // each builder method returns a specialized type, so both branches spell
    // out the full layer
    if jsonl_logging_enabled() {
        let l = fmt::layer()
            .json()
            .with_current_span(false)
            .with_timer(TimeFormatter::new())
            .with_writer(std::io::stderr)
            .with_filter(filter_layer);
        tracing_subscriber::registry().with(l).init();
    } else {
        let l = fmt::layer()
            .event_format(fmt::format().compact().with_timer(TimeFormatter::new()))
            .with_writer(std::io::stderr)
            .with_filter(filter_layer);
        tracing_subscriber::registry().with(l).init();
    }
}

struct TimeFormatter {
    use_local_tz: bool,
}

impl TimeFormatter {
    fn new() -> Self {
        Self {
            use_local_tz: env_is_truthy(LOCAL_TZ_ENV),
        }
    }
}

impl FormatTime for TimeFormatter {
    fn format_time(&self, w: &mut fmt::format::Writer<'_>) -> std::fmt::Result {
        if self.use_local_tz {
            LocalTime::rfc_3339().format_time(w)
        } else {
            UtcTime::rfc_3339().format_time(w)
        }
    }
}
