//! Worker pool sizing.
//!
//! Derives the number of transcode workers from configuration and the CPU
//! core count.

use crate::config::Config;

/// Worker plan derived from configuration and system resources
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerPlan {
    /// Total logical CPU cores available
    pub total_cores: u32,
    /// Number of derivatives materialized at once
    pub workers: u32,
}

impl WorkerPlan {
    /// Derive a worker plan from configuration
    ///
    /// Uses the following rules:
    /// - Detects CPU cores via num_cpus
    /// - An explicit non-zero `parallelism` is used as is
    /// - `parallelism = 0` means one worker per logical core
    pub fn derive(cfg: &Config) -> Self {
        Self::with_cores(cfg.transcode.parallelism, num_cpus::get() as u32)
    }

    /// Derive a plan for a known core count.
    pub fn with_cores(parallelism: u32, total_cores: u32) -> Self {
        let total_cores = total_cores.max(1);
        let workers = if parallelism > 0 {
            parallelism
        } else {
            total_cores
        };

        Self {
            total_cores,
            workers,
        }
    }
}

/// Public function to derive a worker plan from configuration
pub fn derive_plan(cfg: &Config) -> WorkerPlan {
    WorkerPlan::derive(cfg)
}
