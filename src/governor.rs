//! # Resource Governor Module
//!
//! Applicato una sola volta all'avvio, prima di qualunque stage.
//!
//! ## Responsabilità:
//! - Limita il data segment del processo (`RLIMIT_DATA`) a `max_memory` GB
//!   su Unix; altrove emette solo un warning
//! - Definisce l'ambiente ereditato da ogni tool lanciato
//!   (`TF_FORCE_GPU_ALLOW_GROWTH`, `OMP_NUM_THREADS` con acceleratore)
//! - Deriva il piano di esecuzione: numero di worker e thread per
//!   l'acceleratore
//!
//! Il limite di memoria vale per il processo coordinatore e, per
//! ereditarietà, per i figli spawnati dopo l'applicazione.

use crate::config::{GpuVendor, JobConfig};
use anyhow::Result;
use tracing::info;

const GIB: u64 = 1024 * 1024 * 1024;

/// How the transform fan-out runs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionPlan {
    /// Concurrent transform workers
    pub workers: usize,
    /// True when an accelerator requires one synchronous call
    pub forced_single: bool,
    /// Provider name forwarded to the transform worker
    pub execution_provider: &'static str,
    /// Threads per accelerator worker (None on CPU runs)
    pub accelerator_threads: Option<usize>,
    /// Environment inherited by every spawned tool
    pub child_env: Vec<(String, String)>,
}

impl ExecutionPlan {
    /// Plain CPU plan with `workers` workers
    pub fn cpu(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
            forced_single: false,
            execution_provider: "cpu",
            accelerator_threads: None,
            child_env: vec![("TF_FORCE_GPU_ALLOW_GROWTH".to_string(), "true".to_string())],
        }
    }
}

pub struct ResourceGovernor;

impl ResourceGovernor {
    /// Derive the execution plan for a job on the current platform
    pub fn plan(job: &JobConfig) -> ExecutionPlan {
        Self::plan_for(job, cfg!(target_os = "macos"))
    }

    fn plan_for(job: &JobConfig, is_macos: bool) -> ExecutionPlan {
        let mut plan = ExecutionPlan::cpu(job.cpu_cores);

        if is_macos {
            plan.workers = 1;
        }

        if let Some(vendor) = job.gpu_vendor {
            plan.workers = 1;
            plan.forced_single = true;
            plan.execution_provider = vendor.execution_provider();
            plan.accelerator_threads = Some(match vendor {
                GpuVendor::Amd => 1,
                _ => job.gpu_threads,
            });
            plan.child_env.push(("OMP_NUM_THREADS".to_string(), "1".to_string()));
        }

        plan
    }

    /// Apply the memory ceiling and return the execution plan
    pub fn apply(job: &JobConfig) -> Result<ExecutionPlan> {
        if let Some(gb) = job.max_memory_gb {
            Self::limit_memory(gb.saturating_mul(GIB))?;
        }

        let plan = Self::plan(job);
        info!(
            "Execution plan: {} worker(s), provider {}{}",
            plan.workers,
            plan.execution_provider,
            plan.accelerator_threads
                .map(|t| format!(", {} accelerator thread(s)", t))
                .unwrap_or_default()
        );
        Ok(plan)
    }

    #[cfg(unix)]
    fn limit_memory(bytes: u64) -> Result<()> {
        let limit = libc::rlimit {
            rlim_cur: bytes as libc::rlim_t,
            rlim_max: bytes as libc::rlim_t,
        };
        // SAFETY: `limit` is a valid rlimit for the duration of the call
        let rc = unsafe { libc::setrlimit(libc::RLIMIT_DATA, &limit) };
        if rc != 0 {
            return Err(anyhow::anyhow!(
                "Failed to limit memory to {} bytes: {}",
                bytes,
                std::io::Error::last_os_error()
            ));
        }
        tracing::debug!("RLIMIT_DATA set to {} bytes", bytes);
        Ok(())
    }

    #[cfg(not(unix))]
    fn limit_memory(bytes: u64) -> Result<()> {
        tracing::warn!("Memory limit of {} bytes is not enforced on this platform", bytes);
        Ok(())
    }
}
