//! Bounded parallel fan-out of experiment jobs.
//!
//! CPU mode runs as many jobs at once as the host has cores. Exclusive
//! mode snapshots the qualifying GPUs once, runs one job per device at a
//! time, and hands each job the device it holds through [`WorkerSlot`].
//! A job that errors or panics is counted and logged; the rest of the
//! batch carries on.

use std::future::Future;
use std::num::NonZeroUsize;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use futures::{FutureExt, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use pcbench_core::hardware::slots::{available_slots, GpuProbe, SlotPolicy};

use crate::codec::RunOutcome;
use crate::error::PipelineError;

const PROGRESS_TEMPLATE: &str = "{spinner} [{elapsed_precise}] {bar:40} {pos}/{len} {msg}";

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// Exclusive mode found no GPU under the policy thresholds. Raised
    /// before any job starts.
    #[error("No available GPU (max load {max_load}, max memory {max_memory})")]
    NoAvailableResource { max_load: f64, max_memory: f64 },
}

/// Resources held by one running job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerSlot {
    /// GPU exclusively leased to the job, exclusive mode only.
    pub device: Option<u32>,
}

/// Successful result of one dispatched job.
pub trait JobOutcome {
    /// Whether the job persisted its output. Anything else counts as
    /// aborted.
    fn persisted(&self) -> bool;
}

impl JobOutcome for RunOutcome {
    fn persisted(&self) -> bool {
        matches!(self, RunOutcome::Logged { .. })
    }
}

/// A prepared file.
impl JobOutcome for PathBuf {
    fn persisted(&self) -> bool {
        true
    }
}

/// Per-batch tally of job outcomes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    pub total: usize,
    /// Jobs whose output (report or prepared file) was written.
    pub logged: usize,
    /// Jobs abandoned after a failed encode or decode.
    pub aborted: usize,
    /// Jobs that returned an error or panicked.
    pub failed: usize,
}

impl DispatchSummary {
    fn record<O: JobOutcome>(&mut self, outcome: &JobResult<O>) {
        match outcome {
            Ok(Ok(done)) if done.persisted() => self.logged += 1,
            Ok(Ok(_)) => self.aborted += 1,
            Ok(Err(_)) | Err(_) => self.failed += 1,
        }
    }
}

type JobResult<O> = Result<Result<O, PipelineError>, Box<dyn std::any::Any + Send>>;

pub struct Dispatcher {
    probe: Arc<dyn GpuProbe>,
    policy: SlotPolicy,
    cpu_workers: usize,
    progress: bool,
}

impl Dispatcher {
    pub fn new(probe: Arc<dyn GpuProbe>) -> Self {
        let cpu_workers = std::thread::available_parallelism()
            .map(NonZeroUsize::get)
            .unwrap_or(1);
        Self {
            probe,
            policy: SlotPolicy::default(),
            cpu_workers,
            progress: true,
        }
    }

    pub fn with_policy(mut self, policy: SlotPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Override the CPU-mode pool size. Zero is treated as one.
    pub fn with_cpu_workers(mut self, workers: usize) -> Self {
        self.cpu_workers = workers.max(1);
        self
    }

    /// Toggle the terminal progress bar.
    pub fn with_progress(mut self, progress: bool) -> Self {
        self.progress = progress;
        self
    }

    pub fn cpu_workers(&self) -> usize {
        self.cpu_workers
    }

    pub fn policy(&self) -> &SlotPolicy {
        &self.policy
    }

    /// Run `job` once per item and wait for all of them.
    ///
    /// Every item is dispatched exactly once. Completion order is
    /// unspecified.
    pub async fn dispatch<I, O, F, Fut>(
        &self,
        items: Vec<I>,
        use_exclusive_resource: bool,
        job: F,
    ) -> Result<DispatchSummary, DispatchError>
    where
        F: Fn(I, WorkerSlot) -> Fut,
        Fut: Future<Output = Result<O, PipelineError>>,
        O: JobOutcome,
    {
        let devices = if use_exclusive_resource {
            let devices = available_slots(self.probe.as_ref(), &self.policy);
            if devices.is_empty() {
                tracing::error!(
                    max_load = self.policy.max_load,
                    max_memory = self.policy.max_memory,
                    "No available GPU under the configured thresholds",
                );
                return Err(DispatchError::NoAvailableResource {
                    max_load: self.policy.max_load,
                    max_memory: self.policy.max_memory,
                });
            }
            Some(devices)
        } else {
            None
        };

        let workers = devices.as_ref().map_or(self.cpu_workers, Vec::len);
        let pool = DevicePool::new(devices.clone().unwrap_or_default());
        let mut summary = DispatchSummary {
            total: items.len(),
            ..Default::default()
        };

        tracing::info!(
            jobs = summary.total,
            workers,
            ?devices,
            "Dispatching jobs",
        );

        let progress = self.progress_bar(summary.total);
        let exclusive = devices.is_some();

        let mut results = futures::stream::iter(items)
            .map(|item| {
                let lease = exclusive.then(|| pool.acquire());
                let slot = WorkerSlot {
                    device: lease.as_ref().and_then(|l| l.device),
                };
                let started = panic::catch_unwind(AssertUnwindSafe(|| job(item, slot)));
                async move {
                    let result = match started {
                        Ok(fut) => AssertUnwindSafe(fut).catch_unwind().await,
                        Err(payload) => Err(payload),
                    };
                    drop(lease);
                    result
                }
            })
            .buffer_unordered(workers);

        while let Some(result) = results.next().await {
            match &result {
                Ok(Err(e)) => tracing::error!(error = %e, "Job failed"),
                Err(_) => tracing::error!("Job panicked"),
                Ok(Ok(_)) => {}
            }
            summary.record(&result);
            progress.inc(1);
        }
        progress.finish_and_clear();

        tracing::info!(
            total = summary.total,
            logged = summary.logged,
            aborted = summary.aborted,
            failed = summary.failed,
            "Dispatch finished",
        );
        Ok(summary)
    }

    fn progress_bar(&self, len: usize) -> ProgressBar {
        if !self.progress {
            return ProgressBar::hidden();
        }
        let bar = ProgressBar::new(len as u64);
        if let Ok(style) = ProgressStyle::default_bar().template(PROGRESS_TEMPLATE) {
            bar.set_style(style);
        }
        bar
    }
}

/// Free list of leasable devices.
///
/// `buffer_unordered` never runs more futures than there are devices, so
/// a lease is always available when a new job is created.
struct DevicePool {
    free: Mutex<Vec<u32>>,
}

impl DevicePool {
    fn new(mut devices: Vec<u32>) -> Self {
        // Leases pop from the back; keep the preferred device there.
        devices.reverse();
        Self {
            free: Mutex::new(devices),
        }
    }

    fn acquire(&self) -> DeviceLease<'_> {
        let device = self
            .free
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop();
        DeviceLease { pool: self, device }
    }
}

/// Returns its device to the pool on drop.
struct DeviceLease<'a> {
    pool: &'a DevicePool,
    device: Option<u32>,
}

impl Drop for DeviceLease<'_> {
    fn drop(&mut self) {
        if let Some(device) = self.device.take() {
            self.pool
                .free
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(device);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
