//! NVML-based GPU readings.
//!
//! [`NvmlProbe`] wraps the NVIDIA Management Library to enumerate GPUs and
//! report per-device load and memory use for slot selection.
//!
//! NVML initialisation is **gracefully optional** -- if the host has no
//! NVIDIA drivers (e.g. a developer laptop), the probe logs a warning and
//! reports zero GPUs instead of panicking. Exclusive dispatch then fails
//! with no available resource.

use nvml_wrapper::Nvml;
use pcbench_core::hardware::slots::{GpuProbe, GpuSnapshot};

const BYTES_PER_MB: u64 = 1024 * 1024;

/// Wraps NVML and answers [`GpuProbe::snapshots`] with fresh readings.
pub struct NvmlProbe {
    /// `None` when NVML could not be initialised (no drivers / no GPU).
    nvml: Option<Nvml>,
}

impl Default for NvmlProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl NvmlProbe {
    /// Attempt to initialise NVML.
    pub fn new() -> Self {
        let nvml = match Nvml::init() {
            Ok(nvml) => {
                tracing::info!("NVML initialised successfully");
                Some(nvml)
            }
            Err(e) => {
                tracing::warn!(error = %e, "NVML unavailable -- no GPU slots will be reported");
                None
            }
        };
        Self { nvml }
    }

    /// Number of GPUs visible to NVML, or 0 if NVML is unavailable.
    pub fn gpu_count(&self) -> u32 {
        self.nvml
            .as_ref()
            .and_then(|nvml| nvml.device_count().ok())
            .unwrap_or(0)
    }

    /// Read a single device. Individual readings that fail are reported
    /// as missing rather than failing the device.
    fn read_device(
        &self,
        nvml: &Nvml,
        idx: u32,
    ) -> Result<GpuSnapshot, nvml_wrapper::error::NvmlError> {
        let device = nvml.device_by_index(idx)?;

        let load = device
            .utilization_rates()
            .ok()
            .map(|u| f64::from(u.gpu) / 100.0);
        let memory = device.memory_info().ok();

        Ok(GpuSnapshot {
            gpu_index: idx,
            load,
            memory_used_mb: memory.as_ref().map(|m| m.used / BYTES_PER_MB),
            memory_total_mb: memory.as_ref().map(|m| m.total / BYTES_PER_MB),
        })
    }
}

impl GpuProbe for NvmlProbe {
    fn snapshots(&self) -> Vec<GpuSnapshot> {
        let nvml = match self.nvml.as_ref() {
            Some(nvml) => nvml,
            None => return Vec::new(),
        };

        let device_count = match nvml.device_count() {
            Ok(n) => n,
            Err(e) => {
                tracing::error!(error = %e, "Failed to query GPU device count");
                return Vec::new();
            }
        };

        let mut snapshots = Vec::with_capacity(device_count as usize);
        for idx in 0..device_count {
            match self.read_device(nvml, idx) {
                Ok(s) => snapshots.push(s),
                Err(e) => {
                    tracing::warn!(gpu_index = idx, error = %e, "Skipping GPU -- reading failed");
                }
            }
        }
        snapshots
    }
}
