//! Selection of exclusive GPU slots.
//!
//! Pure logic: the caller supplies device readings through a [`GpuProbe`]
//! and gets back the IDs of the devices that qualify under a
//! [`SlotPolicy`]. The probe is queried fresh on every call; nothing is
//! cached or reserved.

use serde::Serialize;

/// Default number of devices considered.
pub const DEFAULT_SLOT_LIMIT: usize = 8;

/// Default maximum load fraction for a device to qualify.
pub const DEFAULT_MAX_LOAD: f64 = 0.5;

/// Default maximum memory-utilization fraction for a device to qualify.
pub const DEFAULT_MAX_MEMORY: f64 = 0.2;

/// A single reading of one GPU.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GpuSnapshot {
    pub gpu_index: u32,
    /// Compute load in `0.0..=1.0`, `None` when the device does not report it.
    pub load: Option<f64>,
    pub memory_used_mb: Option<u64>,
    pub memory_total_mb: Option<u64>,
}

impl GpuSnapshot {
    /// Fraction of device memory in use, if both readings are present.
    pub fn memory_utilization(&self) -> Option<f64> {
        match (self.memory_used_mb, self.memory_total_mb) {
            (Some(used), Some(total)) if total > 0 => Some(used as f64 / total as f64),
            _ => None,
        }
    }
}

/// Source of fresh GPU readings.
pub trait GpuProbe: Send + Sync {
    fn snapshots(&self) -> Vec<GpuSnapshot>;
}

/// Order in which qualifying devices are taken before the limit applies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SlotOrder {
    /// Ascending device index.
    #[default]
    First,
    /// Descending device index.
    Last,
    /// Least loaded first.
    Load,
    /// Least memory utilization first.
    Memory,
}

/// Thresholds deciding which devices count as available.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SlotPolicy {
    pub order: SlotOrder,
    pub limit: usize,
    pub max_load: f64,
    pub max_memory: f64,
}

impl Default for SlotPolicy {
    fn default() -> Self {
        Self {
            order: SlotOrder::First,
            limit: DEFAULT_SLOT_LIMIT,
            max_load: DEFAULT_MAX_LOAD,
            max_memory: DEFAULT_MAX_MEMORY,
        }
    }
}

/// Pick the qualifying device IDs from `snapshots`.
///
/// A device qualifies when both its load and memory utilization are
/// reported and at or below the policy thresholds. Devices with missing
/// readings never qualify.
pub fn select_slots(snapshots: &[GpuSnapshot], policy: &SlotPolicy) -> Vec<u32> {
    let mut qualifying: Vec<(&GpuSnapshot, f64, f64)> = snapshots
        .iter()
        .filter_map(|snap| {
            let load = snap.load?;
            let memory = snap.memory_utilization()?;
            (load <= policy.max_load && memory <= policy.max_memory).then_some((snap, load, memory))
        })
        .collect();

    match policy.order {
        SlotOrder::First => qualifying.sort_by_key(|(s, _, _)| s.gpu_index),
        SlotOrder::Last => qualifying.sort_by_key(|(s, _, _)| std::cmp::Reverse(s.gpu_index)),
        SlotOrder::Load => qualifying.sort_by(|a, b| a.1.total_cmp(&b.1)),
        SlotOrder::Memory => qualifying.sort_by(|a, b| a.2.total_cmp(&b.2)),
    }

    qualifying
        .into_iter()
        .take(policy.limit)
        .map(|(s, _, _)| s.gpu_index)
        .collect()
}

/// Query `probe` and apply `policy`.
pub fn available_slots(probe: &dyn GpuProbe, policy: &SlotPolicy) -> Vec<u32> {
    let snapshots = probe.snapshots();
    let slots = select_slots(&snapshots, policy);
    tracing::debug!(
        detected = snapshots.len(),
        available = slots.len(),
        ?slots,
        "Queried GPU slots",
    );
    slots
}

/// A probe returning a fixed set of readings.
#[derive(Debug, Clone, Default)]
pub struct StaticProbe(pub Vec<GpuSnapshot>);

impl GpuProbe for StaticProbe {
    fn snapshots(&self) -> Vec<GpuSnapshot> {
        self.0.clone()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
