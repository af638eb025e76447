//! GPU slot selection.
//!
//! The policy logic is pure and probe-agnostic: a [`slots::GpuProbe`]
//! supplies fresh per-device readings and [`slots::select_slots`] decides
//! which devices are free enough to take an exclusive job.

pub mod slots;
