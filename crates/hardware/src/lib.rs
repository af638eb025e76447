//! `pcbench-hardware` -- host hardware probes.
//!
//! Currently a single NVML-backed [`collector::NvmlProbe`] that feeds the
//! GPU slot policy in `pcbench-core`.

pub mod collector;

pub use collector::NvmlProbe;
