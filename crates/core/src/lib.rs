//! Domain logic for point-cloud codec benchmarking.
//!
//! Everything here is free of subprocess management: configuration,
//! experiment layout, file discovery, PLY header probing, and GPU slot
//! selection. The `pcbench-pipeline` crate drives external tools on top.

pub mod config;
pub mod discovery;
pub mod error;
pub mod hardware;
pub mod paths;
pub mod ply;
pub mod rate;
