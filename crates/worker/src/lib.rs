//! Process-level wiring for the benchmark worker.
//!
//! [`Settings`] are read from the environment, [`build_codec`] turns them
//! into a configured codec at the requested rate, and [`run`] evaluates
//! that codec over one dataset.
//!
//! # Environment variables
//!
//! | Variable                  | Required | Default              | Description                         |
//! |---------------------------|----------|----------------------|-------------------------------------|
//! | `PCBENCH_CODEC`           | yes      | --                   | `gpcc` or `pcgcv1`                  |
//! | `PCBENCH_CODEC_CONFIG`    | yes      | --                   | Codec YAML file                     |
//! | `PCBENCH_DATASET`         | yes      | --                   | Dataset name in the catalog         |
//! | `PCBENCH_DATASETS_CONFIG` | no       | `cfgs/datasets.yml`  | Dataset catalog YAML file           |
//! | `PCBENCH_EXP_DIR`         | yes      | --                   | Experiment output root              |
//! | `PCBENCH_RATE`            | yes      | --                   | Rate tag, e.g. `r1`                 |
//! | `PCBENCH_METRIC_BIN`      | no       | `pc_error`           | Distortion tool                     |
//! | `PCBENCH_WORKERS`         | no       | CPU count            | Worker count for CPU-bound codecs   |

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use pcbench_core::config::{DatasetCatalog, DEFAULT_DATASETS_CONFIG};
use pcbench_core::error::CoreError;
use pcbench_hardware::NvmlProbe;
use pcbench_pipeline::codecs::{Gpcc, Pcgcv1};
use pcbench_pipeline::metrics::{PcErrorBridge, DEFAULT_PC_ERROR_BIN};
use pcbench_pipeline::{Codec, DispatchSummary, Dispatcher, PipelineError};

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("{0} environment variable is required")]
    MissingVar(&'static str),

    #[error("{var} has an invalid value: {value}")]
    InvalidVar { var: &'static str, value: String },

    #[error("Invalid rate control parameters: {0}")]
    InvalidRate(String),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

/// Supported codecs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecKind {
    Gpcc,
    Pcgcv1,
}

impl FromStr for CodecKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gpcc" | "tmc13" => Ok(Self::Gpcc),
            "pcgcv1" => Ok(Self::Pcgcv1),
            _ => Err(()),
        }
    }
}

impl fmt::Display for CodecKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Gpcc => f.write_str("gpcc"),
            Self::Pcgcv1 => f.write_str("pcgcv1"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub codec: CodecKind,
    pub codec_config: PathBuf,
    pub dataset: String,
    pub datasets_config: PathBuf,
    pub exp_dir: PathBuf,
    pub rate: String,
    pub metric_bin: PathBuf,
    /// CPU worker override. `None` uses every available core.
    pub workers: Option<usize>,
}

impl Settings {
    pub fn from_env() -> Result<Self, WorkerError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from an arbitrary key lookup. Empty values count as
    /// unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, WorkerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let require = |key: &'static str| get(key).ok_or(WorkerError::MissingVar(key));

        let codec_raw = require("PCBENCH_CODEC")?;
        let codec = codec_raw.parse::<CodecKind>().map_err(|_| WorkerError::InvalidVar {
            var: "PCBENCH_CODEC",
            value: codec_raw.clone(),
        })?;

        let workers = match get("PCBENCH_WORKERS") {
            Some(raw) => Some(
                raw.trim()
                    .parse::<usize>()
                    .ok()
                    .filter(|n| *n > 0)
                    .ok_or(WorkerError::InvalidVar {
                        var: "PCBENCH_WORKERS",
                        value: raw,
                    })?,
            ),
            None => None,
        };

        Ok(Self {
            codec,
            codec_config: require("PCBENCH_CODEC_CONFIG")?.into(),
            dataset: require("PCBENCH_DATASET")?,
            datasets_config: get("PCBENCH_DATASETS_CONFIG")
                .unwrap_or_else(|| DEFAULT_DATASETS_CONFIG.to_string())
                .into(),
            exp_dir: require("PCBENCH_EXP_DIR")?.into(),
            rate: require("PCBENCH_RATE")?,
            metric_bin: get("PCBENCH_METRIC_BIN")
                .unwrap_or_else(|| DEFAULT_PC_ERROR_BIN.to_string())
                .into(),
            workers,
        })
    }
}

/// Load the codec's configuration and select `settings.rate`.
pub async fn build_codec(settings: &Settings) -> Result<Box<dyn Codec>, WorkerError> {
    let mut codec: Box<dyn Codec> = match settings.codec {
        CodecKind::Gpcc => Box::new(Gpcc::from_file(&settings.codec_config).await?),
        CodecKind::Pcgcv1 => Box::new(Pcgcv1::from_file(&settings.codec_config).await?),
    };
    if !codec.set_rate(&settings.rate) {
        return Err(WorkerError::InvalidRate(settings.rate.clone()));
    }
    Ok(codec)
}

/// Run the configured codec over the configured dataset.
pub async fn run(settings: &Settings) -> Result<DispatchSummary, WorkerError> {
    let codec = build_codec(settings).await?;
    let catalog = DatasetCatalog::load(&settings.datasets_config).await?;

    let probe = NvmlProbe::new();
    tracing::info!(gpu_count = probe.gpu_count(), "GPU detection complete");

    let mut dispatcher = Dispatcher::new(Arc::new(probe));
    if let Some(workers) = settings.workers {
        dispatcher = dispatcher.with_cpu_workers(workers);
    }
    let bridge = PcErrorBridge::new(&settings.metric_bin);

    let summary = codec
        .run_dataset(
            &settings.dataset,
            &settings.exp_dir,
            &catalog,
            &dispatcher,
            &bridge,
        )
        .await?;
    Ok(summary)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use assert_matches::assert_matches;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    const REQUIRED: &[(&str, &str)] = &[
        ("PCBENCH_CODEC", "gpcc"),
        ("PCBENCH_CODEC_CONFIG", "cfgs/gpcc.yml"),
        ("PCBENCH_DATASET", "8iVFB"),
        ("PCBENCH_EXP_DIR", "/exp/gpcc"),
        ("PCBENCH_RATE", "r3"),
    ];

    #[test]
    fn defaults_fill_optional_settings() {
        let settings = Settings::from_lookup(lookup(REQUIRED)).expect("settings");
        assert_eq!(settings.codec, CodecKind::Gpcc);
        assert_eq!(settings.datasets_config, PathBuf::from(DEFAULT_DATASETS_CONFIG));
        assert_eq!(settings.metric_bin, PathBuf::from("pc_error"));
        assert_eq!(settings.workers, None);
        assert_eq!(settings.rate, "r3");
    }

    #[test]
    fn missing_required_variable() {
        let result = Settings::from_lookup(lookup(&REQUIRED[..4]));
        assert_matches!(result, Err(WorkerError::MissingVar("PCBENCH_RATE")));
    }

    #[test]
    fn empty_value_counts_as_missing() {
        let mut pairs = REQUIRED.to_vec();
        pairs[2] = ("PCBENCH_DATASET", "  ");
        let result = Settings::from_lookup(lookup(&pairs));
        assert_matches!(result, Err(WorkerError::MissingVar("PCBENCH_DATASET")));
    }

    #[test]
    fn unknown_codec_is_rejected() {
        let mut pairs = REQUIRED.to_vec();
        pairs[0] = ("PCBENCH_CODEC", "draco");
        let result = Settings::from_lookup(lookup(&pairs));
        assert_matches!(
            result,
            Err(WorkerError::InvalidVar { var: "PCBENCH_CODEC", .. })
        );
    }

    #[test]
    fn worker_override_must_be_positive() {
        let mut pairs = REQUIRED.to_vec();
        pairs.push(("PCBENCH_WORKERS", "4"));
        let settings = Settings::from_lookup(lookup(&pairs)).expect("settings");
        assert_eq!(settings.workers, Some(4));

        pairs.pop();
        pairs.push(("PCBENCH_WORKERS", "0"));
        assert_matches!(
            Settings::from_lookup(lookup(&pairs)),
            Err(WorkerError::InvalidVar { var: "PCBENCH_WORKERS", .. })
        );
    }

    #[test]
    fn codec_names_round_trip_case_insensitively() {
        assert_eq!("PCGCv1".parse::<CodecKind>(), Ok(CodecKind::Pcgcv1));
        assert_eq!("tmc13".parse::<CodecKind>(), Ok(CodecKind::Gpcc));
        assert_eq!(CodecKind::Pcgcv1.to_string(), "pcgcv1");
    }
}
