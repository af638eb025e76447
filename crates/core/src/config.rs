//! YAML configuration for datasets and codecs.
//!
//! Both files are read once and never mutated by the pipeline.
//!
//! A datasets file maps dataset names to their directories and options:
//!
//! ```yaml
//! 8iVFB:
//!   dataset_dir: /data/8iVFB
//!   dataset_w_normal_dir: /data/8iVFB_n
//!   test_pattern: "**/*.ply"
//!   color: 1
//!   resolution: 1023
//! ```
//!
//! A codec file carries shared keys next to one block per rate tag:
//!
//! ```yaml
//! encoder: /opt/tmc13/tmc3
//! decoder: /opt/tmc13/tmc3
//! bin_suffix: .bin
//! r1:
//!   positionQuantizationScale: 0.125
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};

use crate::error::CoreError;
use crate::rate::RateTag;

/// Default location of the datasets file, relative to the working directory.
pub const DEFAULT_DATASETS_CONFIG: &str = "cfgs/datasets.yml";

/// Read and parse a YAML file into `T`.
pub async fn load_yaml<T: DeserializeOwned>(path: &Path) -> Result<T, CoreError> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| CoreError::io(path, e))?;
    serde_yaml::from_str(&raw).map_err(|source| CoreError::Yaml {
        path: path.to_path_buf(),
        source,
    })
}

// ---------------------------------------------------------------------------
// Datasets
// ---------------------------------------------------------------------------

/// One dataset entry.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct DatasetConfig {
    /// Root of the input point clouds.
    #[serde(rename = "dataset_dir")]
    pub source_dir: PathBuf,
    /// Root of the same point clouds with normals. Falls back to
    /// `source_dir` when absent.
    #[serde(rename = "dataset_w_normal_dir", default)]
    pub normal_dir: Option<PathBuf>,
    /// Glob selecting the test files under `source_dir`.
    pub test_pattern: String,
    /// Whether color metrics are computed.
    #[serde(default, deserialize_with = "bool_or_int")]
    pub color: bool,
    /// Known maximum nearest-neighbour distance, if precomputed.
    #[serde(default)]
    pub resolution: Option<u32>,
}

impl DatasetConfig {
    pub fn normal_dir(&self) -> &Path {
        self.normal_dir.as_deref().unwrap_or(&self.source_dir)
    }
}

/// All datasets keyed by name.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct DatasetCatalog {
    datasets: BTreeMap<String, DatasetConfig>,
}

impl DatasetCatalog {
    pub async fn load(path: &Path) -> Result<Self, CoreError> {
        let catalog: Self = load_yaml(path).await?;
        tracing::debug!(path = %path.display(), count = catalog.datasets.len(), "Loaded dataset catalog");
        Ok(catalog)
    }

    pub fn from_yaml_str(raw: &str) -> Result<Self, CoreError> {
        serde_yaml::from_str(raw).map_err(|source| CoreError::Yaml {
            path: PathBuf::from("<inline>"),
            source,
        })
    }

    pub fn get(&self, name: &str) -> Result<&DatasetConfig, CoreError> {
        self.datasets.get(name).ok_or_else(|| CoreError::NotFound {
            entity: "dataset",
            name: name.to_string(),
        })
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.datasets.keys().map(String::as_str)
    }
}

// ---------------------------------------------------------------------------
// Codecs
// ---------------------------------------------------------------------------

/// Codec configuration: the artifact suffix, codec-specific shared
/// settings `S`, and one untyped block per rate tag.
#[derive(Debug, Clone, Deserialize)]
pub struct CodecConfig<S> {
    /// Suffix of the primary compressed artifact, e.g. `.bin`.
    pub bin_suffix: String,
    #[serde(flatten)]
    pub settings: S,
    /// Every remaining top-level key. Rate blocks live here.
    #[serde(flatten)]
    rates: BTreeMap<String, serde_yaml::Value>,
}

impl<S: DeserializeOwned> CodecConfig<S> {
    pub async fn load(path: &Path) -> Result<Self, CoreError> {
        load_yaml(path).await
    }

    pub fn from_yaml_str(raw: &str) -> Result<Self, CoreError> {
        serde_yaml::from_str(raw).map_err(|source| CoreError::Yaml {
            path: PathBuf::from("<inline>"),
            source,
        })
    }
}

impl<S> CodecConfig<S> {
    /// Deserialize the parameter block for `rate`.
    pub fn rate_params<R: DeserializeOwned>(&self, rate: &RateTag) -> Result<R, CoreError> {
        let block = self.rates.get(rate.as_str()).ok_or_else(|| CoreError::NotFound {
            entity: "rate parameters",
            name: rate.to_string(),
        })?;
        serde_yaml::from_value(block.clone()).map_err(|e| {
            CoreError::Config(format!("Invalid parameters for rate '{rate}': {e}"))
        })
    }

    /// Rate tags with a parameter block, in sorted order.
    pub fn rates(&self) -> Vec<RateTag> {
        self.rates
            .keys()
            .filter_map(|k| RateTag::parse(k).ok().filter(|t| t.as_str() == k))
            .collect()
    }
}

/// Accept `true`/`false` as well as `1`/`0`.
fn bool_or_int<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Int(i64),
    }

    Ok(match Flag::deserialize(deserializer)? {
        Flag::Bool(b) => b,
        Flag::Int(i) => i != 0,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
