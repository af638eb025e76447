//! Experiment file layout.
//!
//! Every job writes into three mirrored subtrees of the rate-namespaced
//! experiment directory, keyed by the item's path relative to the dataset
//! root:
//!
//! ```text
//! <exp_root>/<rate>/bin/<item>.<suffix>   compressed artifact (may have siblings)
//! <exp_root>/<rate>/dec/<item>            reconstructed point cloud
//! <exp_root>/<rate>/evl/<item>.log        evaluation report
//! ```

use std::path::{Path, PathBuf};

use crate::error::CoreError;
use crate::rate::RateTag;

/// Subdirectory holding compressed artifacts.
pub const BIN_DIR: &str = "bin";

/// Subdirectory holding reconstructed point clouds.
pub const DEC_DIR: &str = "dec";

/// Subdirectory holding evaluation logs.
pub const EVL_DIR: &str = "evl";

/// Extension of evaluation logs.
pub const LOG_EXTENSION: &str = "log";

/// Namespace an experiment root by rate tag so runs at different rates
/// never overwrite each other.
pub fn rate_dir(exp_root: &Path, rate: &RateTag) -> PathBuf {
    exp_root.join(rate.as_str())
}

/// The five paths one job reads from and writes to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExperimentPaths {
    /// Source point cloud fed to the encoder.
    pub input: PathBuf,
    /// Same point cloud with normals, used as the metric reference.
    pub normal_input: PathBuf,
    /// Primary compressed artifact.
    pub artifact: PathBuf,
    /// Decoder output.
    pub reconstructed: PathBuf,
    /// Evaluation report.
    pub log: PathBuf,
}

impl ExperimentPaths {
    /// Derive the job's paths without touching the filesystem.
    ///
    /// `exp_dir` is the rate-namespaced experiment directory (see
    /// [`rate_dir`]). `artifact_suffix` may be given with or without its
    /// leading dot (`.bin` and `bin` are equivalent).
    pub fn new(
        item: &Path,
        src_dir: &Path,
        nor_dir: &Path,
        exp_dir: &Path,
        artifact_suffix: &str,
    ) -> Self {
        let suffix = artifact_suffix.trim_start_matches('.');
        Self {
            input: src_dir.join(item),
            normal_input: nor_dir.join(item),
            artifact: exp_dir.join(BIN_DIR).join(item).with_extension(suffix),
            reconstructed: exp_dir.join(DEC_DIR).join(item),
            log: exp_dir
                .join(EVL_DIR)
                .join(item)
                .with_extension(LOG_EXTENSION),
        }
    }

    /// Derive the paths and create the parent directories of the artifact,
    /// reconstructed output and log. Safe to call repeatedly.
    pub async fn resolve(
        item: &Path,
        src_dir: &Path,
        nor_dir: &Path,
        exp_dir: &Path,
        artifact_suffix: &str,
    ) -> Result<Self, CoreError> {
        let paths = Self::new(item, src_dir, nor_dir, exp_dir, artifact_suffix);
        paths.ensure_dirs().await?;
        Ok(paths)
    }

    /// Create the three output-bearing parent directories if missing.
    pub async fn ensure_dirs(&self) -> Result<(), CoreError> {
        for target in [&self.artifact, &self.reconstructed, &self.log] {
            if let Some(parent) = target.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| CoreError::io(parent, e))?;
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
