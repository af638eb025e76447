//! The pluggable codec contract.
//!
//! A [`Codec`] turns encode and decode into external commands. The trait
//! supplies the per-file pipeline ([`Codec::run`]) and the dataset-level
//! fan-out ([`Codec::run_dataset`]) on top of those two steps; a codec
//! whose artifact naming or invocation shape does not fit may override
//! `run` wholesale, reusing [`evaluate_and_log`] for the tail of the
//! pipeline.
//!
//! Per job the pipeline moves through encode, decode, evaluation and
//! logging strictly in order. A failed encode or decode aborts the job:
//! no metrics are computed and no log file is written.

use std::fmt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use pcbench_core::config::DatasetCatalog;
use pcbench_core::discovery;
use pcbench_core::error::CoreError;
use pcbench_core::paths::{rate_dir, ExperimentPaths};
use pcbench_core::rate::RateTag;

use crate::dispatcher::{DispatchSummary, Dispatcher, WorkerSlot};
use crate::error::PipelineError;
use crate::metrics::{MetricsBridge, MetricsRequest};
use crate::timing;

/// Codec-level failures.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("Encoding failed for {input}")]
    EncodeFailure { input: PathBuf },

    #[error("Decoding failed for {artifact}")]
    DecodeFailure { artifact: PathBuf },

    #[error(transparent)]
    Core(#[from] CoreError),
}

/// Pipeline stage at which a job was abandoned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Encode,
    Decode,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Encode => f.write_str("encode"),
            Self::Decode => f.write_str("decode"),
        }
    }
}

/// Terminal state of one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// The evaluation report was written to `log`.
    Logged { log: PathBuf },
    /// Encode or decode failed; nothing was evaluated or logged.
    Aborted { stage: Stage },
}

/// One unit of work: a single input file and every fixed parameter of
/// the dataset run it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExperimentJob {
    /// Input path relative to `src_dir`.
    pub item: PathBuf,
    pub src_dir: PathBuf,
    /// Directory holding the normal-bearing copies of the inputs.
    pub nor_dir: PathBuf,
    /// Rate-namespaced experiment directory.
    pub exp_dir: PathBuf,
    pub color: bool,
    pub resolution: Option<u32>,
    /// GPU leased to this job in exclusive-resource mode.
    pub device: Option<u32>,
}

impl ExperimentJob {
    /// Resolve this job's paths and create its output directories.
    pub async fn resolve_paths(&self, artifact_suffix: &str) -> Result<ExperimentPaths, CoreError> {
        ExperimentPaths::resolve(
            &self.item,
            &self.src_dir,
            &self.nor_dir,
            &self.exp_dir,
            artifact_suffix,
        )
        .await
    }
}

#[async_trait]
pub trait Codec: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Suffix of the primary compressed artifact, e.g. `.bin`.
    fn artifact_suffix(&self) -> &str;

    /// Whether jobs must hold an exclusive GPU slot.
    fn uses_gpu(&self) -> bool {
        false
    }

    /// Active rate tag, or [`CoreError::RateUnset`].
    fn rate(&self) -> Result<&RateTag, CoreError>;

    /// Select the rate parameter set. Invalid tags are rejected with a
    /// warning and leave the rate unset.
    fn set_rate(&mut self, raw: &str) -> bool;

    /// Compress `input` into `artifact`.
    async fn encode(
        &self,
        input: &Path,
        artifact: &Path,
        job: &ExperimentJob,
    ) -> Result<(), CodecError>;

    /// Reconstruct `output` from `artifact`.
    async fn decode(
        &self,
        artifact: &Path,
        output: &Path,
        job: &ExperimentJob,
    ) -> Result<(), CodecError>;

    /// Run the full pipeline for one job.
    async fn run(
        &self,
        job: &ExperimentJob,
        bridge: &dyn MetricsBridge,
    ) -> Result<RunOutcome, PipelineError> {
        run_job(self, job, bridge).await
    }

    /// Run every file of dataset `name` under `exp_root/<rate>`.
    async fn run_dataset(
        &self,
        name: &str,
        exp_root: &Path,
        catalog: &DatasetCatalog,
        dispatcher: &Dispatcher,
        bridge: &dyn MetricsBridge,
    ) -> Result<DispatchSummary, PipelineError> {
        run_dataset_jobs(self, name, exp_root, catalog, dispatcher, bridge).await
    }
}

/// The stock single-file pipeline behind [`Codec::run`].
pub async fn run_job<C: Codec + ?Sized>(
    codec: &C,
    job: &ExperimentJob,
    bridge: &dyn MetricsBridge,
) -> Result<RunOutcome, PipelineError> {
    let paths = job.resolve_paths(codec.artifact_suffix()).await?;

    let encode_secs = match timing::time(codec.encode(&paths.input, &paths.artifact, job)).await {
        Ok(secs) => secs,
        Err(e) => return abort(job, Stage::Encode, e),
    };
    let decode_secs =
        match timing::time(codec.decode(&paths.artifact, &paths.reconstructed, job)).await {
            Ok(secs) => secs,
            Err(e) => return abort(job, Stage::Decode, e),
        };

    let artifacts = discovery::collect_artifacts(&paths.artifact).await?;
    evaluate_and_log(&paths, job, encode_secs, decode_secs, artifacts, bridge).await
}

/// Turn a step failure into an aborted outcome. Failures other than the
/// step's own command failing are real errors and propagate.
fn abort(job: &ExperimentJob, stage: Stage, err: CodecError) -> Result<RunOutcome, PipelineError> {
    match err {
        CodecError::EncodeFailure { .. } | CodecError::DecodeFailure { .. } => {
            tracing::warn!(
                item = %job.item.display(),
                %stage,
                error = %err,
                "Skipping evaluation and logging",
            );
            Ok(RunOutcome::Aborted { stage })
        }
        other => Err(other.into()),
    }
}

/// Score a finished encode/decode and write the report to the job's log,
/// replacing any earlier report.
pub async fn evaluate_and_log(
    paths: &ExperimentPaths,
    job: &ExperimentJob,
    encode_secs: f64,
    decode_secs: f64,
    artifacts: Vec<PathBuf>,
    bridge: &dyn MetricsBridge,
) -> Result<RunOutcome, PipelineError> {
    let request = MetricsRequest {
        reference: paths.normal_input.clone(),
        target: paths.reconstructed.clone(),
        color: job.color,
        resolution: job.resolution,
        encode_secs,
        decode_secs,
        artifacts,
    };
    let report = bridge.evaluate(&request).await?;

    tokio::fs::write(&paths.log, report)
        .await
        .map_err(|e| CoreError::io(&paths.log, e))?;

    tracing::info!(
        item = %job.item.display(),
        log = %paths.log.display(),
        encode_secs,
        decode_secs,
        "Evaluation logged",
    );
    Ok(RunOutcome::Logged {
        log: paths.log.clone(),
    })
}

/// List the files under `root` matching `pattern`, off the async runtime.
pub(crate) async fn discover_items(root: &Path, pattern: &str) -> Result<Vec<PathBuf>, PipelineError> {
    let root = root.to_path_buf();
    let pattern = pattern.to_string();
    let files = tokio::task::spawn_blocking(move || discovery::discover(&root, &pattern))
        .await
        .map_err(|e| PipelineError::Discovery(e.to_string()))??;
    Ok(files)
}

/// The stock dataset fan-out behind [`Codec::run_dataset`].
pub async fn run_dataset_jobs<C: Codec + ?Sized>(
    codec: &C,
    name: &str,
    exp_root: &Path,
    catalog: &DatasetCatalog,
    dispatcher: &Dispatcher,
    bridge: &dyn MetricsBridge,
) -> Result<DispatchSummary, PipelineError> {
    let exp_dir = rate_dir(exp_root, codec.rate()?);
    let dataset = catalog.get(name)?;

    tracing::info!(
        dataset = name,
        codec = codec.name(),
        exp_dir = %exp_dir.display(),
        "Start to run experiments",
    );

    let files = discover_items(&dataset.source_dir, &dataset.test_pattern).await?;

    let jobs: Vec<ExperimentJob> = files
        .into_iter()
        .map(|item| ExperimentJob {
            item,
            src_dir: dataset.source_dir.clone(),
            nor_dir: dataset.normal_dir().to_path_buf(),
            exp_dir: exp_dir.clone(),
            color: dataset.color,
            resolution: dataset.resolution,
            device: None,
        })
        .collect();

    let summary = dispatcher
        .dispatch(jobs, codec.uses_gpu(), |mut job: ExperimentJob, slot: WorkerSlot| {
            job.device = slot.device;
            async move { codec.run(&job, bridge).await }
        })
        .await?;
    Ok(summary)
}
