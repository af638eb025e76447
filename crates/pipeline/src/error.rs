use std::path::PathBuf;

use pcbench_core::error::CoreError;

use crate::codec::CodecError;
use crate::dispatcher::DispatchError;
use crate::metrics::MetricsError;

/// Errors surfaced by a codec run or a dataset run.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Metrics(#[from] MetricsError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error("Dataset discovery task failed: {0}")]
    Discovery(String),

    #[error("Dataset preparation failed for {input}")]
    Prep { input: PathBuf },
}
