//! Experiment orchestration for point-cloud codecs.
//!
//! External encoders and decoders are wrapped as [`codec::Codec`]s. A
//! dataset run discovers input files, fans one job per file out over a
//! [`dispatcher::Dispatcher`], and each job encodes, decodes, scores the
//! reconstruction through a [`metrics::MetricsBridge`] and writes a log.
//! [`prep`] builds the inputs such runs expect (sampled meshes, clouds
//! with normals) on the same dispatcher.

pub mod codec;
pub mod codecs;
pub mod dispatcher;
pub mod error;
pub mod executor;
pub mod metrics;
pub mod prep;
pub mod timing;

pub use codec::{Codec, CodecError, ExperimentJob, RunOutcome, Stage};
pub use dispatcher::{DispatchError, DispatchSummary, Dispatcher, WorkerSlot};
pub use error::PipelineError;
