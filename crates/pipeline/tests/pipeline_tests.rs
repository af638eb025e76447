//! End-to-end runs of the codec pipeline against a scripted codec and a
//! recording metrics bridge.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use assert_matches::assert_matches;
use async_trait::async_trait;
use pcbench_core::config::DatasetCatalog;
use pcbench_core::error::CoreError;
use pcbench_core::hardware::slots::{GpuSnapshot, StaticProbe};
use pcbench_core::rate::{RateSlot, RateTag};
use pcbench_pipeline::metrics::{MetricsBridge, MetricsError, MetricsRequest};
use pcbench_pipeline::{
    Codec, CodecError, DispatchError, DispatchSummary, Dispatcher, ExperimentJob, PipelineError,
    RunOutcome, Stage,
};
use tempfile::TempDir;

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

#[derive(Default)]
struct ScriptedCodec {
    rate: RateSlot,
    fail_encode: bool,
    fail_decode: bool,
    gpu: bool,
    encodes: AtomicUsize,
    decodes: AtomicUsize,
    devices: Mutex<Vec<Option<u32>>>,
}

impl ScriptedCodec {
    fn at_rate(rate: &str) -> Self {
        let mut codec = Self::default();
        assert!(codec.set_rate(rate));
        codec
    }
}

#[async_trait]
impl Codec for ScriptedCodec {
    fn name(&self) -> &str {
        "scripted"
    }

    fn artifact_suffix(&self) -> &str {
        ".bin"
    }

    fn uses_gpu(&self) -> bool {
        self.gpu
    }

    fn rate(&self) -> Result<&RateTag, CoreError> {
        self.rate.get()
    }

    fn set_rate(&mut self, raw: &str) -> bool {
        self.rate.set(raw)
    }

    async fn encode(
        &self,
        input: &Path,
        artifact: &Path,
        job: &ExperimentJob,
    ) -> Result<(), CodecError> {
        self.encodes.fetch_add(1, Ordering::SeqCst);
        self.devices.lock().unwrap().push(job.device);
        if self.fail_encode {
            return Err(CodecError::EncodeFailure {
                input: input.to_path_buf(),
            });
        }
        tokio::fs::write(artifact, b"geometry").await.unwrap();
        tokio::fs::write(artifact.with_extension("attr"), b"color").await.unwrap();
        Ok(())
    }

    async fn decode(
        &self,
        artifact: &Path,
        output: &Path,
        _job: &ExperimentJob,
    ) -> Result<(), CodecError> {
        self.decodes.fetch_add(1, Ordering::SeqCst);
        if self.fail_decode {
            return Err(CodecError::DecodeFailure {
                artifact: artifact.to_path_buf(),
            });
        }
        tokio::fs::write(output, b"ply\nend_header\n").await.unwrap();
        Ok(())
    }
}

#[derive(Default)]
struct RecordingBridge {
    requests: Mutex<Vec<MetricsRequest>>,
}

impl RecordingBridge {
    fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl MetricsBridge for RecordingBridge {
    async fn evaluate(&self, request: &MetricsRequest) -> Result<String, MetricsError> {
        let mut requests = self.requests.lock().unwrap();
        requests.push(request.clone());
        Ok(format!("report #{}\n", requests.len()))
    }
}

struct Layout {
    _tmp: TempDir,
    src: PathBuf,
    nor: PathBuf,
    exp: PathBuf,
}

impl Layout {
    fn new(items: &[&str]) -> Self {
        let tmp = tempfile::tempdir().expect("tempdir");
        let src = tmp.path().join("src");
        let nor = tmp.path().join("nor");
        for item in items {
            for root in [&src, &nor] {
                let path = root.join(item);
                std::fs::create_dir_all(path.parent().unwrap()).unwrap();
                std::fs::write(&path, b"ply\n").unwrap();
            }
        }
        Self {
            exp: tmp.path().join("exp"),
            src,
            nor,
            _tmp: tmp,
        }
    }

    fn job(&self, item: &str) -> ExperimentJob {
        ExperimentJob {
            item: PathBuf::from(item),
            src_dir: self.src.clone(),
            nor_dir: self.nor.clone(),
            exp_dir: self.exp.join("r1"),
            color: true,
            resolution: Some(1023),
            device: None,
        }
    }

    fn catalog(&self) -> DatasetCatalog {
        DatasetCatalog::from_yaml_str(&format!(
            "demo:\n  dataset_dir: {}\n  dataset_w_normal_dir: {}\n  test_pattern: \"**/*.ply\"\n  color: 0\n",
            self.src.display(),
            self.nor.display(),
        ))
        .expect("catalog")
    }
}

fn cpu_dispatcher() -> Dispatcher {
    Dispatcher::new(Arc::new(StaticProbe::default()))
        .with_cpu_workers(2)
        .with_progress(false)
}

fn idle_gpu(gpu_index: u32) -> GpuSnapshot {
    GpuSnapshot {
        gpu_index,
        load: Some(0.0),
        memory_used_mb: Some(0),
        memory_total_mb: Some(16_000),
    }
}

// ---------------------------------------------------------------------------
// Single-file runs
// ---------------------------------------------------------------------------

#[tokio::test]
async fn successful_run_writes_bridge_report() {
    let layout = Layout::new(&["soldier/frame0001.ply"]);
    let codec = ScriptedCodec::at_rate("r1");
    let bridge = RecordingBridge::default();

    let outcome = codec
        .run(&layout.job("soldier/frame0001.ply"), &bridge)
        .await
        .expect("run");

    let log = layout.exp.join("r1/evl/soldier/frame0001.log");
    assert_eq!(outcome, RunOutcome::Logged { log: log.clone() });
    assert_eq!(std::fs::read_to_string(&log).unwrap(), "report #1\n");

    let requests = bridge.requests.lock().unwrap();
    let request = &requests[0];
    assert_eq!(request.reference, layout.nor.join("soldier/frame0001.ply"));
    assert_eq!(request.target, layout.exp.join("r1/dec/soldier/frame0001.ply"));
    assert!(request.color);
    assert_eq!(request.resolution, Some(1023));
    assert!(request.encode_secs >= 0.0 && request.decode_secs >= 0.0);
    assert_eq!(
        request.artifacts,
        vec![
            layout.exp.join("r1/bin/soldier/frame0001.attr"),
            layout.exp.join("r1/bin/soldier/frame0001.bin"),
        ]
    );
}

#[tokio::test]
async fn encode_failure_skips_decode_and_logging() {
    let layout = Layout::new(&["cube.ply"]);
    let codec = ScriptedCodec {
        fail_encode: true,
        ..ScriptedCodec::at_rate("r1")
    };
    let bridge = RecordingBridge::default();

    let outcome = codec.run(&layout.job("cube.ply"), &bridge).await.expect("run");

    assert_eq!(outcome, RunOutcome::Aborted { stage: Stage::Encode });
    assert_eq!(codec.encodes.load(Ordering::SeqCst), 1);
    assert_eq!(codec.decodes.load(Ordering::SeqCst), 0);
    assert_eq!(bridge.calls(), 0);
    assert!(!layout.exp.join("r1/evl/cube.log").exists());
}

#[tokio::test]
async fn decode_failure_skips_evaluation_and_logging() {
    let layout = Layout::new(&["cube.ply"]);
    let codec = ScriptedCodec {
        fail_decode: true,
        ..ScriptedCodec::at_rate("r1")
    };
    let bridge = RecordingBridge::default();

    let outcome = codec.run(&layout.job("cube.ply"), &bridge).await.expect("run");

    assert_eq!(outcome, RunOutcome::Aborted { stage: Stage::Decode });
    assert_eq!(codec.decodes.load(Ordering::SeqCst), 1);
    assert_eq!(bridge.calls(), 0);
    assert!(!layout.exp.join("r1/evl/cube.log").exists());
}

#[tokio::test]
async fn rerun_replaces_previous_report() {
    let layout = Layout::new(&["cube.ply"]);
    let codec = ScriptedCodec::at_rate("r1");
    let bridge = RecordingBridge::default();
    let job = layout.job("cube.ply");

    codec.run(&job, &bridge).await.expect("first run");
    codec.run(&job, &bridge).await.expect("second run");

    let log = layout.exp.join("r1/evl/cube.log");
    assert_eq!(std::fs::read_to_string(log).unwrap(), "report #2\n");
}

// ---------------------------------------------------------------------------
// Dataset runs
// ---------------------------------------------------------------------------

#[tokio::test]
async fn dataset_run_logs_every_discovered_file() {
    let items = ["a/one.ply", "a/two.ply", "b/three.ply"];
    let layout = Layout::new(&items);
    let codec = ScriptedCodec::at_rate("r2");
    let bridge = RecordingBridge::default();

    let summary = codec
        .run_dataset("demo", &layout.exp, &layout.catalog(), &cpu_dispatcher(), &bridge)
        .await
        .expect("dataset run");

    assert_eq!(
        summary,
        DispatchSummary {
            total: 3,
            logged: 3,
            aborted: 0,
            failed: 0,
        }
    );
    for item in items {
        let log = layout.exp.join("r2/evl").join(item).with_extension("log");
        assert!(log.exists(), "missing {}", log.display());
    }
    assert!(bridge.requests.lock().unwrap().iter().all(|r| !r.color));
}

#[tokio::test]
async fn dataset_run_counts_aborted_jobs() {
    let layout = Layout::new(&["one.ply", "two.ply"]);
    let codec = ScriptedCodec {
        fail_decode: true,
        ..ScriptedCodec::at_rate("r1")
    };
    let bridge = RecordingBridge::default();

    let summary = codec
        .run_dataset("demo", &layout.exp, &layout.catalog(), &cpu_dispatcher(), &bridge)
        .await
        .expect("dataset run");

    assert_eq!(summary.aborted, 2);
    assert_eq!(summary.logged, 0);
    assert_eq!(bridge.calls(), 0);
}

#[tokio::test]
async fn dataset_run_requires_a_rate() {
    let layout = Layout::new(&["one.ply"]);
    let codec = ScriptedCodec::default();

    let result = codec
        .run_dataset(
            "demo",
            &layout.exp,
            &layout.catalog(),
            &cpu_dispatcher(),
            &RecordingBridge::default(),
        )
        .await;

    assert_matches!(result, Err(PipelineError::Core(CoreError::RateUnset)));
    assert_eq!(codec.encodes.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn unknown_dataset_is_not_found() {
    let layout = Layout::new(&["one.ply"]);
    let result = ScriptedCodec::at_rate("r1")
        .run_dataset(
            "missing",
            &layout.exp,
            &layout.catalog(),
            &cpu_dispatcher(),
            &RecordingBridge::default(),
        )
        .await;

    assert_matches!(
        result,
        Err(PipelineError::Core(CoreError::NotFound { entity: "dataset", .. }))
    );
}

#[tokio::test]
async fn gpu_codec_without_free_devices_runs_nothing() {
    let layout = Layout::new(&["one.ply", "two.ply"]);
    let codec = ScriptedCodec {
        gpu: true,
        ..ScriptedCodec::at_rate("r1")
    };
    let busy = GpuSnapshot {
        memory_used_mb: Some(15_000),
        ..idle_gpu(0)
    };
    let dispatcher = Dispatcher::new(Arc::new(StaticProbe(vec![busy]))).with_progress(false);

    let result = codec
        .run_dataset(
            "demo",
            &layout.exp,
            &layout.catalog(),
            &dispatcher,
            &RecordingBridge::default(),
        )
        .await;

    assert_matches!(
        result,
        Err(PipelineError::Dispatch(DispatchError::NoAvailableResource { .. }))
    );
    assert_eq!(codec.encodes.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn gpu_codec_jobs_receive_leased_devices() {
    let layout = Layout::new(&["one.ply", "two.ply", "three.ply"]);
    let codec = ScriptedCodec {
        gpu: true,
        ..ScriptedCodec::at_rate("r1")
    };
    let dispatcher = Dispatcher::new(Arc::new(StaticProbe(vec![idle_gpu(2), idle_gpu(5)])))
        .with_progress(false);

    let summary = codec
        .run_dataset(
            "demo",
            &layout.exp,
            &layout.catalog(),
            &dispatcher,
            &RecordingBridge::default(),
        )
        .await
        .expect("dataset run");

    assert_eq!(summary.logged, 3);
    let devices = codec.devices.lock().unwrap();
    assert_eq!(devices.len(), 3);
    assert!(devices.iter().all(|d| matches!(d, Some(2) | Some(5))));
}
