//! PCGCv1, a learned geometry codec driven through its Python test script.
//!
//! The script writes several files per stream next to the given artifact
//! path, so `run` is overridden: both commands are built up front, timed
//! directly, and every sibling artifact is handed to the metrics bridge.
//! Jobs need a GPU; the leased device is exported as
//! `CUDA_VISIBLE_DEVICES`.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use pcbench_core::config::CodecConfig;
use pcbench_core::discovery;
use pcbench_core::error::CoreError;
use pcbench_core::rate::{RateSlot, RateTag};
use serde::Deserialize;

use crate::codec::{evaluate_and_log, Codec, CodecError, ExperimentJob, RunOutcome, Stage};
use crate::error::PipelineError;
use crate::executor::{self, CommandSpec};
use crate::metrics::MetricsBridge;
use crate::timing;

const DEVICE_ENV: &str = "CUDA_VISIBLE_DEVICES";

#[derive(Debug, Clone, Deserialize)]
pub struct PcgcSettings {
    pub python: PathBuf,
    pub test_script: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PcgcRate {
    pub ckpt_dir: PathBuf,
    pub scale: f64,
    pub rho: f64,
}

pub struct Pcgcv1 {
    config: CodecConfig<PcgcSettings>,
    rate: RateSlot,
}

impl Pcgcv1 {
    pub fn new(config: CodecConfig<PcgcSettings>) -> Self {
        Self {
            config,
            rate: RateSlot::new(),
        }
    }

    pub async fn from_file(path: &Path) -> Result<Self, CoreError> {
        Ok(Self::new(CodecConfig::load(path).await?))
    }

    fn command(
        &self,
        action: &str,
        from: &Path,
        to: &Path,
        device: Option<u32>,
    ) -> Result<CommandSpec, CoreError> {
        let params: PcgcRate = self.config.rate_params(self.rate.get()?)?;
        let spec = CommandSpec::new([
            self.config.settings.python.display().to_string(),
            self.config.settings.test_script.display().to_string(),
            action.to_string(),
            from.display().to_string(),
            to.display().to_string(),
            "--ckpt_dir".to_string(),
            params.ckpt_dir.display().to_string(),
            "--scale".to_string(),
            params.scale.to_string(),
            "--rho".to_string(),
            params.rho.to_string(),
        ]);
        Ok(match device {
            Some(device) => spec.env(DEVICE_ENV, device.to_string()),
            None => spec,
        })
    }

    pub fn encode_command(
        &self,
        input: &Path,
        artifact: &Path,
        device: Option<u32>,
    ) -> Result<CommandSpec, CoreError> {
        self.command("compress", input, artifact, device)
    }

    pub fn decode_command(
        &self,
        artifact: &Path,
        output: &Path,
        device: Option<u32>,
    ) -> Result<CommandSpec, CoreError> {
        self.command("decompress", artifact, output, device)
    }
}

#[async_trait]
impl Codec for Pcgcv1 {
    fn name(&self) -> &str {
        "pcgcv1"
    }

    fn artifact_suffix(&self) -> &str {
        &self.config.bin_suffix
    }

    fn uses_gpu(&self) -> bool {
        true
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
        let spec = self.encode_command(input, artifact, job.device)?;
        if executor::run(&spec).await {
            Ok(())
        } else {
            Err(CodecError::EncodeFailure {
                input: input.to_path_buf(),
            })
        }
    }

    async fn decode(
        &self,
        artifact: &Path,
        output: &Path,
        job: &ExperimentJob,
    ) -> Result<(), CodecError> {
        let spec = self.decode_command(artifact, output, job.device)?;
        if executor::run(&spec).await {
            Ok(())
        } else {
            Err(CodecError::DecodeFailure {
                artifact: artifact.to_path_buf(),
            })
        }
    }

    async fn run(
        &self,
        job: &ExperimentJob,
        bridge: &dyn MetricsBridge,
    ) -> Result<RunOutcome, PipelineError> {
        let paths = job.resolve_paths(self.artifact_suffix()).await?;
        let enc = self.encode_command(&paths.input, &paths.artifact, job.device)?;
        let dec = self.decode_command(&paths.artifact, &paths.reconstructed, job.device)?;

        let Some(encode_secs) = timing::time_command(&enc).await else {
            tracing::warn!(item = %job.item.display(), "Encoding failed, skipping evaluation");
            return Ok(RunOutcome::Aborted {
                stage: Stage::Encode,
            });
        };
        let Some(decode_secs) = timing::time_command(&dec).await else {
            tracing::warn!(item = %job.item.display(), "Decoding failed, skipping evaluation");
            return Ok(RunOutcome::Aborted {
                stage: Stage::Decode,
            });
        };

        let artifacts = discovery::collect_artifacts(&paths.artifact).await?;
        evaluate_and_log(&paths, job, encode_secs, decode_secs, artifacts, bridge).await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use assert_matches::assert_matches;
    use tempfile::TempDir;

    use super::*;
    use crate::metrics::{MetricsError, MetricsRequest};

    const CONFIG: &str = r#"
python: /usr/bin/python3
test_script: /opt/PCGCv1/test.py
bin_suffix: .bin
r1:
  ckpt_dir: /ckpt/a0.25
  scale: 1
  rho: 1.0
r3:
  ckpt_dir: /ckpt/a2
  scale: 0.5
  rho: 2.5
"#;

    fn codec(rate: &str) -> Pcgcv1 {
        let mut codec = Pcgcv1::new(CodecConfig::from_yaml_str(CONFIG).expect("config"));
        assert!(codec.set_rate(rate));
        codec
    }

    #[test]
    fn compress_command_shape() {
        let spec = codec("r3")
            .encode_command(Path::new("in.ply"), Path::new("out.bin"), None)
            .expect("command");
        assert_eq!(
            spec.command_line(),
            "/usr/bin/python3 /opt/PCGCv1/test.py compress in.ply out.bin \
             --ckpt_dir /ckpt/a2 --scale 0.5 --rho 2.5"
        );
        assert!(spec.env.is_empty());
    }

    #[test]
    fn whole_numbers_print_without_fraction() {
        let spec = codec("r1")
            .decode_command(Path::new("out.bin"), Path::new("dec.ply"), None)
            .expect("command");
        assert_eq!(spec.argv[2], "decompress");
        assert!(spec.command_line().ends_with("--scale 1 --rho 1"));
    }

    #[test]
    fn leased_device_is_exported() {
        let spec = codec("r1")
            .encode_command(Path::new("in.ply"), Path::new("out.bin"), Some(3))
            .expect("command");
        assert_eq!(spec.env, vec![(DEVICE_ENV.to_string(), "3".to_string())]);
    }

    #[test]
    fn requires_gpu() {
        assert!(codec("r1").uses_gpu());
        assert_eq!(codec("r1").name(), "pcgcv1");
    }

    const ENCODE_WRITES_SIBLINGS: &str = r#"
case "$1" in
  compress) printf geo > "$3"; printf attr > "${3%.bin}.attr" ;;
  decompress) printf 'ply\n' > "$3" ;;
esac
"#;

    const DECODE_FAILS: &str = r#"
case "$1" in
  compress) printf geo > "$3" ;;
  decompress) exit 1 ;;
esac
"#;

    #[derive(Default)]
    struct RecordingBridge {
        requests: Mutex<Vec<MetricsRequest>>,
    }

    #[async_trait]
    impl MetricsBridge for RecordingBridge {
        async fn evaluate(&self, request: &MetricsRequest) -> Result<String, MetricsError> {
            self.requests.lock().unwrap().push(request.clone());
            Ok("mseF,PSNR (p2point): 71.2\n".to_string())
        }
    }

    /// A scratch dataset with one cloud and a codec driven by `script`.
    fn scripted(script: &str) -> (TempDir, Pcgcv1, ExperimentJob) {
        let tmp = tempfile::tempdir().expect("tempdir");
        for dir in ["src", "nor"] {
            std::fs::create_dir_all(tmp.path().join(dir)).expect("mkdir");
            std::fs::write(tmp.path().join(dir).join("cube.ply"), "ply\n").expect("write");
        }
        let script_path = tmp.path().join("test.sh");
        std::fs::write(&script_path, script).expect("write script");

        let yaml = format!(
            "python: sh\ntest_script: {}\nbin_suffix: .bin\nr1:\n  ckpt_dir: ckpt\n  scale: 1\n  rho: 1\n",
            script_path.display()
        );
        let mut codec = Pcgcv1::new(CodecConfig::from_yaml_str(&yaml).expect("config"));
        assert!(codec.set_rate("r1"));

        let job = ExperimentJob {
            item: PathBuf::from("cube.ply"),
            src_dir: tmp.path().join("src"),
            nor_dir: tmp.path().join("nor"),
            exp_dir: tmp.path().join("e/r1"),
            color: false,
            resolution: None,
            device: Some(0),
        };
        (tmp, codec, job)
    }

    #[tokio::test]
    async fn failed_encode_skips_decode_and_evaluation() {
        let (tmp, codec, job) = scripted("exit 1\n");
        let bridge = RecordingBridge::default();

        let outcome = codec.run(&job, &bridge).await.expect("run");

        assert_matches!(outcome, RunOutcome::Aborted { stage: Stage::Encode });
        assert!(!tmp.path().join("e/r1/evl/cube.log").exists());
        assert!(bridge.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_decode_writes_no_log() {
        let (tmp, codec, job) = scripted(DECODE_FAILS);
        let bridge = RecordingBridge::default();

        let outcome = codec.run(&job, &bridge).await.expect("run");

        assert_matches!(outcome, RunOutcome::Aborted { stage: Stage::Decode });
        assert!(tmp.path().join("e/r1/bin/cube.bin").exists());
        assert!(!tmp.path().join("e/r1/evl/cube.log").exists());
        assert!(bridge.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn successful_run_logs_with_every_sibling_artifact() {
        let (tmp, codec, job) = scripted(ENCODE_WRITES_SIBLINGS);
        let bridge = RecordingBridge::default();

        let outcome = codec.run(&job, &bridge).await.expect("run");

        let log = tmp.path().join("e/r1/evl/cube.log");
        assert_matches!(outcome, RunOutcome::Logged { log: ref written } if *written == log);
        assert_eq!(
            std::fs::read_to_string(&log).expect("read log"),
            "mseF,PSNR (p2point): 71.2\n"
        );

        let requests = bridge.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        let bin = tmp.path().join("e/r1/bin");
        assert_eq!(
            requests[0].artifacts,
            vec![bin.join("cube.attr"), bin.join("cube.bin")]
        );
        assert_eq!(requests[0].reference, tmp.path().join("nor/cube.ply"));
        assert_eq!(requests[0].target, tmp.path().join("e/r1/dec/cube.ply"));
        assert!(requests[0].encode_secs >= 0.0);
    }
}
