//! MPEG G-PCC (TMC13) reference codec.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use pcbench_core::config::CodecConfig;
use pcbench_core::error::CoreError;
use pcbench_core::rate::{RateSlot, RateTag};
use serde::Deserialize;

use crate::codec::{Codec, CodecError, ExperimentJob};
use crate::executor::{self, CommandSpec};

/// Settings shared by every rate.
#[derive(Debug, Clone, Deserialize)]
pub struct GpccSettings {
    pub encoder: PathBuf,
    pub decoder: PathBuf,
}

/// Per-rate parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct GpccRate {
    #[serde(rename = "positionQuantizationScale")]
    pub position_quantization_scale: f64,
}

pub struct Gpcc {
    config: CodecConfig<GpccSettings>,
    rate: RateSlot,
}

impl Gpcc {
    pub fn new(config: CodecConfig<GpccSettings>) -> Self {
        Self {
            config,
            rate: RateSlot::new(),
        }
    }

    pub async fn from_file(path: &Path) -> Result<Self, CoreError> {
        Ok(Self::new(CodecConfig::load(path).await?))
    }

    fn rate_params(&self) -> Result<GpccRate, CoreError> {
        self.config.rate_params(self.rate.get()?)
    }

    pub fn encode_command(
        &self,
        input: &Path,
        artifact: &Path,
        color: bool,
    ) -> Result<CommandSpec, CoreError> {
        let params = self.rate_params()?;
        let mut argv = vec![
            self.config.settings.encoder.display().to_string(),
            format!("--uncompressedDataPath={}", input.display()),
            format!("--compressedStreamPath={}", artifact.display()),
            format!(
                "--positionQuantizationScale={}",
                params.position_quantization_scale
            ),
            "--mergeDuplicatedPoints=1".to_string(),
            "--mode=0".to_string(),
        ];
        if color {
            argv.push("--attribute=color".to_string());
        }
        Ok(CommandSpec::new(argv))
    }

    pub fn decode_command(&self, artifact: &Path, output: &Path) -> CommandSpec {
        CommandSpec::new([
            self.config.settings.decoder.display().to_string(),
            format!("--compressedStreamPath={}", artifact.display()),
            format!("--reconstructedDataPath={}", output.display()),
            "--mode=1".to_string(),
        ])
    }
}

#[async_trait]
impl Codec for Gpcc {
    fn name(&self) -> &str {
        "gpcc"
    }

    fn artifact_suffix(&self) -> &str {
        &self.config.bin_suffix
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
        let spec = self.encode_command(input, artifact, job.color)?;
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
        _job: &ExperimentJob,
    ) -> Result<(), CodecError> {
        if executor::run(&self.decode_command(artifact, output)).await {
            Ok(())
        } else {
            Err(CodecError::DecodeFailure {
                artifact: artifact.to_path_buf(),
            })
        }
    }
}
