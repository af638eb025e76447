//! Quality evaluation of a reconstructed point cloud.
//!
//! The pipeline only gathers inputs for a [`MetricsBridge`] and writes its
//! report verbatim; it never interprets the report. [`PcErrorBridge`] is the
//! stock implementation on top of the MPEG `pc_error` distortion tool.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use pcbench_core::error::CoreError;
use pcbench_core::ply;
use regex::Regex;

use crate::executor::{self, CommandSpec};

/// Printed when the tool output lacks a metric.
const MISSING_VALUE: &str = "nan";

/// Everything a bridge needs to score one job.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricsRequest {
    /// Reference cloud; the normal-bearing copy when point-to-plane
    /// metrics are wanted.
    pub reference: PathBuf,
    /// Reconstructed cloud.
    pub target: PathBuf,
    pub color: bool,
    /// Known resolution of the reference. `None` lets the bridge decide.
    pub resolution: Option<u32>,
    pub encode_secs: f64,
    pub decode_secs: f64,
    /// Every compressed file produced for this job.
    pub artifacts: Vec<PathBuf>,
}

#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("metric tool failed on {target}")]
    ToolFailed { target: PathBuf },

    #[error(transparent)]
    Core(#[from] CoreError),
}

/// Computes the formatted evaluation report for one job.
#[async_trait]
pub trait MetricsBridge: Send + Sync {
    async fn evaluate(&self, request: &MetricsRequest) -> Result<String, MetricsError>;
}

// ---------------------------------------------------------------------------
// pc_error bridge
// ---------------------------------------------------------------------------

/// Default name of the distortion tool, resolved through `PATH`.
pub const DEFAULT_PC_ERROR_BIN: &str = "pc_error";

/// Bridge running the MPEG `pc_error` tool.
#[derive(Debug, Clone)]
pub struct PcErrorBridge {
    binary: PathBuf,
}

impl Default for PcErrorBridge {
    fn default() -> Self {
        Self::new(DEFAULT_PC_ERROR_BIN)
    }
}

impl PcErrorBridge {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn command(&self, request: &MetricsRequest) -> CommandSpec {
        let mut argv = vec![
            self.binary.display().to_string(),
            format!("--fileA={}", request.reference.display()),
            format!("--fileB={}", request.target.display()),
            format!("--color={}", u8::from(request.color)),
            "--hausdorff=1".to_string(),
        ];
        if let Some(resolution) = request.resolution {
            argv.push(format!("--resolution={resolution}"));
        }
        CommandSpec::new(argv)
    }
}

#[async_trait]
impl MetricsBridge for PcErrorBridge {
    async fn evaluate(&self, request: &MetricsRequest) -> Result<String, MetricsError> {
        let header = ply::read_header(&request.reference).await?;
        let sizes = SizeSummary::measure(&request.reference, &request.artifacts).await?;

        let tool_output = executor::capture(&self.command(request))
            .await
            .ok_or_else(|| MetricsError::ToolFailed {
                target: request.target.clone(),
            })?;

        Ok(format_report(
            request,
            &sizes,
            header.vertex_count,
            header.has_normals,
            &tool_output,
        ))
    }
}

// ---------------------------------------------------------------------------
// Report formatting
// ---------------------------------------------------------------------------

/// Byte counts behind the compression figures.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SizeSummary {
    pub reference_bytes: u64,
    pub artifact_bytes: u64,
}

impl SizeSummary {
    pub async fn measure(reference: &Path, artifacts: &[PathBuf]) -> Result<Self, CoreError> {
        let reference_bytes = file_len(reference).await?;
        let mut artifact_bytes = 0;
        for artifact in artifacts {
            artifact_bytes += file_len(artifact).await?;
        }
        Ok(Self {
            reference_bytes,
            artifact_bytes,
        })
    }
}

async fn file_len(path: &Path) -> Result<u64, CoreError> {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.len())
        .map_err(|e| CoreError::io(path, e))
}

/// (report label, tool key) pairs. Keys are matched with flexible spacing.
const P2POINT_METRICS: &[(&str, &str)] = &[
    ("Asym. Chamfer dist. (1->2) p2pt", "ACD1 (p2point)"),
    ("Asym. Chamfer dist. (2->1) p2pt", "ACD2 (p2point)"),
    ("Chamfer dist.              p2pt", "CD (p2point)"),
    ("CD-PSNR (dB)               p2pt", "CD,PSNR (p2point)"),
    ("Hausdorff distance         p2pt", "h. (p2point)"),
];

const P2PLANE_METRICS: &[(&str, &str)] = &[
    ("Asym. Chamfer dist. (1->2) p2pl", "ACD1 (p2plane)"),
    ("Asym. Chamfer dist. (2->1) p2pl", "ACD2 (p2plane)"),
    ("Chamfer dist.              p2pl", "CD (p2plane)"),
    ("CD-PSNR (dB)               p2pl", "CD,PSNR (p2plane)"),
    ("Hausdorff distance         p2pl", "h. (p2plane)"),
];

const COLOR_METRICS: &[(&str, &str)] = &[
    ("Y-CPSNR (dB)                   ", "c[0],PSNRF"),
    ("U-CPSNR (dB)                   ", "c[1],PSNRF"),
    ("V-CPSNR (dB)                   ", "c[2],PSNRF"),
];

const HYBRID_METRIC: (&str, &str) = ("Hybrid geo-color               ", "hybrid geo-color");

/// Find the value printed after `key:` in the tool output.
fn extract(output: &str, key: &str) -> String {
    let pattern = key
        .split_whitespace()
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(r"\s*");
    let Ok(re) = Regex::new(&format!(r"(?m)^\s*{pattern}\s*:\s*(\S+)")) else {
        return MISSING_VALUE.to_string();
    };
    re.captures(output)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| MISSING_VALUE.to_string())
}

fn push_section(lines: &mut Vec<String>, output: &str, metrics: &[(&str, &str)]) {
    for (label, key) in metrics {
        lines.push(format!("{label}: {}", extract(output, key)));
    }
}

/// Build the multi-section evaluation report.
///
/// Point-to-plane values are included when the reference carries normals,
/// color values when the request asks for them.
pub fn format_report(
    request: &MetricsRequest,
    sizes: &SizeSummary,
    vertex_count: u64,
    has_normals: bool,
    tool_output: &str,
) -> String {
    let ratio = if sizes.artifact_bytes > 0 {
        format!(
            "{:.4}",
            sizes.reference_bytes as f64 / sizes.artifact_bytes as f64
        )
    } else {
        MISSING_VALUE.to_string()
    };
    let bpp = if vertex_count > 0 {
        format!(
            "{:.6}",
            (sizes.artifact_bytes * 8) as f64 / vertex_count as f64
        )
    } else {
        MISSING_VALUE.to_string()
    };

    let mut lines = vec![
        "========== Time & Binary Size ==========".to_string(),
        format!("Encoding time (s)              : {:.4}", request.encode_secs),
        format!("Decoding time (s)              : {:.4}", request.decode_secs),
        format!(
            "Source point cloud size (kB)   : {:.4}",
            sizes.reference_bytes as f64 / 1000.0
        ),
        format!(
            "Total binary files size (kB)   : {:.4}",
            sizes.artifact_bytes as f64 / 1000.0
        ),
        format!("Compression ratio              : {ratio}"),
        format!("bpp (bits per point)           : {bpp}"),
        String::new(),
        "========== Point-based Metrics =========".to_string(),
    ];
    push_section(&mut lines, tool_output, P2POINT_METRICS);
    lines.push(String::new());

    if has_normals {
        lines.push("----------------------------------------".to_string());
        push_section(&mut lines, tool_output, P2PLANE_METRICS);
        lines.push(String::new());
    }
    if request.color {
        lines.push("----------------------------------------".to_string());
        push_section(&mut lines, tool_output, COLOR_METRICS);
        lines.push(String::new());
    }
    if request.color && has_normals {
        lines.push("============== QoE Metric ==============".to_string());
        push_section(&mut lines, tool_output, &[HYBRID_METRIC]);
        lines.push(String::new());
    }

    let mut report = lines.join("\n");
    report.push('\n');
    report
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
