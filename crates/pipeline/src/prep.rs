//! Dataset preparation through CloudCompare.
//!
//! Two conversions feed the benchmark: sampling a point cloud from a mesh
//! and estimating oriented normals for the metric reference. Both run the
//! CloudCompare command line headless, so the child gets an X display id
//! through `DISPLAY` (a virtual framebuffer is expected to serve it).
//! Outputs are always PLY, written under `dest_dir` at the input's
//! relative path.

use std::path::{Path, PathBuf};

use pcbench_core::error::CoreError;

use crate::codec::discover_items;
use crate::dispatcher::{DispatchSummary, Dispatcher};
use crate::error::PipelineError;
use crate::executor::{self, CommandSpec};

pub const DEFAULT_CLOUDCOMPARE_BIN: &str = "cloudcompare.CloudCompare";

/// X display served to CloudCompare, as in `DISPLAY=:99`.
pub const DEFAULT_DISPLAY_ID: u32 = 99;

const OUTPUT_EXTENSION: &str = "ply";

/// One preparation step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrepTask {
    /// Sample `num_points` points from a mesh. Colors are dropped unless
    /// `color` is set; normals are always dropped.
    SampleMesh { num_points: u64, color: bool },
    /// Estimate normals over an automatically sized octree and orient
    /// them with a minimum spanning tree over `knn` neighbours.
    Normals { knn: u32 },
}

/// The CloudCompare binary and the display it renders to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloudCompare {
    binary: PathBuf,
    display_id: u32,
}

impl Default for CloudCompare {
    fn default() -> Self {
        Self::new(DEFAULT_CLOUDCOMPARE_BIN)
    }
}

impl CloudCompare {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            display_id: DEFAULT_DISPLAY_ID,
        }
    }

    pub fn with_display(mut self, display_id: u32) -> Self {
        self.display_id = display_id;
        self
    }

    pub fn sample_mesh_command(
        &self,
        input: &Path,
        output: &Path,
        num_points: u64,
        color: bool,
    ) -> CommandSpec {
        let mut args = vec![
            "-SAMPLE_MESH".to_string(),
            "POINTS".to_string(),
            num_points.to_string(),
            "-CLEAR_MESHES".to_string(),
            "-CLEAR_NORMALS".to_string(),
        ];
        if !color {
            args.push("-REMOVE_RGB".to_string());
        }
        self.command(input, output, args)
    }

    pub fn normals_command(&self, input: &Path, output: &Path, knn: u32) -> CommandSpec {
        self.command(
            input,
            output,
            vec![
                "-OCTREE_NORMALS".to_string(),
                "auto".to_string(),
                "-CLEAR_MESHES".to_string(),
                "-ORIENT_NORMS_MST".to_string(),
                knn.to_string(),
            ],
        )
    }

    pub fn task_command(&self, task: PrepTask, input: &Path, output: &Path) -> CommandSpec {
        match task {
            PrepTask::SampleMesh { num_points, color } => {
                self.sample_mesh_command(input, output, num_points, color)
            }
            PrepTask::Normals { knn } => self.normals_command(input, output, knn),
        }
    }

    /// `-O <input> <steps> ... -SAVE_CLOUDS FILE <output>`, auto-save off.
    fn command(&self, input: &Path, output: &Path, steps: Vec<String>) -> CommandSpec {
        let mut argv = vec![
            self.binary.display().to_string(),
            "-SILENT".to_string(),
            "-AUTO_SAVE".to_string(),
            "OFF".to_string(),
            "-O".to_string(),
            input.display().to_string(),
        ];
        argv.extend(steps);
        argv.extend([
            "-C_EXPORT_FMT".to_string(),
            "PLY".to_string(),
            "-NO_TIMESTAMP".to_string(),
            "-SAVE_CLOUDS".to_string(),
            "FILE".to_string(),
            output.display().to_string(),
        ]);
        CommandSpec::new(argv).env("DISPLAY", format!(":{}", self.display_id))
    }
}

/// Where `item` lands under `dest_dir`.
pub fn output_path(item: &Path, dest_dir: &Path) -> PathBuf {
    dest_dir.join(item).with_extension(OUTPUT_EXTENSION)
}

/// Run `task` on `src_dir/item`, writing `dest_dir/item` as PLY.
pub async fn prepare(
    tool: &CloudCompare,
    task: PrepTask,
    item: &Path,
    src_dir: &Path,
    dest_dir: &Path,
) -> Result<PathBuf, PipelineError> {
    let input = src_dir.join(item);
    let output = output_path(item, dest_dir);
    if let Some(parent) = output.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| CoreError::io(parent, e))?;
    }

    let spec = tool.task_command(task, &input, &output);
    if !executor::run(&spec).await {
        tracing::error!(input = %input.display(), ?task, "Dataset preparation failed");
        return Err(PipelineError::Prep { input });
    }

    tracing::debug!(output = %output.display(), "Prepared");
    Ok(output)
}

/// Apply `task` to every file under `src_dir` matching `pattern`.
///
/// Preparation is CPU-bound, so the dispatcher runs it in CPU mode. A file
/// that fails is counted in the summary and the rest carry on.
pub async fn prepare_dataset(
    tool: &CloudCompare,
    task: PrepTask,
    src_dir: &Path,
    dest_dir: &Path,
    pattern: &str,
    dispatcher: &Dispatcher,
) -> Result<DispatchSummary, PipelineError> {
    let items = discover_items(src_dir, pattern).await?;
    tracing::info!(
        src_dir = %src_dir.display(),
        dest_dir = %dest_dir.display(),
        files = items.len(),
        ?task,
        "Preparing dataset",
    );

    let summary = dispatcher
        .dispatch(items, false, |item: PathBuf, _| async move {
            prepare(tool, task, &item, src_dir, dest_dir).await
        })
        .await?;
    Ok(summary)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
