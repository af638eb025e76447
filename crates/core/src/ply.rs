//! Minimal PLY header probe.
//!
//! Reads only the header of a `.ply` file to learn the vertex count and
//! whether the vertices carry normals and colors. Both ASCII and binary
//! bodies are supported since the body is never read.

use std::path::Path;

use tokio::io::{AsyncBufReadExt, BufReader};

use crate::error::CoreError;

/// Upper bound on header lines; real headers are a few dozen lines.
const MAX_HEADER_LINES: usize = 512;

/// What the header says about the vertex element.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlyHeader {
    pub vertex_count: u64,
    pub has_normals: bool,
    pub has_colors: bool,
}

/// Parse a PLY header from its text lines.
pub fn parse_header<'a>(lines: impl IntoIterator<Item = &'a str>) -> Result<PlyHeader, CoreError> {
    let mut lines = lines.into_iter();
    if lines.next().map(str::trim) != Some("ply") {
        return Err(CoreError::Validation("Missing 'ply' magic line".into()));
    }

    let mut header = PlyHeader::default();
    let mut in_vertex = false;
    let mut terminated = false;

    for line in lines.take(MAX_HEADER_LINES) {
        let mut words = line.split_whitespace();
        match words.next() {
            Some("end_header") => {
                terminated = true;
                break;
            }
            Some("element") => {
                in_vertex = words.next() == Some("vertex");
                if in_vertex {
                    header.vertex_count = words
                        .next()
                        .and_then(|n| n.parse().ok())
                        .ok_or_else(|| {
                            CoreError::Validation(format!("Invalid vertex element: '{line}'"))
                        })?;
                }
            }
            Some("property") if in_vertex => match words.last() {
                Some("nx") | Some("ny") | Some("nz") => header.has_normals = true,
                Some("red") | Some("green") | Some("blue") => header.has_colors = true,
                _ => {}
            },
            _ => {}
        }
    }

    if !terminated {
        return Err(CoreError::Validation("PLY header is not terminated".into()));
    }
    Ok(header)
}

/// Read and parse the header of the PLY file at `path`.
pub async fn read_header(path: &Path) -> Result<PlyHeader, CoreError> {
    let file = tokio::fs::File::open(path)
        .await
        .map_err(|e| CoreError::io(path, e))?;
    let mut reader = BufReader::new(file);

    let mut lines = Vec::new();
    let mut buf = Vec::new();
    while lines.len() <= MAX_HEADER_LINES {
        buf.clear();
        let n = reader
            .read_until(b'\n', &mut buf)
            .await
            .map_err(|e| CoreError::io(path, e))?;
        if n == 0 {
            break;
        }
        let line = String::from_utf8_lossy(&buf).trim_end().to_string();
        let done = line == "end_header";
        lines.push(line);
        if done {
            break;
        }
    }

    parse_header(lines.iter().map(String::as_str))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
