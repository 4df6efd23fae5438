// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Hand-off directory between the tracer and the shipping agent.
//!
//! Every flush creates one new file holding a JSON array of [`VendorSpan`] records. Start
//! batches are named `<id>_span`, end batches `<id>_end`. Files are never appended to.
//!
//! Batches are written synchronously: [`SpoolWriter::write`] runs inside the span processor,
//! on whatever thread ends the span.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, error};
use uuid::Uuid;

use crate::error::SpoolError;
use crate::vendor_span::VendorSpan;

pub const START_SUFFIX: &str = "_span";
pub const END_SUFFIX: &str = "_end";
/// Tells the shipping agent that the invocation ended without an end batch
pub const STOP_MARKER: &str = "balagan_stop";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchKind {
    Start,
    End,
}

impl BatchKind {
    fn suffix(self) -> &'static str {
        match self {
            BatchKind::Start => START_SUFFIX,
            BatchKind::End => END_SUFFIX,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SpoolWriter {
    dir: PathBuf,
}

impl SpoolWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn ensure_dir(&self) -> Result<(), SpoolError> {
        fs::create_dir_all(&self.dir).map_err(|source| SpoolError::CreateDir {
            path: self.dir.clone(),
            source,
        })
    }

    /// Writes `spans` to a new file and returns its path.
    pub fn write(&self, spans: &[VendorSpan], kind: BatchKind) -> Result<PathBuf, SpoolError> {
        self.ensure_dir()?;
        let path = self
            .dir
            .join(format!("{}{}", Uuid::new_v4().simple(), kind.suffix()));

        let mut encoded = serde_json::to_vec(spans).map_err(|source| SpoolError::Encode {
            path: path.clone(),
            source,
        })?;
        encoded.push(b'\n');

        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|source| SpoolError::CreateFile {
                path: path.clone(),
                source,
            })?;
        file.write_all(&encoded).map_err(|source| SpoolError::Write {
            path: path.clone(),
            source,
        })?;
        file.flush().map_err(|source| SpoolError::Write {
            path: path.clone(),
            source,
        })?;

        debug!("Wrote {} spans to {}", spans.len(), path.display());
        Ok(path)
    }
}

/// Places the stop marker in `dir` unless an end batch is already there.
pub async fn ensure_stop_marker(dir: &Path) {
    match has_end_batch(dir).await {
        Ok(true) => return,
        Ok(false) => {}
        Err(e) => error!("Failed to read span data store {}: {e}", dir.display()),
    }

    let marker = dir.join(STOP_MARKER);
    match tokio::fs::write(&marker, b"").await {
        Ok(()) => debug!("No end span found, created {}", marker.display()),
        Err(e) => error!("Failed to create stop marker {}: {e}", marker.display()),
    }
}

async fn has_end_batch(dir: &Path) -> io::Result<bool> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_name().to_string_lossy().ends_with(END_SUFFIX) {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Batches found in a spool directory
#[derive(Debug, Default)]
pub struct SpoolContents {
    pub start_batches: Vec<Vec<VendorSpan>>,
    pub end_batches: Vec<Vec<VendorSpan>>,
    pub has_stop_marker: bool,
}

impl SpoolContents {
    pub fn start_spans(&self) -> impl Iterator<Item = &VendorSpan> {
        self.start_batches.iter().flatten()
    }

    pub fn end_spans(&self) -> impl Iterator<Item = &VendorSpan> {
        self.end_batches.iter().flatten()
    }
}

/// Parses every batch file of `dir`.
pub async fn read_spool(dir: &Path) -> Result<SpoolContents, SpoolError> {
    let read_dir_error = |source| SpoolError::ReadDir {
        path: dir.to_path_buf(),
        source,
    };
    let mut entries = tokio::fs::read_dir(dir).await.map_err(read_dir_error)?;
    let mut contents = SpoolContents::default();

    while let Some(entry) = entries.next_entry().await.map_err(read_dir_error)? {
        let name = entry.file_name().to_string_lossy().into_owned();
        let kind = if name.ends_with(START_SUFFIX) {
            BatchKind::Start
        } else if name.ends_with(END_SUFFIX) {
            BatchKind::End
        } else {
            contents.has_stop_marker |= name == STOP_MARKER;
            continue;
        };

        let path = entry.path();
        let raw = tokio::fs::read(&path).await.map_err(|source| SpoolError::ReadDir {
            path: path.clone(),
            source,
        })?;
        let batch: Vec<VendorSpan> =
            serde_json::from_slice(&raw).map_err(|source| SpoolError::Parse { path, source })?;
        match kind {
            BatchKind::Start => contents.start_batches.push(batch),
            BatchKind::End => contents.end_batches.push(batch),
        }
    }
    Ok(contents)
}
