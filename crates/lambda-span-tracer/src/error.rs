// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::io;
use std::path::PathBuf;

/// Errors raised while resolving the tracer configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid token, set LAMBDA_TRACER_TOKEN or pass a token in Config")]
    MissingToken,
}

/// Errors raised by the spool directory writer and reader
#[derive(Debug, thiserror::Error)]
pub enum SpoolError {
    #[error("failed to create spool directory {}: {source}", path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to create span data store {}: {source}", path.display())]
    CreateFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to write span in data store {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to encode spans for {}: {source}", path.display())]
    Encode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to read spool directory {}: {source}", path.display())]
    ReadDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse spool file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Errors surfaced by span exporters
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("failed to store start span: {0}")]
    StartBatch(#[source] SpoolError),

    #[error("failed to store end span and http spans: {0}")]
    EndBatch(#[source] SpoolError),

    #[error("failed to print spans: {0}")]
    Stdout(#[from] io::Error),
}

/// Errors raised while setting up instrumentation for one invocation
#[derive(Debug, thiserror::Error)]
pub enum TracerError {
    #[error("failed to create span exporter: {0}")]
    Spool(#[from] SpoolError),

    #[error("failed to parse event payload: {0}")]
    Event(#[from] serde_json::Error),
}
