// Copyright (c) The orchestrator Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::{error, fmt};

/// An error that occurs while reading or writing orchestrator metadata
/// documents (`list -json` output, `streamed_results.jsonl` lines).
#[derive(Debug)]
pub enum MetadataError {
    /// Reading the underlying file failed.
    Io(std::io::Error),

    /// Parsing JSON failed.
    Json(serde_json::Error),
}

impl fmt::Display for MetadataError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(_) => write!(f, "failed to read orchestrator metadata"),
            Self::Json(_) => write!(f, "failed to parse orchestrator metadata as JSON"),
        }
    }
}

impl error::Error for MetadataError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::Json(err) => Some(err),
        }
    }
}

impl From<std::io::Error> for MetadataError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<serde_json::Error> for MetadataError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err)
    }
}
