// Copyright 2025 Crrow
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::path::PathBuf;

use snafu::Snafu;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum DownloadError {
    #[snafu(display("Network error: {source}"))]
    Network { source: reqwest::Error },

    #[snafu(display("HTTP error {status} for URL: {url}"))]
    Http { status: u16, url: String },

    #[snafu(display("File write error at {}: {source}", path.display()))]
    FileWrite {
        path:   PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("File read error at {}: {source}", path.display()))]
    FileRead {
        path:   PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("Progress file error at {}: {source}", path.display()))]
    StateFile {
        path:   PathBuf,
        source: serde_json::Error,
    },

    #[snafu(display("Received {received} bytes for a {expected} byte range"))]
    BodyLength { expected: u64, received: u64 },

    #[snafu(display(
        "Download incomplete: {} of {expected} chunks missing (expected {expected}, completed {completed})",
        expected.saturating_sub(*completed)
    ))]
    Incomplete { expected: usize, completed: usize },

    #[snafu(display(
        "Remote length changed from {expected} to {actual} bytes, partial download discarded"
    ))]
    LengthMismatch { expected: u64, actual: u64 },

    #[snafu(display("Download cancelled"))]
    Cancelled,

    #[snafu(display("Cannot derive a file name from URL: {url}"))]
    InvalidUrl { url: String },

    #[snafu(display("Invalid request header {name:?}: {message}"))]
    InvalidHeader { name: String, message: String },

    #[snafu(display("Failed to build HTTP client: {source}"))]
    ClientBuild { source: reqwest::Error },
}

impl DownloadError {
    /// Number of chunks that never completed, for `Incomplete` errors.
    #[must_use]
    pub const fn missing_chunks(&self) -> Option<usize> {
        match self {
            Self::Incomplete {
                expected,
                completed,
            } => Some(expected.saturating_sub(*completed)),
            _ => None,
        }
    }
}
