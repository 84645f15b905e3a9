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

use bon::Builder;
use jiff::Span;
use strum_macros::{Display, EnumString};

/// A request to download a file
#[derive(Debug, Clone, Builder)]
pub struct DownloadRequest {
    /// URL serving the bytes
    #[builder(into)]
    pub url:       String,
    /// Destination file name inside the save path. Empty means "use the last
    /// URL path segment".
    #[builder(default, into)]
    pub file_name: String,
}

/// How a download was carried out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum Strategy {
    /// Concurrent range requests with a progress side-car
    Ranged,
    /// One plain GET
    SingleStream,
    /// Destination already existed
    Skipped,
}

/// Result of a successful download
#[derive(Debug, Clone)]
pub struct DownloadResult {
    /// Path where the file was saved
    pub path:           PathBuf,
    /// Size of the file in bytes
    pub size:           u64,
    /// Path taken to produce the file
    pub strategy:       Strategy,
    /// Chunks found complete in the side-car and not fetched again
    pub resumed_chunks: usize,
    /// Total duration of the download operation
    pub duration:       Span,
}

/// Lifecycle of a single download attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum Phase {
    Idle,
    Probing,
    Planning,
    Fetching,
    Verifying,
    Finalizing,
    FallbackFetching,
    Done,
    Failed,
}

/// One byte range of the target file, `end` inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChunkTask {
    pub index: usize,
    pub start: u64,
    pub end:   u64,
}

impl ChunkTask {
    /// Number of bytes covered by this chunk
    #[must_use]
    pub const fn size(&self) -> u64 { self.end - self.start + 1 }

    /// Value for the `Range` request header
    #[must_use]
    pub fn range_header(&self) -> String { format!("bytes={}-{}", self.start, self.end) }
}
