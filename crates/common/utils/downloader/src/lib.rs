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

//! Resumable, concurrent HTTP file downloader.
//!
//! Range-capable sources are split into fixed-size chunks fetched by a small
//! worker pool. Finished chunks are recorded in a side-car file next to the
//! partial download so an interrupted run picks up where it stopped. Sources
//! without range support are streamed with a single request.

mod chunk_fetcher;
mod config;
mod context;
mod downloader;
mod error;
mod finalizer;
mod planner;
mod probe;
mod progress;
mod retry;
mod single_downloader;
mod types;
mod worker_pool;

pub use config::{
    DEFAULT_CHUNK_SIZE, DEFAULT_MAX_RETRIES, DEFAULT_MAX_WORKERS, DownloaderConfig, RetryConfig,
};
pub use context::{METADATA_FILE_SUFFIX, TEMP_FILE_SUFFIX, file_name_from_url};
pub use downloader::Downloader;
pub use error::DownloadError;
pub use planner::{expected_chunks, plan_chunks};
pub use probe::{Capability, ProbeResult, Prober};
pub use retry::{RetryPolicy, Verdict};
pub use types::{ChunkTask, DownloadRequest, DownloadResult, Phase, Strategy};
