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

use std::{collections::BTreeMap, path::PathBuf, time::Duration};

use bon::Builder;
use jiff::SignedDuration;
use qbit_base::readable_size::ReadableSize;
use serde::{Deserialize, Serialize};
use smart_default::SmartDefault;

/// Target byte size of one range request.
pub const DEFAULT_CHUNK_SIZE: ReadableSize = ReadableSize::mb(10);
/// Concurrent fetch workers. Kept small to stay under upstream rate limits.
pub const DEFAULT_MAX_WORKERS: usize = 2;
/// Attempts per chunk before it is given up.
pub const DEFAULT_MAX_RETRIES: usize = 5;

/// Backoff schedule used between chunk attempts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, SmartDefault, Builder)]
#[serde(default)]
pub struct RetryConfig {
    /// First delay after a transient failure (default: 1s)
    #[default(SignedDuration::from_secs(1))]
    #[builder(default = SignedDuration::from_secs(1))]
    pub min_delay:            SignedDuration,
    /// Upper bound for transient failure delays (default: 8s)
    #[default(SignedDuration::from_secs(8))]
    #[builder(default = SignedDuration::from_secs(8))]
    pub max_delay:            SignedDuration,
    /// First delay after an HTTP 429 (default: 4s)
    #[default(SignedDuration::from_secs(4))]
    #[builder(default = SignedDuration::from_secs(4))]
    pub rate_limit_delay:     SignedDuration,
    /// Upper bound for HTTP 429 delays (default: 60s)
    #[default(SignedDuration::from_secs(60))]
    #[builder(default = SignedDuration::from_secs(60))]
    pub rate_limit_max_delay: SignedDuration,
}

/// Configuration for the downloader
///
/// Zero values for `chunk_size`, `max_workers` and `max_retries` mean "use the
/// default".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, SmartDefault, Builder)]
#[serde(default)]
pub struct DownloaderConfig {
    /// Static headers sent with every probe and fetch
    #[builder(default)]
    pub headers: BTreeMap<String, String>,

    /// Directory holding the destination and its temporary files
    #[default(PathBuf::from("."))]
    #[builder(default = PathBuf::from("."), into)]
    pub save_path: PathBuf,

    /// Re-download even if the destination already exists
    #[builder(default)]
    pub overwrite_existing: bool,

    /// Target size of each range request (default: 10MiB)
    #[default(DEFAULT_CHUNK_SIZE)]
    #[builder(default = DEFAULT_CHUNK_SIZE)]
    pub chunk_size: ReadableSize,

    /// Number of concurrent chunk workers (default: 2)
    #[default(DEFAULT_MAX_WORKERS)]
    #[builder(default = DEFAULT_MAX_WORKERS)]
    pub max_workers: usize,

    /// Maximum attempts per chunk (default: 5)
    #[default(DEFAULT_MAX_RETRIES)]
    #[builder(default = DEFAULT_MAX_RETRIES)]
    pub max_retries: usize,

    /// Timeout for a whole HTTP request, body included (default: 60s)
    #[default(SignedDuration::from_secs(60))]
    #[builder(default = SignedDuration::from_secs(60))]
    pub timeout: SignedDuration,

    /// Custom User-Agent header
    #[builder(into)]
    pub user_agent: Option<String>,

    /// Delays between chunk attempts
    #[builder(default)]
    pub retry: RetryConfig,
}

impl DownloaderConfig {
    #[must_use]
    pub const fn effective_chunk_size(&self) -> u64 {
        match self.chunk_size.as_bytes() {
            0 => DEFAULT_CHUNK_SIZE.as_bytes(),
            size => size,
        }
    }

    #[must_use]
    pub const fn effective_max_workers(&self) -> usize {
        match self.max_workers {
            0 => DEFAULT_MAX_WORKERS,
            workers => workers,
        }
    }

    #[must_use]
    pub const fn effective_max_retries(&self) -> usize {
        match self.max_retries {
            0 => DEFAULT_MAX_RETRIES,
            retries => retries,
        }
    }

    pub(crate) fn request_timeout(&self) -> Duration { self.timeout.unsigned_abs() }
}
