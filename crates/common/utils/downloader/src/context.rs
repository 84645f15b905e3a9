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

use std::{
    ffi::OsString,
    path::{Path, PathBuf},
};

use reqwest::{
    Url,
    header::{HeaderMap, HeaderName, HeaderValue},
};
use tokio_util::sync::CancellationToken;

use crate::{
    config::DownloaderConfig,
    error::DownloadError,
    retry::RetryPolicy,
    types::DownloadRequest,
};

/// Suffix of the file bytes are written to while a download is in progress.
pub const TEMP_FILE_SUFFIX: &str = ".downloading";
/// Suffix, appended to the temporary file path, of the progress side-car.
pub const METADATA_FILE_SUFFIX: &str = ".metadata";

/// Everything one download needs, resolved once from the config and request.
#[derive(Debug, Clone)]
pub struct DownloadContext {
    pub url:           String,
    pub file_name:     String,
    pub final_path:    PathBuf,
    pub temp_path:     PathBuf,
    pub metadata_path: PathBuf,
    pub headers:       HeaderMap,
    pub overwrite:     bool,
    pub chunk_size:    u64,
    pub workers:       usize,
    pub policy:        RetryPolicy,
    pub cancel:        CancellationToken,
}

impl DownloadContext {
    pub fn new(
        config: &DownloaderConfig,
        request: DownloadRequest,
        cancel: CancellationToken,
    ) -> Result<Self, DownloadError> {
        let file_name = if request.file_name.is_empty() {
            file_name_from_url(&request.url).ok_or_else(|| DownloadError::InvalidUrl {
                url: request.url.clone(),
            })?
        } else {
            request.file_name
        };

        let final_path = config.save_path.join(&file_name);
        let temp_path = append_suffix(&final_path, TEMP_FILE_SUFFIX);
        let metadata_path = append_suffix(&temp_path, METADATA_FILE_SUFFIX);

        Ok(Self {
            url: request.url,
            file_name,
            final_path,
            temp_path,
            metadata_path,
            headers: header_map(config)?,
            overwrite: config.overwrite_existing,
            chunk_size: config.effective_chunk_size(),
            workers: config.effective_max_workers(),
            policy: RetryPolicy::new(config.effective_max_retries(), &config.retry),
            cancel,
        })
    }
}

/// Last non-empty path segment of `url`, without query or fragment.
#[must_use]
pub fn file_name_from_url(url: &str) -> Option<String> {
    let segment = match Url::parse(url) {
        Ok(parsed) => parsed
            .path_segments()?
            .rev()
            .find(|s| !s.is_empty())?
            .to_string(),
        Err(_) => {
            let path = url.split(['?', '#']).next()?;
            path.rsplit('/').find(|s| !s.is_empty())?.to_string()
        }
    };
    (segment != "." && segment != "..").then_some(segment)
}

pub(crate) fn append_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

fn header_map(config: &DownloaderConfig) -> Result<HeaderMap, DownloadError> {
    let mut headers = HeaderMap::with_capacity(config.headers.len());
    for (name, value) in &config.headers {
        let header_name =
            HeaderName::from_bytes(name.as_bytes()).map_err(|e| DownloadError::InvalidHeader {
                name:    name.clone(),
                message: e.to_string(),
            })?;
        let header_value = HeaderValue::from_str(value).map_err(|e| DownloadError::InvalidHeader {
            name:    name.clone(),
            message: e.to_string(),
        })?;
        headers.insert(header_name, header_value);
    }
    Ok(headers)
}
