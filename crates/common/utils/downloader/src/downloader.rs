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

use std::{io::ErrorKind, sync::Arc};

use jiff::Timestamp;
use snafu::ResultExt;
use tokio::fs::{self, OpenOptions};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    chunk_fetcher::ChunkFetcher,
    config::DownloaderConfig,
    context::{DownloadContext, METADATA_FILE_SUFFIX, TEMP_FILE_SUFFIX, append_suffix},
    error::{ClientBuildSnafu, DownloadError, FileReadSnafu, FileWriteSnafu},
    finalizer::Finalizer,
    planner::{expected_chunks, plan_chunks},
    probe::{Capability, Prober},
    progress::ProgressStore,
    single_downloader::SingleThreadDownloader,
    types::{DownloadRequest, DownloadResult, Phase, Strategy},
    worker_pool::WorkerPool,
};

/// Resumable HTTP downloader
///
/// Components:
/// - `Prober`: learns whether the source serves byte ranges
/// - `planner`: splits the file into fixed-size chunks
/// - `ProgressStore`: side-car record of finished chunks for resume
/// - `WorkerPool` + `ChunkFetcher`: concurrent ranged fetches
/// - `Finalizer`: verification and atomic publish
/// - `SingleThreadDownloader`: plain GET fallback
pub struct Downloader {
    config: DownloaderConfig,
    client: reqwest::Client,
    prober: Prober,
    single: SingleThreadDownloader,
}

impl Downloader {
    /// Create a new downloader with the given configuration
    pub fn new(config: DownloaderConfig) -> Result<Self, DownloadError> {
        let client = Self::build_client(&config)?;
        let prober = Prober::new(client.clone());
        let single = SingleThreadDownloader::new(client.clone());

        Ok(Self {
            config,
            client,
            prober,
            single,
        })
    }

    #[must_use]
    pub const fn config(&self) -> &DownloaderConfig { &self.config }

    /// Download `url` into `save_path/file_name`.
    ///
    /// An empty `file_name` uses the last segment of the URL path.
    pub async fn download(
        &self,
        url: &str,
        file_name: &str,
    ) -> Result<DownloadResult, DownloadError> {
        self.download_with_cancel(url, file_name, CancellationToken::new())
            .await
    }

    /// Like [`Downloader::download`], stopping early once `cancel` fires.
    ///
    /// A cancelled ranged download keeps its temporary file and side-car so a
    /// later call resumes it.
    pub async fn download_with_cancel(
        &self,
        url: &str,
        file_name: &str,
        cancel: CancellationToken,
    ) -> Result<DownloadResult, DownloadError> {
        let request = DownloadRequest::builder()
            .url(url)
            .file_name(file_name)
            .build();
        self.download_request(request, cancel).await
    }

    /// Run one download:
    /// 1. Skip if the destination exists and overwriting is off
    /// 2. Probe for range support
    /// 3. Ranged: plan chunks, load progress, fetch concurrently, verify and
    ///    publish
    /// 4. Otherwise: single stream
    pub async fn download_request(
        &self,
        request: DownloadRequest,
        cancel: CancellationToken,
    ) -> Result<DownloadResult, DownloadError> {
        let start_time = Timestamp::now();
        let ctx = DownloadContext::new(&self.config, request, cancel)?;
        Self::enter(&ctx, Phase::Idle);

        if let Some(size) = Self::existing_size(&ctx).await? {
            info!(path = %ctx.final_path.display(), url = %ctx.url, "file exists, skipped");
            return Ok(DownloadResult {
                path: ctx.final_path,
                size,
                strategy: Strategy::Skipped,
                resumed_chunks: 0,
                duration: start_time.until(Timestamp::now()).unwrap_or_default(),
            });
        }

        fs::create_dir_all(&self.config.save_path)
            .await
            .context(FileWriteSnafu {
                path: &self.config.save_path,
            })?;

        let result = self.run(&ctx, start_time).await;
        match &result {
            Ok(_) => Self::enter(&ctx, Phase::Done),
            Err(e) => {
                Self::enter(&ctx, Phase::Failed);
                warn!(url = %ctx.url, file = %ctx.file_name, error = %e, "download failed");
            }
        }
        result
    }

    /// Remove the temporary file and side-car of an abandoned download.
    pub async fn cleanup(&self, file_name: &str) -> Result<(), DownloadError> {
        let temp_path = append_suffix(&self.config.save_path.join(file_name), TEMP_FILE_SUFFIX);
        let metadata_path = append_suffix(&temp_path, METADATA_FILE_SUFFIX);
        for path in [metadata_path, temp_path] {
            match fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e).context(FileWriteSnafu { path }),
            }
        }
        Ok(())
    }

    async fn run(
        &self,
        ctx: &DownloadContext,
        start_time: Timestamp,
    ) -> Result<DownloadResult, DownloadError> {
        Self::enter(ctx, Phase::Probing);
        let probe = tokio::select! {
            biased;
            () = ctx.cancel.cancelled() => return Err(DownloadError::Cancelled),
            probe = self.prober.probe(&ctx.url, &ctx.headers) => probe,
        };
        debug!(
            url = %ctx.url,
            content_type = ?probe.content_type,
            last_modified = ?probe.last_modified,
            content_disposition = ?probe.content_disposition,
            "probe result"
        );

        let (strategy, size, resumed_chunks) = match probe.capability {
            Capability::Ranged { total } if total >= ctx.chunk_size => {
                info!(url = %ctx.url, total, "server supports range download");
                let resumed = self.download_ranged(ctx, total).await?;
                (Strategy::Ranged, total, resumed)
            }
            capability => {
                info!(url = %ctx.url, ?capability, "fallback to single thread download");
                Self::enter(ctx, Phase::FallbackFetching);
                let size = self.single.download(ctx).await?;
                (Strategy::SingleStream, size, 0)
            }
        };

        Ok(DownloadResult {
            path: ctx.final_path.clone(),
            size,
            strategy,
            resumed_chunks,
            duration: start_time.until(Timestamp::now()).unwrap_or_default(),
        })
    }

    /// Ranged path. Returns how many chunks were already complete on entry.
    async fn download_ranged(
        &self,
        ctx: &DownloadContext,
        total: u64,
    ) -> Result<usize, DownloadError> {
        Self::enter(ctx, Phase::Planning);
        let tasks = plan_chunks(total, ctx.chunk_size);
        let expected = expected_chunks(total, ctx.chunk_size);

        let progress = Arc::new(Self::prepare_temp_file(ctx, total).await?);
        let resumed = progress.completed_within(expected).await;
        if resumed > 0 {
            info!(file = %ctx.file_name, resumed, expected, "resuming download");
        }

        Self::enter(ctx, Phase::Fetching);
        let fetcher = Arc::new(ChunkFetcher::new(
            self.client.clone(),
            ctx.url.clone(),
            ctx.headers.clone(),
            ctx.temp_path.clone(),
            ctx.policy.clone(),
            Arc::clone(&progress),
            ctx.cancel.clone(),
        ));
        let report = WorkerPool::new(ctx.workers)
            .run(fetcher, tasks, &ctx.cancel)
            .await;
        debug!(file = %ctx.file_name, ?report, "worker pool drained");
        if report.failed + report.abandoned > 0 {
            warn!(
                file = %ctx.file_name,
                failed = report.failed,
                abandoned = report.abandoned,
                progress = %progress.path().display(),
                "some chunks were not downloaded, rerun to resume"
            );
        }

        if ctx.cancel.is_cancelled() {
            return Err(DownloadError::Cancelled);
        }

        Self::enter(ctx, Phase::Verifying);
        Finalizer::verify(&progress, expected).await?;
        Self::enter(ctx, Phase::Finalizing);
        Finalizer::commit(&progress, &ctx.temp_path, &ctx.final_path).await?;

        Ok(resumed)
    }

    /// Load resumable progress and create the temporary file at its full
    /// size.
    ///
    /// A side-car is only trusted next to a temporary file of exactly `total`
    /// bytes. A length mismatch means the remote file changed: both artifacts
    /// are discarded and the download fails. A side-car written with another
    /// chunk size is dropped by [`ProgressStore::load`] and every chunk is
    /// fetched again.
    async fn prepare_temp_file(
        ctx: &DownloadContext,
        total: u64,
    ) -> Result<ProgressStore, DownloadError> {
        let has_sidecar = fs::try_exists(&ctx.metadata_path).await.unwrap_or(false);
        let temp_len = match fs::metadata(&ctx.temp_path).await {
            Ok(meta) => Some(meta.len()),
            Err(e) if e.kind() == ErrorKind::NotFound => None,
            Err(e) => {
                return Err(e).context(FileReadSnafu {
                    path: &ctx.temp_path,
                });
            }
        };

        let progress = match (has_sidecar, temp_len) {
            (true, Some(len)) if len != total => {
                warn!(file = %ctx.file_name, partial = len, remote = total, "remote length changed, discarding progress");
                let stale = ProgressStore::empty(ctx.metadata_path.clone(), ctx.chunk_size);
                stale.remove().await?;
                fs::remove_file(&ctx.temp_path)
                    .await
                    .context(FileWriteSnafu {
                        path: &ctx.temp_path,
                    })?;
                return Err(DownloadError::LengthMismatch {
                    expected: len,
                    actual:   total,
                });
            }
            (true, Some(_)) => {
                ProgressStore::load(ctx.metadata_path.clone(), ctx.chunk_size).await
            }
            (true, None) => {
                debug!(file = %ctx.file_name, "progress file without partial data, starting over");
                let stale = ProgressStore::empty(ctx.metadata_path.clone(), ctx.chunk_size);
                stale.remove().await?;
                stale
            }
            (false, _) => ProgressStore::empty(ctx.metadata_path.clone(), ctx.chunk_size),
        };

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&ctx.temp_path)
            .await
            .context(FileWriteSnafu {
                path: &ctx.temp_path,
            })?;
        file.set_len(total).await.context(FileWriteSnafu {
            path: &ctx.temp_path,
        })?;

        Ok(progress)
    }

    /// Size of the destination when the download should be skipped.
    async fn existing_size(ctx: &DownloadContext) -> Result<Option<u64>, DownloadError> {
        if ctx.overwrite {
            return Ok(None);
        }
        match fs::metadata(&ctx.final_path).await {
            Ok(meta) => Ok(Some(meta.len())),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).context(FileReadSnafu {
                path: &ctx.final_path,
            }),
        }
    }

    fn enter(ctx: &DownloadContext, phase: Phase) {
        debug!(file = %ctx.file_name, %phase, "download phase");
    }

    fn build_client(config: &DownloaderConfig) -> Result<reqwest::Client, DownloadError> {
        let mut builder = reqwest::Client::builder().timeout(config.request_timeout());

        if let Some(ref ua) = config.user_agent {
            builder = builder.user_agent(ua);
        }

        builder.build().context(ClientBuildSnafu)
    }
}
