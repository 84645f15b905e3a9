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

use std::{io::SeekFrom, path::PathBuf, sync::Arc};

use futures::StreamExt;
use reqwest::header::{self, HeaderMap};
use snafu::{ResultExt, ensure};
use tokio::{
    fs::OpenOptions,
    io::{AsyncSeekExt, AsyncWriteExt, BufWriter},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    error::{BodyLengthSnafu, DownloadError, FileWriteSnafu, HttpSnafu, NetworkSnafu},
    progress::ProgressStore,
    retry::{RetryPolicy, Verdict},
    types::ChunkTask,
};

/// How a chunk ended up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkOutcome {
    /// Fetched, written and recorded by this run
    Completed,
    /// Already recorded by an earlier run; nothing fetched
    Skipped,
    /// Attempts exhausted
    Failed,
    /// Server refused the range with a client error
    Abandoned,
    /// Cancellation observed
    Cancelled,
}

/// Fetches one range per call and writes it at its offset in the temporary
/// file.
pub struct ChunkFetcher {
    client:    reqwest::Client,
    url:       String,
    headers:   HeaderMap,
    file_path: PathBuf,
    policy:    RetryPolicy,
    progress:  Arc<ProgressStore>,
    cancel:    CancellationToken,
}

impl ChunkFetcher {
    pub const fn new(
        client: reqwest::Client,
        url: String,
        headers: HeaderMap,
        file_path: PathBuf,
        policy: RetryPolicy,
        progress: Arc<ProgressStore>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            client,
            url,
            headers,
            file_path,
            policy,
            progress,
            cancel,
        }
    }

    /// Drive one chunk to completion under the retry policy.
    pub async fn fetch(&self, task: &ChunkTask, worker: usize) -> ChunkOutcome {
        if self.progress.is_complete(task.index).await {
            debug!(worker, chunk = task.index, "chunk already downloaded");
            return ChunkOutcome::Skipped;
        }

        let max_attempts = self.policy.max_attempts();
        let mut schedule = self.policy.schedule();

        for attempt in 1..=max_attempts {
            let result = tokio::select! {
                biased;
                () = self.cancel.cancelled() => return ChunkOutcome::Cancelled,
                result = self.try_fetch(task) => result,
            };

            let verdict = match result {
                Ok(()) => match self.progress.mark_complete(task.index).await {
                    Ok(()) => return ChunkOutcome::Completed,
                    Err(e) => {
                        warn!(worker, chunk = task.index, attempt, error = %e, "failed to save progress");
                        Verdict::Retry
                    }
                },
                Err(e) => {
                    let verdict = RetryPolicy::classify_error(&e);
                    match verdict {
                        Verdict::Abort => {
                            warn!(worker, chunk = task.index, error = %e, "client error, giving up on chunk");
                            return ChunkOutcome::Abandoned;
                        }
                        Verdict::RateLimited => {
                            warn!(worker, chunk = task.index, attempt, "rate limited");
                        }
                        _ => {
                            debug!(worker, chunk = task.index, attempt, error = %e, "chunk attempt failed");
                        }
                    }
                    verdict
                }
            };

            if attempt == max_attempts {
                break;
            }
            let Some(delay) = schedule.next_delay(verdict) else {
                break;
            };
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => return ChunkOutcome::Cancelled,
                () = tokio::time::sleep(delay) => {}
            }
        }

        warn!(
            worker,
            chunk = task.index,
            attempts = max_attempts,
            "failed to download chunk"
        );
        ChunkOutcome::Failed
    }

    /// Single ranged GET, streamed into the file at `task.start`.
    async fn try_fetch(&self, task: &ChunkTask) -> Result<(), DownloadError> {
        let response = self
            .client
            .get(&self.url)
            .headers(self.headers.clone())
            .header(header::RANGE, task.range_header())
            .send()
            .await
            .context(NetworkSnafu)?;

        let status = response.status();
        ensure!(
            RetryPolicy::classify(status) == Verdict::Accept,
            HttpSnafu {
                status: status.as_u16(),
                url:    &self.url,
            }
        );

        let expected = task.size();
        if let Some(length) = response.content_length() {
            ensure!(
                length == expected,
                BodyLengthSnafu {
                    expected,
                    received: length,
                }
            );
        }

        let path = &self.file_path;
        let mut file = OpenOptions::new()
            .write(true)
            .open(path)
            .await
            .context(FileWriteSnafu { path })?;
        file.seek(SeekFrom::Start(task.start))
            .await
            .context(FileWriteSnafu { path })?;
        let mut writer = BufWriter::with_capacity(512 * 1024, file);
        let mut stream = response.bytes_stream();
        let mut received = 0u64;

        while let Some(piece) = stream.next().await {
            let piece = piece.context(NetworkSnafu)?;
            received += piece.len() as u64;
            // Never spill past the range into a neighbour's bytes.
            ensure!(received <= expected, BodyLengthSnafu { expected, received });
            writer.write_all(&piece).await.context(FileWriteSnafu { path })?;
        }
        ensure!(received == expected, BodyLengthSnafu { expected, received });

        writer.flush().await.context(FileWriteSnafu { path })?;
        writer
            .get_mut()
            .sync_data()
            .await
            .context(FileWriteSnafu { path })?;

        Ok(())
    }
}
