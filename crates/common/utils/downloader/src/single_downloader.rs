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

use std::io::ErrorKind;

use futures::StreamExt;
use snafu::{ResultExt, ensure};
use tokio::{
    fs::{self, File},
    io::{AsyncWriteExt, BufWriter},
};
use tracing::{debug, warn};

use crate::{
    context::DownloadContext,
    error::{DownloadError, FileWriteSnafu, HttpSnafu, NetworkSnafu},
};

/// Plain GET streamed to disk, used when ranges are unavailable or pointless.
pub struct SingleThreadDownloader {
    client: reqwest::Client,
}

impl SingleThreadDownloader {
    pub const fn new(client: reqwest::Client) -> Self { Self { client } }

    /// Download through the temporary file and rename it into place. Returns
    /// the number of bytes written.
    ///
    /// There is no resume: a failed attempt removes its partial file.
    pub async fn download(&self, ctx: &DownloadContext) -> Result<u64, DownloadError> {
        // A side-car from an earlier ranged attempt cannot describe this file.
        if fs::try_exists(&ctx.metadata_path).await.unwrap_or(false) {
            debug!(path = %ctx.metadata_path.display(), "removing stale progress file");
            if let Err(e) = fs::remove_file(&ctx.metadata_path).await
                && e.kind() != ErrorKind::NotFound
            {
                warn!(path = %ctx.metadata_path.display(), error = %e, "failed to remove stale progress file");
            }
        }

        let result = tokio::select! {
            biased;
            () = ctx.cancel.cancelled() => Err(DownloadError::Cancelled),
            result = self.stream_to_temp(ctx) => result,
        };

        match result {
            Ok(size) => {
                fs::rename(&ctx.temp_path, &ctx.final_path)
                    .await
                    .context(FileWriteSnafu {
                        path: &ctx.final_path,
                    })?;
                Ok(size)
            }
            Err(e) => {
                if let Err(remove) = fs::remove_file(&ctx.temp_path).await
                    && remove.kind() != ErrorKind::NotFound
                {
                    warn!(path = %ctx.temp_path.display(), error = %remove, "failed to remove partial file");
                }
                Err(e)
            }
        }
    }

    async fn stream_to_temp(&self, ctx: &DownloadContext) -> Result<u64, DownloadError> {
        let response = self
            .client
            .get(&ctx.url)
            .headers(ctx.headers.clone())
            .send()
            .await
            .context(NetworkSnafu)?;

        ensure!(
            response.status().is_success(),
            HttpSnafu {
                status: response.status().as_u16(),
                url:    &ctx.url,
            }
        );

        let path = &ctx.temp_path;
        let file = File::create(path).await.context(FileWriteSnafu { path })?;
        let mut writer = BufWriter::with_capacity(512 * 1024, file);
        let mut total_size = 0u64;
        let mut stream = response.bytes_stream();

        while let Some(chunk_result) = stream.next().await {
            let chunk = chunk_result.context(NetworkSnafu)?;
            writer
                .write_all(&chunk)
                .await
                .context(FileWriteSnafu { path })?;
            total_size += chunk.len() as u64;
        }

        writer.flush().await.context(FileWriteSnafu { path })?;
        writer
            .get_mut()
            .sync_all()
            .await
            .context(FileWriteSnafu { path })?;

        Ok(total_size)
    }
}
