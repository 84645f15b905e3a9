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

use std::path::Path;

use snafu::{ResultExt, ensure};
use tokio::fs;
use tracing::{info, warn};

use crate::{
    error::{DownloadError, FileWriteSnafu, IncompleteSnafu},
    progress::ProgressStore,
};

pub struct Finalizer;

impl Finalizer {
    /// Compare the recorded chunk count with the plan.
    pub async fn verify(progress: &ProgressStore, expected: usize) -> Result<(), DownloadError> {
        let completed = progress.completed_within(expected).await;
        ensure!(
            completed == expected,
            IncompleteSnafu {
                expected,
                completed,
            }
        );
        Ok(())
    }

    /// Publish a verified download and drop its side-car.
    ///
    /// Failing to remove the side-car only warns: the file is already in
    /// place.
    pub async fn commit(
        progress: &ProgressStore,
        temp_path: &Path,
        final_path: &Path,
    ) -> Result<(), DownloadError> {
        Self::publish(temp_path, final_path).await?;

        if let Err(e) = progress.remove().await {
            warn!(error = %e, "failed to remove progress file");
        }
        Ok(())
    }

    /// Atomically move the finished temporary file into place.
    pub async fn publish(temp_path: &Path, final_path: &Path) -> Result<(), DownloadError> {
        fs::rename(temp_path, final_path)
            .await
            .context(FileWriteSnafu { path: final_path })?;
        info!(path = %final_path.display(), "download finished");
        Ok(())
    }
}
