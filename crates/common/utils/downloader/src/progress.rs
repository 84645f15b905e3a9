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
    collections::BTreeMap,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use serde_json::{Map, Value};
use snafu::ResultExt;
use tokio::{fs, io::AsyncWriteExt, sync::Mutex};
use tracing::{debug, warn};

use crate::error::{DownloadError, FileReadSnafu, FileWriteSnafu, StateFileSnafu};

/// Reserved side-car key holding the chunk size the indices refer to.
const CHUNK_SIZE_KEY: &str = "chunk_size";

/// Side-car record of chunks that are durably written.
///
/// The file holds a JSON object mapping decimal chunk indices to `true`, plus
/// the chunk size under [`CHUNK_SIZE_KEY`]. Indices only mean something for
/// that chunk size, so a record written with another size is discarded on
/// load. Every completion rewrites and syncs the whole file while the lock is
/// held; the in-memory entry is only inserted once that write succeeded, so a
/// chunk is never trusted without a durable record.
pub struct ProgressStore {
    path:       PathBuf,
    chunk_size: u64,
    completed:  Mutex<BTreeMap<usize, bool>>,
}

/// Parsed side-car contents
struct Record {
    chunk_size: Option<u64>,
    completed:  BTreeMap<usize, bool>,
}

impl ProgressStore {
    /// A store with no completed chunks. Nothing is written until the first
    /// completion.
    #[must_use]
    pub fn empty(path: PathBuf, chunk_size: u64) -> Self {
        Self {
            path,
            chunk_size,
            completed: Mutex::new(BTreeMap::new()),
        }
    }

    /// Seed from an existing side-car written for `chunk_size`.
    ///
    /// A missing file is an empty record. An unreadable or corrupt one is
    /// treated the same way after a warning: at worst chunks are fetched
    /// again. A record for a different (or unknown) chunk size is deleted.
    pub async fn load(path: PathBuf, chunk_size: u64) -> Self {
        let completed = match Self::read(&path).await {
            Ok(None) => BTreeMap::new(),
            Ok(Some(record)) if record.chunk_size == Some(chunk_size) => record.completed,
            Ok(Some(record)) => {
                warn!(
                    path = %path.display(),
                    recorded = ?record.chunk_size,
                    chunk_size,
                    "progress file uses another chunk layout, discarding"
                );
                let stale = Self::empty(path.clone(), chunk_size);
                if let Err(e) = stale.remove().await {
                    warn!(error = %e, "failed to remove progress file");
                }
                BTreeMap::new()
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "ignoring unreadable progress file");
                BTreeMap::new()
            }
        };
        debug!(path = %path.display(), chunks = completed.len(), "progress loaded");

        Self {
            path,
            chunk_size,
            completed: Mutex::new(completed),
        }
    }

    async fn read(path: &Path) -> Result<Option<Record>, DownloadError> {
        let bytes = match fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).context(FileReadSnafu { path });
            }
        };
        let raw: Map<String, Value> =
            serde_json::from_slice(&bytes).context(StateFileSnafu { path })?;

        let chunk_size = raw.get(CHUNK_SIZE_KEY).and_then(Value::as_u64);
        let completed = raw
            .iter()
            .filter_map(|(key, done)| Some((key.parse().ok()?, done.as_bool()?)))
            .collect();
        Ok(Some(Record {
            chunk_size,
            completed,
        }))
    }

    #[must_use]
    pub fn path(&self) -> &Path { &self.path }

    pub async fn is_complete(&self, index: usize) -> bool {
        self.completed
            .lock()
            .await
            .get(&index)
            .copied()
            .unwrap_or(false)
    }

    /// Record `index` as durably written and persist the record.
    ///
    /// On error the in-memory record is unchanged.
    pub async fn mark_complete(&self, index: usize) -> Result<(), DownloadError> {
        let mut completed = self.completed.lock().await;
        if completed.get(&index).copied().unwrap_or(false) {
            return Ok(());
        }

        let mut next = completed.clone();
        next.insert(index, true);
        self.persist(&next).await?;
        *completed = next;
        Ok(())
    }

    async fn persist(&self, map: &BTreeMap<usize, bool>) -> Result<(), DownloadError> {
        let mut raw: Map<String, Value> = map
            .iter()
            .map(|(index, done)| (index.to_string(), Value::Bool(*done)))
            .collect();
        raw.insert(CHUNK_SIZE_KEY.to_string(), Value::from(self.chunk_size));

        let bytes = serde_json::to_vec(&raw).context(StateFileSnafu { path: &self.path })?;
        let mut file = fs::File::create(&self.path)
            .await
            .context(FileWriteSnafu { path: &self.path })?;
        file.write_all(&bytes)
            .await
            .context(FileWriteSnafu { path: &self.path })?;
        file.sync_all()
            .await
            .context(FileWriteSnafu { path: &self.path })?;
        Ok(())
    }

    /// Completed chunks among the first `planned` indices.
    pub async fn completed_within(&self, planned: usize) -> usize {
        self.completed
            .lock()
            .await
            .range(..planned)
            .filter(|(_, done)| **done)
            .count()
    }

    /// Delete the side-car. A missing file is not an error.
    pub async fn remove(&self) -> Result<(), DownloadError> {
        match fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).context(FileWriteSnafu { path: &self.path }),
        }
    }
}
