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

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::{
    chunk_fetcher::{ChunkFetcher, ChunkOutcome},
    types::ChunkTask,
};

/// Per-outcome chunk counts of one pool run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolReport {
    pub completed: usize,
    pub skipped:   usize,
    pub failed:    usize,
    pub abandoned: usize,
    pub cancelled: usize,
}

impl PoolReport {
    fn record(&mut self, outcome: ChunkOutcome) {
        match outcome {
            ChunkOutcome::Completed => self.completed += 1,
            ChunkOutcome::Skipped => self.skipped += 1,
            ChunkOutcome::Failed => self.failed += 1,
            ChunkOutcome::Abandoned => self.abandoned += 1,
            ChunkOutcome::Cancelled => self.cancelled += 1,
        }
    }

    fn merge(&mut self, other: Self) {
        self.completed += other.completed;
        self.skipped += other.skipped;
        self.failed += other.failed;
        self.abandoned += other.abandoned;
        self.cancelled += other.cancelled;
    }
}

type TaskQueue = Arc<Mutex<mpsc::Receiver<ChunkTask>>>;

/// A fixed set of tokio tasks draining one queue of chunk tasks
pub struct WorkerPool {
    workers: usize,
}

impl WorkerPool {
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
        }
    }

    /// Feed `tasks` through the workers and wait until every worker has
    /// exited.
    ///
    /// Once `cancel` fires no further task is handed out.
    pub async fn run(
        &self,
        fetcher: Arc<ChunkFetcher>,
        tasks: Vec<ChunkTask>,
        cancel: &CancellationToken,
    ) -> PoolReport {
        let total = tasks.len();
        let (tx, rx) = mpsc::channel(self.workers);
        let queue: TaskQueue = Arc::new(Mutex::new(rx));
        let done = Arc::new(AtomicUsize::new(0));

        let producer = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                for task in tasks {
                    tokio::select! {
                        biased;
                        () = cancel.cancelled() => break,
                        sent = tx.send(task) => if sent.is_err() { break },
                    }
                }
            })
        };

        let handles: Vec<_> = (0..self.workers)
            .map(|worker| {
                let fetcher = Arc::clone(&fetcher);
                let queue = Arc::clone(&queue);
                let done = Arc::clone(&done);
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    Self::worker_loop(worker, fetcher, queue, done, total, cancel).await
                })
            })
            .collect();

        let mut report = PoolReport::default();
        for handle in handles {
            match handle.await {
                Ok(tally) => report.merge(tally),
                Err(e) => error!(error = %e, "download worker panicked"),
            }
        }
        if let Err(e) = producer.await {
            error!(error = %e, "chunk producer panicked");
        }

        report
    }

    async fn worker_loop(
        worker: usize,
        fetcher: Arc<ChunkFetcher>,
        queue: TaskQueue,
        done: Arc<AtomicUsize>,
        total: usize,
        cancel: CancellationToken,
    ) -> PoolReport {
        let mut tally = PoolReport::default();

        loop {
            if cancel.is_cancelled() {
                break;
            }
            let next = queue.lock().await.recv().await;
            let Some(task) = next else {
                break;
            };

            let outcome = fetcher.fetch(&task, worker).await;
            tally.record(outcome);

            match outcome {
                ChunkOutcome::Completed => {
                    let finished = done.fetch_add(1, Ordering::Relaxed) + 1;
                    info!(
                        worker,
                        chunk = task.index,
                        "chunk {}-{} saved ({finished}/{total})",
                        task.start,
                        task.end
                    );
                }
                ChunkOutcome::Skipped => {
                    done.fetch_add(1, Ordering::Relaxed);
                }
                _ => {}
            }
        }

        tally
    }
}
