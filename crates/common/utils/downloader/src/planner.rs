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

use crate::types::ChunkTask;

/// Number of chunks a file of `total` bytes splits into.
#[must_use]
pub const fn expected_chunks(total: u64, chunk_size: u64) -> usize {
    if total == 0 || chunk_size == 0 {
        return 0;
    }
    #[allow(clippy::cast_possible_truncation)]
    let count = total.div_ceil(chunk_size) as usize;
    count
}

/// Split `total` bytes into consecutive ranges of `chunk_size` bytes.
///
/// The last range absorbs the remainder, so it may be shorter. A file no
/// larger than one chunk yields a single range covering the whole file.
#[must_use]
pub fn plan_chunks(total: u64, chunk_size: u64) -> Vec<ChunkTask> {
    let mut tasks = Vec::with_capacity(expected_chunks(total, chunk_size));
    if total == 0 || chunk_size == 0 {
        return tasks;
    }

    let mut start = 0;
    while start < total {
        let end = start.saturating_add(chunk_size - 1).min(total - 1);
        tasks.push(ChunkTask {
            index: tasks.len(),
            start,
            end,
        });
        start = end + 1;
    }

    tasks
}
