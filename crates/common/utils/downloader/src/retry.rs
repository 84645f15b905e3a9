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

//! Per-chunk retry policy.
//!
//! The policy decides what an HTTP status means for a chunk and how long to
//! wait before the next attempt. It performs no I/O, so the fetch loop stays a
//! thin driver around it.

use std::time::Duration;

use backon::{BackoffBuilder, ExponentialBackoff, ExponentialBuilder};
use reqwest::StatusCode;

use crate::{config::RetryConfig, error::DownloadError};

/// What to do after one attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// The response carries the chunk body
    Accept,
    /// HTTP 429: wait on the rate-limit schedule, then retry
    RateLimited,
    /// Client error: give up on this chunk
    Abort,
    /// Anything else: wait on the transient schedule, then retry
    Retry,
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts:         usize,
    transient:            ExponentialBuilder,
    rate_limited:         ExponentialBuilder,
    max_delay:            Duration,
    rate_limit_max_delay: Duration,
}

impl RetryPolicy {
    #[must_use]
    pub fn new(max_attempts: usize, config: &RetryConfig) -> Self {
        let max_attempts = max_attempts.max(1);
        let max_delay = config.max_delay.unsigned_abs();
        let rate_limit_max_delay = config.rate_limit_max_delay.unsigned_abs();

        let transient = ExponentialBuilder::default()
            .with_min_delay(config.min_delay.unsigned_abs())
            .with_max_delay(max_delay)
            .with_max_times(max_attempts);
        let rate_limited = ExponentialBuilder::default()
            .with_min_delay(config.rate_limit_delay.unsigned_abs())
            .with_max_delay(rate_limit_max_delay)
            .with_max_times(max_attempts);

        Self {
            max_attempts,
            transient,
            rate_limited,
            max_delay,
            rate_limit_max_delay,
        }
    }

    #[must_use]
    pub const fn max_attempts(&self) -> usize { self.max_attempts }

    /// Classify a response status for a range request.
    #[must_use]
    pub fn classify(status: StatusCode) -> Verdict {
        match status {
            StatusCode::OK | StatusCode::PARTIAL_CONTENT => Verdict::Accept,
            StatusCode::TOO_MANY_REQUESTS => Verdict::RateLimited,
            s if s.is_client_error() => Verdict::Abort,
            _ => Verdict::Retry,
        }
    }

    /// Classify a failed attempt.
    #[must_use]
    pub fn classify_error(error: &DownloadError) -> Verdict {
        match error {
            DownloadError::Http { status, .. } => StatusCode::from_u16(*status)
                .map_or(Verdict::Retry, |status| match Self::classify(status) {
                    Verdict::Accept => Verdict::Retry,
                    verdict => verdict,
                }),
            _ => Verdict::Retry,
        }
    }

    /// Fresh delay schedule for one chunk.
    #[must_use]
    pub fn schedule(&self) -> Schedule {
        Schedule {
            transient:            self.transient.build(),
            rate_limited:         self.rate_limited.build(),
            max_delay:            self.max_delay,
            rate_limit_max_delay: self.rate_limit_max_delay,
        }
    }
}

/// Escalating delays for one chunk. Transient failures and rate limiting
/// escalate independently.
pub struct Schedule {
    transient:            ExponentialBackoff,
    rate_limited:         ExponentialBackoff,
    max_delay:            Duration,
    rate_limit_max_delay: Duration,
}

impl Schedule {
    /// Delay before the next attempt, or `None` when the verdict ends the
    /// chunk.
    pub fn next_delay(&mut self, verdict: Verdict) -> Option<Duration> {
        match verdict {
            Verdict::Accept | Verdict::Abort => None,
            Verdict::RateLimited => Some(
                self.rate_limited
                    .next()
                    .unwrap_or(self.rate_limit_max_delay),
            ),
            Verdict::Retry => Some(self.transient.next().unwrap_or(self.max_delay)),
        }
    }
}
