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

use reqwest::{
    StatusCode,
    header::{self, HeaderMap},
};
use tracing::{debug, info};

/// Whether the source can serve byte ranges
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    /// Partial content confirmed; `total` is the full resource length
    Ranged { total: u64 },
    /// Ranges unavailable; `length` is the advertised size, if any
    Unranged { length: Option<u64> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResult {
    pub capability:          Capability,
    pub content_type:        Option<String>,
    pub last_modified:       Option<String>,
    pub content_disposition: Option<String>,
}

impl ProbeResult {
    const fn unranged() -> Self {
        Self {
            capability:          Capability::Unranged { length: None },
            content_type:        None,
            last_modified:       None,
            content_disposition: None,
        }
    }

    #[must_use]
    pub const fn supports_ranges(&self) -> bool {
        matches!(self.capability, Capability::Ranged { .. })
    }

    #[must_use]
    pub const fn total_length(&self) -> Option<u64> {
        match self.capability {
            Capability::Ranged { total } => Some(total),
            Capability::Unranged { length } => length,
        }
    }
}

/// Asks the server for the first byte to learn whether ranges work.
pub struct Prober {
    client: reqwest::Client,
}

impl Prober {
    pub const fn new(client: reqwest::Client) -> Self { Self { client } }

    /// Probe `url` with `Range: bytes=0-0`.
    ///
    /// Never fails: any error downgrades the result to `Unranged`.
    pub async fn probe(&self, url: &str, headers: &HeaderMap) -> ProbeResult {
        let response = match self
            .client
            .get(url)
            .headers(headers.clone())
            .header(header::RANGE, "bytes=0-0")
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                info!(url, error = %e, "probe failed, falling back to single stream");
                return ProbeResult::unranged();
            }
        };

        let status = response.status();
        let result = Self::interpret(status, response.headers());
        debug!(url, %status, capability = ?result.capability, "probe finished");
        result
    }

    fn interpret(status: StatusCode, headers: &HeaderMap) -> ProbeResult {
        let text = |name: header::HeaderName| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };

        let capability = if status == StatusCode::PARTIAL_CONTENT {
            text(header::CONTENT_RANGE)
                .as_deref()
                .and_then(parse_content_range_total)
                .map_or(Capability::Unranged { length: None }, |total| {
                    Capability::Ranged { total }
                })
        } else if status.is_success() {
            Capability::Unranged {
                length: text(header::CONTENT_LENGTH).and_then(|v| v.parse().ok()),
            }
        } else {
            Capability::Unranged { length: None }
        };

        ProbeResult {
            capability,
            content_type: text(header::CONTENT_TYPE),
            last_modified: text(header::LAST_MODIFIED),
            content_disposition: text(header::CONTENT_DISPOSITION),
        }
    }
}

/// Total length from a `Content-Range: bytes 0-0/1234` header.
///
/// An unknown (`*`) or zero total yields `None`.
fn parse_content_range_total(value: &str) -> Option<u64> {
    let (unit, rest) = value.trim().split_once(' ')?;
    if !unit.eq_ignore_ascii_case("bytes") {
        return None;
    }
    let (_range, total) = rest.trim().split_once('/')?;
    total.trim().parse().ok().filter(|total| *total > 0)
}

#[cfg(test)]
mod tests {
    use reqwest::header::HeaderValue;

    use super::*;

    fn headers(pairs: &[(header::HeaderName, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(name.clone(), HeaderValue::from_str(value).unwrap());
        }
        map
    }

    #[test]
    fn test_parse_content_range_total() {
        assert_eq!(parse_content_range_total("bytes 0-0/26214400"), Some(26_214_400));
        assert_eq!(parse_content_range_total("Bytes 0-0/42"), Some(42));
        assert_eq!(parse_content_range_total("bytes 0-0/*"), None);
        assert_eq!(parse_content_range_total("bytes 0-0/0"), None);
        assert_eq!(parse_content_range_total("items 0-0/10"), None);
        assert_eq!(parse_content_range_total("garbage"), None);
    }

    #[test]
    fn test_partial_content_is_ranged() {
        let result = Prober::interpret(
            StatusCode::PARTIAL_CONTENT,
            &headers(&[
                (header::CONTENT_RANGE, "bytes 0-0/1000"),
                (header::CONTENT_TYPE, "video/mp4"),
                (header::LAST_MODIFIED, "Wed, 21 Oct 2015 07:28:00 GMT"),
            ]),
        );
        assert_eq!(result.capability, Capability::Ranged { total: 1000 });
        assert!(result.supports_ranges());
        assert_eq!(result.total_length(), Some(1000));
        assert_eq!(result.content_type.as_deref(), Some("video/mp4"));
        assert_eq!(
            result.last_modified.as_deref(),
            Some("Wed, 21 Oct 2015 07:28:00 GMT")
        );
    }

    #[test]
    fn test_full_response_is_unranged_with_length() {
        let result = Prober::interpret(
            StatusCode::OK,
            &headers(&[(header::CONTENT_LENGTH, "1000")]),
        );
        assert_eq!(result.capability, Capability::Unranged { length: Some(1000) });
        assert!(!result.supports_ranges());
    }

    #[test]
    fn test_partial_without_content_range_is_unranged() {
        let result = Prober::interpret(StatusCode::PARTIAL_CONTENT, &HeaderMap::new());
        assert_eq!(result.capability, Capability::Unranged { length: None });
    }

    #[test]
    fn test_error_status_is_unranged() {
        let result = Prober::interpret(
            StatusCode::NOT_FOUND,
            &headers(&[(header::CONTENT_RANGE, "bytes 0-0/1000")]),
        );
        assert_eq!(result.capability, Capability::Unranged { length: None });
        assert_eq!(result.total_length(), None);
    }
}
