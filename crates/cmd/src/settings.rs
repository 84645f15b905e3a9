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

//! Layered CLI settings: built-in defaults, then an optional config file,
//! then `QBIT__*` environment variables. Command-line flags are applied last
//! by the caller.

use std::path::{Path, PathBuf};

use config::{Config, ConfigError, Environment, File};
use qbit_common_telemetry::LoggingOptions;
use qbit_downloader::DownloaderConfig;
use serde::{Deserialize, Serialize};

const APP_DIR: &str = "qbit-cli";
const DEFAULT_CONFIG_FILE: &str = "config.yaml";
const ENV_PREFIX: &str = "QBIT";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub downloader: DownloaderConfig,
    pub logging:    LoggingOptions,
}

impl Settings {
    /// Load settings from `path`, or from the per-user config file when
    /// `path` is `None`.
    ///
    /// An explicitly given file must exist; the per-user file is optional.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        match path {
            Some(path) => {
                if !path.exists() {
                    return Err(ConfigError::Message(format!(
                        "Config file {} does not exist",
                        path.display()
                    )));
                }
                builder = builder.add_source(File::from(path));
            }
            None => {
                if let Some(default) = default_config_path() {
                    builder = builder.add_source(File::from(default).required(false));
                }
            }
        }

        // E.g. `QBIT__DOWNLOADER__MAX_WORKERS=4`
        builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

        builder.build()?.try_deserialize()
    }
}

/// `~/.config/qbit-cli/config.yaml` on Linux, the platform equivalent elsewhere.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(APP_DIR).join(DEFAULT_CONFIG_FILE))
}
