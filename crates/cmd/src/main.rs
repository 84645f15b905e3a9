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

mod settings;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use qbit_base::readable_size::ReadableSize;
use qbit_common_telemetry::{init_global_logging, set_panic_hook};
use qbit_downloader::{DownloadError, Downloader, DownloaderConfig};
use snafu::{ResultExt, Whatever, whatever};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::settings::Settings;

#[derive(Debug, Parser)]
#[clap(
name = "qbit",
about = "qbit command line tools",
version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Config file (YAML, TOML or JSON). Defaults to
    /// ~/.config/qbit-cli/config.yaml when present.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    commands: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    Download(DownloadArgs),
    Clean(CleanArgs),
}

#[derive(Debug, Clone, Args)]
#[command(flatten_help = true)]
#[command(long_about = r"

Download a file, resuming an earlier interrupted run when possible.
Examples:

qbit download https://example.com/video.mp4
qbit download https://example.com/dl?id=1 -o video.mp4 -d ~/Downloads -H 'Referer: https://example.com/'

")]
struct DownloadArgs {
    /// URL to download
    url: String,

    /// Output file name. Defaults to the last segment of the URL path.
    #[arg(short, long)]
    output: Option<String>,

    /// Directory to save into
    #[arg(short = 'd', long)]
    dir: Option<PathBuf>,

    /// Extra request header, `Name: value`. Repeatable.
    #[arg(short = 'H', long = "header", value_parser = parse_header)]
    headers: Vec<(String, String)>,

    /// Download even if the file already exists
    #[arg(long)]
    overwrite: bool,

    /// Bytes per range request, e.g. `10MiB`
    #[arg(long)]
    chunk_size: Option<ReadableSize>,

    /// Concurrent range requests
    #[arg(long)]
    workers: Option<usize>,

    /// Attempts per chunk
    #[arg(long)]
    retries: Option<usize>,
}

impl DownloadArgs {
    fn apply(self, mut config: DownloaderConfig) -> (DownloaderConfig, String, String) {
        config.headers.extend(self.headers);
        if let Some(dir) = self.dir {
            config.save_path = dir;
        }
        if self.overwrite {
            config.overwrite_existing = true;
        }
        if let Some(chunk_size) = self.chunk_size {
            config.chunk_size = chunk_size;
        }
        if let Some(workers) = self.workers {
            config.max_workers = workers;
        }
        if let Some(retries) = self.retries {
            config.max_retries = retries;
        }
        (config, self.url, self.output.unwrap_or_default())
    }

    async fn run(self, settings: Settings) -> Result<(), Whatever> {
        let (config, url, file_name) = self.apply(settings.downloader);
        let downloader = Downloader::new(config).whatever_context("Failed to create downloader")?;

        let cancel = CancellationToken::new();
        tokio::spawn(cancel_on_signal(cancel.clone()));

        match downloader.download_with_cancel(&url, &file_name, cancel).await {
            Ok(result) => {
                println!(
                    "{} ({}, {}, {:#})",
                    result.path.display(),
                    ReadableSize(result.size),
                    result.strategy,
                    result.duration
                );
                Ok(())
            }
            Err(DownloadError::Cancelled) => {
                whatever!("Download cancelled, run the same command again to resume")
            }
            Err(e) => Err(e).whatever_context(format!("Failed to download {url}")),
        }
    }
}

#[derive(Debug, Clone, Args)]
#[command(flatten_help = true)]
#[command(long_about = r"

Remove the partial data and progress file of an unfinished download.
Examples:

qbit clean video.mp4 -d ~/Downloads

")]
struct CleanArgs {
    /// File name of the unfinished download
    name: String,

    /// Directory the download was saved into
    #[arg(short = 'd', long)]
    dir: Option<PathBuf>,
}

impl CleanArgs {
    async fn run(self, settings: Settings) -> Result<(), Whatever> {
        let mut config = settings.downloader;
        if let Some(dir) = self.dir {
            config.save_path = dir;
        }
        let downloader = Downloader::new(config).whatever_context("Failed to create downloader")?;
        downloader
            .cleanup(&self.name)
            .await
            .whatever_context(format!("Failed to clean up {}", self.name))?;
        info!(name = %self.name, "partial download removed");
        Ok(())
    }
}

fn parse_header(raw: &str) -> Result<(String, String), String> {
    let (name, value) = raw
        .split_once(':')
        .ok_or_else(|| format!("expected `Name: value`, got `{raw}`"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("missing header name in `{raw}`"));
    }
    Ok((name.to_string(), value.trim().to_string()))
}

async fn cancel_on_signal(cancel: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to install Ctrl+C handler");
        return;
    }
    info!("Received Ctrl+C signal, stopping download");
    cancel.cancel();
}

#[tokio::main]
async fn main() -> Result<(), Whatever> {
    let cli = Cli::parse();
    let settings =
        Settings::load(cli.config.as_deref()).whatever_context("Failed to load settings")?;

    set_panic_hook();
    let _guards = init_global_logging("qbit", &settings.logging);

    match cli.commands {
        Commands::Download(args) => args.run(settings).await,
        Commands::Clean(args) => args.run(settings).await,
    }
}
