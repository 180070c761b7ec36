use crate::client::utils::{duration_to_string, parse_timestamp};
use crate::errors::DownloaderError;
use crate::prelude::*;
use anyhow::Context;
use chrono::Duration;
use clap::Parser;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use url::Url;

pub const DEFAULT_OUTPUT: &str = "ft_video.mp4";
const LOCAL_CONFIG_PATH: &str = "./ft_video.toml";
const HOME_CONFIG_PATH: &str = "~/.config/ft_video/config.toml";

/// Download and concatenate video segments from an M3U8 playlist
#[derive(Debug, Parser)]
#[command(name = "ft-video", version)]
pub struct Args {
    /// URL of the M3U8 file (asked for interactively when omitted)
    pub m3u8_url: Option<String>,

    /// Output file name for the saved MP4 video [default: ft_video.mp4]
    pub output_file: Option<String>,

    /// Start time in HH:MM:SS format (default: start of video)
    #[arg(long, value_name = "HH:MM:SS")]
    pub start: Option<String>,

    /// End time in HH:MM:SS format (default: end of video)
    #[arg(long, value_name = "HH:MM:SS")]
    pub end: Option<String>,

    /// Ask for the inputs even when a URL was given
    #[arg(short, long)]
    pub interactive: bool,

    /// ffmpeg binary to use
    #[arg(long, value_name = "PATH")]
    pub ffmpeg: Option<String>,

    /// Number of segments downloaded at the same time
    #[arg(short = 'j', long, value_name = "N")]
    pub jobs: Option<usize>,

    /// Extra attempts for a failed request
    #[arg(long, value_name = "N")]
    pub retries: Option<u32>,

    /// Copy the streams instead of re-encoding (cuts land on keyframes)
    #[arg(long)]
    pub copy: bool,

    /// Fail instead of replacing an existing output file
    #[arg(long)]
    pub no_overwrite: bool,

    /// Additional config file
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// More log output (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conf {
    pub ffmpeg_path: String,
    pub concurrency: usize,
    pub retries: u32,
    pub retry_delay_ms: u64,
    pub timeout_secs: u64,
    pub user_agent: Option<String>,
    /// Ignore `HTTP_PROXY`/`HTTPS_PROXY` from the environment.
    pub no_proxy: bool,
    pub reencode: bool,
    pub overwrite: bool,
}

impl Default for Conf {
    fn default() -> Self {
        Self {
            ffmpeg_path: "ffmpeg".to_string(),
            concurrency: 8,
            retries: 3,
            retry_delay_ms: 500,
            timeout_secs: 30,
            user_agent: None,
            no_proxy: false,
            reencode: true,
            overwrite: true,
        }
    }
}

/// One config file layer, every key optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfFile {
    ffmpeg_path: Option<String>,
    concurrency: Option<usize>,
    retries: Option<u32>,
    retry_delay_ms: Option<u64>,
    timeout_secs: Option<u64>,
    user_agent: Option<String>,
    no_proxy: Option<bool>,
    reencode: Option<bool>,
    overwrite: Option<bool>,
}

impl Conf {
    /// Defaults, then the home and local config files, `--config`, the environment and the flags.
    pub fn load(args: &Args) -> Result<Self> {
        let mut conf = Conf::default();
        conf.merge_file(&expand_path(HOME_CONFIG_PATH), false)?;
        conf.merge_file(Path::new(LOCAL_CONFIG_PATH), false)?;
        if let Some(path) = &args.config {
            conf.merge_file(&expand_path(&path.to_string_lossy()), true)?;
        }
        conf.merge_env(|key| std::env::var(key).ok())?;
        conf.merge_args(args);
        conf.validate()?;
        debug!("config: {:?}", conf);
        Ok(conf)
    }

    fn merge_file(&mut self, path: &Path, required: bool) -> Result<()> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound && !required => {
                trace!("no config file at {:?}", path);
                return Ok(());
            }
            Err(err) => {
                return Err(DownloaderError::LoadConfig(
                    anyhow::Error::new(err).context(format!("could not read {}", path.display())),
                ))
            }
        };
        let file: ConfFile = toml::from_str(&content)
            .with_context(|| format!("could not parse {}", path.display()))
            .map_err(DownloaderError::LoadConfig)?;
        debug!("loaded config file {:?}", path);
        self.apply(file);
        Ok(())
    }

    fn apply(&mut self, file: ConfFile) {
        if let Some(ffmpeg_path) = file.ffmpeg_path {
            self.ffmpeg_path = ffmpeg_path;
        }
        if let Some(concurrency) = file.concurrency {
            self.concurrency = concurrency;
        }
        if let Some(retries) = file.retries {
            self.retries = retries;
        }
        if let Some(retry_delay_ms) = file.retry_delay_ms {
            self.retry_delay_ms = retry_delay_ms;
        }
        if let Some(timeout_secs) = file.timeout_secs {
            self.timeout_secs = timeout_secs;
        }
        if file.user_agent.is_some() {
            self.user_agent = file.user_agent;
        }
        if let Some(no_proxy) = file.no_proxy {
            self.no_proxy = no_proxy;
        }
        if let Some(reencode) = file.reencode {
            self.reencode = reencode;
        }
        if let Some(overwrite) = file.overwrite {
            self.overwrite = overwrite;
        }
    }

    fn merge_env(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(ffmpeg_path) = var("FT_VIDEO_FFMPEG") {
            self.ffmpeg_path = ffmpeg_path;
        }
        if let Some(jobs) = var("FT_VIDEO_JOBS") {
            self.concurrency = jobs
                .trim()
                .parse()
                .with_context(|| format!("FT_VIDEO_JOBS is not a number: {:?}", jobs))
                .map_err(DownloaderError::LoadConfig)?;
        }
        Ok(())
    }

    fn merge_args(&mut self, args: &Args) {
        if let Some(ffmpeg) = &args.ffmpeg {
            self.ffmpeg_path = shellexpand::tilde(ffmpeg).into_owned();
        }
        if let Some(jobs) = args.jobs {
            self.concurrency = jobs;
        }
        if let Some(retries) = args.retries {
            self.retries = retries;
        }
        if args.copy {
            self.reencode = false;
        }
        if args.no_overwrite {
            self.overwrite = false;
        }
    }

    fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(DownloaderError::LoadConfig(anyhow::anyhow!(
                "concurrency must be at least 1"
            )));
        }
        if self.timeout_secs == 0 {
            return Err(DownloaderError::LoadConfig(anyhow::anyhow!(
                "timeout_secs must be at least 1"
            )));
        }
        Ok(())
    }
}

fn expand_path(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).into_owned())
}

/// The part of the media to keep. `None` means from the start / until the end.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TrimWindow {
    pub start: Option<Duration>,
    pub end: Option<Duration>,
}

impl TrimWindow {
    /// Parses optional `HH:MM:SS` values, blank input counts as not given.
    pub fn parse(start: Option<&str>, end: Option<&str>) -> Result<Self> {
        Self::new(parse_optional(start)?, parse_optional(end)?)
    }

    pub fn new(start: Option<Duration>, end: Option<Duration>) -> Result<Self> {
        if let (Some(start), Some(end)) = (start, end) {
            if end <= start {
                return Err(DownloaderError::InvalidTimeRange(format!(
                    "end {} is not after start {}",
                    duration_to_string(&end),
                    duration_to_string(&start)
                )));
            }
        }
        if end == Some(Duration::zero()) {
            return Err(DownloaderError::InvalidTimeRange(
                "end must be after 00:00:00".to_string(),
            ));
        }
        Ok(Self { start, end })
    }
}

fn parse_optional(value: Option<&str>) -> Result<Option<Duration>> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(parse_timestamp)
        .transpose()
}

/// Everything a single run needs to know.
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    pub playlist_url: Url,
    pub output: PathBuf,
    pub window: TrimWindow,
}

impl Job {
    pub fn new(
        url: &str,
        output: Option<&str>,
        start: Option<&str>,
        end: Option<&str>,
    ) -> Result<Self> {
        let url = url.trim();
        if url.is_empty() {
            return Err(DownloaderError::MissingUrl);
        }
        let playlist_url =
            Url::parse(url).map_err(|err| DownloaderError::InvalidUrl(url.to_string(), err))?;
        if !playlist_url.path().ends_with(".m3u8") {
            debug!("playlist URL does not end with .m3u8: {}", playlist_url);
        }

        let output = output
            .map(str::trim)
            .filter(|output| !output.is_empty())
            .unwrap_or(DEFAULT_OUTPUT);
        let output = expand_path(output);
        let window = TrimWindow::parse(start, end)?;
        Ok(Self {
            playlist_url,
            output,
            window,
        })
    }
}
