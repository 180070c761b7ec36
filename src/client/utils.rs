use crate::config::TrimWindow;
use crate::errors::DownloaderError;
use crate::prelude::*;
use chrono::Duration;
use m3u8_rs::KeyMethod;
use std::path::Path;
use url::Url;

/// Converts a duration to a string that is usable for example in an ffmpeg command
///
/// `Duration::seconds(950)` becomes `00:15:50.000`.
pub fn duration_to_string(duration: &Duration) -> String {
    trace!("duration to string for duration: {:?}", duration);
    let millis = duration.num_milliseconds().max(0);
    let hours = millis / 3_600_000;
    let minutes = (millis % 3_600_000) / 60_000;
    let seconds = (millis % 60_000) / 1000;
    let millis = millis % 1000;
    format!("{:02}:{:02}:{:02}.{:03}", hours, minutes, seconds, millis)
}

/// Parses `HH:MM:SS`, `MM:SS` or `SS`, each part optionally fractional.
pub fn parse_timestamp(input: &str) -> Result<Duration> {
    let input = input.trim();
    let parts: Vec<&str> = input.split(':').collect();
    if input.is_empty() || parts.len() > 3 {
        return Err(DownloaderError::InvalidTime(input.to_string()));
    }
    let mut seconds = 0.0;
    for part in parts {
        let value = part
            .trim()
            .parse::<f64>()
            .map_err(|_| DownloaderError::InvalidTime(input.to_string()))?;
        if !value.is_finite() || value < 0.0 {
            return Err(DownloaderError::InvalidTime(input.to_string()));
        }
        seconds = seconds * 60.0 + value;
    }
    Ok(seconds_to_duration(seconds))
}

fn seconds_to_duration(seconds: f64) -> Duration {
    Duration::milliseconds((seconds * 1000.0).round() as i64)
}

#[derive(Debug)]
pub(crate) enum Playlist {
    Media(MediaPlaylist),
    Master(Vec<Variant>),
}

#[derive(Debug)]
pub(crate) struct MediaPlaylist {
    pub total_duration: Duration,
    pub segments: Vec<SegmentInfo>,
}

#[derive(Debug, Clone)]
pub(crate) struct SegmentInfo {
    pub duration: Duration,
    pub url: Url,
}

#[derive(Debug, Clone)]
pub(crate) struct Variant {
    pub bandwidth: u64,
    pub url: Url,
}

/// Longest `#EXTINF` duration accepted for a single segment.
const MAX_SEGMENT_SECONDS: f64 = 24.0 * 60.0 * 60.0;

fn parse_error(message: String) -> DownloaderError {
    DownloaderError::PlaylistParse(anyhow::anyhow!(message))
}

pub(crate) fn parse_playlist(content: &str, base_url: &Url) -> Result<Playlist> {
    let content = content.trim_start_matches('\u{feff}').trim_start();
    let (_, playlist) = m3u8_rs::parse_playlist(content.as_bytes()).map_err(|err| {
        parse_error(format!("invalid m3u8 playlist: {}", err.map(|error| error.code)))
    })?;

    match playlist {
        m3u8_rs::Playlist::MasterPlaylist(master) => {
            let variants = master
                .variants
                .iter()
                .filter(|variant| !variant.is_i_frame)
                .map(|variant| {
                    let url = join_url(base_url, &variant.uri)?;
                    Ok(Variant {
                        bandwidth: variant.bandwidth,
                        url,
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            if variants.is_empty() {
                return Err(DownloaderError::PlaylistEmpty);
            }
            Ok(Playlist::Master(variants))
        }
        m3u8_rs::Playlist::MediaPlaylist(media) => {
            let mut total_duration = Duration::zero();
            let mut segments = Vec::with_capacity(media.segments.len());
            for segment in &media.segments {
                if let Some(key) = segment.key.as_ref() {
                    if !matches!(key.method, KeyMethod::None) {
                        return Err(DownloaderError::EncryptedPlaylist(key.method.to_string()));
                    }
                }
                if let Some(map) = segment.map.as_ref() {
                    return Err(DownloaderError::InitSegmentPlaylist(map.uri.clone()));
                }

                let seconds = f64::from(segment.duration);
                if !(0.0..=MAX_SEGMENT_SECONDS).contains(&seconds) {
                    return Err(parse_error(format!(
                        "invalid duration {} for segment {}",
                        segment.duration, segment.uri
                    )));
                }
                let duration = seconds_to_duration(seconds);
                total_duration = total_duration
                    .checked_add(&duration)
                    .ok_or_else(|| parse_error("playlist duration overflowed".to_string()))?;
                segments.push(SegmentInfo {
                    duration,
                    url: join_url(base_url, &segment.uri)?,
                });
            }
            if segments.is_empty() {
                return Err(DownloaderError::PlaylistEmpty);
            }
            debug!(
                "media playlist with {} segments, {}",
                segments.len(),
                duration_to_string(&total_duration)
            );
            Ok(Playlist::Media(MediaPlaylist {
                total_duration,
                segments,
            }))
        }
    }
}

fn join_url(base_url: &Url, uri: &str) -> Result<Url> {
    let uri = uri.trim();
    base_url
        .join(uri)
        .map_err(|err| DownloaderError::InvalidUrl(uri.to_string(), err))
}

pub(crate) fn best_variant(variants: &[Variant]) -> Option<&Variant> {
    variants.iter().max_by_key(|variant| variant.bandwidth)
}

#[derive(Debug)]
pub(crate) struct Selection<'a> {
    pub segments: Vec<&'a SegmentInfo>,
    /// Media time at which the first selected segment starts.
    pub offset: Duration,
}

/// Seek and length handed to ffmpeg, relative to the first selected segment.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Trim {
    pub seek: Option<Duration>,
    pub length: Option<Duration>,
}

/// Keeps only the segments overlapping the trim window.
pub(crate) fn select_segments<'a>(
    playlist: &'a MediaPlaylist,
    window: &TrimWindow,
) -> Result<Selection<'a>> {
    let total = playlist.total_duration;
    if total == Duration::zero() {
        debug!("playlist has no segment durations, selecting every segment");
        return Ok(Selection {
            segments: playlist.segments.iter().collect(),
            offset: Duration::zero(),
        });
    }

    let start = window.start.unwrap_or_else(Duration::zero);
    if start >= total {
        return Err(DownloaderError::InvalidTimeRange(format!(
            "start {} is beyond the end of the media ({})",
            duration_to_string(&start),
            duration_to_string(&total)
        )));
    }
    if let Some(end) = window.end.filter(|end| *end > total) {
        warn!(
            "end {} is beyond the end of the media ({}), stopping at the end",
            duration_to_string(&end),
            duration_to_string(&total)
        );
    }

    let mut segments = vec![];
    let mut offset = None;
    let mut current = Duration::zero();
    for segment in &playlist.segments {
        let segment_start = current;
        let segment_end = current
            .checked_add(&segment.duration)
            .ok_or_else(|| parse_error("playlist duration overflowed".to_string()))?;
        current = segment_end;
        if window.end.is_some_and(|end| segment_start >= end) {
            break;
        }
        // a zero-length segment sitting exactly at `start` is kept
        if segment_start < start && segment_end <= start {
            continue;
        }
        offset.get_or_insert(segment_start);
        segments.push(segment);
    }

    match offset {
        Some(offset) => Ok(Selection { segments, offset }),
        None => Err(DownloaderError::InvalidTimeRange(
            "no segment falls into the requested time range".to_string(),
        )),
    }
}

impl Selection<'_> {
    pub(crate) fn trim(&self, window: &TrimWindow) -> Trim {
        let start = window.start.unwrap_or_else(Duration::zero);
        let seek = start - self.offset;
        Trim {
            seek: (seek > Duration::zero()).then_some(seek),
            length: window.end.map(|end| end - start),
        }
    }
}

/// File name for the downloaded segment at `index`, keeping the URL's extension.
pub(crate) fn segment_file_name(index: usize, url: &Url) -> String {
    let extension = url
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .and_then(|name| Path::new(name).extension())
        .and_then(|extension| extension.to_str())
        .filter(|extension| {
            !extension.is_empty()
                && extension.len() <= 5
                && extension.chars().all(|c| c.is_ascii_alphanumeric())
        })
        .unwrap_or("ts");
    format!("{:05}.{}", index, extension)
}

pub mod ffmpeg;
