use crate::config::{Conf, Job};
use crate::errors::DownloaderError;
use crate::prelude::*;
use futures::{stream, StreamExt, TryStreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tokio::fs;
use url::Url;

mod fetch;
pub(crate) mod utils;

use fetch::Fetcher;
use utils::ffmpeg::{check_ffmpeg, concat_list, run_ffmpeg_concat};
use utils::{
    best_variant, duration_to_string, parse_playlist, segment_file_name, select_segments,
    MediaPlaylist, Playlist, SegmentInfo,
};

/// How many master playlists are followed before giving up.
const MAX_PLAYLIST_DEPTH: usize = 3;

pub struct DownloadClient {
    conf: Conf,
    fetcher: Fetcher,
}

impl DownloadClient {
    pub fn new(conf: Conf) -> Result<Self> {
        let fetcher = Fetcher::new(&conf)?;
        Ok(Self { conf, fetcher })
    }
}

impl DownloadClient {
    /// Downloads the playlist of `job` and writes the (trimmed) video to `job.output`.
    ///
    /// The output only appears once ffmpeg succeeded; all temporary files are
    /// removed whether the run succeeds or not.
    #[tracing::instrument(skip(self, job), fields(url = %job.playlist_url, output = ?job.output))]
    pub async fn run(&self, job: &Job) -> Result<PathBuf> {
        let start_time = Instant::now();
        let output_dir = verify_paths(&job.output, self.conf.overwrite).await?;
        check_ffmpeg(&self.conf.ffmpeg_path).await?;

        let playlist = self.load_media_playlist(&job.playlist_url).await?;
        info!(
            "Playlist has {} segments with a total duration of {}",
            playlist.segments.len(),
            duration_to_string(&playlist.total_duration)
        );
        let selection = select_segments(&playlist, &job.window)?;
        let trim = selection.trim(&job.window);
        debug!(
            "selected {} segments starting at {}, trim: {:?}",
            selection.segments.len(),
            duration_to_string(&selection.offset),
            trim
        );

        let work_dir = tempfile::Builder::new()
            .prefix(".ft_video-")
            .tempdir_in(&output_dir)
            .map_err(|err| DownloaderError::CreateFolder(output_dir.clone(), err))?;
        debug!("downloading segments into {:?}", work_dir.path());

        let download_start = Instant::now();
        let segment_paths = self
            .download_segments(&selection.segments, work_dir.path())
            .await?;
        info!(
            "Downloading {} segments took: {:?}",
            segment_paths.len(),
            download_start.elapsed()
        );

        let list_path = work_dir.path().join("segments.txt");
        fs::write(&list_path, concat_list(&segment_paths)?)
            .await
            .map_err(|err| DownloaderError::Write(list_path.clone(), err))?;

        let tmp_output = work_dir.path().join("output.mp4");
        let ffmpeg_start = Instant::now();
        run_ffmpeg_concat(
            &self.conf.ffmpeg_path,
            &list_path,
            &tmp_output,
            &trim,
            self.conf.reencode,
        )
        .await?;
        info!("FFMPEG-Concat took: {:?}", ffmpeg_start.elapsed());

        debug!("renaming file: {:?} to {:?}", tmp_output, job.output);
        fs::rename(&tmp_output, &job.output)
            .await
            .map_err(|err| DownloaderError::Write(job.output.clone(), err))?;

        let work_dir_path = work_dir.path().to_path_buf();
        if let Err(err) = work_dir.close() {
            warn!("could not remove temporary folder {:?}: {}", work_dir_path, err);
        }

        info!("Done. Whole operation took: {:?}", start_time.elapsed());
        Ok(job.output.clone())
    }

    async fn load_media_playlist(&self, url: &Url) -> Result<MediaPlaylist> {
        let mut url = url.clone();
        for _ in 0..=MAX_PLAYLIST_DEPTH {
            info!("Fetching playlist: {}", url);
            let content = self.fetcher.fetch_text(&url).await?;
            match parse_playlist(&content, &url)? {
                Playlist::Media(playlist) => return Ok(playlist),
                Playlist::Master(variants) => {
                    let variant =
                        best_variant(&variants).ok_or(DownloaderError::PlaylistEmpty)?;
                    info!(
                        "Master playlist with {} variants, using {} ({} bit/s)",
                        variants.len(),
                        variant.url,
                        variant.bandwidth
                    );
                    url = variant.url.clone();
                }
            }
        }
        Err(DownloaderError::PlaylistParse(anyhow::anyhow!(
            "master playlists nested deeper than {} levels",
            MAX_PLAYLIST_DEPTH
        )))
    }

    /// Downloads the segments concurrently; the returned paths are in playlist order.
    #[tracing::instrument(skip(self, segments), fields(segments = segments.len()))]
    async fn download_segments(
        &self,
        segments: &[&SegmentInfo],
        work_dir: &Path,
    ) -> Result<Vec<PathBuf>> {
        let progress = ProgressBar::new(segments.len() as u64);
        let template = "Downloading [{elapsed_precise}] {bar:40} {pos}/{len} ({eta})";
        if let Ok(style) = ProgressStyle::with_template(template) {
            progress.set_style(style.progress_chars("#>-"));
        }

        let result = stream::iter(segments.iter().enumerate())
            .map(|(index, segment)| {
                let target = work_dir.join(segment_file_name(index, &segment.url));
                async move {
                    trace!("downloading segment {}: {}", index, segment.url);
                    self.fetcher.download_to(&segment.url, &target).await?;
                    Ok::<_, DownloaderError>(target)
                }
            })
            .buffered(self.conf.concurrency.max(1))
            .inspect_ok(|_| progress.inc(1))
            .try_collect::<Vec<PathBuf>>()
            .await;

        match &result {
            Ok(_) => progress.finish(),
            Err(err) => {
                progress.abandon();
                error!("Could not download the segments: {}", err);
            }
        }
        result
    }
}

/// Makes sure the output can be placed and returns its (canonical) folder.
async fn verify_paths(output: &Path, overwrite: bool) -> Result<PathBuf> {
    let output_dir = match output.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    if !output_dir.is_dir() {
        return Err(DownloaderError::NotFound(output_dir));
    }
    if output.is_dir() {
        return Err(DownloaderError::NotFound(output.to_path_buf()));
    }
    if output.exists() {
        if !overwrite {
            return Err(DownloaderError::OutputExists(output.to_path_buf()));
        }
        info!("Output file {:?} exists and will be overwritten", output);
    }
    fs::canonicalize(&output_dir)
        .await
        .map_err(|err| DownloaderError::Canonicalize(output_dir.clone(), err))
}
