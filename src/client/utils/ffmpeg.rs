use super::*;
use std::ffi::OsString;
use std::fmt::Write as _;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io;
use tokio::process::Command;
use tracing::instrument;

fn spawn_error(ffmpeg: &str, err: io::Error) -> DownloaderError {
    if err.kind() == io::ErrorKind::NotFound {
        DownloaderError::ToolNotFound(ffmpeg.to_string())
    } else {
        DownloaderError::FfmpegCommand(err)
    }
}

/// Makes sure ffmpeg can be started before anything gets downloaded.
#[instrument]
pub(crate) async fn check_ffmpeg(ffmpeg: &str) -> Result<()> {
    debug!("Running ffmpeg command: {} -version", ffmpeg);
    let status = Command::new(ffmpeg)
        .arg("-version")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .map_err(|err| spawn_error(ffmpeg, err))?;
    if !status.success() {
        return Err(DownloaderError::FfmpegFailed {
            status,
            stderr: format!("{} -version failed", ffmpeg),
        });
    }
    Ok(())
}

/// Content of an ffmpeg concat demuxer list, one `file` line per segment in order.
pub(crate) fn concat_list(segment_paths: &[PathBuf]) -> Result<String> {
    let mut list = String::new();
    for path in segment_paths {
        let path_str = path
            .to_str()
            .ok_or_else(|| DownloaderError::PathToString(path.clone()))?;
        // the concat demuxer has no escape inside quotes, so close, escape and reopen
        let _ = writeln!(list, "file '{}'", path_str.replace('\'', r"'\''"));
    }
    Ok(list)
}

pub(crate) fn concat_args(
    concat_list_path: &Path,
    output_path: &Path,
    trim: &Trim,
    reencode: bool,
) -> Vec<OsString> {
    let mut args: Vec<OsString> = [
        "-hide_banner",
        "-loglevel",
        "error",
        "-nostdin",
        "-y",
        "-fflags",
        "+igndts",
        "-f",
        "concat",
        "-safe",
        "0",
        "-i",
    ]
    .into_iter()
    .map(OsString::from)
    .collect();
    args.push(concat_list_path.into());

    if let Some(seek) = trim.seek {
        args.push("-ss".into());
        args.push(duration_to_string(&seek).into());
    }
    if let Some(length) = trim.length {
        args.push("-t".into());
        args.push(duration_to_string(&length).into());
    }
    let codec_args: &[&str] = if reencode {
        &["-c:v", "libx264", "-c:a", "aac"]
    } else {
        &["-c", "copy"]
    };
    args.extend(codec_args.iter().map(OsString::from));
    args.extend(["-f", "mp4"].into_iter().map(OsString::from));
    args.push(output_path.into());
    args
}

#[instrument(skip(concat_list_path, output_path))]
pub(crate) async fn run_ffmpeg_concat(
    ffmpeg: &str,
    concat_list_path: &Path,
    output_path: &Path,
    trim: &Trim,
    reencode: bool,
) -> Result<()> {
    let args = concat_args(concat_list_path, output_path, trim, reencode);
    debug!("Running ffmpeg command: {} {:?}", ffmpeg, args);
    let output = Command::new(ffmpeg)
        .args(&args)
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|err| spawn_error(ffmpeg, err))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        error!("ffmpeg failed with {}: {}", output.status, stderr);
        return Err(DownloaderError::FfmpegFailed {
            status: output.status,
            stderr,
        });
    }
    debug!("Finished running ffmpeg command");
    Ok(())
}
