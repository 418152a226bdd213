//! Streaming downloads.
//!
//! yt-dlp writes the media to its stdout (`-o -`) and the bytes are forwarded
//! to the HTTP response as they arrive. The response body pulls from the pipe,
//! so a slow client slows the extractor down instead of filling memory.
//!
//! Headers are only committed once the first chunk is available: an extractor
//! that dies before producing anything still gets a proper JSON error. After
//! that point a failure can only show up as a truncated transfer.

use std::{
    ffi::OsString,
    io,
    pin::Pin,
    task::{Context, Poll},
};

use axum::body::Bytes;
use futures::{Stream, StreamExt};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    process::{Child, ChildStderr, ChildStdout},
};
use tokio_util::{
    io::ReaderStream,
    sync::{CancellationToken, DropGuard},
};
use tracing::{debug, info, warn};

use crate::{
    error::{RelayError, RelayResult},
    extractor::{Extractor, validate_url},
};

pub const DEFAULT_FILENAME: &str = "video";
pub const BEST_VIDEO_SELECTOR: &str = "bestvideo+bestaudio/best";
pub const BEST_AUDIO_SELECTOR: &str = "bestaudio";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Video,
    Audio,
}

impl MediaKind {
    /// Only the literal `audio` selects audio; anything else is video.
    pub fn from_hint(hint: Option<&str>) -> Self {
        match hint {
            Some("audio") => Self::Audio,
            _ => Self::Video,
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::Video => "mp4",
            Self::Audio => "mp3",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRequest {
    pub url: String,
    pub itag: Option<String>,
    pub kind: MediaKind,
    pub title: Option<String>,
}

impl DownloadRequest {
    /// Validates the raw query values. Blank `itag`/`title` count as absent.
    pub fn new(
        url: Option<&str>,
        itag: Option<&str>,
        kind: Option<&str>,
        title: Option<&str>,
    ) -> RelayResult<Self> {
        let url = validate_url(url)?.to_string();
        let non_blank = |value: Option<&str>| {
            value
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(str::to_string)
        };
        Ok(Self {
            url,
            itag: non_blank(itag),
            kind: MediaKind::from_hint(kind),
            title: non_blank(title),
        })
    }

    /// `-f` selector plus the post-processing flags that go with it.
    pub fn selector_args(&self) -> Vec<String> {
        if let Some(itag) = &self.itag {
            return vec!["-f".into(), format!("{itag}+bestaudio/{itag}")];
        }
        match self.kind {
            MediaKind::Audio => vec![
                "-f".into(),
                BEST_AUDIO_SELECTOR.into(),
                "-x".into(),
                "--audio-format".into(),
                "mp3".into(),
            ],
            MediaKind::Video => vec![
                "-f".into(),
                BEST_VIDEO_SELECTOR.into(),
                "--merge-output-format".into(),
                "mp4".into(),
            ],
        }
    }

    pub fn filename(&self) -> String {
        let stem = self
            .title
            .as_deref()
            .map(sanitize_title)
            .filter(|stem| !stem.is_empty())
            .unwrap_or_else(|| DEFAULT_FILENAME.to_string());
        format!("{stem}.{}", self.kind.extension())
    }
}

impl Extractor {
    pub fn download_args(&self, request: &DownloadRequest) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            request.url.clone().into(),
            "-o".into(),
            "-".into(),
        ];
        args.extend(self.common_args());
        args.extend(request.selector_args().into_iter().map(OsString::from));
        args
    }
}

/// Keeps ASCII letters, digits, `-`, `_` and spaces, then joins the remaining
/// words with underscores: `"Foo: Bar?! 2024"` becomes `"Foo_Bar_2024"`.
pub fn sanitize_title(title: &str) -> String {
    let kept: String = title
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | ' '))
        .collect();
    kept.split_whitespace().collect::<Vec<_>>().join("_")
}

pub fn content_disposition(filename: &str) -> String {
    format!("attachment; filename=\"{filename}\"")
}

/// Response body backed by the extractor's stdout.
///
/// Dropping it before the end of the output (client went away) cancels the
/// supervisor task, which kills and reaps the child.
pub struct MediaStream {
    pending: Option<Bytes>,
    inner: ReaderStream<ChildStdout>,
    guard: Option<DropGuard>,
}

impl Stream for MediaStream {
    type Item = io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if let Some(chunk) = this.pending.take() {
            return Poll::Ready(Some(Ok(chunk)));
        }
        match this.inner.poll_next_unpin(cx) {
            Poll::Ready(None) => {
                // Output finished on its own; let the child exit normally.
                if let Some(guard) = this.guard.take() {
                    let _ = guard.disarm();
                }
                Poll::Ready(None)
            }
            other => other,
        }
    }
}

/// Spawns the extractor for `request` and waits for the first chunk of media.
pub async fn open_stream(
    extractor: &Extractor,
    request: &DownloadRequest,
) -> RelayResult<MediaStream> {
    let args = extractor.download_args(request);
    let mut child = extractor.spawn(&args)?;
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(log_stderr(stderr, request.url.clone()));
    }
    let stdout = child.stdout.take().ok_or(RelayError::DownloadFailure)?;
    let mut inner = ReaderStream::new(stdout);

    match inner.next().await {
        Some(Ok(first)) => {
            let token = CancellationToken::new();
            supervise(child, token.clone(), request.url.clone());
            Ok(MediaStream {
                pending: Some(first),
                inner,
                guard: Some(token.drop_guard()),
            })
        }
        Some(Err(err)) => {
            warn!(url = %request.url, error = %err, "reading extractor output failed");
            if let Err(err) = child.kill().await {
                warn!(url = %request.url, error = %err, "failed to kill extractor");
            }
            Err(RelayError::DownloadFailure)
        }
        None => {
            let status = child.wait().await.map_err(|err| {
                warn!(url = %request.url, error = %err, "waiting for extractor failed");
                RelayError::DownloadFailure
            })?;
            info!(url = %request.url, code = ?status.code(), "extractor finished without output");
            if status.success() {
                Ok(MediaStream {
                    pending: None,
                    inner,
                    guard: None,
                })
            } else {
                Err(RelayError::DownloadFailure)
            }
        }
    }
}

fn supervise(mut child: Child, token: CancellationToken, url: String) {
    tokio::spawn(async move {
        tokio::select! {
            status = child.wait() => match status {
                Ok(status) if status.success() => info!(%url, "download finished"),
                Ok(status) => warn!(
                    %url,
                    code = ?status.code(),
                    "extractor failed after the response started; transfer is truncated"
                ),
                Err(err) => warn!(%url, error = %err, "waiting for extractor failed"),
            },
            _ = token.cancelled() => {
                info!(%url, "client disconnected, stopping extractor");
                if let Err(err) = child.kill().await {
                    warn!(%url, error = %err, "failed to kill extractor");
                }
            }
        }
    });
}

async fn log_stderr(stderr: ChildStderr, url: String) {
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) if line.starts_with("ERROR") || line.starts_with("WARNING") => {
                warn!(%url, "yt-dlp: {line}")
            }
            Ok(Some(line)) => debug!(%url, "yt-dlp: {line}"),
            Ok(None) => break,
            Err(err) => {
                debug!(%url, error = %err, "stopped reading extractor stderr");
                break;
            }
        }
    }
}
