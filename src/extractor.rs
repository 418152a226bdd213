//! yt-dlp invocation.
//!
//! Both endpoints share the same anti-bot flags: no warnings, no playlist
//! expansion, IPv4 only, a browser user agent and, when the operator dropped
//! one next to the binary, a Netscape cookie jar. The metadata call captures
//! the whole output under a deadline; the streaming call lives in
//! [`crate::relay`].

use std::{
    ffi::OsString,
    io,
    process::{ExitStatus, Stdio},
    sync::Arc,
    time::Instant,
};

use tokio::{
    io::{AsyncRead, AsyncReadExt},
    process::{Child, Command},
    time::timeout,
};
use tracing::{debug, info, warn};

use crate::{
    config::AppConfig,
    error::{RelayError, RelayResult},
    metadata::{VideoInfo, VideoMetadata},
};

/// Cheap to clone; every request gets its own child process.
#[derive(Debug, Clone)]
pub struct Extractor {
    config: Arc<AppConfig>,
}

impl Extractor {
    pub fn new(config: Arc<AppConfig>) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Flags shared by the metadata and streaming invocations.
    pub fn common_args(&self) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "--no-warnings".into(),
            "--no-playlist".into(),
            "--force-ipv4".into(),
            "--user-agent".into(),
            self.config.user_agent.clone().into(),
        ];
        if let Some(cookies) = self.config.cookies() {
            args.push("--cookies".into());
            args.push(cookies.as_os_str().to_owned());
        }
        args
    }

    pub fn analyze_args(&self, url: &str) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec!["--dump-single-json".into()];
        args.extend(self.common_args());
        args.push(url.into());
        args
    }

    /// Starts the extractor with piped stdout/stderr. The child is killed if
    /// its handle is dropped, so abandoned requests never leave it running.
    pub(crate) fn spawn(&self, args: &[OsString]) -> RelayResult<Child> {
        debug!(
            program = %self.config.extractor_bin.display(),
            ?args,
            "spawning extractor"
        );
        Command::new(&self.config.extractor_bin)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| RelayError::Spawn {
                program: self.config.extractor_bin.display().to_string(),
                source,
            })
    }

    /// Runs `--dump-single-json` for `url` and parses the document.
    pub async fn fetch_info(&self, url: &str) -> RelayResult<VideoInfo> {
        let args = self.analyze_args(url);
        let mut child = self.spawn(&args)?;
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let outcome = timeout(self.config.analyze_timeout, async {
            tokio::try_join!(drain(stdout), drain(stderr), child.wait())
        })
        .await;

        let (stdout, stderr, status) = match outcome {
            Ok(Ok(collected)) => collected,
            Ok(Err(err)) => {
                warn!(url, error = %err, "reading extractor output failed");
                return Err(RelayError::ExtractorFailure(err.to_string()));
            }
            Err(_) => {
                warn!(
                    url,
                    timeout_secs = self.config.analyze_timeout.as_secs_f64(),
                    "extractor timed out, killing it"
                );
                if let Err(err) = child.kill().await {
                    warn!(url, error = %err, "failed to kill timed out extractor");
                }
                return Err(RelayError::Timeout(self.config.analyze_timeout));
            }
        };

        check_status(url, status, &stderr)?;
        serde_json::from_slice(&stdout).map_err(|err| {
            warn!(url, error = %err, "extractor produced malformed JSON");
            RelayError::OutputParseFailure(err)
        })
    }

    /// Resolves `url` into the metadata record served by `/api/analyze`.
    pub async fn analyze(&self, url: Option<&str>) -> RelayResult<VideoMetadata> {
        let url = validate_url(url)?;
        let started = Instant::now();
        let info = self.fetch_info(url).await?;
        info!(
            url,
            elapsed_ms = started.elapsed().as_millis() as u64,
            formats = info.formats.len(),
            "fetched video info"
        );
        Ok(VideoMetadata::from_info(info, url))
    }
}

/// Rejects absent or blank URLs, and anything yt-dlp would read as a flag.
pub fn validate_url(url: Option<&str>) -> RelayResult<&str> {
    let url = url
        .map(str::trim)
        .filter(|url| !url.is_empty())
        .ok_or(RelayError::MissingParameter("URL"))?;
    if url.starts_with('-') {
        return Err(RelayError::InvalidParameter {
            name: "URL",
            reason: "must not start with '-'",
        });
    }
    Ok(url)
}

fn check_status(url: &str, status: ExitStatus, stderr: &[u8]) -> RelayResult<()> {
    if status.success() {
        return Ok(());
    }
    let error = RelayError::from_stderr(stderr);
    warn!(url, code = ?status.code(), %error, "extractor failed");
    Err(error)
}

async fn drain<R: AsyncRead + Unpin>(reader: Option<R>) -> io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    if let Some(mut reader) = reader {
        reader.read_to_end(&mut buf).await?;
    }
    Ok(buf)
}
