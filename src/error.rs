use std::{io, time::Duration};

use thiserror::Error;

/// Message used when the extractor fails without writing anything to stderr.
pub const GENERIC_EXTRACTOR_FAILURE: &str = "yt-dlp process failed or timed out";

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("{0} is required")]
    MissingParameter(&'static str),
    #[error("invalid {name}: {reason}")]
    InvalidParameter {
        name: &'static str,
        reason: &'static str,
    },
    #[error("Analysis timed out after {} seconds", .0.as_secs())]
    Timeout(Duration),
    #[error("{0}")]
    ExtractorFailure(String),
    #[error("Failed to parse JSON output")]
    OutputParseFailure(#[source] serde_json::Error),
    #[error("Download failed")]
    DownloadFailure,
    #[error("failed to launch extractor {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
}

impl RelayError {
    /// Builds an [`RelayError::ExtractorFailure`] from captured stderr bytes.
    pub fn from_stderr(stderr: &[u8]) -> Self {
        let text = String::from_utf8_lossy(stderr).trim().to_string();
        if text.is_empty() {
            Self::ExtractorFailure(GENERIC_EXTRACTOR_FAILURE.to_string())
        } else {
            Self::ExtractorFailure(text)
        }
    }

    /// True for errors caused by the caller rather than the extractor.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::MissingParameter(_) | Self::InvalidParameter { .. }
        )
    }
}

pub type RelayResult<T> = Result<T, RelayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_match_api_contract() {
        assert_eq!(
            RelayError::MissingParameter("URL").to_string(),
            "URL is required"
        );
        assert_eq!(
            RelayError::Timeout(Duration::from_secs(20)).to_string(),
            "Analysis timed out after 20 seconds"
        );
        assert_eq!(RelayError::DownloadFailure.to_string(), "Download failed");
    }

    #[test]
    fn stderr_falls_back_to_generic_message() {
        assert_eq!(
            RelayError::from_stderr(b"  \n").to_string(),
            GENERIC_EXTRACTOR_FAILURE
        );
        assert_eq!(
            RelayError::from_stderr(b"ERROR: Video unavailable\n").to_string(),
            "ERROR: Video unavailable"
        );
    }

    #[test]
    fn only_parameter_errors_are_client_errors() {
        assert!(RelayError::MissingParameter("URL").is_client_error());
        assert!(!RelayError::DownloadFailure.is_client_error());
    }
}
