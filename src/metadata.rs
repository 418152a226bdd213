//! Response shaping for `/api/analyze`.
//!
//! [`VideoInfo`] is the subset of `yt-dlp --dump-single-json` the service
//! reads; everything is optional because extractors for different sites fill
//! in different fields. [`VideoMetadata`] is what the front end receives.

use serde::{Deserialize, Serialize};

use crate::formats::{NormalizedFormat, RawFormat, reduce_formats};

pub const READY_SUMMARY: &str = "Ready to download";
pub const DESCRIPTION_LIMIT: usize = 200;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct VideoInfo {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub webpage_url: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub uploader: Option<String>,
    #[serde(default)]
    pub view_count: Option<f64>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub thumbnail: Option<String>,
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub formats: Vec<RawFormat>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoMetadata {
    pub id: String,
    pub url: String,
    pub title: String,
    pub channel: String,
    pub views: String,
    pub description: String,
    pub summary: String,
    pub thumbnail_url: String,
    pub duration: String,
    pub formats: Vec<NormalizedFormat>,
}

impl VideoMetadata {
    /// Shapes the extractor's dump. `requested_url` stands in for the
    /// canonical URL when the extractor does not report one.
    pub fn from_info(info: VideoInfo, requested_url: &str) -> Self {
        let formats = reduce_formats(&info.formats);
        Self {
            id: info.id.unwrap_or_default(),
            url: info
                .webpage_url
                .unwrap_or_else(|| requested_url.to_string()),
            title: info.title.unwrap_or_default(),
            channel: info.uploader.unwrap_or_default(),
            views: format_views(info.view_count.map(|views| views.max(0.0) as u64)),
            description: truncate_description(info.description.as_deref()),
            summary: READY_SUMMARY.to_string(),
            thumbnail_url: info.thumbnail.unwrap_or_default(),
            duration: format_duration(info.duration.map(|secs| secs.max(0.0) as u64)),
            formats,
        }
    }
}

/// 950 -> "950", 1500 -> "1.5K", 2_300_000 -> "2.3M".
pub fn format_views(views: Option<u64>) -> String {
    match views {
        None | Some(0) => "0".to_string(),
        Some(views) if views >= 1_000_000 => format!("{}M", one_decimal(views as f64 / 1_000_000.0)),
        Some(views) if views >= 1_000 => format!("{}K", one_decimal(views as f64 / 1_000.0)),
        Some(views) => views.to_string(),
    }
}

/// One decimal place, with exact halves rounded up rather than to even.
/// A value sits exactly between two tenths only when it is an odd number of
/// quarters (1.25, 3.75, ...), and scaling by 4 is exact.
fn one_decimal(value: f64) -> String {
    let quarters = value * 4.0;
    if quarters.fract() == 0.0 && quarters % 2.0 == 1.0 {
        return format!("{:.1}", (value * 10.0).ceil() / 10.0);
    }
    format!("{value:.1}")
}

/// `M:SS` below an hour, `H:MM:SS` above.
pub fn format_duration(seconds: Option<u64>) -> String {
    let seconds = match seconds {
        None | Some(0) => return "0:00".to_string(),
        Some(seconds) => seconds,
    };
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;
    if hours > 0 {
        format!("{hours}:{minutes:02}:{secs:02}")
    } else {
        format!("{minutes}:{secs:02}")
    }
}

pub fn truncate_description(description: Option<&str>) -> String {
    match description {
        None | Some("") => String::new(),
        Some(text) => {
            let mut out: String = text.chars().take(DESCRIPTION_LIMIT).collect();
            out.push_str("...");
            out
        }
    }
}
