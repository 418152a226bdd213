//! Rendition list reduction.
//!
//! yt-dlp reports every rendition it can find, often dozens per video, many of
//! them duplicates from the user's point of view (same resolution through a
//! different protocol, video-only variants, storyboards). This module turns
//! that list into the short menu the front end shows: one mp4 entry per
//! quality and one audio entry per bitrate, best first.

use std::{borrow::Borrow, collections::HashMap, fmt, hash::Hash};

use serde::{Deserialize, Serialize};

/// Container the video bucket is restricted to.
pub const VIDEO_CONTAINER: &str = "mp4";
/// Containers accepted for audio-only renditions.
pub const AUDIO_CONTAINERS: [&str; 2] = ["m4a", "webm"];
pub const UNKNOWN_QUALITY: &str = "Unknown";

/// One entry of the `formats` array in yt-dlp's JSON dump. Numeric fields are
/// read as floats because yt-dlp is not consistent about integer encoding.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawFormat {
    #[serde(default)]
    pub format_id: Option<FormatId>,
    #[serde(default)]
    pub format_note: Option<String>,
    #[serde(default)]
    pub height: Option<f64>,
    #[serde(default)]
    pub abr: Option<f64>,
    #[serde(default)]
    pub ext: Option<String>,
    #[serde(default)]
    pub vcodec: Option<String>,
    #[serde(default)]
    pub acodec: Option<String>,
    #[serde(default)]
    pub filesize: Option<f64>,
    #[serde(default)]
    pub filesize_approx: Option<f64>,
}

/// Rendition selector. Kept numeric when it looks like a number so the front
/// end can hand it back verbatim; yt-dlp accepts both spellings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FormatId {
    Numeric(u64),
    Text(String),
}

impl FormatId {
    pub fn normalized(self) -> Self {
        match self {
            Self::Text(text) => match text.trim().parse::<u64>() {
                Ok(value) => Self::Numeric(value),
                Err(_) => Self::Text(text),
            },
            numeric => numeric,
        }
    }
}

impl fmt::Display for FormatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Numeric(value) => write!(f, "{value}"),
            Self::Text(text) => f.write_str(text),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedFormat {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub itag: Option<FormatId>,
    pub quality: String,
    pub container: String,
    pub has_video: bool,
    pub has_audio: bool,
    pub content_length: u64,
}

impl NormalizedFormat {
    pub fn from_raw(raw: &RawFormat) -> Self {
        Self {
            itag: raw.format_id.clone(),
            quality: quality_label(raw),
            container: raw.ext.clone().unwrap_or_default(),
            has_video: codec_present(raw.vcodec.as_deref()),
            has_audio: codec_present(raw.acodec.as_deref()),
            content_length: content_length(raw),
        }
    }

    /// Entries with no video, no audio and no size tell the user nothing.
    pub fn is_informative(&self) -> bool {
        self.has_video || self.has_audio || self.content_length > 0
    }

    fn audio_key(&self) -> String {
        if !self.quality.is_empty() {
            return self.quality.clone();
        }
        match &self.itag {
            Some(itag) => itag.to_string(),
            None => "audio".to_string(),
        }
    }
}

/// Small insertion-ordered map. Re-inserting an existing key replaces the
/// value but keeps the key's original position.
#[derive(Debug, Clone)]
pub struct OrderedMap<K, V> {
    index: HashMap<K, usize>,
    entries: Vec<V>,
}

impl<K, V> Default for OrderedMap<K, V> {
    fn default() -> Self {
        Self {
            index: HashMap::new(),
            entries: Vec::new(),
        }
    }
}

impl<K: Eq + Hash, V> OrderedMap<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.index.get(key).map(|&slot| &self.entries[slot])
    }

    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.index.contains_key(key)
    }

    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        match self.index.get(&key) {
            Some(&slot) => Some(std::mem::replace(&mut self.entries[slot], value)),
            None => {
                self.index.insert(key, self.entries.len());
                self.entries.push(value);
                None
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn into_values(self) -> std::vec::IntoIter<V> {
        self.entries.into_iter()
    }
}

/// Reduces yt-dlp's format list to the deduplicated, sorted download menu.
pub fn reduce_formats(raw: &[RawFormat]) -> Vec<NormalizedFormat> {
    let mut video: OrderedMap<String, NormalizedFormat> = OrderedMap::new();
    let mut audio: OrderedMap<String, NormalizedFormat> = OrderedMap::new();

    for format in raw
        .iter()
        .map(NormalizedFormat::from_raw)
        .filter(NormalizedFormat::is_informative)
    {
        if format.has_video && format.container == VIDEO_CONTAINER {
            let replace = match video.get(format.quality.as_str()) {
                None => true,
                Some(existing) => !existing.has_audio && format.has_audio,
            };
            if replace {
                video.insert(format.quality.clone(), format);
            }
        } else if !format.has_video
            && format.has_audio
            && AUDIO_CONTAINERS.contains(&format.container.as_str())
        {
            let key = format.audio_key();
            if !audio.contains_key(key.as_str()) {
                audio.insert(key, format);
            }
        }
    }

    let mut formats: Vec<NormalizedFormat> = video
        .into_values()
        .chain(audio.into_values())
        .map(|mut format| {
            format.itag = format.itag.map(FormatId::normalized);
            format
        })
        .collect();

    // Stable: equal ranks keep bucket order.
    formats.sort_by(|a, b| {
        b.has_video
            .cmp(&a.has_video)
            .then_with(|| leading_integer(&b.quality).cmp(&leading_integer(&a.quality)))
    });
    formats
}

/// `format_note`, then `{height}p`, then `{abr}kbps`, then "Unknown".
pub fn quality_label(raw: &RawFormat) -> String {
    if let Some(note) = raw.format_note.as_deref().filter(|note| !note.is_empty()) {
        return note.to_string();
    }
    if let Some(height) = raw.height.filter(|height| *height > 0.0) {
        return format!("{}p", height as u64);
    }
    if let Some(abr) = raw.abr.filter(|abr| *abr > 0.0) {
        return format!("{}kbps", abr.round() as u64);
    }
    UNKNOWN_QUALITY.to_string()
}

fn codec_present(codec: Option<&str>) -> bool {
    matches!(codec, Some(value) if !value.is_empty() && value != "none")
}

fn content_length(raw: &RawFormat) -> u64 {
    raw.filesize
        .filter(|size| *size > 0.0)
        .or(raw.filesize_approx.filter(|size| *size > 0.0))
        .map(|size| size as u64)
        .unwrap_or(0)
}

/// Leading integer of a quality label ("1080p60" -> 1080, "128kbps" -> 128).
/// Labels without one rank as 0.
pub fn leading_integer(label: &str) -> i64 {
    let trimmed = label.trim_start();
    let (negative, digits) = match trimmed.as_bytes().first() {
        Some(b'-') => (true, &trimmed[1..]),
        Some(b'+') => (false, &trimmed[1..]),
        _ => (false, trimmed),
    };
    let end = digits
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(digits.len());
    let value = digits[..end].parse::<i64>().unwrap_or(0);
    if negative { -value } else { value }
}
