#![forbid(unsafe_code)]

//! Thin HTTP front for yt-dlp.
//!
//! [`extractor`] resolves a URL into a reduced list of downloadable renditions
//! and [`relay`] streams the chosen one back to the caller. [`api`] wires both
//! into an axum router; the `backend` binary serves it.

pub mod api;
pub mod config;
pub mod error;
pub mod extractor;
pub mod formats;
pub mod metadata;
pub mod relay;
pub mod security;

#[cfg(test)]
mod test_support;
