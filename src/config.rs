use anyhow::{Context, Result};
use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

pub const DEFAULT_CONFIG_PATH: &str = "/etc/vidrelay-env";
pub const DEFAULT_PORT: u16 = 3001;
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_EXTRACTOR: &str = "yt-dlp";
pub const DEFAULT_ANALYZE_TIMEOUT_SECS: u64 = 20;
pub const COOKIES_FILE: &str = "cookies.txt";
pub const WWW_SUBDIR: &str = "dist";
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
    AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Values read from the optional `KEY=VALUE` env-file. Everything is optional;
/// [`AppConfig::resolve`] fills the gaps with defaults.
#[derive(Debug, Clone, Default)]
pub struct EnvConfig {
    pub project_root: Option<PathBuf>,
    pub www_root: Option<PathBuf>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub extractor_bin: Option<PathBuf>,
    pub cookies_file: Option<PathBuf>,
    pub user_agent: Option<String>,
    pub analyze_timeout_secs: Option<u64>,
}

/// Fully resolved runtime configuration, built once at startup and shared
/// read-only with the resolver and the relay.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub www_root: PathBuf,
    pub extractor_bin: PathBuf,
    /// Cookie jar location. Only passed to the extractor while the file
    /// actually exists.
    pub cookies_file: PathBuf,
    pub user_agent: String,
    pub analyze_timeout: Duration,
}

impl AppConfig {
    /// Configuration rooted at `project_root` with every other value defaulted.
    pub fn for_root(project_root: &Path) -> Self {
        Self::resolve(EnvConfig::default(), project_root)
    }

    pub fn resolve(cfg: EnvConfig, default_root: &Path) -> Self {
        let root = cfg
            .project_root
            .unwrap_or_else(|| default_root.to_path_buf());
        let extractor_bin = cfg.extractor_bin.unwrap_or_else(|| {
            let local = root.join(DEFAULT_EXTRACTOR);
            if local.is_file() {
                local
            } else {
                PathBuf::from(DEFAULT_EXTRACTOR)
            }
        });
        Self {
            host: cfg.host.unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port: cfg.port.unwrap_or(DEFAULT_PORT),
            www_root: cfg.www_root.unwrap_or_else(|| root.join(WWW_SUBDIR)),
            extractor_bin,
            cookies_file: cfg.cookies_file.unwrap_or_else(|| root.join(COOKIES_FILE)),
            user_agent: cfg
                .user_agent
                .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string()),
            analyze_timeout: Duration::from_secs(
                cfg.analyze_timeout_secs
                    .unwrap_or(DEFAULT_ANALYZE_TIMEOUT_SECS),
            ),
        }
    }

    /// Returns the cookie jar when it is present on disk right now.
    pub fn cookies(&self) -> Option<&Path> {
        self.cookies_file
            .is_file()
            .then_some(self.cookies_file.as_path())
    }
}

pub fn read_env_config(path: &Path) -> Result<Option<EnvConfig>> {
    if !path.exists() {
        return Ok(None);
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
    let mut cfg = EnvConfig::default();
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        if let Some((key, value_raw)) = trimmed.split_once('=') {
            let value = value_raw.trim().trim_matches('"');
            if value.is_empty() {
                continue;
            }
            match key.trim() {
                "PROJECT_ROOT" => cfg.project_root = Some(PathBuf::from(value)),
                "WWW_ROOT" => cfg.www_root = Some(PathBuf::from(value)),
                "HOST" => cfg.host = Some(value.to_string()),
                "PORT" => {
                    let port: u16 = value
                        .parse()
                        .with_context(|| format!("Parsing PORT from {}", path.display()))?;
                    cfg.port = Some(port);
                }
                "EXTRACTOR_BIN" => cfg.extractor_bin = Some(PathBuf::from(value)),
                "COOKIES_FILE" => cfg.cookies_file = Some(PathBuf::from(value)),
                "USER_AGENT" => cfg.user_agent = Some(value.to_string()),
                "ANALYZE_TIMEOUT_SECS" => {
                    let secs: u64 = value.parse().with_context(|| {
                        format!("Parsing ANALYZE_TIMEOUT_SECS from {}", path.display())
                    })?;
                    cfg.analyze_timeout_secs = Some(secs);
                }
                _ => {}
            }
        }
    }
    Ok(Some(cfg))
}

/// Applies `PORT` and `LISTEN_HOST` from the process environment on top of
/// the file values. `lookup` is `std::env::var(..).ok()` outside of tests.
pub fn apply_env_overrides(
    mut cfg: EnvConfig,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<EnvConfig> {
    if let Some(port) = lookup("PORT").filter(|value| !value.trim().is_empty()) {
        let port: u16 = port
            .trim()
            .parse()
            .with_context(|| format!("Parsing PORT environment variable {port:?}"))?;
        cfg.port = Some(port);
    }
    if let Some(host) = lookup("LISTEN_HOST").filter(|value| !value.trim().is_empty()) {
        cfg.host = Some(host.trim().to_string());
    }
    Ok(cfg)
}
