//! Shell-script stand-ins for yt-dlp used across the unit tests.

use std::{
    fs,
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use crate::{config::AppConfig, extractor::Extractor};

/// Writes an executable `/bin/sh` script named `yt-dlp` into `dir`.
pub fn install_stub(dir: &Path, body: &str) -> PathBuf {
    let script_path = dir.join("yt-dlp");
    fs::write(&script_path, format!("#!/bin/sh\n{body}")).unwrap();
    let mut perms = fs::metadata(&script_path).unwrap().permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&script_path, perms).unwrap();
    script_path
}

/// Config rooted at `dir` whose extractor is a stub running `body`.
pub fn stub_config(dir: &Path, body: &str) -> Arc<AppConfig> {
    let stub = install_stub(dir, body);
    let mut config = AppConfig::for_root(dir);
    config.extractor_bin = stub;
    Arc::new(config)
}

pub fn stub_extractor(dir: &Path, body: &str) -> Extractor {
    Extractor::new(stub_config(dir, body))
}

pub async fn wait_for_pid(pid_file: &Path) -> Option<u32> {
    for _ in 0..50 {
        if let Ok(text) = fs::read_to_string(pid_file)
            && let Ok(pid) = text.trim().parse()
        {
            return Some(pid);
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    None
}

/// Polls `/proc` until `pid` is gone or a zombie.
pub async fn wait_for_exit(pid: u32) -> bool {
    for _ in 0..50 {
        match fs::read_to_string(format!("/proc/{pid}/stat")) {
            Err(_) => return true,
            Ok(stat) => {
                let state = stat.rsplit(')').next().map(str::trim_start);
                if state.is_some_and(|rest| rest.starts_with('Z')) {
                    return true;
                }
            }
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    false
}
