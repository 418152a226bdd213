//! Privilege check run by the backend before it binds.

use anyhow::{Result, bail};
use nix::unistd::Uid;

/// Refuses to serve when the effective user is root. Every request spawns
/// the extractor with the server's privileges on behalf of anonymous clients.
pub fn ensure_not_root(process: &str) -> Result<()> {
    check_uid(process, Uid::effective())
}

fn check_uid(process: &str, uid: Uid) -> Result<()> {
    if uid.is_root() {
        bail!("{process} spawns yt-dlp for every request and refuses to run as root (uid {uid})");
    }
    Ok(())
}
