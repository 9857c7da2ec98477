//! Pid pin-file.
//!
//! A plain-text record of live child pids, one per line with `#` comment
//! lines, written atomically on successful fleet start and deleted on clean
//! shutdown. Its only purpose is reaping orphans after the manager itself
//! was killed without cleanup; every operation here is best-effort.

use std::fs;
use std::io;
use std::path::Path;

use tracing::debug;

/// Default pin-file name inside the config directory.
pub const PIN_FILE_NAME: &str = "gamekeeper_servers.pid";

/// Read pids from a pin-file.
///
/// A missing file yields an empty list. Blank lines, comments, and
/// unparsable lines are skipped.
pub fn read_pin_file(path: impl AsRef<Path>) -> Vec<u32> {
    let contents = match fs::read_to_string(path.as_ref()) {
        Ok(contents) => contents,
        Err(_) => return Vec::new(),
    };

    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.parse().ok())
        .collect()
}

/// Write the pin-file atomically by replacement.
///
/// An empty pid list removes the file instead: a pin-file with no pids is
/// indistinguishable from a stale one.
pub fn write_pin_file(path: impl AsRef<Path>, pids: &[u32]) -> io::Result<()> {
    let path = path.as_ref();

    if pids.is_empty() {
        remove_pin_file(path);
        return Ok(());
    }

    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }

    let mut contents = String::from("# gamekeeper game server pids - do not edit\n");
    for pid in pids {
        contents.push_str(&pid.to_string());
        contents.push('\n');
    }

    let tmp = path.with_extension("pid.tmp");
    fs::write(&tmp, contents)?;
    fs::rename(&tmp, path)?;

    debug!(path = %path.display(), count = pids.len(), "pin-file written");
    Ok(())
}

/// Delete the pin-file if present.
pub fn remove_pin_file(path: impl AsRef<Path>) {
    let _ = fs::remove_file(path.as_ref());
}
