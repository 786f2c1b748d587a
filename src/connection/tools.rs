//! External runtime path detection.

use std::path::PathBuf;

/// Find the Node.js runtime used to host execution units.
///
/// Resolution order: `MANGROVE_NODE` env override, a `resources/bin`
/// directory next to the current executable, then `PATH`.
pub fn node_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("MANGROVE_NODE") {
        let path = PathBuf::from(path);
        if path.exists() {
            return Some(path);
        }
    }

    if let Ok(exe_path) = std::env::current_exe()
        && let Some(parent) = exe_path.parent()
    {
        let bundled = parent.join("resources/bin/node");
        if bundled.exists() {
            return Some(bundled);
        }
    }

    which::which("node").ok()
}
