//! Artifact discovery in a runner's output directory.
//!
//! Serving the bytes is somebody else's job; this only produces references.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tracing::debug;

const SCREENSHOT_EXTENSION: &str = "png";

/// Screenshots written under `dir` at or after `since`, oldest first.
pub fn collect_screenshots(dir: &Path, since: SystemTime) -> Vec<String> {
    let mut found = Vec::new();
    walk(dir, since, &mut found);
    found.sort();
    found
        .into_iter()
        .map(|(_, path)| path.display().to_string())
        .collect()
}

/// Reference to the run's report if the runner produced one.
pub fn report_reference(path: &Path) -> Option<String> {
    path.is_file().then(|| path.display().to_string())
}

fn walk(dir: &Path, since: SystemTime, found: &mut Vec<(SystemTime, PathBuf)>) {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            debug!(dir = %dir.display(), error = %e, "Artifact directory not readable");
            return;
        }
    };

    for entry in entries.flatten() {
        let path = entry.path();
        let Ok(meta) = entry.metadata() else {
            continue;
        };

        if meta.is_dir() {
            walk(&path, since, found);
            continue;
        }

        let is_screenshot = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case(SCREENSHOT_EXTENSION));
        if !is_screenshot {
            continue;
        }

        if let Ok(modified) = meta.modified() {
            if modified >= since {
                found.push((modified, path));
            }
        }
    }
}
