//! Enumeration of completed artifacts in the clip directory.
//!
//! Only public video files are listed, so staging files written by a running
//! extraction never appear.

use chrono::{DateTime, Utc};
use matchbox_common::paths::{is_public_name, is_video_file};
use serde::{Deserialize, Serialize};
use std::io;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactEntry {
    pub name: String,
    /// Size in bytes.
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
}

impl ArtifactEntry {
    pub fn size_mb(&self) -> f64 {
        self.size as f64 / (1024.0 * 1024.0)
    }
}

/// List artifacts in `dir`, newest first. A missing directory is empty.
pub async fn scan_artifacts(dir: &Path) -> io::Result<Vec<ArtifactEntry>> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let mut artifacts = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().to_string();
        if !is_public_name(&name) || !is_video_file(Path::new(&name)) {
            continue;
        }
        let Ok(metadata) = entry.metadata().await else {
            // Renamed or removed while listing.
            continue;
        };
        if !metadata.is_file() {
            continue;
        }

        artifacts.push(ArtifactEntry {
            name,
            size: metadata.len(),
            modified: metadata.modified().ok().map(DateTime::<Utc>::from),
        });
    }

    artifacts.sort_by(|a, b| b.modified.cmp(&a.modified).then_with(|| a.name.cmp(&b.name)));
    Ok(artifacts)
}
