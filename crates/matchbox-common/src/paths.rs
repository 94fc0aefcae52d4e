//! Path utilities: artifact naming and file type detection.
//!
//! Artifact names are derived only from the field and match label, so running
//! an extraction twice for the same match lands on the same file.

use sha2::{Digest, Sha256};
use std::path::Path;

use crate::ClipId;

/// List of video file extensions treated as clip artifacts.
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mkv", "mov", "avi", "webm", "wmv", "flv", "ts"];

/// Build the deterministic file name for a clip.
///
/// A label that sanitizing had to change gets a short digest of the raw
/// label appended, so distinct labels never share a file.
///
/// # Examples
///
/// ```
/// use matchbox_common::{ClipId, FieldNumber};
/// use matchbox_common::paths::artifact_file_name;
///
/// let field = FieldNumber::new(2).unwrap();
/// assert_eq!(artifact_file_name(&ClipId::new(field, "Q3"), "mp4"), "Q3 - Field 2.mp4");
/// assert_eq!(
///     artifact_file_name(&ClipId::new(field, "Final 1/2"), "mkv"),
///     "Final 1_2-ddf3fa57 - Field 2.mkv"
/// );
/// ```
pub fn artifact_file_name(id: &ClipId, container: &str) -> String {
    let sanitized = sanitize_label(&id.match_label);
    let stem = if sanitized == id.match_label {
        sanitized
    } else {
        format!("{}-{}", sanitized, label_digest(&id.match_label))
    };
    format!(
        "{} - Field {}.{}",
        stem,
        id.field,
        container.trim_start_matches('.')
    )
}

/// First 8 hex digits of the label's SHA-256.
fn label_digest(label: &str) -> String {
    Sha256::digest(label.as_bytes())
        .iter()
        .take(4)
        .map(|b| format!("{:02x}", b))
        .collect()
}

/// Replace anything outside `[A-Za-z0-9 _-]` with `_`.
///
/// Leading dots are impossible after sanitizing, so an artifact can never be
/// mistaken for a hidden staging file.
pub fn sanitize_label(label: &str) -> String {
    let cleaned: String = label
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == ' ' || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();

    if cleaned.is_empty() {
        "match".to_string()
    } else {
        cleaned
    }
}

/// Check if a path has a video file extension.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use matchbox_common::paths::is_video_file;
///
/// assert!(is_video_file(Path::new("Q3 - Field 1.mp4")));
/// assert!(!is_video_file(Path::new("index.html")));
/// ```
pub fn is_video_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| VIDEO_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// Whether a request name may be served from the artifact directory.
///
/// Rejects hidden names (staging files), separators, and parent references.
pub fn is_public_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        && !name.contains('/')
        && !name.contains('\\')
        && name != ".."
}

/// Get the list of video file extensions.
#[must_use]
pub fn video_extensions() -> &'static [&'static str] {
    VIDEO_EXTENSIONS
}
