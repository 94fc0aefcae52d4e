//! Artifact listing and byte-range file serving.
//!
//! Files are opened per request and streamed, so readers never block each
//! other or the extractor. Visibility of complete files only is guaranteed by
//! the extractor's rename-into-place; staging files are hidden and refused.

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{Html, IntoResponse, Json, Response},
    routing::get,
    Router,
};
use matchbox_common::paths::{is_public_name, is_video_file};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use std::io::SeekFrom;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;

use crate::catalog::{scan_artifacts, ArtifactEntry};
use crate::server::AppContext;

/// Characters left as-is in a listing href. Names are single path segments,
/// so `/` stays encoded.
const HREF_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

pub fn clip_routes() -> Router<AppContext> {
    Router::new()
        .route("/", get(list_clips))
        .route("/:name", get(serve_clip))
}

/// `GET /`: HTML for browsers, JSON otherwise.
async fn list_clips(State(ctx): State<AppContext>, headers: HeaderMap) -> Response {
    let artifacts = match scan_artifacts(&ctx.clips_dir).await {
        Ok(artifacts) => artifacts,
        Err(e) => {
            tracing::error!("Failed to list {:?}: {}", ctx.clips_dir, e);
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    if accepts_html(&headers) {
        Html(render_listing(&ctx.status.snapshot().event_code, &artifacts)).into_response()
    } else {
        Json(artifacts).into_response()
    }
}

fn accepts_html(headers: &HeaderMap) -> bool {
    headers
        .get(header::ACCEPT)
        .and_then(|h| h.to_str().ok())
        .is_some_and(|accept| accept.contains("text/html"))
}

fn render_listing(event_code: &str, artifacts: &[ArtifactEntry]) -> String {
    let mut rows = String::new();
    for artifact in artifacts {
        let name = html_escape(&artifact.name);
        let href = utf8_percent_encode(&artifact.name, HREF_SET);
        rows.push_str(&format!(
            "<li><a href=\"{href}\">{name}</a> <span class=\"size\">{:.1} MB</span></li>\n",
            artifact.size_mb()
        ));
    }
    if artifacts.is_empty() {
        rows.push_str("<li class=\"empty\">No clips yet</li>\n");
    }

    format!(
        r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<meta http-equiv="refresh" content="30">
<title>Match clips - {event}</title>
<style>
body {{ font-family: sans-serif; margin: 2em; }}
li {{ margin: 0.4em 0; }}
.size {{ color: #666; }}
</style>
</head>
<body>
<h1>Match clips - {event}</h1>
<ul>
{rows}</ul>
</body>
</html>
"#,
        event = html_escape(event_code),
    )
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// `GET /{name}` with `Range` support.
async fn serve_clip(
    State(ctx): State<AppContext>,
    Path(name): Path<String>,
    headers: HeaderMap,
) -> Result<Response, StatusCode> {
    let file_path = ctx.clips_dir.join(&name);
    // Same rule as the listing: only visible video files are artifacts.
    if !is_public_name(&name) || !is_video_file(&file_path) {
        return Err(StatusCode::NOT_FOUND);
    }

    // Open first: a concurrent rename replaces the directory entry, not this handle.
    let mut file = File::open(&file_path)
        .await
        .map_err(|_| StatusCode::NOT_FOUND)?;
    let metadata = file
        .metadata()
        .await
        .map_err(|_| StatusCode::NOT_FOUND)?;
    if !metadata.is_file() {
        return Err(StatusCode::NOT_FOUND);
    }
    let file_size = metadata.len();

    let content_type = determine_content_type(
        file_path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default(),
    );

    let range = headers
        .get(header::RANGE)
        .and_then(|h| h.to_str().ok())
        .map(|s| parse_range_header(s, file_size))
        .unwrap_or(RangeRequest::Full);

    let builder = Response::builder()
        .header(header::ACCEPT_RANGES, "bytes")
        .header(header::CACHE_CONTROL, "no-cache");

    match range {
        RangeRequest::Partial(start, end) => {
            let length = end - start + 1;

            file.seek(SeekFrom::Start(start))
                .await
                .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

            let stream = ReaderStream::new(file.take(length));

            builder
                .status(StatusCode::PARTIAL_CONTENT)
                .header(header::CONTENT_TYPE, content_type)
                .header(header::CONTENT_LENGTH, length.to_string())
                .header(
                    header::CONTENT_RANGE,
                    format!("bytes {}-{}/{}", start, end, file_size),
                )
                .body(Body::from_stream(stream))
                .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
        }
        RangeRequest::Unsatisfiable => builder
            .status(StatusCode::RANGE_NOT_SATISFIABLE)
            .header(header::CONTENT_RANGE, format!("bytes */{}", file_size))
            .body(Body::empty())
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR),
        RangeRequest::Full => {
            let stream = ReaderStream::new(file.take(file_size));

            builder
                .status(StatusCode::OK)
                .header(header::CONTENT_TYPE, content_type)
                .header(header::CONTENT_LENGTH, file_size.to_string())
                .body(Body::from_stream(stream))
                .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// Outcome of interpreting a `Range` header against a file length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeRequest {
    /// No usable range; send the whole file.
    Full,
    /// Inclusive byte range, already clamped to the file.
    Partial(u64, u64),
    /// Syntactically valid but outside the file.
    Unsatisfiable,
}

/// Parse HTTP Range header.
///
/// Supports formats:
/// - bytes=0-499
/// - bytes=500-
/// - bytes=-500 (last 500 bytes)
///
/// Multiple ranges and malformed headers fall back to the full file.
pub fn parse_range_header(header: &str, file_size: u64) -> RangeRequest {
    let Some(ranges) = header.trim().strip_prefix("bytes=") else {
        return RangeRequest::Full;
    };
    if ranges.contains(',') {
        return RangeRequest::Full;
    }
    let Some((start, end)) = ranges.split_once('-') else {
        return RangeRequest::Full;
    };
    let (start, end) = (start.trim(), end.trim());

    match (start.is_empty(), end.is_empty()) {
        // bytes=-500 (last 500 bytes)
        (true, false) => {
            let Ok(suffix_len) = end.parse::<u64>() else {
                return RangeRequest::Full;
            };
            if suffix_len == 0 || file_size == 0 {
                return RangeRequest::Unsatisfiable;
            }
            RangeRequest::Partial(file_size.saturating_sub(suffix_len), file_size - 1)
        }
        // bytes=500- (from 500 to end)
        (false, true) => {
            let Ok(start) = start.parse::<u64>() else {
                return RangeRequest::Full;
            };
            if start >= file_size {
                return RangeRequest::Unsatisfiable;
            }
            RangeRequest::Partial(start, file_size - 1)
        }
        // bytes=0-499
        (false, false) => {
            let (Ok(start), Ok(end)) = (start.parse::<u64>(), end.parse::<u64>()) else {
                return RangeRequest::Full;
            };
            if start > end {
                return RangeRequest::Full;
            }
            if start >= file_size {
                return RangeRequest::Unsatisfiable;
            }
            RangeRequest::Partial(start, end.min(file_size - 1))
        }
        // bytes=- (invalid)
        (true, true) => RangeRequest::Full,
    }
}

/// Determine content type from the file extension.
fn determine_content_type(extension: &str) -> &'static str {
    match extension.to_lowercase().as_str() {
        "mp4" | "m4v" => "video/mp4",
        "mkv" => "video/x-matroska",
        "webm" => "video/webm",
        "avi" => "video/x-msvideo",
        "mov" => "video/quicktime",
        "ts" => "video/mp2t",
        "flv" => "video/x-flv",
        "wmv" => "video/x-ms-wmv",
        _ => "application/octet-stream",
    }
}
