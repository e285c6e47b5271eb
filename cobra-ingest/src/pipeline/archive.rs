//! Plain-text transcript archive
//!
//! Layout: `<archive>/<channel name>/<title> - <YYYY-MM-DD>.txt`. Writing is
//! best-effort; the store remains the record of truth.

use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};

/// Drop characters that are not allowed in file names on common platforms
pub fn sanitize_file_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .filter(|c| !matches!(c, '\\' | '/' | '*' | '?' | ':' | '"' | '<' | '>' | '|'))
        .filter(|c| !c.is_control())
        .collect();
    let trimmed = cleaned.trim().trim_end_matches('.');
    if trimmed.is_empty() {
        "untitled".to_string()
    } else {
        trimmed.to_string()
    }
}

pub fn archive_path(
    archive_dir: &Path,
    channel_name: &str,
    title: &str,
    published: DateTime<Utc>,
) -> PathBuf {
    archive_dir
        .join(sanitize_file_name(channel_name))
        .join(format!(
            "{} - {}.txt",
            sanitize_file_name(title),
            published.format("%Y-%m-%d")
        ))
}

/// Write one transcript file, creating the channel directory as needed
pub async fn write_transcript(
    archive_dir: &Path,
    channel_name: &str,
    title: &str,
    published: DateTime<Utc>,
    transcript: &str,
) -> std::io::Result<PathBuf> {
    let path = archive_path(archive_dir, channel_name, title, published);
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(&path, transcript).await?;
    Ok(path)
}
