//! Caption track client (YouTube `timedtext` endpoint)
//!
//! The endpoint answers `<transcript><text start=".." dur="..">…</text>…</transcript>`.
//! Caption text arrives HTML-escaped inside XML, so it is unescaped twice.
//! A video without captions yields an empty body, reported as a permanent error.

use super::{SourceError, TranscriptSource};
use async_trait::async_trait;
use quick_xml::events::Event;
use quick_xml::reader::Reader;
use reqwest::Client;

pub struct TimedTextClient {
    client: Client,
    base_url: String,
    language: String,
}

impl TimedTextClient {
    pub fn new(client: Client, base_url: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            language: language.into(),
        }
    }
}

#[async_trait]
impl TranscriptSource for TimedTextClient {
    async fn fetch_transcript(&self, video_youtube_id: &str) -> Result<String, SourceError> {
        let response = self
            .client
            .get(&self.base_url)
            .query(&[("v", video_youtube_id), ("lang", self.language.as_str())])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::from_status(status, "transcript"));
        }

        let body = response.text().await?;
        let segments = parse_timedtext(&body)?;
        join_segments(&segments).ok_or_else(|| {
            SourceError::permanent(format!("transcript unavailable for {}", video_youtube_id))
        })
    }
}

/// Extract caption segments in document order
pub fn parse_timedtext(xml: &str) -> Result<Vec<String>, SourceError> {
    if xml.trim().is_empty() {
        return Ok(Vec::new());
    }

    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut in_text = false;
    let mut segments = Vec::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(element)) => {
                in_text = element.local_name().as_ref() == b"text";
            }
            Ok(Event::End(_)) => in_text = false,
            Ok(Event::Text(text)) if in_text => {
                let once = text
                    .unescape()
                    .map_err(|e| SourceError::permanent(format!("caption text error: {}", e)))?;
                let twice = match quick_xml::escape::unescape(&once) {
                    Ok(unescaped) => unescaped.into_owned(),
                    Err(_) => once.to_string(),
                };
                segments.push(twice);
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                return Err(SourceError::permanent(format!(
                    "caption XML error at position {}: {}",
                    reader.buffer_position(),
                    e
                )))
            }
        }
    }

    Ok(segments)
}

/// Join segments with single spaces, collapsing inner whitespace
///
/// Returns `None` when nothing but whitespace remains.
pub fn join_segments(segments: &[String]) -> Option<String> {
    let joined = segments
        .iter()
        .flat_map(|segment| segment.split_whitespace())
        .collect::<Vec<_>>()
        .join(" ");
    (!joined.is_empty()).then_some(joined)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_join() {
        let xml = r#"<?xml version="1.0" encoding="utf-8" ?><transcript>
            <text start="0.0" dur="1.5">hello there</text>
            <text start="1.5" dur="2.0">it&amp;#39;s a
            multi-line caption</text>
            <text start="3.5" dur="1.0">   </text>
            <text start="4.5" dur="1.0">Q &amp;amp; A</text>
        </transcript>"#;

        let segments = parse_timedtext(xml).unwrap();
        assert_eq!(segments.len(), 3);
        assert_eq!(
            join_segments(&segments).unwrap(),
            "hello there it's a multi-line caption Q & A"
        );
    }

    #[test]
    fn test_empty_body_has_no_transcript() {
        let segments = parse_timedtext("").unwrap();
        assert!(join_segments(&segments).is_none());

        let segments = parse_timedtext("<transcript></transcript>").unwrap();
        assert!(join_segments(&segments).is_none());
    }

    #[test]
    fn test_broken_xml_is_permanent() {
        assert!(matches!(
            parse_timedtext("<transcript><text>oops</transcript>"),
            Err(SourceError::Permanent(_))
        ));
    }
}
