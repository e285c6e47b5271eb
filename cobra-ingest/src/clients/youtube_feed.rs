//! YouTube channel listing
//!
//! Two sources share the [`FeedEntry`] shape:
//! - the public Atom feed (`/feeds/videos.xml?channel_id=…`), polled every tick
//! - the Data API v3 uploads playlist, used once per backfill

use super::{FeedEntry, FeedSource, SourceError, UploadHistory};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, warn};

/// Data API page size limit
const MAX_PAGE_SIZE: usize = 50;

/// Atom feed client
pub struct YoutubeFeedClient {
    client: Client,
    feed_base_url: String,
}

impl YoutubeFeedClient {
    pub fn new(client: Client, feed_base_url: impl Into<String>) -> Self {
        Self {
            client,
            feed_base_url: feed_base_url.into(),
        }
    }
}

#[async_trait]
impl FeedSource for YoutubeFeedClient {
    async fn fetch_entries(&self, channel_youtube_id: &str) -> Result<Vec<FeedEntry>, SourceError> {
        let response = self
            .client
            .get(&self.feed_base_url)
            .query(&[("channel_id", channel_youtube_id)])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::from_status(status, "channel feed"));
        }

        let body = response.text().await?;
        parse_feed(&body)
    }
}

#[derive(Default)]
struct PartialEntry {
    youtube_id: Option<String>,
    title: Option<String>,
    published: Option<String>,
    thumbnail_url: Option<String>,
}

impl PartialEntry {
    fn finish(self) -> Result<FeedEntry, String> {
        let youtube_id = self
            .youtube_id
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| "entry has no videoId".to_string())?;
        let published = self
            .published
            .ok_or_else(|| format!("entry {} has no published date", youtube_id))?;
        let published = DateTime::parse_from_rfc3339(published.trim())
            .map_err(|e| format!("entry {} has bad published date: {}", youtube_id, e))?
            .with_timezone(&Utc);

        Ok(FeedEntry {
            youtube_id,
            title: self.title.unwrap_or_default(),
            published,
            thumbnail_url: self.thumbnail_url,
        })
    }
}

fn local_name(element: &BytesStart<'_>) -> Vec<u8> {
    element.local_name().as_ref().to_vec()
}

/// Parse an Atom channel feed
///
/// Entries lacking a video id or a valid `published` timestamp are logged and
/// skipped; a document that is not well-formed XML is a permanent error.
pub fn parse_feed(xml: &str) -> Result<Vec<FeedEntry>, SourceError> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut path: Vec<Vec<u8>> = Vec::new();
    let mut current: Option<PartialEntry> = None;
    let mut entries = Vec::new();

    loop {
        let event = reader.read_event().map_err(|e| {
            SourceError::permanent(format!(
                "feed XML error at position {}: {}",
                reader.buffer_position(),
                e
            ))
        })?;

        match event {
            Event::Start(element) => {
                let name = local_name(&element);
                if name == b"entry" {
                    current = Some(PartialEntry::default());
                }
                path.push(name);
            }
            Event::Empty(element) => {
                if let Some(entry) = current.as_mut() {
                    if element.local_name().as_ref() == b"thumbnail" && entry.thumbnail_url.is_none()
                    {
                        if let Ok(Some(attr)) = element.try_get_attribute("url") {
                            if let Ok(url) = attr.unescape_value() {
                                entry.thumbnail_url = Some(url.into_owned());
                            }
                        }
                    }
                }
            }
            Event::Text(text) => {
                let Some(entry) = current.as_mut() else {
                    continue;
                };
                let value = text
                    .unescape()
                    .map_err(|e| SourceError::permanent(format!("feed text error: {}", e)))?
                    .into_owned();
                assign_field(entry, &path, value);
            }
            Event::CData(data) => {
                if let Some(entry) = current.as_mut() {
                    let value = String::from_utf8_lossy(&data.into_inner()).into_owned();
                    assign_field(entry, &path, value);
                }
            }
            Event::End(_) => {
                let closed = path.pop();
                if closed.as_deref() == Some(b"entry".as_slice()) {
                    if let Some(partial) = current.take() {
                        match partial.finish() {
                            Ok(entry) => entries.push(entry),
                            Err(reason) => warn!("Skipping malformed feed entry: {}", reason),
                        }
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    debug!("Parsed {} feed entries", entries.len());
    Ok(entries)
}

/// Store text for direct children of `<entry>` only (`media:group` has its own title)
fn assign_field(entry: &mut PartialEntry, path: &[Vec<u8>], value: String) {
    let [.., parent, field] = path else {
        return;
    };
    if parent.as_slice() != b"entry" {
        return;
    }
    match field.as_slice() {
        b"videoId" => entry.youtube_id = Some(value),
        b"title" => entry.title = Some(value),
        b"published" => entry.published = Some(value),
        _ => {}
    }
}

/// YouTube Data API v3 client for historical uploads
pub struct YoutubeDataApiClient {
    client: Client,
    base_url: String,
    api_key: String,
}

impl YoutubeDataApiClient {
    pub fn new(client: Client, base_url: impl Into<String>, api_key: String) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            api_key,
        }
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(
        &self,
        endpoint: &str,
        query: &[(&str, String)],
    ) -> Result<T, SourceError> {
        let url = format!("{}/{}", self.base_url.trim_end_matches('/'), endpoint);
        let response = self
            .client
            .get(&url)
            .query(query)
            .query(&[("key", self.api_key.as_str())])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::from_status(status, endpoint));
        }
        response
            .json::<T>()
            .await
            .map_err(|e| SourceError::permanent(format!("{} response malformed: {}", endpoint, e)))
    }

    async fn uploads_playlist(&self, channel_youtube_id: &str) -> Result<String, SourceError> {
        let channels: ChannelListResponse = self
            .get_json(
                "channels",
                &[
                    ("part", "contentDetails".to_string()),
                    ("id", channel_youtube_id.to_string()),
                ],
            )
            .await?;

        channels
            .items
            .into_iter()
            .next()
            .map(|item| item.content_details.related_playlists.uploads)
            .ok_or_else(|| {
                SourceError::permanent(format!("channel {} not found", channel_youtube_id))
            })
    }
}

#[async_trait]
impl UploadHistory for YoutubeDataApiClient {
    async fn list_uploads(
        &self,
        channel_youtube_id: &str,
        max_results: usize,
    ) -> Result<Vec<FeedEntry>, SourceError> {
        let playlist_id = self.uploads_playlist(channel_youtube_id).await?;
        let mut entries = Vec::new();
        let mut page_token: Option<String> = None;

        while entries.len() < max_results {
            let page_size = (max_results - entries.len()).min(MAX_PAGE_SIZE);
            let mut query = vec![
                ("part", "snippet".to_string()),
                ("playlistId", playlist_id.clone()),
                ("maxResults", page_size.to_string()),
            ];
            if let Some(token) = &page_token {
                query.push(("pageToken", token.clone()));
            }

            let page: PlaylistItemsResponse = self.get_json("playlistItems", &query).await?;
            for item in page.items {
                match item.snippet.into_entry() {
                    Ok(entry) => entries.push(entry),
                    Err(reason) => warn!("Skipping playlist item: {}", reason),
                }
            }

            debug!(
                channel = channel_youtube_id,
                collected = entries.len(),
                "Fetched uploads page"
            );

            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        entries.truncate(max_results);
        Ok(entries)
    }
}

#[derive(Debug, Deserialize)]
struct ChannelListResponse {
    #[serde(default)]
    items: Vec<ChannelItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChannelItem {
    content_details: ChannelContentDetails,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChannelContentDetails {
    related_playlists: RelatedPlaylists,
}

#[derive(Debug, Deserialize)]
struct RelatedPlaylists {
    uploads: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaylistItemsResponse {
    #[serde(default)]
    items: Vec<PlaylistItem>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PlaylistItem {
    snippet: PlaylistSnippet,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaylistSnippet {
    #[serde(default)]
    title: String,
    published_at: String,
    resource_id: ResourceId,
    #[serde(default)]
    thumbnails: Thumbnails,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResourceId {
    video_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Thumbnails {
    medium: Option<Thumbnail>,
    high: Option<Thumbnail>,
    default: Option<Thumbnail>,
}

#[derive(Debug, Deserialize)]
struct Thumbnail {
    url: String,
}

impl PlaylistSnippet {
    fn into_entry(self) -> Result<FeedEntry, String> {
        let youtube_id = self
            .resource_id
            .video_id
            .ok_or_else(|| format!("'{}' has no videoId", self.title))?;
        let published = DateTime::parse_from_rfc3339(&self.published_at)
            .map_err(|e| format!("{} has bad publishedAt: {}", youtube_id, e))?
            .with_timezone(&Utc);
        let thumbnails = self.thumbnails;
        let thumbnail_url = thumbnails
            .medium
            .or(thumbnails.high)
            .or(thumbnails.default)
            .map(|t| t.url);

        Ok(FeedEntry {
            youtube_id,
            title: self.title,
            published,
            thumbnail_url,
        })
    }
}
