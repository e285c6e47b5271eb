//! OpenAI client: chat completions for summaries, `/v1/embeddings` for vectors
//!
//! All requests share one rate limiter so concurrent workers cannot exceed the
//! configured requests-per-second.

use super::{LanguageModel, SourceError, SummaryRequest, TopicRequest, VideoSummary};
use crate::config::OpenAiConfig;
use async_trait::async_trait;
use governor::{Quota, RateLimiter};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::num::NonZeroU32;
use tracing::debug;

type DirectLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

pub struct OpenAiClient {
    client: Client,
    api_key: String,
    base_url: String,
    chat_model: String,
    embedding_model: String,
    rate_limiter: DirectLimiter,
}

impl OpenAiClient {
    pub fn new(client: Client, api_key: String, config: &OpenAiConfig) -> Self {
        let per_second = NonZeroU32::new(config.requests_per_second).unwrap_or(NonZeroU32::MIN);
        Self {
            client,
            api_key,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            chat_model: config.chat_model.clone(),
            embedding_model: config.embedding_model.clone(),
            rate_limiter: RateLimiter::direct(Quota::per_second(per_second)),
        }
    }

    async fn post_json<B, R>(&self, path: &str, body: &B) -> Result<R, SourceError>
    where
        B: Serialize + ?Sized,
        R: for<'de> Deserialize<'de>,
    {
        self.rate_limiter.until_ready().await;

        let response = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::from_status(status, path));
        }

        response
            .json::<R>()
            .await
            .map_err(|e| SourceError::permanent(format!("{} response malformed: {}", path, e)))
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

/// User message asking for the JSON summary object
pub fn summary_user_prompt(transcript: &str, existing_topics: &[String]) -> String {
    let topics_list = if existing_topics.is_empty() {
        "No existing topics.".to_string()
    } else {
        existing_topics.join("\n")
    };

    format!(
        "Respond with a JSON object with keys \"summary\" (string), \"topics\" (3-5 short \
         topic names) and \"quotes\" (up to 5 notable verbatim quotes).\n\
         Reuse a topic from the existing list whenever one fits; only introduce a new topic \
         for a significantly different concept. Topics should be a single word when possible.\n\n\
         Existing topics:\n{}\n\n\
         Summarize the following YouTube transcript:\n\n{}",
        topics_list, transcript
    )
}

const TOPIC_SYSTEM_PROMPT: &str = "You extract 3-5 main topics from a video transcript. \
    If a topic is similar to one in the existing topics list, use the existing name instead of \
    creating a new one; only create new topics for significantly different concepts. \
    Each topic should be a single word when possible, at most 2-3 words. \
    Respond with only the topics, one per line, no numbers or bullet points.";

pub fn topic_user_prompt(transcript: &str, existing_topics: &[String]) -> String {
    let topics_list = if existing_topics.is_empty() {
        "No existing topics.".to_string()
    } else {
        existing_topics.join("\n")
    };
    format!(
        "Here are the existing topics to choose from when possible:\n\n{}\n\n\
         Extract the main topics from this transcript:\n\n{}",
        topics_list, transcript
    )
}

/// One topic per line; list markers the model adds anyway are stripped
pub fn parse_topic_lines(content: &str) -> Vec<String> {
    content
        .lines()
        .map(|line| strip_list_marker(line.trim()))
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

fn strip_list_marker(line: &str) -> &str {
    let line = line.trim_start_matches(['-', '*', '•']).trim_start();
    let digits = line.len() - line.trim_start_matches(|c: char| c.is_ascii_digit()).len();
    match line[digits..].strip_prefix(['.', ')']) {
        Some(rest) if digits > 0 => rest.trim(),
        _ => line.trim(),
    }
}

/// Parse the model's JSON answer into a summary
pub fn parse_summary(content: &str) -> Result<VideoSummary, SourceError> {
    let summary: VideoSummary = serde_json::from_str(content.trim())
        .map_err(|e| SourceError::permanent(format!("summary is not valid JSON: {}", e)))?;
    if summary.summary.trim().is_empty() {
        return Err(SourceError::permanent("model returned an empty summary"));
    }
    Ok(summary)
}

#[async_trait]
impl LanguageModel for OpenAiClient {
    async fn summarize(&self, request: SummaryRequest<'_>) -> Result<VideoSummary, SourceError> {
        let body = json!({
            "model": self.chat_model,
            "messages": [
                {"role": "system", "content": request.system_prompt},
                {"role": "user", "content": summary_user_prompt(request.transcript, request.existing_topics)},
            ],
            "response_format": {"type": "json_object"},
            "max_tokens": 1500,
            "temperature": 0.5,
        });

        let response: ChatResponse = self.post_json("/v1/chat/completions", &body).await?;
        let content = response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| SourceError::permanent("chat response has no content"))?;

        debug!(model = %self.chat_model, chars = content.len(), "Summary received");
        parse_summary(&content)
    }

    async fn extract_topics(&self, request: TopicRequest<'_>) -> Result<Vec<String>, SourceError> {
        let body = json!({
            "model": self.chat_model,
            "messages": [
                {"role": "system", "content": TOPIC_SYSTEM_PROMPT},
                {"role": "user", "content": topic_user_prompt(request.transcript, request.existing_topics)},
            ],
            "max_tokens": 100,
            "temperature": 0.3,
        });

        let response: ChatResponse = self.post_json("/v1/chat/completions", &body).await?;
        let content = response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| SourceError::permanent("chat response has no content"))?;

        Ok(parse_topic_lines(&content))
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, SourceError> {
        let request = EmbeddingRequest {
            model: &self.embedding_model,
            input: text,
        };

        let response: EmbeddingResponse = self.post_json("/v1/embeddings", &request).await?;
        let vector = response
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| SourceError::permanent("empty embedding response"))?;

        if vector.is_empty() {
            return Err(SourceError::permanent("embedding has no dimensions"));
        }
        Ok(vector)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_lists_existing_topics() {
        let prompt = summary_user_prompt("text body", &["cooking".into(), "travel".into()]);
        assert!(prompt.contains("cooking\ntravel"));
        assert!(prompt.ends_with("text body"));

        let prompt = summary_user_prompt("text body", &[]);
        assert!(prompt.contains("No existing topics."));
    }

    #[test]
    fn test_parse_topic_lines() {
        let topics = parse_topic_lines("Cooking\n- travel\n\n2. Craft Beer\n  * gear  \n3D printing");
        assert_eq!(topics, vec!["Cooking", "travel", "Craft Beer", "gear", "3D printing"]);
        assert!(parse_topic_lines("  \n").is_empty());

        let prompt = topic_user_prompt("body", &["cooking".into()]);
        assert!(prompt.contains("cooking"));
        assert!(prompt.ends_with("body"));
    }

    #[test]
    fn test_parse_summary() {
        let parsed = parse_summary(
            r#"{"summary": "A video.", "topics": ["Rust", "async"], "quotes": ["hi"]}"#,
        )
        .unwrap();
        assert_eq!(parsed.topics, vec!["Rust", "async"]);

        assert!(matches!(
            parse_summary(r#"{"summary": "  "}"#),
            Err(SourceError::Permanent(_))
        ));
        assert!(parse_summary("plain prose").is_err());
    }
}
