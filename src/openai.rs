use std::time::Duration;

use anyhow::Context as _;
use async_trait::async_trait;

use crate::formats::ContentType;
use crate::synth::{ProseEngine, SectionBrief};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4.1-mini";

pub fn responses_endpoint(base_url: &str) -> String {
    let base_url = base_url.trim_end_matches('/');
    format!("{base_url}/responses")
}

#[derive(Debug, Clone)]
pub struct OpenAiSettings {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub temperature: f32,
    pub timeout: Duration,
}

impl OpenAiSettings {
    /// Reads `OPENAI_API_KEY`, `OPENAI_BASE_URL` and `TEXTBOOKIFY_OPENAI_MODEL`.
    pub fn from_env() -> anyhow::Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY is not set"))?;
        let base_url = std::env::var("OPENAI_BASE_URL")
            .ok()
            .map(|v| v.trim().to_owned())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_owned());
        let model = std::env::var("TEXTBOOKIFY_OPENAI_MODEL")
            .ok()
            .map(|v| v.trim().to_owned())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_MODEL.to_owned());
        Ok(Self {
            base_url,
            api_key,
            model,
            temperature: 0.4,
            timeout: Duration::from_secs(120),
        })
    }
}

/// Prose engine backed by the OpenAI Responses API.
#[derive(Debug, Clone)]
pub struct OpenAiEngine {
    client: reqwest::Client,
    endpoint: String,
    settings: OpenAiSettings,
}

impl OpenAiEngine {
    pub fn new(settings: OpenAiSettings) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(settings.timeout)
            .build()
            .context("build http client")?;
        Ok(Self {
            client,
            endpoint: responses_endpoint(&settings.base_url),
            settings,
        })
    }

    async fn complete(&self, instructions: &str, input: &str) -> anyhow::Result<String> {
        responses_text(
            &self.client,
            &self.endpoint,
            &self.settings.api_key,
            &self.settings.model,
            instructions,
            input,
            self.settings.temperature,
        )
        .await
    }
}

#[async_trait]
impl ProseEngine for OpenAiEngine {
    fn name(&self) -> &str {
        "openai"
    }

    async fn compose(&self, brief: &SectionBrief) -> anyhow::Result<String> {
        tracing::debug!(unit = %brief.address, attempt = brief.attempt, model = %self.settings.model, "compose section");
        let instructions = section_instructions(brief);
        let input = section_input(brief);
        self.complete(&instructions, &input)
            .await
            .with_context(|| format!("compose {}", brief.address))
    }

    async fn compose_supplement(
        &self,
        brief: &SectionBrief,
        kind: ContentType,
    ) -> anyhow::Result<String> {
        let instructions = format!(
            "{}\nWrite a single {} block for the section below. \
             Plain text only, no headings, at most 120 words.",
            section_instructions(brief),
            kind.as_str()
        );
        self.complete(&instructions, &section_input(brief))
            .await
            .with_context(|| format!("compose {} for {}", kind.as_str(), brief.address))
    }
}

fn section_instructions(brief: &SectionBrief) -> String {
    let mut out = format!(
        "You write one section of a textbook for a {} audience, {}.\n\
         Style: {}. Depth: {}.\n\
         Length: between {} and {} words.\n\
         Output plain prose paragraphs separated by blank lines. Do not repeat the section title.",
        brief.audience.label(),
        brief.audience.register(),
        brief.style.as_str(),
        brief.depth.as_str(),
        brief.word_band.min,
        brief.word_band.max,
    );
    if !brief.excluded.is_empty() {
        out.push_str(&format!(
            "\nNever mention these topics or words: {}.",
            brief.excluded.join(", ")
        ));
    }
    if let Some(extra) = &brief.instructions {
        out.push_str(&format!("\nAdditional instructions: {extra}"));
    }
    out
}

fn section_input(brief: &SectionBrief) -> String {
    let mut out = format!(
        "Textbook topic: {}\nChapter: {}\nSection: {} ({})\nSection role: {}\n",
        brief.topic,
        brief.chapter_title,
        brief.address,
        brief.section_title,
        brief.content_type.as_str(),
    );
    if !brief.snippets.is_empty() {
        out.push_str("\nReference material:\n");
        for snippet in &brief.snippets {
            out.push_str(&format!("- [{}] {}\n", snippet.source_name, snippet.excerpt));
        }
    }
    if brief.attempt > 1 {
        out.push_str(&format!(
            "\nThis is attempt {}; the previous draft was rejected. Stay within the length limits.\n",
            brief.attempt
        ));
    }
    out
}

pub async fn responses_text(
    client: &reqwest::Client,
    endpoint: &str,
    api_key: &str,
    model: &str,
    instructions: &str,
    input: &str,
    temperature: f32,
) -> anyhow::Result<String> {
    let mut body = serde_json::json!({
        "model": model,
        "instructions": instructions,
        "input": input,
        "text": { "format": { "type": "text" } },
        "store": false,
    });

    // GPT-5 models reject sampling params like `temperature`.
    if !model.starts_with("gpt-5")
        && let Some(obj) = body.as_object_mut()
    {
        obj.insert("temperature".to_owned(), serde_json::json!(temperature));
    }

    let response = client
        .post(endpoint)
        .bearer_auth(api_key)
        .json(&body)
        .send()
        .await
        .with_context(|| format!("POST {endpoint}"))?;

    let status = response.status();
    let raw = response.text().await.context("read OpenAI response body")?;
    if !status.is_success() {
        let message = parse_error_message(&raw).unwrap_or_else(|| raw.clone());
        anyhow::bail!("OpenAI API error ({status}): {message}");
    }

    let value: serde_json::Value = serde_json::from_str(&raw).context("parse OpenAI response")?;
    extract_output_text(&value).context("extract output text")
}

fn parse_error_message(raw_json: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(raw_json).ok()?;
    let message = value.get("error")?.get("message")?.as_str()?.to_owned();
    Some(message)
}

fn extract_output_text(value: &serde_json::Value) -> anyhow::Result<String> {
    let output = value
        .get("output")
        .and_then(|v| v.as_array())
        .ok_or_else(|| anyhow::anyhow!("missing `output` array in response"))?;

    let text: String = output
        .iter()
        .filter(|item| item.get("type").and_then(|v| v.as_str()) == Some("message"))
        .filter_map(|item| item.get("content").and_then(|v| v.as_array()))
        .flatten()
        .filter(|part| part.get("type").and_then(|v| v.as_str()) == Some("output_text"))
        .filter_map(|part| part.get("text").and_then(|v| v.as_str()))
        .collect();

    if text.trim().is_empty() {
        anyhow::bail!("OpenAI output text is empty");
    }
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_trims_trailing_slash() {
        assert_eq!(
            responses_endpoint("http://127.0.0.1:9/v1/"),
            "http://127.0.0.1:9/v1/responses"
        );
    }

    #[test]
    fn extracts_message_text_only() {
        let value = serde_json::json!({
            "output": [
                { "type": "reasoning", "content": [] },
                { "type": "message", "content": [
                    { "type": "output_text", "text": "Hello " },
                    { "type": "refusal", "text": "no" },
                    { "type": "output_text", "text": "world" }
                ]}
            ]
        });
        assert_eq!(extract_output_text(&value).unwrap(), "Hello world");
        assert!(extract_output_text(&serde_json::json!({ "output": [] })).is_err());
    }

    #[test]
    fn parses_error_message() {
        assert_eq!(
            parse_error_message(r#"{"error":{"message":"bad key"}}"#).as_deref(),
            Some("bad key")
        );
        assert_eq!(parse_error_message("not json"), None);
    }
}
