use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use schemars::{schema_for, JsonSchema};
use serde::{Deserialize, Serialize};
use tracing::debug;

use digestline_common::GeneratedArticle;

use crate::traits::{ContentWriter, WriterInput};

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const TOOL_NAME: &str = "write_article";
const MAX_TOKENS: u32 = 4096;
/// Per-member text is cut to this many chars before prompting.
const MAX_MEMBER_CHARS: usize = 6_000;

const SYSTEM_PROMPT: &str = "You are an automotive news editor. You receive several \
source reports that cover the same story in one brand category. Write one original \
article that synthesizes them. Do not copy sentences verbatim. Keep facts that at least \
one source states; never invent prices, dates or specifications. The title must be \
specific and under 100 characters. Rate your confidence (0.0 to 1.0) that the sources \
describe one coherent, newsworthy story.";

/// Shape the model must return through the forced tool call.
#[derive(Debug, Deserialize, JsonSchema)]
struct ArticleDraft {
    /// Headline, under 100 characters.
    title: String,
    /// Article body in Markdown.
    body: String,
    /// 0.0 to 1.0.
    confidence: f64,
    /// Up to five short lowercase tags.
    tags: Vec<String>,
}

#[derive(Serialize)]
struct ToolDefinition {
    name: &'static str,
    description: &'static str,
    input_schema: serde_json::Value,
}

#[derive(Serialize)]
struct Message {
    role: &'static str,
    content: String,
}

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'static str,
    messages: Vec<Message>,
    tools: Vec<ToolDefinition>,
    tool_choice: serde_json::Value,
}

#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    ToolUse {
        input: serde_json::Value,
    },
    #[serde(other)]
    Other,
}

fn article_schema() -> serde_json::Value {
    let mut value = serde_json::to_value(schema_for!(ArticleDraft)).unwrap_or_default();
    if let serde_json::Value::Object(map) = &mut value {
        map.remove("$schema");
        map.remove("title");
    }
    value
}

fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

fn user_prompt(input: &WriterInput) -> String {
    let mut prompt = format!("Category: {}\n\n", input.category);
    for (i, text) in input.texts.iter().enumerate() {
        prompt.push_str(&format!(
            "--- Source {} ---\n{}\n\n",
            i + 1,
            truncate_chars(text, MAX_MEMBER_CHARS)
        ));
    }
    if !input.source_urls.is_empty() {
        prompt.push_str("Source URLs:\n");
        for url in &input.source_urls {
            prompt.push_str(&format!("- {url}\n"));
        }
    }
    prompt
}

fn into_article(draft: ArticleDraft) -> Result<GeneratedArticle> {
    let title = draft.title.trim().to_string();
    if title.is_empty() {
        bail!("Writer returned an empty title");
    }
    if draft.body.trim().is_empty() {
        bail!("Writer returned an empty body");
    }
    Ok(GeneratedArticle {
        title,
        body: draft.body,
        confidence: draft.confidence.clamp(0.0, 1.0),
        tags: draft
            .tags
            .into_iter()
            .map(|t| t.trim().to_lowercase())
            .filter(|t| !t.is_empty())
            .take(5)
            .collect(),
    })
}

/// Article writer on the Anthropic messages API. Structured output comes
/// back through a single forced tool call.
pub struct ClaudeWriter {
    api_key: String,
    model: String,
    http: reqwest::Client,
    base_url: String,
}

impl ClaudeWriter {
    pub fn new(api_key: &str, model: &str) -> Self {
        Self {
            api_key: api_key.to_string(),
            model: model.to_string(),
            http: reqwest::Client::new(),
            base_url: ANTHROPIC_API_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, url: &str) -> Self {
        self.base_url = url.to_string();
        self
    }

    fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", HeaderValue::from_str(&self.api_key)?);
        headers.insert(
            "anthropic-version",
            HeaderValue::from_static(ANTHROPIC_VERSION),
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(headers)
    }

    fn request<'a>(&'a self, input: &WriterInput) -> MessagesRequest<'a> {
        MessagesRequest {
            model: &self.model,
            max_tokens: MAX_TOKENS,
            system: SYSTEM_PROMPT,
            messages: vec![Message {
                role: "user",
                content: user_prompt(input),
            }],
            tools: vec![ToolDefinition {
                name: TOOL_NAME,
                description: "Return the finished article.",
                input_schema: article_schema(),
            }],
            tool_choice: serde_json::json!({ "type": "tool", "name": TOOL_NAME }),
        }
    }
}

#[async_trait]
impl ContentWriter for ClaudeWriter {
    async fn write(&self, input: &WriterInput) -> Result<GeneratedArticle> {
        let url = format!("{}/messages", self.base_url);

        debug!(model = %self.model, category = %input.category, sources = input.texts.len(), "Writer request");

        let response = self
            .http
            .post(&url)
            .headers(self.headers()?)
            .json(&self.request(input))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await?;
            return Err(anyhow!("Claude API error ({}): {}", status, error_text));
        }

        let body: MessagesResponse = response.json().await?;
        for block in body.content {
            if let ContentBlock::ToolUse { input } = block {
                let draft: ArticleDraft = serde_json::from_value(input)
                    .map_err(|e| anyhow!("Failed to deserialize article: {}", e))?;
                return into_article(draft);
            }
        }

        Err(anyhow!("No structured output in Claude response"))
    }
}

/// Offline writer for dry runs: stitches member texts into an article.
pub struct EchoWriter;

#[async_trait]
impl ContentWriter for EchoWriter {
    async fn write(&self, input: &WriterInput) -> Result<GeneratedArticle> {
        let title = input
            .texts
            .first()
            .and_then(|t| t.lines().map(str::trim).find(|l| !l.is_empty()))
            .ok_or_else(|| anyhow!("No member text for {}", input.category))?;
        Ok(GeneratedArticle {
            title: format!("[{}] {}", input.category, title),
            body: input.texts.join("\n\n---\n\n"),
            confidence: 1.0,
            tags: vec![input.category.to_lowercase()],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input() -> WriterInput {
        WriterInput {
            category: "BYD".to_string(),
            texts: vec!["Seal price cut\n\nBYD cut prices.".to_string(), "Second report".to_string()],
            source_urls: vec!["https://a.example/1".to_string()],
        }
    }

    #[test]
    fn schema_lists_article_fields() {
        let schema = article_schema();
        let props = schema["properties"].as_object().unwrap();
        for key in ["title", "body", "confidence", "tags"] {
            assert!(props.contains_key(key), "missing {key}");
        }
        assert!(schema.get("$schema").is_none());
    }

    #[test]
    fn request_forces_the_tool() {
        let writer = ClaudeWriter::new("key", "claude-haiku-4-5-20251001");
        let json = serde_json::to_value(writer.request(&input())).unwrap();
        assert_eq!(json["tool_choice"]["name"], TOOL_NAME);
        assert_eq!(json["tools"][0]["name"], TOOL_NAME);
        let prompt = json["messages"][0]["content"].as_str().unwrap();
        assert!(prompt.contains("--- Source 2 ---"));
        assert!(prompt.contains("https://a.example/1"));
    }

    #[test]
    fn tool_use_block_is_found_among_text() {
        let raw = r#"{"content":[
            {"type":"text","text":"thinking"},
            {"type":"tool_use","id":"t1","name":"write_article","input":{"title":" Seal cut ","body":"b","confidence":1.4,"tags":["EV","",""]}}
        ]}"#;
        let body: MessagesResponse = serde_json::from_str(raw).unwrap();
        let draft = body
            .content
            .into_iter()
            .find_map(|b| match b {
                ContentBlock::ToolUse { input } => Some(input),
                ContentBlock::Other => None,
            })
            .unwrap();
        let article = into_article(serde_json::from_value(draft).unwrap()).unwrap();
        assert_eq!(article.title, "Seal cut");
        assert_eq!(article.confidence, 1.0);
        assert_eq!(article.tags, vec!["ev"]);
    }

    #[test]
    fn empty_title_is_rejected() {
        let draft = ArticleDraft {
            title: "  ".to_string(),
            body: "b".to_string(),
            confidence: 0.5,
            tags: Vec::new(),
        };
        assert!(into_article(draft).is_err());
    }

    #[test]
    fn long_member_text_is_truncated_on_char_boundary() {
        let text = "比".repeat(MAX_MEMBER_CHARS + 10);
        assert_eq!(truncate_chars(&text, MAX_MEMBER_CHARS).chars().count(), MAX_MEMBER_CHARS);
    }

    #[tokio::test]
    async fn echo_writer_titles_from_first_line() {
        let article = EchoWriter.write(&input()).await.unwrap();
        assert_eq!(article.title, "[BYD] Seal price cut");
        assert!(article.body.contains("Second report"));
    }
}
