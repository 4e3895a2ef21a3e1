use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{GenerationError, PromptContext, ReplyGenerator};

pub const DEFAULT_PROMPT_TEMPLATE: &str = "你是一个友善的B站UP主，请对以下评论做出自然、友好的回复。回复要简洁明了，控制在100字以内。\n\n评论内容：{comment}\n\n请直接给出回复内容，不要包含其他解释。";

#[derive(Debug, Clone)]
pub struct ChatConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub prompt_template: String,
    pub timeout: Duration,
}

/// Reply generator backed by an OpenAI-compatible `/chat/completions` API.
#[derive(Debug, Clone)]
pub struct ChatCompletionGenerator {
    http: Client,
    config: ChatConfig,
}

impl ChatCompletionGenerator {
    pub fn new(http: Client, config: ChatConfig) -> Self {
        Self { http, config }
    }

    /// Fills `{comment}`, `{author}` and `{title}` in one pass; substituted
    /// text is never scanned again.
    pub fn render_prompt(&self, context: &PromptContext) -> String {
        let template = self.config.prompt_template.as_str();
        let mut out = String::with_capacity(template.len() + context.comment.len());
        let mut rest = template;
        while let Some(start) = rest.find('{') {
            out.push_str(&rest[..start]);
            let tail = &rest[start..];
            let filled = [
                ("{comment}", context.comment.as_str()),
                ("{author}", context.author.as_str()),
                ("{title}", context.video_title.as_str()),
            ]
            .into_iter()
            .find(|(placeholder, _)| tail.starts_with(*placeholder));
            match filled {
                Some((placeholder, value)) => {
                    out.push_str(value);
                    rest = &tail[placeholder.len()..];
                }
                None => {
                    out.push('{');
                    rest = &tail[1..];
                }
            }
        }
        out.push_str(rest);
        out
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        )
    }
}

#[async_trait]
impl ReplyGenerator for ChatCompletionGenerator {
    async fn generate(&self, context: &PromptContext) -> Result<String, GenerationError> {
        let prompt = self.render_prompt(context);
        let request = ChatRequest {
            model: &self.config.model,
            messages: vec![ChatMessage {
                role: "user",
                content: &prompt,
            }],
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
        };
        let response = self
            .http
            .post(self.endpoint())
            .bearer_auth(&self.config.api_key)
            .timeout(self.config.timeout)
            .json(&request)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), "completion request failed");
            return Err(GenerationError::Status {
                status: status.as_u16(),
                body,
            });
        }
        let body = response.text().await?;
        let parsed: ChatResponse = serde_json::from_str(&body)
            .map_err(|err| GenerationError::InvalidResponse(err.to_string()))?;
        let reply = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .unwrap_or_default();
        if reply.is_empty() {
            return Err(GenerationError::Empty);
        }
        debug!(chars = reply.chars().count(), "reply generated");
        Ok(reply)
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}
