use anyhow::{Context, Result, anyhow};
use clap::ValueEnum;
use reqwest::blocking::Client;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};

use crate::http;

pub const CATEGORIES: &[&str] = &[
    "Meeting Notes",
    "Project Documentation",
    "Operational Event",
    "Technical Documentation",
    "User Documentation",
    "Policy Documentation",
    "Other",
];

pub const CLASSIFY_PROMPT: &str = "\
<instructions>
Analyze this text and classify it as one of the following categories:

    - Meeting Notes
    - Project Documentation
    - Operational Event
    - Technical Documentation
    - User Documentation
    - Policy Documentation
    - Other

Do not return anything other than the category.
</instructions>
<content>
{content}
</content>
";

pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o";
pub const DEFAULT_ANTHROPIC_MODEL: &str = "claude-3-5-sonnet-latest";
pub const DEFAULT_ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com/v1";

const ANTHROPIC_VERSION: &str = "2023-06-01";
const ANTHROPIC_MAX_TOKENS: u32 = 64;

/// Single-turn topic classification of a document body.
///
/// The returned label is the model's raw text; callers compare it literally.
pub trait Classifier {
    fn classify(&self, content: &str) -> Result<String>;
}

impl<T: Classifier + ?Sized> Classifier for Box<T> {
    fn classify(&self, content: &str) -> Result<String> {
        (**self).classify(content)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClassifierProvider {
    #[default]
    Openai,
    Anthropic,
}

impl ClassifierProvider {
    pub fn default_model(self) -> &'static str {
        match self {
            ClassifierProvider::Openai => DEFAULT_OPENAI_MODEL,
            ClassifierProvider::Anthropic => DEFAULT_ANTHROPIC_MODEL,
        }
    }
}

pub fn build_prompt(content: &str) -> String {
    CLASSIFY_PROMPT.replace("{content}", content)
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

pub struct OpenAiClassifier {
    client: Client,
    endpoint: String,
    api_key: String,
    model: String,
}

impl OpenAiClassifier {
    pub fn new(base_url: &str, api_key: &str, model: &str) -> Result<Self> {
        Ok(Self {
            client: http::build_client()?,
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            api_key: api_key.to_string(),
            model: model.to_string(),
        })
    }
}

impl Classifier for OpenAiClassifier {
    fn classify(&self, content: &str) -> Result<String> {
        let prompt = build_prompt(content);
        let body = ChatCompletionRequest {
            model: &self.model,
            messages: [ChatMessage {
                role: "user",
                content: &prompt,
            }],
        };

        let request = self
            .client
            .post(&self.endpoint)
            .header(CONTENT_TYPE, "application/json")
            .header(AUTHORIZATION, format!("Bearer {}", self.api_key))
            .json(&body);

        let response: ChatCompletionResponse = http::send_json(request, &self.endpoint)
            .context("classification request failed")?;
        chat_completion_label(response)
    }
}

fn chat_completion_label(response: ChatCompletionResponse) -> Result<String> {
    response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("classification response contained no choices"))?
        .message
        .content
        .ok_or_else(|| anyhow!("classification response contained no content"))
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: [ChatMessage<'a>; 1],
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    text: Option<String>,
}

pub struct AnthropicClassifier {
    client: Client,
    endpoint: String,
    api_key: String,
    model: String,
}

impl AnthropicClassifier {
    pub fn new(base_url: &str, api_key: &str, model: &str) -> Result<Self> {
        Ok(Self {
            client: http::build_client()?,
            endpoint: format!("{}/messages", base_url.trim_end_matches('/')),
            api_key: api_key.to_string(),
            model: model.to_string(),
        })
    }
}

impl Classifier for AnthropicClassifier {
    fn classify(&self, content: &str) -> Result<String> {
        let prompt = build_prompt(content);
        let body = MessagesRequest {
            model: &self.model,
            max_tokens: ANTHROPIC_MAX_TOKENS,
            messages: [ChatMessage {
                role: "user",
                content: &prompt,
            }],
        };

        let request = self
            .client
            .post(&self.endpoint)
            .header(CONTENT_TYPE, "application/json")
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body);

        let response: MessagesResponse = http::send_json(request, &self.endpoint)
            .context("classification request failed")?;
        messages_label(response)
    }
}

fn messages_label(response: MessagesResponse) -> Result<String> {
    let texts: Vec<String> = response
        .content
        .into_iter()
        .filter(|block| block.kind == "text")
        .filter_map(|block| block.text)
        .collect();

    if texts.is_empty() {
        return Err(anyhow!("classification response contained no text"));
    }
    Ok(texts.concat())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn prompt_embeds_content() {
        let prompt = build_prompt("Routes and rate limits");
        assert!(prompt.starts_with("<instructions>\nAnalyze this text"));
        assert!(prompt.ends_with("<content>\nRoutes and rate limits\n</content>\n"));
        for category in CATEGORIES {
            assert!(prompt.contains(&format!("    - {category}\n")));
        }
    }

    #[test]
    fn prompt_leaves_braces_in_content_alone() {
        let prompt = build_prompt("fn main() { println!(\"{content}\"); }");
        assert!(prompt.contains("fn main() { println!(\"{content}\"); }"));
    }

    #[test]
    fn reads_first_chat_choice_verbatim() {
        let response: ChatCompletionResponse = serde_json::from_str(
            r#"{"id":"x","choices":[{"index":0,"message":{"role":"assistant","content":"Technical Documentation\n"}}]}"#,
        )
        .expect("parse");
        assert_eq!(
            chat_completion_label(response).expect("label"),
            "Technical Documentation\n"
        );
    }

    #[test]
    fn rejects_empty_chat_response() {
        let response: ChatCompletionResponse =
            serde_json::from_str(r#"{"choices":[]}"#).expect("parse");
        assert!(chat_completion_label(response).is_err());

        let response: ChatCompletionResponse =
            serde_json::from_str(r#"{"choices":[{"message":{"content":null}}]}"#).expect("parse");
        assert!(chat_completion_label(response).is_err());
    }

    #[test]
    fn joins_anthropic_text_blocks() {
        let response: MessagesResponse = serde_json::from_str(
            r#"{"id":"msg","type":"message","content":[{"type":"text","text":"Meeting"},{"type":"text","text":" Notes"}]}"#,
        )
        .expect("parse");
        assert_eq!(messages_label(response).expect("label"), "Meeting Notes");
    }

    #[test]
    fn rejects_anthropic_response_without_text() {
        let response: MessagesResponse =
            serde_json::from_str(r#"{"content":[{"type":"tool_use","id":"t"}]}"#).expect("parse");
        assert!(messages_label(response).is_err());
    }

    #[test]
    fn provider_default_models() {
        assert_eq!(ClassifierProvider::default(), ClassifierProvider::Openai);
        assert_eq!(ClassifierProvider::Openai.default_model(), "gpt-4o");
        assert_eq!(
            ClassifierProvider::Anthropic.default_model(),
            "claude-3-5-sonnet-latest"
        );
    }
}
