//! [`Enricher`] over an OpenAI-compatible chat-completions endpoint.

use crate::config::EnrichmentConfig;
use crate::error::{CloudError, CloudResult};
use async_trait::async_trait;
use journal_vault::{Cleaned, EnrichError, Enricher};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Tags the model may assign.
pub const TAG_VOCABULARY: [&str; 12] = [
    "Reflection",
    "Gratitude",
    "Goals",
    "Mood",
    "Ideas",
    "Relationships",
    "Work",
    "Health",
    "Personal Growth",
    "Challenges",
    "Accomplishments",
    "Lessons Learned",
];

const CLEANUP_SYSTEM_PROMPT: &str = "You are an expert editor and writing assistant. \
Thoroughly rewrite the provided text to correct all grammar, spelling, and punctuation errors, \
improve clarity, conciseness, and logical flow, and rephrase awkward sentences to sound natural, \
professional, and easy to read. Ensure the meaning and tone are preserved but do not hesitate to \
reword or restructure sentences as needed to achieve clean, polished writing. Return ONLY the \
fully cleaned and improved text. DO NOT include explanations, comments, or any other output, \
only the text.";

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

impl ChatMessage {
    fn new(role: &str, content: String) -> Self {
        Self {
            role: role.to_string(),
            content,
        }
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct TaggedSection {
    #[serde(default)]
    tags: Vec<String>,
}

/// Chat-completions client used for cleanup and tagging.
pub struct ChatEnricher {
    client: Client,
    config: EnrichmentConfig,
}

impl ChatEnricher {
    pub fn new(config: EnrichmentConfig) -> CloudResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self { client, config })
    }

    async fn complete(
        &self,
        system: String,
        user: String,
        temperature: f32,
    ) -> CloudResult<String> {
        let url = format!(
            "{}/v1/chat/completions",
            self.config.base_url.trim_end_matches('/')
        );
        let body = ChatRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage::new("system", system),
                ChatMessage::new("user", user),
            ],
            temperature,
            max_tokens: self.config.max_tokens,
        };

        let mut request = self.client.post(&url).json(&body);
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }
        let resp: ChatResponse = request
            .send()
            .await?
            .error_for_status()
            .map_err(|e| CloudError::Api(e.to_string()))?
            .json()
            .await?;

        let content = resp
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content.trim().to_string())
            .unwrap_or_default();
        if content.is_empty() {
            return Err(CloudError::Api("model returned no content".into()));
        }
        Ok(content)
    }
}

fn cleanup_system_prompt(instruction: &str) -> String {
    let instruction = instruction.trim();
    if instruction.is_empty() {
        CLEANUP_SYSTEM_PROMPT.to_string()
    } else {
        format!("{CLEANUP_SYSTEM_PROMPT}\n\nAdditional instruction from the writer: {instruction}")
    }
}

fn tag_system_prompt() -> String {
    let tags = TAG_VOCABULARY
        .iter()
        .map(|t| format!("\"{t}\""))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "You are a helpful assistant that analyzes and categorizes journal text. \
Split the provided text into sections, without changing the content of the sections. \
For each section, suggest one or more relevant tags from the following list: {tags}. \
Return your response as structured JSON in the exact following format:\n\
[\n  {{\n    \"section\": \"<section text>\",\n    \"tags\": [\"Tag1\", \"Tag2\", ...]\n  }},\n  ...\n]\n\n\
Do not explain your choices or add any commentary. Only return the JSON array as specified above."
    )
}

/// Splits a leading `# Title` line off the model output.
pub fn split_title(text: &str) -> Cleaned {
    let text = text.trim();
    if let Some(rest) = text.strip_prefix("# ") {
        let (title, body) = rest.split_once('\n').unwrap_or((rest, ""));
        let body = body.trim();
        if !body.is_empty() {
            return Cleaned {
                title: Some(title.trim().to_string()),
                body: body.to_string(),
            };
        }
    }
    Cleaned {
        title: None,
        body: text.to_string(),
    }
}

/// Reads the tagged-sections JSON, tolerating a Markdown code fence, and
/// returns the distinct known tags in vocabulary order.
pub fn parse_tags(output: &str) -> Result<Vec<String>, serde_json::Error> {
    let trimmed = output.trim();
    let json = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|s| s.strip_suffix("```"))
        .unwrap_or(trimmed)
        .trim();

    let sections: Vec<TaggedSection> = serde_json::from_str(json)?;
    let found: Vec<&str> = sections
        .iter()
        .flat_map(|s| s.tags.iter())
        .map(|t| t.trim())
        .collect();
    Ok(TAG_VOCABULARY
        .iter()
        .filter(|known| found.iter().any(|t| t.eq_ignore_ascii_case(known)))
        .map(|t| t.to_string())
        .collect())
}

#[async_trait]
impl Enricher for ChatEnricher {
    async fn clean_up(&self, text: &str, prompt: &str) -> Result<Cleaned, EnrichError> {
        let output = self
            .complete(
                cleanup_system_prompt(prompt),
                format!("Please clean up and improve the following text:\n\n{text}"),
                self.config.cleanup_temperature,
            )
            .await
            .map_err(|e| EnrichError(e.to_string()))?;
        Ok(split_title(&output))
    }

    async fn tag(&self, text: &str) -> Result<Vec<String>, EnrichError> {
        let output = self
            .complete(
                tag_system_prompt(),
                format!("Analyze this text and suggest relevant tags:\n\n{text}"),
                self.config.tag_temperature,
            )
            .await
            .map_err(|e| EnrichError(e.to_string()))?;
        debug!("tagging response: {} bytes", output.len());
        parse_tags(&output).map_err(|e| EnrichError(format!("unreadable tag output: {e}")))
    }
}
