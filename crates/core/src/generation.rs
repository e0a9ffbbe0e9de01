use crate::error::GenerationError;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

pub const CONTEXT_PLACEHOLDER: &str = "{context}";

/// The assistant answers in French, the language of the student body.
pub const DEFAULT_SYSTEM_TEMPLATE: &str = "Vous êtes un assistant amical pour les étudiants de l'ENSA Marrakech. \
Répondez aux questions sur l'école, les filières, les emplois du temps, \
les examens, la vie sur le campus et aux questions fréquentes des étudiants. \
Utilisez le contexte récupéré pour fournir des réponses précises. \
Si vous ne connaissez pas la réponse, dites que vous ne savez pas. \
Répondez de manière concise et claire, en maximum trois phrases.\
\n\n\
{context}";

pub const EMPTY_ANSWER_FALLBACK: &str = "No answer could be generated.";

pub const MAX_ANSWER_SENTENCES: usize = 3;

/// A generative model taking a system block and a user turn.
#[async_trait]
pub trait ChatModel: Send + Sync {
    fn name(&self) -> &str;

    async fn complete(&self, system: &str, user: &str) -> Result<String, GenerationError>;
}

/// Fills the system template with retrieved context and asks the model.
pub struct AnswerGenerator {
    model: Arc<dyn ChatModel>,
    template: String,
}

impl AnswerGenerator {
    pub fn new(model: Arc<dyn ChatModel>) -> Self {
        Self::with_template(model, DEFAULT_SYSTEM_TEMPLATE)
    }

    pub fn with_template(model: Arc<dyn ChatModel>, template: impl Into<String>) -> Self {
        Self {
            model,
            template: template.into(),
        }
    }

    pub fn model_name(&self) -> &str {
        self.model.name()
    }

    pub fn system_block(&self, context_chunks: &[String]) -> String {
        let context = context_chunks.join("\n\n");
        if self.template.contains(CONTEXT_PLACEHOLDER) {
            self.template.replace(CONTEXT_PLACEHOLDER, &context)
        } else {
            format!("{}\n\n{context}", self.template)
        }
    }

    pub async fn generate(
        &self,
        question: &str,
        context_chunks: &[String],
    ) -> Result<String, GenerationError> {
        let system = self.system_block(context_chunks);
        let raw = self.model.complete(&system, question).await?;
        let answer = limit_sentences(raw.trim(), MAX_ANSWER_SENTENCES);

        if answer.is_empty() {
            Ok(EMPTY_ANSWER_FALLBACK.to_string())
        } else {
            Ok(answer)
        }
    }
}

/// Keeps the first `max` sentences of `text`.
///
/// A sentence ends at `.`, `!` or `?` followed by whitespace or the end of
/// the text, so decimals such as `3.5` are not treated as boundaries.
pub fn limit_sentences(text: &str, max: usize) -> String {
    let mut seen = 0;
    let mut chars = text.char_indices().peekable();

    while let Some((position, current)) = chars.next() {
        if !matches!(current, '.' | '!' | '?') {
            continue;
        }
        let at_boundary = chars.peek().map_or(true, |(_, next)| next.is_whitespace());
        if at_boundary {
            seen += 1;
            if seen == max {
                return text[..position + current.len_utf8()].to_string();
            }
        }
    }

    text.to_string()
}

#[derive(Debug, Serialize)]
struct OllamaChatRequest<'a> {
    model: &'a str,
    messages: [OllamaMessage<'a>; 2],
    stream: bool,
}

#[derive(Debug, Serialize)]
struct OllamaMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    message: Option<OllamaReply>,
}

#[derive(Debug, Deserialize)]
struct OllamaReply {
    #[serde(default)]
    content: String,
}

/// Chat completions from a local Ollama model (`gemma:2b` by default).
pub struct OllamaChatModel {
    client: Client,
    endpoint: Url,
    model: String,
}

impl OllamaChatModel {
    pub fn new(
        base_url: &Url,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, GenerationError> {
        let endpoint = base_url.join("api/chat").map_err(|error| GenerationError::Request {
            provider: "ollama".to_string(),
            details: error.to_string(),
        })?;

        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
            endpoint,
            model: model.into(),
        })
    }
}

#[async_trait]
impl ChatModel for OllamaChatModel {
    fn name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, system: &str, user: &str) -> Result<String, GenerationError> {
        let request = OllamaChatRequest {
            model: &self.model,
            messages: [
                OllamaMessage {
                    role: "system",
                    content: system,
                },
                OllamaMessage {
                    role: "user",
                    content: user,
                },
            ],
            stream: false,
        };

        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(GenerationError::Request {
                provider: "ollama".to_string(),
                details: format!("{} returned {}", self.endpoint, response.status()),
            });
        }

        let parsed: OllamaChatResponse = response.json().await?;
        Ok(parsed.message.map(|reply| reply.content).unwrap_or_default())
    }
}
