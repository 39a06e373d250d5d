use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::config::{ClassifierSettings, ProviderConfig};
use crate::error::AppError;
use crate::models::batch::{Batch, Conflict};
use crate::models::entry::Entry;

pub const MIN_TARGET_GROUPS: usize = 3;
pub const MAX_TARGET_GROUPS: usize = 8;
const MAX_ATTEMPTS: usize = 2;
const MAX_ERROR_BODY_CHARS: usize = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Bulk,
    Recovery,
    Conflict,
}

impl std::fmt::Display for RequestKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bulk => write!(f, "bulk"),
            Self::Recovery => write!(f, "recovery"),
            Self::Conflict => write!(f, "conflict"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifierRequest {
    pub kind: RequestKind,
    pub system_prompt: String,
    pub user_prompt: String,
}

/// The external content classifier. Returns the raw reply text; callers
/// decide whether it is usable.
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, request: &ClassifierRequest) -> Result<String, AppError>;
}

// ---------------------------------------------------------------------------
// Prompts
// ---------------------------------------------------------------------------

const RESPONSE_SCHEMA: &str = "[\n  {\"folderName\": \"Images\", \"items\": [{\"name\": \"photo.jpg\"}, {\"name\": \"Screenshots\"}]},\n  {\"folderName\": \"Documents\", \"items\": [{\"name\": \"report.pdf\"}]}\n]";

fn describe_entry(entry: &Entry) -> serde_json::Value {
    let mut value = json!({
        "name": entry.name,
        "type": entry.kind.to_string(),
        "size": entry.size_bucket.label(),
        "age": entry.age_bucket.label(),
    });
    if !entry.extension.is_empty() {
        value["ext"] = json!(entry.extension);
    }
    if let Some(ctx) = &entry.folder {
        value["contains"] = json!({
            "files": ctx.file_count,
            "folders": ctx.folder_count,
            "empty": ctx.is_empty,
            "sample": ctx.sample_contents.iter().map(|s| s.name.as_str()).collect::<Vec<_>>(),
        });
    }
    value
}

fn describe_entries(entries: &[Entry]) -> Result<String, AppError> {
    let payload: Vec<serde_json::Value> = entries.iter().map(describe_entry).collect();
    Ok(serde_json::to_string_pretty(&payload)?)
}

pub fn build_bulk_request(batch: &Batch) -> Result<ClassifierRequest, AppError> {
    let system_prompt = format!(
        "You organize the top-level contents of a single directory into folders.\n\
Rules:\n\
1. Create between {MIN_TARGET_GROUPS} and {MAX_TARGET_GROUPS} folders with short, human-readable names.\n\
2. Every item listed must appear in exactly one folder. Subfolders are items too and must be placed.\n\
3. Names under \"sample\" describe what a subfolder contains. They are context only; never list them as items.\n\
4. Use the item names exactly as given. Do not invent, rename or merge items.\n\
5. Prefer the existing folder names when they fit.\n\
Return ONLY a JSON array with this schema:\n{RESPONSE_SCHEMA}"
    );

    let mut user_prompt = format!(
        "Batch {} contains {} items:\n{}",
        batch.index + 1,
        batch.len(),
        describe_entries(&batch.entries)?
    );
    if !batch.existing_groups.is_empty() {
        user_prompt.push_str(&format!(
            "\n\nExisting folders (reuse these before creating new ones): {}",
            batch.existing_groups.join(", ")
        ));
    }

    Ok(ClassifierRequest {
        kind: RequestKind::Bulk,
        system_prompt,
        user_prompt,
    })
}

pub fn build_recovery_request(
    entries: &[Entry],
    existing_groups: &[String],
) -> Result<ClassifierRequest, AppError> {
    let system_prompt = format!(
        "A previous pass organized most of a directory but missed some items.\n\
Rules:\n\
1. Place every listed item into exactly one folder.\n\
2. Use one of the existing folders whenever it is a reasonable fit.\n\
3. Create a new folder only if no existing folder fits.\n\
4. Use the item names exactly as given.\n\
Return ONLY a JSON array with this schema:\n{RESPONSE_SCHEMA}"
    );
    let existing = if existing_groups.is_empty() {
        "(none)".to_string()
    } else {
        existing_groups.join(", ")
    };
    let user_prompt = format!(
        "Existing folders: {existing}\n\nMissed items ({}):\n{}",
        entries.len(),
        describe_entries(entries)?
    );

    Ok(ClassifierRequest {
        kind: RequestKind::Recovery,
        system_prompt,
        user_prompt,
    })
}

pub fn build_conflict_request(conflicts: &[Conflict]) -> Result<ClassifierRequest, AppError> {
    let system_prompt = "Some items were placed into more than one folder.\n\
For each item choose exactly ONE of its candidate folders.\n\
Return ONLY a flat JSON object mapping item name to the chosen folder, for example:\n\
{\"photo.jpg\": \"Images\", \"notes.txt\": \"Documents\"}"
        .to_string();

    let payload: Vec<serde_json::Value> = conflicts
        .iter()
        .map(|c| json!({"name": c.entry_name, "candidates": c.candidate_groups}))
        .collect();
    let user_prompt = format!(
        "Items with more than one folder:\n{}",
        serde_json::to_string_pretty(&payload)?
    );

    Ok(ClassifierRequest {
        kind: RequestKind::Conflict,
        system_prompt,
        user_prompt,
    })
}

/// Keeps outgoing text to printable characters with `\n` line endings.
pub fn sanitize_for_transport(text: &str) -> String {
    text.replace("\r\n", "\n")
        .replace('\r', "\n")
        .chars()
        .filter_map(|c| match c {
            '\n' | '\t' => Some(c),
            '\u{2028}' | '\u{2029}' => Some('\n'),
            '\u{200B}'..='\u{200D}' | '\u{FEFF}' => None,
            c if c.is_control() => None,
            c => Some(c),
        })
        .collect()
}

// ---------------------------------------------------------------------------
// HTTP transport
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    #[serde(default)]
    message: Option<ResponseMessage>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Turns a chat-completions body into reply text. A length cut-off is fatal
/// for the call: the text is discarded, never parsed.
pub fn interpret_response(body: &str) -> Result<String, AppError> {
    let parsed: ChatResponse = serde_json::from_str(body)
        .map_err(|e| AppError::Transport(format!("unreadable response body: {e}")))?;
    let choice = parsed.choices.into_iter().next().ok_or(AppError::EmptyResponse)?;

    if choice.finish_reason.as_deref() == Some("length") {
        return Err(AppError::Truncated("finish_reason=length".to_string()));
    }

    let content = choice
        .message
        .and_then(|m| m.content)
        .unwrap_or_default();
    if content.trim().is_empty() {
        return Err(AppError::EmptyResponse);
    }
    Ok(content)
}

pub struct HttpClassifier {
    client: reqwest::Client,
    provider: ProviderConfig,
    settings: ClassifierSettings,
}

impl HttpClassifier {
    pub fn new(provider: ProviderConfig, settings: ClassifierSettings) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .build()
            .map_err(|e| AppError::Transport(format!("failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            provider,
            settings,
        })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/{}",
            self.provider.api_base.trim_end_matches('/'),
            self.provider.api_path.trim_start_matches('/')
        )
    }
}

#[async_trait]
impl Classifier for HttpClassifier {
    async fn classify(&self, request: &ClassifierRequest) -> Result<String, AppError> {
        let body = ChatRequest {
            model: &self.provider.model,
            messages: vec![
                WireMessage {
                    role: "system",
                    content: sanitize_for_transport(&request.system_prompt),
                },
                WireMessage {
                    role: "user",
                    content: sanitize_for_transport(&request.user_prompt),
                },
            ],
            max_tokens: self.settings.max_tokens,
            temperature: self.settings.temperature,
        };

        let mut builder = self.client.post(self.endpoint()).json(&body);
        if let Some(value) = self.provider.auth_header_value() {
            builder = builder.header(self.provider.auth_header_name.as_str(), value);
        }

        tracing::debug!(kind = %request.kind, endpoint = %self.endpoint(), "sending classifier request");
        let response = builder
            .send()
            .await
            .map_err(|e| AppError::Transport(format!("request failed: {e}")))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| AppError::Transport(format!("failed to read response: {e}")))?;
        if !status.is_success() {
            let excerpt: String = text.chars().take(MAX_ERROR_BODY_CHARS).collect();
            return Err(AppError::Transport(format!("HTTP status {status}: {excerpt}")));
        }

        let content = interpret_response(&text)?;
        tracing::debug!(kind = %request.kind, chars = content.len(), "classifier replied");
        Ok(content)
    }
}

// ---------------------------------------------------------------------------
// Gateway: one retry with a fixed backoff
// ---------------------------------------------------------------------------

pub struct ClassifierGateway<'a> {
    classifier: &'a dyn Classifier,
    backoff: Duration,
}

impl<'a> ClassifierGateway<'a> {
    pub fn new(classifier: &'a dyn Classifier, backoff: Duration) -> Self {
        Self {
            classifier,
            backoff,
        }
    }

    /// Sends `request` and validates the reply with `accept`. A retryable
    /// failure gets exactly one more attempt after the backoff.
    pub async fn request<T, F>(&self, request: &ClassifierRequest, accept: F) -> Result<T, AppError>
    where
        F: Fn(&str) -> Result<T, AppError>,
    {
        let mut attempt = 1;
        loop {
            let outcome = match self.classifier.classify(request).await {
                Ok(text) => accept(&text),
                Err(err) => Err(err),
            };
            match outcome {
                Ok(value) => return Ok(value),
                Err(err) if attempt < MAX_ATTEMPTS && err.is_batch_retryable() => {
                    tracing::warn!(
                        kind = %request.kind,
                        attempt,
                        error = %err,
                        "classifier request failed, retrying after backoff"
                    );
                    attempt += 1;
                    tokio::time::sleep(self.backoff).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
