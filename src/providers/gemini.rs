use anyhow::{Result, anyhow};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

use super::retry::{Backoff, retry_after};
use super::{
    Message, MessagePart, MessageRole, Provider, ProviderFuture, ProviderResponse, ProviderUsage,
    ToolSpec,
};
use crate::data::ImageAttachment;

const BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";
pub(crate) const DEFAULT_MODEL: &str = "gemini-2.5-pro";

/// Gemini `generateContent` client. Messages and tools are collected by the
/// builder methods; `call_tool` forces a call of the named function.
#[derive(Debug, Clone)]
pub struct Gemini {
    key: String,
    model: String,
    client: reqwest::Client,
    messages: Vec<Message>,
    tools: Vec<ToolSpec>,
}

impl Gemini {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            model: DEFAULT_MODEL.to_string(),
            client: reqwest::Client::new(),
            messages: Vec::new(),
            tools: Vec::new(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        let model = model.into();
        if !model.trim().is_empty() {
            self.model = model;
        }
        self
    }

    fn request_body(&self, tool: &ToolSpec) -> Value {
        let system_instruction = self
            .messages
            .iter()
            .filter(|message| matches!(message.role, MessageRole::System))
            .flat_map(|message| &message.parts)
            .filter_map(|part| match part {
                MessagePart::Text(text) => Some(text.as_str()),
                MessagePart::Image(_) => None,
            })
            .collect::<Vec<_>>()
            .join("\n\n");

        let parts = self
            .messages
            .iter()
            .filter(|message| matches!(message.role, MessageRole::User))
            .flat_map(|message| &message.parts)
            .map(|part| match part {
                MessagePart::Text(text) => json!({ "text": text }),
                MessagePart::Image(image) => inline_image(image),
            })
            .collect::<Vec<_>>();

        let mut body = json!({
            "contents": [{ "role": "user", "parts": parts }],
            "tools": [{
                "function_declarations": [{
                    "name": tool.name,
                    "description": tool.description,
                    "parameters": tool.parameters
                }]
            }],
            "tool_config": {
                "function_calling_config": {
                    "mode": "ANY",
                    "allowed_function_names": [tool.name]
                }
            },
            "generationConfig": { "temperature": 0.0 }
        });
        if !system_instruction.trim().is_empty() {
            body["systemInstruction"] = json!({ "parts": [{ "text": system_instruction }] });
        }
        body
    }
}

fn inline_image(image: &ImageAttachment) -> Value {
    json!({
        "inline_data": {
            "mime_type": image.mime,
            "data": BASE64.encode(&image.bytes)
        }
    })
}

impl Provider for Gemini {
    fn append_system_input(mut self, input: String) -> Self {
        self.messages.push(Message::system(input));
        self
    }

    fn append_user_input(mut self, input: String) -> Self {
        self.messages.push(Message::user(input));
        self
    }

    fn append_user_image(mut self, image: ImageAttachment) -> Self {
        self.messages.push(Message::user_image(image));
        self
    }

    fn register_tool(mut self, tool: ToolSpec) -> Self {
        self.tools.push(tool);
        self
    }

    fn call_tool(self, tool_name: &str) -> ProviderFuture {
        let tool_name = tool_name.to_string();
        Box::pin(async move {
            let tool = self
                .tools
                .iter()
                .find(|tool| tool.name == tool_name)
                .ok_or_else(|| anyhow!("tool '{}' not registered", tool_name))?;
            let body = self.request_body(tool);
            let url = format!("{}/{}:generateContent", BASE_URL, self.model);
            debug!(model = %self.model, "calling Gemini");

            let mut backoff = Backoff::new("Gemini");
            loop {
                let response = self
                    .client
                    .post(&url)
                    .header("x-goog-api-key", self.key.clone())
                    .json(&body)
                    .send()
                    .await?;
                let status = response.status();
                let retry_after = retry_after(response.headers());
                let text = response.text().await.unwrap_or_default();
                if status.is_success() {
                    return extract_tool_response(&text, &tool_name, &self.model);
                }
                if backoff.retry(status, &text, retry_after).await {
                    continue;
                }
                return Err(anyhow!(
                    "Gemini API error ({}): {}",
                    status,
                    extract_gemini_error(&text).unwrap_or(text)
                ));
            }
        })
    }
}

fn extract_tool_response(
    text: &str,
    tool_name: &str,
    fallback_model: &str,
) -> Result<ProviderResponse> {
    let payload: GeminiResponse = serde_json::from_str(text)
        .map_err(|err| anyhow!("failed to parse Gemini response JSON: {}", err))?;
    if let Some(reason) = payload
        .prompt_feedback
        .and_then(|feedback| feedback.block_reason)
    {
        return Err(anyhow!("Gemini refused the image: {}", reason));
    }
    let candidate = payload
        .candidates
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("no candidate returned from Gemini"))?;

    let call = candidate
        .content
        .into_iter()
        .flat_map(|content| content.parts)
        .filter_map(|part| part.function_call)
        .find(|call| call.name == tool_name);
    let Some(call) = call else {
        return Err(match candidate.finish_reason.as_deref() {
            Some(reason) if reason != "STOP" => {
                anyhow!("Gemini stopped without a tool call: {}", reason)
            }
            _ => anyhow!("no tool call returned from Gemini"),
        });
    };

    Ok(ProviderResponse {
        args: call.args,
        model: payload
            .model_version
            .filter(|value| !value.trim().is_empty())
            .or_else(|| Some(fallback_model.to_string())),
        usage: payload.usage_metadata.map(|usage| ProviderUsage {
            prompt_tokens: usage.prompt_token_count,
            completion_tokens: usage.candidates_token_count,
            total_tokens: usage.total_token_count,
        }),
    })
}

fn extract_gemini_error(body: &str) -> Option<String> {
    #[derive(Deserialize)]
    struct ErrorBody {
        error: Option<GeminiError>,
    }

    #[derive(Deserialize)]
    struct GeminiError {
        message: Option<String>,
        status: Option<String>,
        code: Option<i32>,
    }

    let error = serde_json::from_str::<ErrorBody>(body).ok()?.error?;
    let parts: Vec<String> = [
        error.message,
        error.status.map(|status| format!("type: {}", status)),
        error.code.map(|code| format!("code: {}", code)),
    ]
    .into_iter()
    .flatten()
    .filter(|part| !part.trim().is_empty())
    .collect();
    if parts.is_empty() {
        Some("unknown error".to_string())
    } else {
        Some(parts.join(" | "))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    prompt_feedback: Option<GeminiPromptFeedback>,
    usage_metadata: Option<GeminiUsage>,
    model_version: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiPromptFeedback {
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiUsage {
    prompt_token_count: Option<u64>,
    candidates_token_count: Option<u64>,
    total_token_count: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiCandidate {
    content: Option<GeminiContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiPart {
    function_call: Option<GeminiFunctionCall>,
}

#[derive(Debug, Deserialize)]
struct GeminiFunctionCall {
    name: String,
    #[serde(default)]
    args: Value,
}
