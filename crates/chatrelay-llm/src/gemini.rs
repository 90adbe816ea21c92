use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use chatrelay_core::config::{DEFAULT_BASE_URL, RelayConfig};
use chatrelay_core::error::{Result, UpstreamError};
use chatrelay_core::message::Turn;
use chatrelay_core::model::{ChatModel, ChatReply, TextStream, is_safety_reason};

use crate::chunked::fragment_stream;

// ---------------------------------------------------------------------------
// Gemini API request types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<GeminiContent>,
    pub contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation_config: Option<GenerationConfig>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GeminiContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GeminiPart {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
}

// ---------------------------------------------------------------------------
// Gemini API response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiResponse {
    #[serde(default)]
    pub candidates: Option<Vec<GeminiCandidate>>,
    #[serde(default)]
    pub prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiCandidate {
    #[serde(default)]
    pub content: Option<GeminiContent>,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptFeedback {
    #[serde(default)]
    pub block_reason: Option<String>,
}

/// Turn a single-shot response into a reply or a typed failure.
pub fn reply_from_response(response: GeminiResponse) -> Result<ChatReply> {
    if let Some(reason) = response.prompt_feedback.and_then(|f| f.block_reason) {
        return Err(UpstreamError::SafetyBlocked { reason }.into());
    }

    let candidate = response.candidates.and_then(|c| c.into_iter().next());
    let Some(candidate) = candidate else {
        return Err(UpstreamError::EmptyCandidate.into());
    };

    if let Some(reason) = candidate.finish_reason.as_deref()
        && is_safety_reason(reason)
    {
        return Err(UpstreamError::SafetyBlocked {
            reason: reason.to_string(),
        }
        .into());
    }

    let text: String = candidate
        .content
        .map(|c| c.parts)
        .unwrap_or_default()
        .into_iter()
        .filter_map(|p| p.text)
        .collect();

    if text.is_empty() {
        return Err(UpstreamError::EmptyCandidate.into());
    }

    Ok(ChatReply {
        text,
        finish_reason: candidate.finish_reason,
    })
}

// ---------------------------------------------------------------------------
// GeminiChatModel
// ---------------------------------------------------------------------------

pub struct GeminiChatModel {
    api_key: String,
    model_id: String,
    base_url: String,
    system_prompt: Option<String>,
    generation_config: Option<GenerationConfig>,
    client: reqwest::Client,
}

impl GeminiChatModel {
    pub fn new(api_key: String, model_id: String) -> Self {
        Self {
            api_key,
            model_id,
            base_url: DEFAULT_BASE_URL.into(),
            system_prompt: None,
            generation_config: None,
            client: reqwest::Client::new(),
        }
    }

    /// Build a model from relay configuration. Returns `None` without an API key.
    pub fn from_config(config: &RelayConfig) -> Option<Self> {
        let api_key = config.api_key.clone()?;
        let mut model = Self::new(api_key, config.model.clone()).with_base_url(&config.base_url);
        model.system_prompt = config.system_prompt.clone();
        if config.max_output_tokens.is_some() || config.temperature.is_some() {
            model = model.with_generation_config(GenerationConfig {
                max_output_tokens: config.max_output_tokens,
                temperature: config.temperature,
            });
        }
        Some(model)
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_generation_config(mut self, config: GenerationConfig) -> Self {
        self.generation_config = Some(config);
        self
    }

    pub fn endpoint(&self, method: &str) -> String {
        format!("{}/models/{}:{}", self.base_url, self.model_id, method)
    }

    pub fn build_request(&self, turns: &[Turn]) -> GeminiRequest {
        let contents = turns
            .iter()
            .map(|turn| GeminiContent {
                role: Some(turn.role.as_str().into()),
                parts: vec![GeminiPart {
                    text: Some(turn.text.clone()),
                }],
            })
            .collect();

        let system_instruction = self.system_prompt.as_ref().map(|prompt| GeminiContent {
            role: None,
            parts: vec![GeminiPart {
                text: Some(prompt.clone()),
            }],
        });

        GeminiRequest {
            system_instruction,
            contents,
            generation_config: self.generation_config.clone(),
        }
    }

    /// POST to `method` and fail on any non-success status.
    async fn post(&self, method: &str, turns: &[Turn]) -> Result<reqwest::Response> {
        let url = self.endpoint(method);
        debug!(%url, turns = turns.len(), "calling upstream");

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&self.build_request(turns))
            .send()
            .await
            .map_err(|e| UpstreamError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "failed to read response body".into());
            return Err(UpstreamError::http(status.as_u16(), &body).into());
        }
        Ok(response)
    }
}

#[async_trait]
impl ChatModel for GeminiChatModel {
    async fn generate(&self, turns: &[Turn]) -> Result<ChatReply> {
        let response = self.post("generateContent", turns).await?;

        let gemini_response: GeminiResponse = response
            .json()
            .await
            .map_err(|e| UpstreamError::InvalidResponse(e.to_string()))?;

        reply_from_response(gemini_response)
    }

    async fn stream(&self, turns: &[Turn]) -> Result<TextStream> {
        let response = self.post("streamGenerateContent", turns).await?;

        if response.content_length() == Some(0) {
            return Err(UpstreamError::EmptyBody.into());
        }

        Ok(Box::pin(fragment_stream(response.bytes_stream())))
    }

    fn model_name(&self) -> &str {
        &self.model_id
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chatrelay_core::error::RelayError;

    fn make_model() -> GeminiChatModel {
        GeminiChatModel::new("test-key".into(), "gemini-2.0-flash".into())
    }

    fn parse(json: &str) -> GeminiResponse {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn build_request_maps_roles() {
        let model = make_model();
        let turns = vec![Turn::user("Hello"), Turn::model("Hi"), Turn::user("Bye")];
        let req = model.build_request(&turns);
        assert_eq!(req.contents.len(), 3);
        assert_eq!(req.contents[0].role.as_deref(), Some("user"));
        assert_eq!(req.contents[1].role.as_deref(), Some("model"));
        assert!(req.system_instruction.is_none());
        assert!(req.generation_config.is_none());
    }

    #[test]
    fn build_request_with_system_prompt() {
        let model = make_model().with_system_prompt("Be brief");
        let req = model.build_request(&[Turn::user("Hello")]);
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["systemInstruction"]["parts"][0]["text"], "Be brief");
        assert!(json["systemInstruction"].get("role").is_none());
        assert_eq!(json["contents"][0]["parts"][0]["text"], "Hello");
    }

    #[test]
    fn build_request_with_generation_config() {
        let model = make_model().with_generation_config(GenerationConfig {
            max_output_tokens: Some(100),
            temperature: Some(0.5),
        });
        let json = serde_json::to_value(model.build_request(&[Turn::user("x")])).unwrap();
        assert_eq!(json["generationConfig"]["maxOutputTokens"], 100);
        assert_eq!(json["generationConfig"]["temperature"], 0.5);
    }

    #[test]
    fn endpoint_uses_base_url() {
        let model = make_model().with_base_url("http://127.0.0.1:8080/v1beta/");
        assert_eq!(
            model.endpoint("streamGenerateContent"),
            "http://127.0.0.1:8080/v1beta/models/gemini-2.0-flash:streamGenerateContent"
        );
    }

    #[test]
    fn from_config_requires_key() {
        assert!(GeminiChatModel::from_config(&RelayConfig::default()).is_none());
        let config = RelayConfig::default()
            .with_api_key("k")
            .with_model("gemini-2.5-pro");
        let model = GeminiChatModel::from_config(&config).unwrap();
        assert_eq!(model.model_name(), "gemini-2.5-pro");
        let json = serde_json::to_value(model.build_request(&[Turn::user("x")])).unwrap();
        assert!(json.get("generationConfig").is_none());
    }

    #[test]
    fn from_config_applies_generation_settings() {
        let config = RelayConfig::default()
            .with_api_key("k")
            .with_max_output_tokens(64)
            .with_temperature(0.2);
        let model = GeminiChatModel::from_config(&config).unwrap();
        let json = serde_json::to_value(model.build_request(&[Turn::user("x")])).unwrap();
        assert_eq!(json["generationConfig"]["maxOutputTokens"], 64);
        assert_eq!(json["generationConfig"]["temperature"], 0.2);
    }

    #[test]
    fn reply_joins_text_parts() {
        let resp = parse(
            r#"{"candidates":[{"content":{"parts":[{"text":"Hello "},{"text":"world"}],"role":"model"},"finishReason":"STOP"}]}"#,
        );
        let reply = reply_from_response(resp).unwrap();
        assert_eq!(reply.text, "Hello world");
        assert_eq!(reply.finish_reason.as_deref(), Some("STOP"));
    }

    #[test]
    fn reply_safety_finish_reason() {
        let resp = parse(r#"{"candidates":[{"finishReason":"SAFETY"}]}"#);
        let err = reply_from_response(resp).unwrap_err();
        assert!(matches!(
            err,
            RelayError::Upstream(UpstreamError::SafetyBlocked { ref reason }) if reason == "SAFETY"
        ));
    }

    #[test]
    fn reply_prompt_blocked() {
        let resp = parse(r#"{"promptFeedback":{"blockReason":"OTHER"}}"#);
        let err = reply_from_response(resp).unwrap_err();
        assert!(matches!(
            err,
            RelayError::Upstream(UpstreamError::SafetyBlocked { .. })
        ));
    }

    #[test]
    fn reply_empty_candidates() {
        let err = reply_from_response(parse(r#"{"candidates":[]}"#)).unwrap_err();
        assert!(matches!(err, RelayError::Upstream(UpstreamError::EmptyCandidate)));
    }

    #[test]
    fn reply_candidate_without_text() {
        let resp = parse(r#"{"candidates":[{"content":{"parts":[{"text":""}]},"finishReason":"STOP"}]}"#);
        let err = reply_from_response(resp).unwrap_err();
        assert!(matches!(err, RelayError::Upstream(UpstreamError::EmptyCandidate)));
    }
}
