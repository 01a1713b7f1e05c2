//! Recognition service seam.
//!
//! Two logical operations against an external vision-chat endpoint: a
//! single-image extraction call and a batch-style call restricted to one
//! file (the fallback path). Both honor the shared cancellation token by
//! abandoning the in-flight request when it fires.
//!
//! The HTTP implementation targets an OpenAI-compatible chat-completions
//! API: images travel as base64 data URLs, and the model is prompted to
//! return either a structured JSON transcript (bubble-per-message with
//! speaker sides) or a marked flat-text section.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use tokio_util::sync::CancellationToken;

use super::types::{OcrResult, RecognitionMode, SpeakerSide, StructuredMessage};
use super::RecognitionError;

// ═══════════════════════════════════════════════════════════
// Trait
// ═══════════════════════════════════════════════════════════

#[async_trait]
pub trait RecognitionService: Send + Sync {
    /// Primary single-image extraction call.
    async fn extract_single(
        &self,
        image_bytes: &[u8],
        wire_format: &str,
        mode: RecognitionMode,
        cancel: &CancellationToken,
    ) -> Result<OcrResult, RecognitionError>;

    /// Batch-style call restricted to one file. Functionally identical
    /// contract; used when the primary path fails.
    async fn extract_batch_of_one(
        &self,
        image_bytes: &[u8],
        wire_format: &str,
        mode: RecognitionMode,
        cancel: &CancellationToken,
    ) -> Result<OcrResult, RecognitionError>;
}

// ═══════════════════════════════════════════════════════════
// Prompts and parsing protocol
// ═══════════════════════════════════════════════════════════

/// Structured-transcript prompt: bubble-per-message JSON with speaker
/// sides inferred from layout. right = the device owner, left = the
/// other party.
const STRUCTURED_PROMPT: &str = "\
你将看到一张聊天截图，请进行OCR并理解排版位置来判断左右两侧发言人。\
请严格返回JSON（不要包含多余文字），结构如下：\n\
{\n\
  \"participants\": [\"我\", \"对方\"],\n\
  \"messages\": [\n\
    {\"speaker_name\": \"我\", \"speaker_side\": \"right\", \"text\": \"内容\"},\n\
    {\"speaker_name\": \"对方\", \"speaker_side\": \"left\", \"text\": \"内容\"}\n\
  ]\n\
}\n\
要求：\n- 以气泡为单位进行分块，尽量合并同一气泡内的换行\n\
- right表示用户本人（右侧头像），left表示对方（左侧头像）\n\
- messages按时间顺序\n- 仅返回JSON\n";

/// Flat-text prompt: full dialogue under a marked section, with
/// confidence and language lines the parser can pick out.
const FLAT_PROMPT: &str = "\
请识别这张聊天截图中的所有文字内容，包括对话双方的发言。请按照以下格式返回：\n\n\
**对话内容：**\n[识别出的完整对话内容]\n\n\
**识别信息：**\n- 置信度：[0-1之间的数值]\n- 语言：中文/英文\n";

const DIALOGUE_MARKER: &str = "**对话内容：**";
const INFO_MARKER: &str = "**识别信息：**";
const CONFIDENCE_MARKER: &str = "置信度：";
const LANGUAGE_MARKER: &str = "语言：";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

// ═══════════════════════════════════════════════════════════
// HTTP implementation
// ═══════════════════════════════════════════════════════════

/// Recognition client against an OpenAI-compatible vision-chat endpoint.
pub struct HttpRecognitionClient {
    http: reqwest::Client,
    api_url: String,
    api_key: String,
    model: String,
}

impl HttpRecognitionClient {
    pub fn new(api_url: &str, api_key: &str, model: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_url: api_url.to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
        }
    }

    /// Token budget per mode. `fast` keeps the response minimal; `quality`
    /// leaves room for long transcripts.
    fn max_tokens(mode: RecognitionMode) -> u32 {
        match mode {
            RecognitionMode::Fast => 800,
            RecognitionMode::Quality => 2000,
        }
    }

    fn build_payload(
        &self,
        prompt: &str,
        image_bytes: &[u8],
        wire_format: &str,
        mode: RecognitionMode,
        json_response: bool,
    ) -> serde_json::Value {
        let encoded = base64::engine::general_purpose::STANDARD.encode(image_bytes);
        let mut payload = serde_json::json!({
            "model": self.model,
            "messages": [{
                "role": "user",
                "content": [
                    { "type": "text", "text": prompt },
                    {
                        "type": "image_url",
                        "image_url": { "url": format!("data:image/{wire_format};base64,{encoded}") }
                    }
                ]
            }],
            "max_tokens": Self::max_tokens(mode),
            "temperature": 0,
        });
        if json_response {
            payload["response_format"] = serde_json::json!({ "type": "json_object" });
        }
        payload
    }

    async fn post(
        &self,
        payload: &serde_json::Value,
        cancel: &CancellationToken,
    ) -> Result<String, RecognitionError> {
        let request = self
            .http
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .timeout(REQUEST_TIMEOUT)
            .json(payload)
            .send();

        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(RecognitionError::Cancelled),
            r = request => r?,
        };

        let status = response.status();
        if !status.is_success() {
            return Err(RecognitionError::Status(status.as_u16()));
        }

        let body: serde_json::Value = tokio::select! {
            _ = cancel.cancelled() => return Err(RecognitionError::Cancelled),
            b = response.json() => b?,
        };

        body["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_string)
            .ok_or(RecognitionError::EmptyResponse)
    }
}

#[async_trait]
impl RecognitionService for HttpRecognitionClient {
    async fn extract_single(
        &self,
        image_bytes: &[u8],
        wire_format: &str,
        mode: RecognitionMode,
        cancel: &CancellationToken,
    ) -> Result<OcrResult, RecognitionError> {
        let start = std::time::Instant::now();
        let payload = self.build_payload(FLAT_PROMPT, image_bytes, wire_format, mode, false);
        let content = self.post(&payload, cancel).await?;
        let result = parse_response(&content);
        tracing::info!(
            mode = %mode,
            elapsed_ms = start.elapsed().as_millis() as u64,
            text_len = result.text.len(),
            structured = result.structured_messages.len(),
            "Single-image recognition complete"
        );
        Ok(result)
    }

    async fn extract_batch_of_one(
        &self,
        image_bytes: &[u8],
        wire_format: &str,
        mode: RecognitionMode,
        cancel: &CancellationToken,
    ) -> Result<OcrResult, RecognitionError> {
        let start = std::time::Instant::now();
        let payload = self.build_payload(STRUCTURED_PROMPT, image_bytes, wire_format, mode, true);
        let content = self.post(&payload, cancel).await?;
        let result = parse_response(&content);
        tracing::info!(
            mode = %mode,
            elapsed_ms = start.elapsed().as_millis() as u64,
            text_len = result.text.len(),
            structured = result.structured_messages.len(),
            "Batch-of-one recognition complete"
        );
        Ok(result)
    }
}

// ═══════════════════════════════════════════════════════════
// Response parsing
// ═══════════════════════════════════════════════════════════

/// Parse a model response, preferring the structured JSON transcript and
/// falling back to the marked flat-text protocol.
pub fn parse_response(content: &str) -> OcrResult {
    if let Some(structured) = parse_structured(content) {
        return structured;
    }
    parse_flat(content)
}

/// Parse `{"participants": [...], "messages": [{speaker_name,
/// speaker_side, text}]}`. Unknown side values are treated as untagged.
fn parse_structured(content: &str) -> Option<OcrResult> {
    let value: serde_json::Value = serde_json::from_str(content.trim()).ok()?;
    let raw_messages = value.get("messages")?.as_array()?;

    let mut messages = Vec::new();
    for raw in raw_messages {
        let text = raw.get("text").and_then(|t| t.as_str()).unwrap_or("").trim();
        if text.is_empty() {
            continue;
        }
        let side = raw
            .get("speaker_side")
            .and_then(|s| s.as_str())
            .and_then(SpeakerSide::from_str);
        let name = raw
            .get("speaker_name")
            .and_then(|s| s.as_str())
            .map(str::to_string);
        messages.push(StructuredMessage {
            text: text.to_string(),
            speaker_side: side,
            speaker_name: name,
        });
    }

    if messages.is_empty() {
        return None;
    }
    Some(OcrResult::structured(messages))
}

/// Parse the flat-text protocol: dialogue section between the markers,
/// plus best-effort confidence and language lines.
fn parse_flat(content: &str) -> OcrResult {
    let text = match content.find(DIALOGUE_MARKER) {
        Some(start) => {
            let after = &content[start + DIALOGUE_MARKER.len()..];
            match after.find(INFO_MARKER) {
                Some(end) => after[..end].trim().to_string(),
                None => after.trim().to_string(),
            }
        }
        None => content.trim().to_string(),
    };

    let confidence = extract_after(content, CONFIDENCE_MARKER)
        .and_then(|s| s.parse::<f32>().ok())
        .unwrap_or(0.9);
    let language =
        extract_after(content, LANGUAGE_MARKER).unwrap_or_else(|| "中文".to_string());

    OcrResult {
        text,
        confidence,
        language,
        structured_messages: Vec::new(),
    }
}

fn extract_after(content: &str, marker: &str) -> Option<String> {
    let start = content.find(marker)? + marker.len();
    let rest = &content[start..];
    let end = rest.find('\n').unwrap_or(rest.len());
    let value = rest[..end].trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

// ═══════════════════════════════════════════════════════════
// Mock implementation (testing)
// ═══════════════════════════════════════════════════════════

/// Scripted recognition service for tests.
///
/// Every call (single or batch-of-one) pops the next scripted outcome.
/// When the script runs dry the configured default applies: a canned
/// result, or a generic failure.
pub struct MockRecognitionService {
    script: Mutex<VecDeque<Result<OcrResult, String>>>,
    default_result: Option<OcrResult>,
    single_calls: AtomicUsize,
    fallback_calls: AtomicUsize,
}

impl MockRecognitionService {
    pub fn scripted(outcomes: Vec<Result<OcrResult, String>>) -> Self {
        Self {
            script: Mutex::new(outcomes.into()),
            default_result: None,
            single_calls: AtomicUsize::new(0),
            fallback_calls: AtomicUsize::new(0),
        }
    }

    /// Every call succeeds with the given result.
    pub fn always_ok(result: OcrResult) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            default_result: Some(result),
            single_calls: AtomicUsize::new(0),
            fallback_calls: AtomicUsize::new(0),
        }
    }

    /// Every call fails.
    pub fn always_failing() -> Self {
        Self::scripted(Vec::new())
    }

    /// Script some outcomes, then succeed with `result` once dry.
    pub fn scripted_then_ok(outcomes: Vec<Result<OcrResult, String>>, result: OcrResult) -> Self {
        Self {
            script: Mutex::new(outcomes.into()),
            default_result: Some(result),
            single_calls: AtomicUsize::new(0),
            fallback_calls: AtomicUsize::new(0),
        }
    }

    pub fn single_calls(&self) -> usize {
        self.single_calls.load(Ordering::Relaxed)
    }

    pub fn fallback_calls(&self) -> usize {
        self.fallback_calls.load(Ordering::Relaxed)
    }

    fn next_outcome(&self) -> Result<OcrResult, RecognitionError> {
        let scripted = self.script.lock().ok().and_then(|mut s| s.pop_front());
        match scripted {
            Some(Ok(result)) => Ok(result),
            Some(Err(message)) => Err(RecognitionError::Http(message)),
            None => match &self.default_result {
                Some(result) => Ok(result.clone()),
                None => Err(RecognitionError::Http("mock: no scripted outcome".into())),
            },
        }
    }
}

#[async_trait]
impl RecognitionService for MockRecognitionService {
    async fn extract_single(
        &self,
        _image_bytes: &[u8],
        _wire_format: &str,
        _mode: RecognitionMode,
        cancel: &CancellationToken,
    ) -> Result<OcrResult, RecognitionError> {
        if cancel.is_cancelled() {
            return Err(RecognitionError::Cancelled);
        }
        self.single_calls.fetch_add(1, Ordering::Relaxed);
        self.next_outcome()
    }

    async fn extract_batch_of_one(
        &self,
        _image_bytes: &[u8],
        _wire_format: &str,
        _mode: RecognitionMode,
        cancel: &CancellationToken,
    ) -> Result<OcrResult, RecognitionError> {
        if cancel.is_cancelled() {
            return Err(RecognitionError::Cancelled);
        }
        self.fallback_calls.fetch_add(1, Ordering::Relaxed);
        self.next_outcome()
    }
}

/// Service whose calls hang until the cancellation token fires —
/// exercises the in-flight abort path.
pub struct HangingRecognitionService;

#[async_trait]
impl RecognitionService for HangingRecognitionService {
    async fn extract_single(
        &self,
        _image_bytes: &[u8],
        _wire_format: &str,
        _mode: RecognitionMode,
        cancel: &CancellationToken,
    ) -> Result<OcrResult, RecognitionError> {
        cancel.cancelled().await;
        Err(RecognitionError::Cancelled)
    }

    async fn extract_batch_of_one(
        &self,
        _image_bytes: &[u8],
        _wire_format: &str,
        _mode: RecognitionMode,
        cancel: &CancellationToken,
    ) -> Result<OcrResult, RecognitionError> {
        cancel.cancelled().await;
        Err(RecognitionError::Cancelled)
    }
}

// ═══════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    // ── parse_structured ──

    #[test]
    fn structured_json_response_parsed() {
        let content = r#"{
            "participants": ["我", "对方"],
            "messages": [
                {"speaker_name": "对方", "speaker_side": "left", "text": "在吗"},
                {"speaker_name": "我", "speaker_side": "right", "text": "在的"}
            ]
        }"#;
        let result = parse_response(content);
        assert_eq!(result.structured_messages.len(), 2);
        assert_eq!(result.structured_messages[0].speaker_side, Some(SpeakerSide::Left));
        assert_eq!(result.structured_messages[1].speaker_side, Some(SpeakerSide::Right));
        assert_eq!(result.structured_messages[1].speaker_name.as_deref(), Some("我"));
        assert_eq!(result.text, "在吗\n\n在的");
    }

    #[test]
    fn structured_unknown_side_treated_as_untagged() {
        let content = r#"{"messages": [{"speaker_side": "middle", "text": "喂"}]}"#;
        let result = parse_response(content);
        assert_eq!(result.structured_messages.len(), 1);
        assert!(result.structured_messages[0].speaker_side.is_none());
    }

    #[test]
    fn structured_empty_texts_dropped() {
        let content = r#"{"messages": [{"text": "  "}, {"text": "好的"}]}"#;
        let result = parse_response(content);
        assert_eq!(result.structured_messages.len(), 1);
        assert_eq!(result.structured_messages[0].text, "好的");
    }

    #[test]
    fn structured_json_without_messages_falls_back_to_flat() {
        let content = r#"{"participants": ["我"]}"#;
        let result = parse_response(content);
        assert!(result.structured_messages.is_empty());
        assert_eq!(result.text, content);
    }

    // ── parse_flat ──

    #[test]
    fn flat_response_extracts_dialogue_section() {
        let content = "**对话内容：**\n你好\n你好呀\n\n**识别信息：**\n- 置信度：0.95\n- 语言：中文\n";
        let result = parse_response(content);
        assert_eq!(result.text, "你好\n你好呀");
        assert!((result.confidence - 0.95).abs() < f32::EPSILON);
        assert_eq!(result.language, "中文");
        assert!(result.structured_messages.is_empty());
    }

    #[test]
    fn flat_response_without_markers_uses_whole_content() {
        let content = "just some recognized text";
        let result = parse_response(content);
        assert_eq!(result.text, "just some recognized text");
        assert!((result.confidence - 0.9).abs() < f32::EPSILON);
    }

    #[test]
    fn flat_response_bad_confidence_defaults() {
        let content = "**对话内容：**\n喂\n**识别信息：**\n- 置信度：很高\n";
        let result = parse_response(content);
        assert!((result.confidence - 0.9).abs() < f32::EPSILON);
    }

    // ── payload ──

    #[test]
    fn payload_embeds_data_url_and_mode_budget() {
        let client = HttpRecognitionClient::new("http://localhost/v1/chat", "key", "vision-model");
        let payload =
            client.build_payload(FLAT_PROMPT, &[1, 2, 3], "jpeg", RecognitionMode::Fast, false);
        let url = payload["messages"][0]["content"][1]["image_url"]["url"]
            .as_str()
            .unwrap();
        assert!(url.starts_with("data:image/jpeg;base64,"));
        assert_eq!(payload["max_tokens"], 800);
        assert!(payload.get("response_format").is_none());
    }

    #[test]
    fn structured_payload_requests_json_object() {
        let client = HttpRecognitionClient::new("http://localhost/v1/chat", "key", "vision-model");
        let payload = client.build_payload(
            STRUCTURED_PROMPT,
            &[9],
            "png",
            RecognitionMode::Quality,
            true,
        );
        assert_eq!(payload["response_format"]["type"], "json_object");
        assert_eq!(payload["max_tokens"], 2000);
    }

    // ── mock ──

    #[tokio::test]
    async fn mock_pops_script_in_order() {
        let mock = MockRecognitionService::scripted(vec![
            Err("boom".into()),
            Ok(OcrResult::flat("第二次成功了")),
        ]);
        let cancel = CancellationToken::new();
        let first = mock
            .extract_single(b"x", "png", RecognitionMode::Fast, &cancel)
            .await;
        assert!(first.is_err());
        let second = mock
            .extract_batch_of_one(b"x", "png", RecognitionMode::Fast, &cancel)
            .await
            .unwrap();
        assert_eq!(second.text, "第二次成功了");
        assert_eq!(mock.single_calls(), 1);
        assert_eq!(mock.fallback_calls(), 1);
    }

    #[tokio::test]
    async fn mock_dry_script_without_default_fails() {
        let mock = MockRecognitionService::always_failing();
        let cancel = CancellationToken::new();
        let outcome = mock
            .extract_single(b"x", "png", RecognitionMode::Quality, &cancel)
            .await;
        assert!(matches!(outcome, Err(RecognitionError::Http(_))));
    }

    #[tokio::test]
    async fn mock_respects_pre_cancelled_token() {
        let mock = MockRecognitionService::always_ok(OcrResult::flat("ok"));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let outcome = mock
            .extract_single(b"x", "png", RecognitionMode::Fast, &cancel)
            .await;
        assert!(matches!(outcome, Err(RecognitionError::Cancelled)));
        assert_eq!(mock.single_calls(), 0);
    }
}
