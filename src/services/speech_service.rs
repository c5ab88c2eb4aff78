//! 语音服务 - 业务能力层
//!
//! 把反馈文本规范化（去掉格式标记、限制长度）后请求语音合成能力。

use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::BackendError;
use crate::models::{Artifact, ArtifactKind, ArtifactPayload, SubmissionId};
use crate::services::artifact_cache::ArtifactCache;

const CAPABILITY: &str = "speech";

pub const EMPTY_TEXT_REASON: &str = "no feedback text to read aloud";

static CODE_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```.*?(```|$)").expect("code fence pattern"));
static LINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[([^\]]+)\]\([^)]*\)").expect("link pattern"));
static HEADING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s{0,3}#{1,6}\s*").expect("heading pattern"));
static BULLET: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*(?:[-*+]|\d+[.)])\s+").expect("bullet pattern"));
static EMPHASIS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\*{1,3}|~~|`").expect("emphasis pattern"));
static WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("whitespace pattern"));

/// 语音合成能力
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// 返回音频数据
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, BackendError>;
}

/// 兼容 OpenAI `audio/speech` 接口的客户端
pub struct OpenAiSpeechClient {
    client: Client,
    api_key: String,
    api_base: String,
    model: String,
    voice: String,
}

impl OpenAiSpeechClient {
    pub fn new(config: &Config) -> Self {
        Self {
            client: Client::new(),
            api_key: config.artifact_api_key.clone(),
            api_base: config.artifact_api_base_url.trim_end_matches('/').to_string(),
            model: config.speech_model.clone(),
            voice: config.speech_voice.clone(),
        }
    }
}

#[async_trait]
impl SpeechSynthesizer for OpenAiSpeechClient {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, BackendError> {
        let url = format!("{}/audio/speech", self.api_base);
        let body = json!({
            "model": self.model,
            "voice": self.voice,
            "input": text,
        });

        debug!("请求语音合成: {}，{} 字符", url, text.chars().count());

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| BackendError::unavailable(CAPABILITY, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(BackendError::unavailable(
                CAPABILITY,
                format!("API request failed with status {}", status),
            ));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| BackendError::unavailable(CAPABILITY, e))?;

        if bytes.is_empty() {
            return Err(BackendError::malformed(CAPABILITY, ""));
        }
        Ok(bytes.to_vec())
    }
}

/// 语音服务
pub struct SpeechService {
    synthesizer: Arc<dyn SpeechSynthesizer>,
    max_chars: usize,
    cache: ArtifactCache,
}

impl SpeechService {
    pub fn new(synthesizer: Arc<dyn SpeechSynthesizer>, config: &Config) -> Self {
        Self {
            synthesizer,
            max_chars: config.speech_max_chars,
            cache: ArtifactCache::new(config.artifact_cache_capacity),
        }
    }

    /// 朗读反馈文本（优先使用缓存）
    pub async fn speak(&self, submission_id: SubmissionId, text: &str) -> Artifact {
        self.produce(submission_id, text, true).await
    }

    /// 重新合成（跳过缓存）
    pub async fn regenerate(&self, submission_id: SubmissionId, text: &str) -> Artifact {
        self.produce(submission_id, text, false).await
    }

    async fn produce(&self, id: SubmissionId, text: &str, use_cache: bool) -> Artifact {
        let prepared = prepare_speech_text(text, self.max_chars);
        if prepared.is_empty() {
            return Artifact::unavailable(id, ArtifactKind::Speech, EMPTY_TEXT_REASON);
        }

        if use_cache {
            if let Some(payload) = self.cache.get(&prepared) {
                debug!("[提交 {}] 语音命中缓存", id);
                return Artifact::ready(id, ArtifactKind::Speech, payload);
            }
        }

        match self.synthesizer.synthesize(&prepared).await {
            Ok(data) => {
                info!("[提交 {}] 🔊 语音合成完成，{} 字节", id, data.len());
                let payload = ArtifactPayload::Audio { data };
                self.cache.insert(prepared, payload.clone());
                Artifact::ready(id, ArtifactKind::Speech, payload)
            }
            Err(e) => {
                warn!("[提交 {}] ⚠️ 语音合成失败: {}", id, e);
                Artifact::failed(id, ArtifactKind::Speech, e.to_string())
            }
        }
    }
}

/// 去掉 Markdown 标记并合并空白
pub fn normalize_speech_text(text: &str) -> String {
    let text = CODE_FENCE.replace_all(text, " ");
    let text = LINK.replace_all(&text, "$1");
    let text = HEADING.replace_all(&text, "");
    let text = BULLET.replace_all(&text, "");
    let text = EMPHASIS.replace_all(&text, "");
    WHITESPACE.replace_all(&text, " ").trim().to_string()
}

/// 规范化并截断到 `max_chars` 个字符以内
///
/// 优先在句子边界截断；找不到合适的句子边界时在词边界截断并加上省略号。
pub fn prepare_speech_text(text: &str, max_chars: usize) -> String {
    let normalized = normalize_speech_text(text);
    if normalized.chars().count() <= max_chars {
        return normalized;
    }

    // 放不下省略号时直接截断
    if max_chars <= 3 {
        return normalized.chars().take(max_chars).collect();
    }

    let budget = max_chars - 3;
    let head: String = normalized.chars().take(budget).collect();

    // 句子边界不能太靠前，否则丢掉的内容过多
    let sentence_end = head
        .char_indices()
        .filter(|&(i, c)| {
            matches!(c, '.' | '!' | '?' | '。' | '！' | '？')
                && head[i + c.len_utf8()..].starts_with(' ')
        })
        .map(|(i, c)| i + c.len_utf8())
        .last()
        .filter(|&end| head[..end].chars().count() >= budget / 2);

    if let Some(end) = sentence_end {
        return head[..end].to_string();
    }

    let cut = head.rfind(' ').filter(|&i| i > 0).unwrap_or(head.len());
    format!("{}...", head[..cut].trim_end())
}
