//! 可视化服务 - 业务能力层
//!
//! 把代码转换成流程图描述，再请求图片生成能力返回图片地址。

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::BackendError;
use crate::models::{Artifact, ArtifactKind, ArtifactPayload, Submission};
use crate::services::artifact_cache::{normalize_key, ArtifactCache};

const CAPABILITY: &str = "visualization";

/// 嵌入提示词的代码最大字符数（图片模型的提示词长度有限）
const MAX_PROMPT_CODE_CHARS: usize = 2500;

pub const TOO_SHORT_REASON: &str = "too short to visualize";

/// 图片生成能力
#[async_trait]
pub trait ImageGenerator: Send + Sync {
    /// 返回生成图片的地址
    async fn generate_image(&self, prompt: &str) -> Result<String, BackendError>;
}

/// 兼容 OpenAI `images/generations` 接口的客户端
pub struct OpenAiImageClient {
    client: Client,
    api_key: String,
    api_base: String,
    model: String,
    size: String,
}

impl OpenAiImageClient {
    pub fn new(config: &Config) -> Self {
        Self {
            client: Client::new(),
            api_key: config.artifact_api_key.clone(),
            api_base: config.artifact_api_base_url.trim_end_matches('/').to_string(),
            model: config.image_model.clone(),
            size: config.image_size.clone(),
        }
    }
}

#[async_trait]
impl ImageGenerator for OpenAiImageClient {
    async fn generate_image(&self, prompt: &str) -> Result<String, BackendError> {
        let url = format!("{}/images/generations", self.api_base);
        let body = json!({
            "model": self.model,
            "prompt": prompt,
            "n": 1,
            "size": self.size,
            "quality": "standard",
            "response_format": "url",
        });

        debug!("请求图片生成: {}", url);

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| BackendError::unavailable(CAPABILITY, e))?;

        let status = response.status();
        let response_text = response
            .text()
            .await
            .map_err(|e| BackendError::unavailable(CAPABILITY, e))?;

        if !status.is_success() {
            return Err(BackendError::unavailable(
                CAPABILITY,
                format!("API request failed with status {}", status),
            ));
        }

        let response_json: Value = serde_json::from_str(&response_text)
            .map_err(|_| BackendError::malformed(CAPABILITY, response_text.clone()))?;

        response_json["data"][0]["url"]
            .as_str()
            .filter(|url| !url.is_empty())
            .map(str::to_string)
            .ok_or_else(|| BackendError::malformed(CAPABILITY, response_text))
    }
}

/// 代码结构特征
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CodeFeatures {
    pub loops: bool,
    pub conditionals: bool,
    pub functions: bool,
    pub classes: bool,
}

impl CodeFeatures {
    pub fn detect(cleaned_code: &str) -> Self {
        Self {
            loops: cleaned_code.contains("for ") || cleaned_code.contains("while "),
            conditionals: cleaned_code.contains("if ") || cleaned_code.contains("else:"),
            functions: cleaned_code.contains("def "),
            classes: cleaned_code.contains("class "),
        }
    }
}

/// 可视化服务
///
/// 职责：
/// - 检查前置条件（代码长度）
/// - 构建流程图提示词
/// - 调用图片生成能力，成功结果写入缓存
/// - 任何错误都转换为产物状态，不向外抛出
pub struct VisualizationService {
    generator: Arc<dyn ImageGenerator>,
    min_chars: usize,
    cache: ArtifactCache,
}

impl VisualizationService {
    pub fn new(generator: Arc<dyn ImageGenerator>, config: &Config) -> Self {
        Self {
            generator,
            min_chars: config.visualization_min_chars,
            cache: ArtifactCache::new(config.artifact_cache_capacity),
        }
    }

    /// 生成可视化（优先使用缓存）
    pub async fn visualize(&self, submission: &Submission) -> Artifact {
        self.produce(submission, true).await
    }

    /// 重新生成可视化（跳过缓存）
    pub async fn regenerate(&self, submission: &Submission) -> Artifact {
        self.produce(submission, false).await
    }

    async fn produce(&self, submission: &Submission, use_cache: bool) -> Artifact {
        let id = submission.id();
        let code = submission.code();

        if code.trim().chars().count() < self.min_chars {
            debug!("[提交 {}] 代码过短，跳过可视化", id);
            return Artifact::unavailable(id, ArtifactKind::Visualization, TOO_SHORT_REASON);
        }

        let key = normalize_key(code);
        if use_cache {
            if let Some(payload) = self.cache.get(&key) {
                debug!("[提交 {}] 可视化命中缓存", id);
                return Artifact::ready(id, ArtifactKind::Visualization, payload);
            }
        }

        let prompt = build_prompt(code);
        match self.generator.generate_image(&prompt).await {
            Ok(uri) => {
                info!("[提交 {}] 🖼️ 可视化生成完成", id);
                let payload = ArtifactPayload::Uri { uri };
                self.cache.insert(key, payload.clone());
                Artifact::ready(id, ArtifactKind::Visualization, payload)
            }
            Err(e) => {
                warn!("[提交 {}] ⚠️ 可视化生成失败: {}", id, e);
                Artifact::failed(id, ArtifactKind::Visualization, e.to_string())
            }
        }
    }
}

/// 去掉注释行和空行
pub fn clean_code(code: &str) -> String {
    code.lines()
        .filter(|line| {
            let trimmed = line.trim();
            !trimmed.is_empty() && !trimmed.starts_with('#')
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// 构建流程图提示词
pub fn build_prompt(code: &str) -> String {
    let cleaned = clean_code(code);
    let features = CodeFeatures::detect(&cleaned);

    let embedded: String = cleaned.chars().take(MAX_PROMPT_CODE_CHARS).collect();

    let mut description = String::from(
        "Create a professional, clear flowchart diagram showing the execution flow of this Python code:\n\n",
    );
    description.push_str(&embedded);

    description.push_str("\n\nThe flowchart should:");
    description.push_str(
        "\n- Use standard flowchart symbols (rectangles for processes, diamonds for decisions, etc.)",
    );
    description.push_str("\n- Show the logical flow with directional arrows");

    if features.loops {
        description.push_str("\n- Clearly illustrate loop structures with iteration paths");
    }
    if features.conditionals {
        description.push_str("\n- Show branching paths for conditional statements");
    }
    if features.functions {
        description.push_str("\n- Represent function calls and returns");
    }
    if features.classes {
        description.push_str("\n- Indicate class structures and methods");
    }

    description.push_str(
        "\n\nUse a clean, minimalist design with a black background, white text, and red arrows. Include variable values where relevant.",
    );

    description
}
