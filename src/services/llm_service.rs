//! LLM 服务 - 业务能力层
//!
//! 只负责"调用文本生成"能力，不关心提交、流程和降级策略
//!
//! ## 技术栈
//! - 使用 `async-openai` crate 进行 API 调用
//! - 支持自定义 API 端点和模型
//! - 兼容 OpenAI API 的服务（如 Azure, Gemini, Doubao 等）

use std::time::Duration;

use async_openai::{
    config::OpenAIConfig,
    types::chat::{
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs,
    },
    Client,
};
use async_trait::async_trait;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::BackendError;

/// 能力名称（用于错误信息）
const CAPABILITY: &str = "analysis";

/// 单次请求的最长等待时间
const REQUEST_TIMEOUT: Duration = Duration::from_secs(45);

/// 文本生成能力
///
/// 返回模型的原始文本；传输、配额、超时、空响应都归为 `BackendError::Unavailable`。
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(
        &self,
        system_message: &str,
        user_message: &str,
    ) -> Result<String, BackendError>;
}

/// LLM 服务
///
/// 职责：
/// - 调用兼容 OpenAI 的聊天接口
/// - 固定较低的 temperature，使相似输入得到稳定的输出
/// - 限制最大输出 token 数
/// - 不解析响应内容，不做降级
pub struct LlmService {
    client: Client<OpenAIConfig>,
    model_name: String,
    temperature: f32,
    max_tokens: u32,
}

impl LlmService {
    /// 创建新的 LLM 服务
    pub fn new(config: &Config) -> Self {
        // 配置 OpenAI 客户端（兼容 OpenAI API 的服务）
        let openai_config = OpenAIConfig::new()
            .with_api_key(&config.llm_api_key)
            .with_api_base(&config.llm_api_base_url);

        let client = Client::with_config(openai_config);

        Self {
            client,
            model_name: config.llm_model_name.clone(),
            temperature: config.llm_temperature,
            max_tokens: config.llm_max_tokens,
        }
    }

    /// 通用的 LLM 调用函数
    ///
    /// # 参数
    /// - `user_message`: 用户消息内容
    /// - `system_message`: 系统消息（可选）
    ///
    /// # 返回
    /// 返回 LLM 的响应内容（去掉首尾空白）
    pub async fn send_to_llm(
        &self,
        user_message: &str,
        system_message: Option<&str>,
    ) -> Result<String, BackendError> {
        debug!("调用 LLM API，模型: {}", self.model_name);
        debug!("用户消息长度: {} 字符", user_message.len());

        let unavailable = |e| BackendError::unavailable(CAPABILITY, e);

        // 构建消息列表
        let mut messages = Vec::new();

        if let Some(sys_msg) = system_message {
            let system_msg = ChatCompletionRequestSystemMessageArgs::default()
                .content(sys_msg)
                .build()
                .map_err(unavailable)?;
            messages.push(ChatCompletionRequestMessage::System(system_msg));
        }

        let user_msg = ChatCompletionRequestUserMessageArgs::default()
            .content(user_message)
            .build()
            .map_err(unavailable)?;
        messages.push(ChatCompletionRequestMessage::User(user_msg));

        // 构建请求
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model_name)
            .messages(messages)
            .temperature(self.temperature)
            .max_tokens(self.max_tokens)
            .build()
            .map_err(unavailable)?;

        // 调用 API
        let response = tokio::time::timeout(REQUEST_TIMEOUT, self.client.chat().create(request))
            .await
            .map_err(|_| {
                warn!("LLM API 调用超时 ({:?})", REQUEST_TIMEOUT);
                BackendError::unavailable(CAPABILITY, "request timed out")
            })?
            .map_err(|e| {
                warn!("LLM API 调用失败: {}", e);
                BackendError::unavailable(CAPABILITY, e)
            })?;

        debug!("LLM API 调用成功");

        // 提取响应内容
        let content = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| BackendError::unavailable(CAPABILITY, "LLM 返回内容为空"))?;

        Ok(content.trim().to_string())
    }
}

#[async_trait]
impl TextGenerator for LlmService {
    async fn generate(
        &self,
        system_message: &str,
        user_message: &str,
    ) -> Result<String, BackendError> {
        self.send_to_llm(user_message, Some(system_message)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 测试通用 LLM 调用（需要有效的 LLM_API_KEY）
    ///
    /// 运行方式：
    /// ```bash
    /// cargo test test_send_to_llm_simple -- --ignored --nocapture
    /// ```
    #[tokio::test]
    #[ignore]
    async fn test_send_to_llm_simple() {
        let _ = tracing_subscriber::fmt::try_init();

        let service = LlmService::new(&Config::from_env());
        let result = service
            .send_to_llm("Say hello in one word.", Some("You are terse."))
            .await;

        match result {
            Ok(response) => {
                println!("LLM 响应: {}", response);
                assert!(!response.is_empty());
            }
            Err(e) => panic!("LLM 调用失败: {}", e),
        }
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_unavailable() {
        let config = Config {
            llm_api_key: "test".to_string(),
            llm_api_base_url: "http://127.0.0.1:9/v1".to_string(),
            ..Config::default()
        };
        let service = LlmService::new(&config);

        let err = service.generate("system", "user").await.unwrap_err();
        assert!(err.is_unavailable());
    }
}
