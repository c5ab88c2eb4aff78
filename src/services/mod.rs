//! 业务能力层
//!
//! 每个服务只描述"我能做什么"，只处理单个提交，不关心是否过期。

pub mod analysis_service;
pub mod artifact_cache;
pub mod heuristic;
pub mod llm_service;
pub mod speech_service;
pub mod visualization_service;

use std::sync::Arc;

pub use analysis_service::AnalysisService;
pub use artifact_cache::ArtifactCache;
pub use heuristic::HeuristicAnalyzer;
pub use llm_service::{LlmService, TextGenerator};
pub use speech_service::{OpenAiSpeechClient, SpeechService, SpeechSynthesizer};
pub use visualization_service::{ImageGenerator, OpenAiImageClient, VisualizationService};

use crate::config::Config;
use crate::infrastructure::{CodeExecutor, ProcessSandbox};

/// 一个会话用到的全部能力
pub struct Backends {
    pub executor: Arc<dyn CodeExecutor>,
    pub analysis: AnalysisService,
    pub visualization: VisualizationService,
    pub speech: SpeechService,
}

impl Backends {
    /// 用给定的能力实现组装
    pub fn new(
        executor: Arc<dyn CodeExecutor>,
        text: Arc<dyn TextGenerator>,
        images: Arc<dyn ImageGenerator>,
        speech: Arc<dyn SpeechSynthesizer>,
        config: &Config,
    ) -> Self {
        Self {
            executor,
            analysis: AnalysisService::new(text),
            visualization: VisualizationService::new(images, config),
            speech: SpeechService::new(speech, config),
        }
    }

    /// 按配置创建真实的能力实现（本地进程沙箱 + 兼容 OpenAI 的接口）
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            Arc::new(ProcessSandbox::new(config)),
            Arc::new(LlmService::new(config)),
            Arc::new(OpenAiImageClient::new(config)),
            Arc::new(OpenAiSpeechClient::new(config)),
            config,
        )
    }
}
