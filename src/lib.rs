//! # Ctrl Learn
//!
//! 在线编程辅导的提交编排引擎：把用户的编辑和运行请求变成一组一致、不过期的结果
//! （执行输出、代码分析、流程图、语音朗读）。
//!
//! ## 架构设计
//!
//! 本系统采用严格的四层架构：
//!
//! ### ① 基础设施层（Infrastructure）
//! - `infrastructure/` - 持有稀缺资源（子进程、临时工作区），只暴露能力
//! - `ProcessSandbox` - 在隔离进程中执行代码，限制时间和输出
//! - `EphemeralWorkspace` - 单次执行的临时目录，随守卫释放
//!
//! ### ② 业务能力层（Services）
//! - `services/` - 描述"我能做什么"，只处理单个提交
//! - `AnalysisService` - 代码分析（LLM + 本地启发式降级）
//! - `VisualizationService` - 流程图生成
//! - `SpeechService` - 反馈语音合成
//!
//! ### ③ 流程层（Workflow）
//! - `workflow/` - 定义"一次提交"的完整处理流程
//! - `RequestCoalescer` - 合并连续的编辑事件
//! - `SubmissionCtx` - 上下文封装（提交 + 取消令牌）
//! - `SubmissionFlow` - 分支编排（执行 / 分析 → 语音 / 可视化）
//!
//! ### ④ 编排层（Orchestration）
//! - `orchestrator/session` - 会话编排器，丢弃过期结果并合并视图
//!
//! ## 模块结构

pub mod config;
pub mod error;
pub mod infrastructure;

pub mod models;
pub mod orchestrator;
pub mod services;
pub mod utils;
pub mod workflow;

// 重新导出常用类型
pub use config::Config;
pub use error::{BackendError, ConfigError, SandboxError};
pub use infrastructure::{CodeExecutor, ProcessSandbox};
pub use models::{
    AnalysisResult, Artifact, ExecutionResult, FieldPhase, SessionView, Submission, SubmissionId,
    ViewField,
};
pub use orchestrator::Session;
pub use services::{Backends, ImageGenerator, SpeechSynthesizer, TextGenerator};
pub use workflow::{RequestCoalescer, SubmissionCtx, SubmissionFlow};
