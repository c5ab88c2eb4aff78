//! 编排层（Orchestration Layer）
//!
//! ## 职责
//!
//! 本层负责会话级的调度，是整个系统的"指挥中心"。
//!
//! ## 模块划分
//!
//! ### `session` - 会话编排器
//! - 分配提交编号，取消被取代的提交
//! - 为每次提交启动 `SubmissionFlow`
//! - 丢弃过期结果，按字段合并视图并推送
//! - 提供取消和重新生成产物的入口
//!
//! ## 层次关系
//!
//! ```text
//! session (编辑事件 → 提交 → 视图)
//!     ↓
//! workflow::RequestCoalescer (合并编辑事件)
//!     ↓
//! workflow::SubmissionFlow (处理单次提交)
//!     ↓
//! services (能力层：analysis / visualization / speech)
//!     ↓
//! infrastructure (基础设施：ProcessSandbox)
//! ```
//!
//! ## 设计原则
//!
//! 1. **唯一所有者**：只有编排层持有提交和会话视图
//! 2. **向下依赖**：编排层 → workflow → services → infrastructure
//! 3. **无业务逻辑**：只做调度和合并，不做具体业务判断

pub mod session;

pub use session::Session;
