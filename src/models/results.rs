//! 各分支产出的结果类型
//!
//! 结果一旦产生就不可变，由各能力交还给编排层。

use serde::Serialize;

use crate::models::submission::SubmissionId;

// ========== 执行结果 ==========

/// 执行状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ExecutionStatus {
    Ok,
    TimedOut,
    RuntimeError,
    SystemError,
}

/// 沙箱执行结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionResult {
    pub submission_id: SubmissionId,
    pub status: ExecutionStatus,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
    /// 进程退出码（被信号终止或未启动时为空）
    pub exit_code: Option<i32>,
    /// 任一输出流是否达到上限被截断
    pub truncated: bool,
}

impl ExecutionResult {
    /// 沙箱自身出错（未能启动或准备资源）
    pub fn system_error(submission_id: SubmissionId, message: impl Into<String>) -> Self {
        Self {
            submission_id,
            status: ExecutionStatus::SystemError,
            stdout: String::new(),
            stderr: message.into(),
            duration_ms: 0,
            exit_code: None,
            truncated: false,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == ExecutionStatus::Ok
    }
}

// ========== 分析结果 ==========

/// 洞察的严重程度
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Tip,
}

impl Severity {
    /// 宽松解析模型返回的严重程度，无法识别时视为 Info
    pub fn parse_lenient(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "error" | "critical" | "fatal" => Severity::Error,
            "warning" | "warn" => Severity::Warning,
            "tip" | "suggestion" | "hint" => Severity::Tip,
            _ => Severity::Info,
        }
    }
}

/// 与代码行关联的一条洞察
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Insight {
    /// 行号（从 1 开始）
    pub line: usize,
    pub snippet: String,
    pub explanation: String,
    pub severity: Severity,
}

/// 分析结果来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AnalysisSource {
    Model,
    Fallback,
}

/// 代码分析结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisResult {
    pub submission_id: SubmissionId,
    pub feedback_text: String,
    pub insights: Vec<Insight>,
    pub source: AnalysisSource,
}

/// 空代码的标准反馈
pub const EMPTY_CODE_FEEDBACK: &str = "Write some code to get feedback.";

impl AnalysisResult {
    /// 空代码对应的标准分析结果，不调用任何后端
    pub fn empty(submission_id: SubmissionId) -> Self {
        Self {
            submission_id,
            feedback_text: EMPTY_CODE_FEEDBACK.to_string(),
            insights: Vec::new(),
            source: AnalysisSource::Fallback,
        }
    }
}

// ========== 产物 ==========

/// 产物种类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ArtifactKind {
    Visualization,
    Speech,
}

/// 产物状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ArtifactStatus {
    Ready,
    /// 后端调用失败，需要用户主动重新生成
    Failed,
    /// 前置条件不满足（如代码太短），不会重试
    Unavailable,
}

/// 产物载荷
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ArtifactPayload {
    /// 图片地址
    Uri { uri: String },
    /// 音频数据（序列化时只输出长度）
    Audio {
        #[serde(rename = "bytes", serialize_with = "serialize_len")]
        data: Vec<u8>,
    },
    None,
}

fn serialize_len<S: serde::Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(data.len() as u64)
}

/// 可视化或语音产物
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Artifact {
    pub submission_id: SubmissionId,
    pub kind: ArtifactKind,
    pub payload: ArtifactPayload,
    pub status: ArtifactStatus,
    /// 失败或不可用时的原因
    pub detail: Option<String>,
}

impl Artifact {
    pub fn ready(
        submission_id: SubmissionId,
        kind: ArtifactKind,
        payload: ArtifactPayload,
    ) -> Self {
        Self {
            submission_id,
            kind,
            payload,
            status: ArtifactStatus::Ready,
            detail: None,
        }
    }

    pub fn failed(
        submission_id: SubmissionId,
        kind: ArtifactKind,
        cause: impl Into<String>,
    ) -> Self {
        Self {
            submission_id,
            kind,
            payload: ArtifactPayload::None,
            status: ArtifactStatus::Failed,
            detail: Some(cause.into()),
        }
    }

    pub fn unavailable(
        submission_id: SubmissionId,
        kind: ArtifactKind,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            submission_id,
            kind,
            payload: ArtifactPayload::None,
            status: ArtifactStatus::Unavailable,
            detail: Some(reason.into()),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.status == ArtifactStatus::Ready
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_parse_lenient() {
        assert_eq!(Severity::parse_lenient("ERROR"), Severity::Error);
        assert_eq!(Severity::parse_lenient(" warn "), Severity::Warning);
        assert_eq!(Severity::parse_lenient("suggestion"), Severity::Tip);
        assert_eq!(Severity::parse_lenient("whatever"), Severity::Info);
    }

    #[test]
    fn test_audio_payload_serializes_length_only() {
        let artifact = Artifact::ready(
            SubmissionId(3),
            ArtifactKind::Speech,
            ArtifactPayload::Audio { data: vec![0u8; 42] },
        );
        let json = serde_json::to_value(&artifact).unwrap();
        assert_eq!(json["payload"]["type"], "audio");
        assert_eq!(json["payload"]["bytes"], 42);
        assert_eq!(json["submission_id"], 3);
    }
}
