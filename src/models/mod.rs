pub mod results;
pub mod session_view;
pub mod submission;

use std::time::Duration;

pub use results::{
    AnalysisResult, AnalysisSource, Artifact, ArtifactKind, ArtifactPayload, ArtifactStatus,
    ExecutionResult, ExecutionStatus, Insight, Severity, EMPTY_CODE_FEEDBACK,
};
pub use session_view::{FieldPhase, SessionView, Slot, SlotState, ViewField};
pub use submission::{is_blank, Submission, SubmissionId};

/// 沙箱资源限制
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionLimits {
    pub timeout: Duration,
    /// stdout / stderr 各自的最大捕获字节数
    pub max_output_bytes: usize,
}

impl Default for ExecutionLimits {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            max_output_bytes: 64 * 1024,
        }
    }
}
