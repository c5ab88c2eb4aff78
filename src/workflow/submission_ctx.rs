//! 提交处理上下文
//!
//! 封装"我正在处理哪一次提交"以及它的取消令牌

use std::fmt::Display;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::models::{Submission, SubmissionId};

/// 提交处理上下文
///
/// 克隆开销很小，每个分支各持一份。
#[derive(Debug, Clone)]
pub struct SubmissionCtx {
    pub submission: Arc<Submission>,

    /// 该提交被取代或会话取消时触发
    pub token: CancellationToken,
}

impl SubmissionCtx {
    pub fn new(submission: Submission) -> Self {
        Self {
            submission: Arc::new(submission),
            token: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> SubmissionId {
        self.submission.id()
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Display for SubmissionCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[提交 {}]", self.id())
    }
}
