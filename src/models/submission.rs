use std::fmt::Display;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// 提交编号
///
/// 每个会话内单调递增，越大越新。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct SubmissionId(pub u64);

impl SubmissionId {
    pub fn get(self) -> u64 {
        self.0
    }

    pub fn next(self) -> Self {
        SubmissionId(self.0 + 1)
    }
}

impl Display for SubmissionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// 一次提交：某一时刻用户代码的不可变快照
#[derive(Debug, Clone)]
pub struct Submission {
    id: SubmissionId,
    code: String,
    created_at: DateTime<Utc>,
}

impl Submission {
    pub fn new(id: SubmissionId, code: impl Into<String>) -> Self {
        Self {
            id,
            code: code.into(),
            created_at: Utc::now(),
        }
    }

    pub fn id(&self) -> SubmissionId {
        self.id
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

/// 代码是否为空（只含空白）
pub fn is_blank(code: &str) -> bool {
    code.trim().is_empty()
}
