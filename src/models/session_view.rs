//! 会话视图
//!
//! UI 可见的合并状态。视图本身不可变，每次被接受的更新都会生成一个新值整体替换旧值。
//! 每个字段都带着它所属的提交编号，用来做单调性检查：
//! 字段上已经出现过编号 `k` 之后，任何编号小于 `k` 的结果都不能再改变该字段。

use serde::Serialize;

use crate::models::results::{AnalysisResult, Artifact, ArtifactStatus, ExecutionResult};
use crate::models::submission::SubmissionId;

/// 字段所处阶段
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "phase", content = "value", rename_all = "lowercase")]
pub enum SlotState<T> {
    Idle,
    Loading,
    Ready(T),
}

/// 供 UI 渲染的三态（外加初始的 Idle）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FieldPhase {
    Idle,
    Loading,
    Ready,
    Failed,
}

/// 带版本的字段
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Slot<T> {
    /// 最近一次写入该字段的提交编号
    pub submission_id: Option<SubmissionId>,
    pub state: SlotState<T>,
}

impl<T> Default for Slot<T> {
    fn default() -> Self {
        Self {
            submission_id: None,
            state: SlotState::Idle,
        }
    }
}

impl<T> Slot<T> {
    /// 编号为 `id` 的写入是否被允许
    fn admits(&self, id: SubmissionId) -> bool {
        self.submission_id.map_or(true, |current| id >= current)
    }

    fn set(&mut self, id: SubmissionId, state: SlotState<T>) -> bool {
        if !self.admits(id) {
            return false;
        }
        self.submission_id = Some(id);
        self.state = state;
        true
    }

    pub fn value(&self) -> Option<&T> {
        match &self.state {
            SlotState::Ready(value) => Some(value),
            _ => None,
        }
    }

    pub fn is_loading(&self) -> bool {
        matches!(self.state, SlotState::Loading)
    }

    fn phase_with(&self, failed: impl Fn(&T) -> bool) -> FieldPhase {
        match &self.state {
            SlotState::Idle => FieldPhase::Idle,
            SlotState::Loading => FieldPhase::Loading,
            SlotState::Ready(value) if failed(value) => FieldPhase::Failed,
            SlotState::Ready(_) => FieldPhase::Ready,
        }
    }
}

/// 视图中的字段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ViewField {
    Execution,
    Analysis,
    Visualization,
    Speech,
}

impl ViewField {
    pub const ALL: [ViewField; 4] = [
        ViewField::Execution,
        ViewField::Analysis,
        ViewField::Visualization,
        ViewField::Speech,
    ];
}

/// 会话视图快照
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionView {
    /// 每次被接受的更新加一
    pub revision: u64,
    pub execution: Slot<ExecutionResult>,
    pub analysis: Slot<AnalysisResult>,
    pub visualization: Slot<Artifact>,
    pub speech: Slot<Artifact>,
}

impl SessionView {
    /// 将给定字段标记为加载中，返回新视图；若会违反单调性则返回 None
    pub fn with_loading(&self, id: SubmissionId, fields: &[ViewField]) -> Option<Self> {
        let mut next = self.clone();
        let mut changed = false;
        for field in fields {
            changed |= match field {
                ViewField::Execution => next.execution.set(id, SlotState::Loading),
                ViewField::Analysis => next.analysis.set(id, SlotState::Loading),
                ViewField::Visualization => next.visualization.set(id, SlotState::Loading),
                ViewField::Speech => next.speech.set(id, SlotState::Loading),
            };
        }
        changed.then(|| next.bump())
    }

    /// 将给定字段重置为空闲
    pub fn with_idle(&self, id: SubmissionId, fields: &[ViewField]) -> Option<Self> {
        let mut next = self.clone();
        let mut changed = false;
        for field in fields {
            changed |= match field {
                ViewField::Execution => next.execution.set(id, SlotState::Idle),
                ViewField::Analysis => next.analysis.set(id, SlotState::Idle),
                ViewField::Visualization => next.visualization.set(id, SlotState::Idle),
                ViewField::Speech => next.speech.set(id, SlotState::Idle),
            };
        }
        changed.then(|| next.bump())
    }

    /// 取消提交 `id` 后，把仍在加载中的字段恢复为空闲，已就绪的字段保持不变
    pub fn with_loading_cleared(&self, id: SubmissionId) -> Option<Self> {
        let pending: Vec<ViewField> = ViewField::ALL
            .into_iter()
            .filter(|field| {
                let (owner, loading) = match field {
                    ViewField::Execution => {
                        (self.execution.submission_id, self.execution.is_loading())
                    }
                    ViewField::Analysis => {
                        (self.analysis.submission_id, self.analysis.is_loading())
                    }
                    ViewField::Visualization => {
                        (self.visualization.submission_id, self.visualization.is_loading())
                    }
                    ViewField::Speech => (self.speech.submission_id, self.speech.is_loading()),
                };
                owner == Some(id) && loading
            })
            .collect();

        if pending.is_empty() {
            return None;
        }
        self.with_idle(id, &pending)
    }

    pub fn with_execution(&self, result: ExecutionResult) -> Option<Self> {
        let mut next = self.clone();
        let id = result.submission_id;
        next.execution
            .set(id, SlotState::Ready(result))
            .then(|| next.bump())
    }

    pub fn with_analysis(&self, result: AnalysisResult) -> Option<Self> {
        let mut next = self.clone();
        let id = result.submission_id;
        next.analysis
            .set(id, SlotState::Ready(result))
            .then(|| next.bump())
    }

    /// 按产物种类写入可视化或语音字段
    pub fn with_artifact(&self, artifact: Artifact) -> Option<Self> {
        let mut next = self.clone();
        let id = artifact.submission_id;
        let slot = match artifact.kind {
            crate::models::ArtifactKind::Visualization => &mut next.visualization,
            crate::models::ArtifactKind::Speech => &mut next.speech,
        };
        slot.set(id, SlotState::Ready(artifact)).then(|| next.bump())
    }

    fn bump(mut self) -> Self {
        self.revision += 1;
        self
    }

    pub fn phase(&self, field: ViewField) -> FieldPhase {
        let artifact_failed = |a: &Artifact| a.status != ArtifactStatus::Ready;
        match field {
            ViewField::Execution => self.execution.phase_with(|r| !r.is_ok()),
            ViewField::Analysis => self.analysis.phase_with(|_| false),
            ViewField::Visualization => self.visualization.phase_with(artifact_failed),
            ViewField::Speech => self.speech.phase_with(artifact_failed),
        }
    }

    /// 是否所有字段都已不在加载中
    pub fn is_settled(&self) -> bool {
        ViewField::ALL
            .iter()
            .all(|field| self.phase(*field) != FieldPhase::Loading)
    }
}
