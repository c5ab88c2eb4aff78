//! 会话编排器 - 编排层
//!
//! ## 职责
//!
//! 一个会话对应一个编辑器。会话持有全部提交和会话视图：
//!
//! 1. **编号**：每次分发分配一个单调递增的提交编号（generation）
//! 2. **取消**：新提交开始前取消上一次提交的令牌（进程被强制终止，后端调用被丢弃）
//! 3. **调度**：为每次提交启动处理流程（执行 / 分析 → 语音 / 可视化）
//! 4. **合并**：只接受当前提交的结果，按字段独立更新视图并推送给订阅者
//!
//! ## 设计特点
//!
//! - 视图是不可变值，每次更新整体替换（`tokio::sync::watch`）
//! - 过期结果只记录 debug 日志，不视为错误
//! - 任一分支失败不影响其他分支

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info};

use crate::config::Config;
use crate::models::{
    AnalysisResult, ExecutionLimits, FieldPhase, SessionView, Submission, SubmissionId, ViewField,
};
use crate::services::Backends;
use crate::workflow::{
    BranchOutput, DispatchTarget, RequestCoalescer, ResultSink, SubmissionCtx, SubmissionFlow,
};

/// 会话内部状态
struct SessionState {
    /// 最近分配的提交编号
    generation: SubmissionId,
    /// 当前提交（被取消或被空代码取代后为空）
    in_flight: Option<SubmissionCtx>,
    /// 当前提交已被接受的反馈文本（用于重新合成语音）
    accepted_feedback: Option<String>,
}

/// 会话核心：持有状态和视图，接收各分支的结果
struct SessionCore {
    state: Mutex<SessionState>,
    view_tx: watch::Sender<Arc<SessionView>>,
}

impl SessionCore {
    fn new() -> Self {
        let (view_tx, _) = watch::channel(Arc::new(SessionView::default()));
        Self {
            state: Mutex::new(SessionState {
                generation: SubmissionId(0),
                in_flight: None,
                accepted_feedback: None,
            }),
            view_tx,
        }
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// 基于当前视图计算新视图并推送；调用方需持有状态锁，保证更新顺序
    fn publish(&self, update: impl FnOnce(&SessionView) -> Option<SessionView>) -> bool {
        let next = {
            let current = self.view_tx.borrow();
            update(&current)
        };
        match next {
            Some(view) => {
                debug!("视图更新 -> revision {}", view.revision);
                self.view_tx.send_replace(Arc::new(view));
                true
            }
            None => false,
        }
    }

    /// 开始一次新提交：取消上一次提交，分配编号，所有字段进入加载中
    fn begin(&self, code: String) -> SubmissionCtx {
        let mut state = self.lock();

        if let Some(previous) = state.in_flight.take() {
            previous.token.cancel();
            debug!("{} 已被新的提交取代", previous);
        }

        state.generation = state.generation.next();
        state.accepted_feedback = None;

        let ctx = SubmissionCtx::new(Submission::new(state.generation, code));
        state.in_flight = Some(ctx.clone());

        let id = ctx.id();
        self.publish(|view| view.with_loading(id, &ViewField::ALL));
        ctx
    }

    /// 空代码：取代当前提交，直接给出标准分析结果，其余字段置为空闲
    fn resolve_empty(&self) {
        let mut state = self.lock();

        if let Some(previous) = state.in_flight.take() {
            previous.token.cancel();
            debug!("{} 已被空代码取代", previous);
        }

        state.generation = state.generation.next();
        state.accepted_feedback = None;
        let id = state.generation;

        self.publish(|view| {
            view.with_idle(
                id,
                &[ViewField::Execution, ViewField::Visualization, ViewField::Speech],
            )?
            .with_analysis(AnalysisResult::empty(id))
        });
        info!("[提交 {}] 代码为空，显示默认提示", id);
    }

    /// 取消当前提交，仍在加载中的字段恢复为空闲
    fn cancel_in_flight(&self) {
        let mut state = self.lock();
        if let Some(ctx) = state.in_flight.take() {
            ctx.token.cancel();
            let id = ctx.id();
            self.publish(|view| view.with_loading_cleared(id));
            info!("{} ⏹️ 已取消", ctx);
        }
    }

    /// 准备重新生成某个产物：字段必须已经结束加载
    ///
    /// # 返回
    /// 当前提交的上下文，以及（语音时）已接受的反馈文本
    fn begin_regeneration(&self, field: ViewField) -> Option<(SubmissionCtx, Option<String>)> {
        let state = self.lock();
        let ctx = state.in_flight.clone()?;

        let phase = self.view_tx.borrow().phase(field);
        if !matches!(phase, FieldPhase::Ready | FieldPhase::Failed) {
            debug!("{} {:?} 尚未结束（{:?}），不重新生成", ctx, field, phase);
            return None;
        }

        let feedback = match field {
            ViewField::Speech => Some(state.accepted_feedback.clone()?),
            _ => None,
        };

        let id = ctx.id();
        self.publish(|view| view.with_loading(id, &[field]));
        Some((ctx, feedback))
    }

    fn current_id(&self) -> Option<SubmissionId> {
        self.lock().in_flight.as_ref().map(SubmissionCtx::id)
    }
}

impl ResultSink for SessionCore {
    fn offer(&self, output: BranchOutput) -> bool {
        let mut state = self.lock();
        let id = output.submission_id();

        let current = state.in_flight.as_ref().map(SubmissionCtx::id);
        if current != Some(id) {
            debug!("[提交 {}] 结果已过期（当前: {:?}），丢弃", id, current);
            return false;
        }

        let feedback = match &output {
            BranchOutput::Analysis(analysis) => Some(analysis.feedback_text.clone()),
            _ => None,
        };

        let accepted = self.publish(|view| match output {
            BranchOutput::Execution(result) => view.with_execution(result),
            BranchOutput::Analysis(result) => view.with_analysis(result),
            BranchOutput::Artifact(artifact) => view.with_artifact(artifact),
        });

        if accepted {
            if feedback.is_some() {
                state.accepted_feedback = feedback;
            }
        } else {
            debug!("[提交 {}] 字段已有更新的结果，丢弃", id);
        }
        accepted
    }
}

/// 合并器的分发目标：为每次提交启动处理流程
struct Dispatcher {
    core: Arc<SessionCore>,
    flow: SubmissionFlow,
}

impl DispatchTarget for Dispatcher {
    fn dispatch(&self, code: String) {
        let ctx = self.core.begin(code);
        let flow = self.flow.clone();
        let sink: Arc<dyn ResultSink> = self.core.clone();
        tokio::spawn(async move { flow.run(ctx, sink).await });
    }

    fn resolve_empty(&self) {
        self.core.resolve_empty();
    }
}

/// 编辑会话
///
/// 所有方法都必须在 tokio 运行时中调用。
pub struct Session {
    core: Arc<SessionCore>,
    flow: SubmissionFlow,
    coalescer: RequestCoalescer,
}

impl Session {
    /// 按配置创建会话
    pub fn new(backends: Backends, config: &Config) -> Self {
        Self::with_settings(
            Arc::new(backends),
            config.execution_limits(),
            config.quiescence(),
        )
    }

    /// 使用已组装的后端和显式的限制创建会话，测试中可传入替身后端
    pub fn with_settings(
        backends: Arc<Backends>,
        limits: ExecutionLimits,
        quiescence: Duration,
    ) -> Self {
        let core = Arc::new(SessionCore::new());
        let flow = SubmissionFlow::new(backends, limits);
        let dispatcher = Arc::new(Dispatcher {
            core: core.clone(),
            flow: flow.clone(),
        });

        Self {
            core,
            flow,
            coalescer: RequestCoalescer::new(quiescence, dispatcher),
        }
    }

    /// 编辑事件：静默窗口结束后以最新代码提交
    pub fn edit(&self, code: impl Into<String>) {
        self.coalescer.notify(code);
    }

    /// 显式运行：立即提交
    pub fn submit(&self, code: impl Into<String>) {
        self.coalescer.run_now(code);
    }

    /// 丢弃待发的编辑，并取消当前提交
    pub fn cancel(&self) {
        self.coalescer.cancel();
        self.core.cancel_in_flight();
    }

    /// 订阅视图更新
    pub fn subscribe(&self) -> watch::Receiver<Arc<SessionView>> {
        self.core.view_tx.subscribe()
    }

    /// 当前视图
    pub fn snapshot(&self) -> Arc<SessionView> {
        self.core.view_tx.borrow().clone()
    }

    /// 当前提交编号
    pub fn current_submission(&self) -> Option<SubmissionId> {
        self.core.current_id()
    }

    /// 等待所有字段结束加载，返回此时的视图
    pub async fn wait_settled(&self) -> Arc<SessionView> {
        let mut rx = self.subscribe();
        let settled = rx.wait_for(|view| view.is_settled()).await.map(|view| view.clone());
        match settled {
            Ok(view) => view,
            Err(_) => self.snapshot(),
        }
    }

    /// 为当前提交重新生成可视化（跳过缓存）
    ///
    /// # 返回
    /// 是否已开始重新生成
    pub fn regenerate_visualization(&self) -> bool {
        let Some((ctx, _)) = self.core.begin_regeneration(ViewField::Visualization) else {
            return false;
        };
        info!("{} 🔄 重新生成可视化", ctx);

        let flow = self.flow.clone();
        let sink: Arc<dyn ResultSink> = self.core.clone();
        tokio::spawn(async move { flow.run_visualization(&ctx, sink.as_ref(), true).await });
        true
    }

    /// 为当前提交重新合成语音（跳过缓存）
    pub fn regenerate_speech(&self) -> bool {
        let Some((ctx, Some(feedback))) = self.core.begin_regeneration(ViewField::Speech) else {
            return false;
        };
        info!("{} 🔄 重新合成语音", ctx);

        let flow = self.flow.clone();
        let sink: Arc<dyn ResultSink> = self.core.clone();
        tokio::spawn(async move { flow.run_speech(&ctx, sink.as_ref(), &feedback, true).await });
        true
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.coalescer.cancel();
        self.core.cancel_in_flight();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AnalysisSource, ArtifactStatus, ExecutionResult, EMPTY_CODE_FEEDBACK};

    fn execution(id: u64) -> BranchOutput {
        BranchOutput::Execution(ExecutionResult::system_error(SubmissionId(id), "x"))
    }

    #[test]
    fn test_only_current_submission_is_accepted() {
        let core = SessionCore::new();
        let first = core.begin("print(1)".to_string());
        let second = core.begin("print(2)".to_string());

        assert!(first.is_cancelled());
        assert!(!second.is_cancelled());
        assert!(!core.offer(execution(1)));
        assert!(core.offer(execution(2)));

        let view = core.view_tx.borrow().clone();
        assert_eq!(view.execution.submission_id, Some(SubmissionId(2)));
    }

    #[test]
    fn test_empty_code_resolves_without_submission() {
        let core = SessionCore::new();
        let first = core.begin("print(1)".to_string());
        core.resolve_empty();

        assert!(first.is_cancelled());
        assert_eq!(core.current_id(), None);
        assert!(!core.offer(execution(1)));

        let view = core.view_tx.borrow().clone();
        let analysis = view.analysis.value().unwrap();
        assert_eq!(analysis.feedback_text, EMPTY_CODE_FEEDBACK);
        assert_eq!(analysis.source, AnalysisSource::Fallback);
        assert_eq!(analysis.submission_id, SubmissionId(2));
        assert!(view.is_settled());
    }

    #[test]
    fn test_cancel_makes_results_stale() {
        let core = SessionCore::new();
        let ctx = core.begin("print(1)".to_string());
        core.cancel_in_flight();

        assert!(ctx.is_cancelled());
        assert!(!core.offer(execution(1)));
        assert!(core.view_tx.borrow().is_settled());
    }

    #[test]
    fn test_regeneration_requires_settled_field() {
        let core = SessionCore::new();
        core.begin("print('hello')".to_string());

        // 仍在加载中
        assert!(core.begin_regeneration(ViewField::Visualization).is_none());

        core.offer(BranchOutput::Artifact(crate::models::Artifact::failed(
            SubmissionId(1),
            crate::models::ArtifactKind::Visualization,
            "boom",
        )));
        let (ctx, feedback) = core.begin_regeneration(ViewField::Visualization).unwrap();
        assert_eq!(ctx.id(), SubmissionId(1));
        assert!(feedback.is_none());

        let view = core.view_tx.borrow().clone();
        assert_eq!(view.phase(ViewField::Visualization), FieldPhase::Loading);
        assert_ne!(
            view.visualization.value().map(|a| a.status),
            Some(ArtifactStatus::Failed)
        );
    }
}
