//! 提交处理流程 - 流程层
//!
//! 核心职责：定义"一次提交"的完整处理流程
//!
//! 三个分支并发执行，互不影响：
//! 1. 执行：排队进入执行通道 → 沙箱运行
//! 2. 分析：代码分析 → 分析结果被接受后 → 语音合成
//! 3. 可视化
//!
//! 流程不判断结果是否过期，结果统一交给 `ResultSink`，由编排层决定是否接受。

use std::future::Future;
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::error::SandboxError;
use crate::models::{AnalysisResult, Artifact, ExecutionLimits, ExecutionResult, SubmissionId};
use crate::services::Backends;
use crate::utils::logging::truncate_text;
use crate::workflow::submission_ctx::SubmissionCtx;

/// 分支产出
#[derive(Debug, Clone)]
pub enum BranchOutput {
    Execution(ExecutionResult),
    Analysis(AnalysisResult),
    Artifact(Artifact),
}

impl BranchOutput {
    pub fn submission_id(&self) -> SubmissionId {
        match self {
            BranchOutput::Execution(r) => r.submission_id,
            BranchOutput::Analysis(r) => r.submission_id,
            BranchOutput::Artifact(a) => a.submission_id,
        }
    }
}

/// 分支结果的接收方
pub trait ResultSink: Send + Sync {
    /// 交付一个结果，返回是否被接受（过期结果返回 false）
    fn offer(&self, output: BranchOutput) -> bool;
}

/// 在令牌触发前等待 `fut`，被取消时返回 None（`fut` 随之被丢弃）
pub async fn until_cancelled<F: Future>(token: &CancellationToken, fut: F) -> Option<F::Output> {
    tokio::select! {
        biased;
        _ = token.cancelled() => None,
        output = fut => Some(output),
    }
}

/// 提交处理流程
///
/// - 编排单次提交的三个分支
/// - 持有会话级的执行通道，保证同一时间最多一个进程在运行
/// - 只依赖业务能力（services）
#[derive(Clone)]
pub struct SubmissionFlow {
    backends: Arc<Backends>,
    limits: ExecutionLimits,
    execution_lane: Arc<Mutex<()>>,
}

impl SubmissionFlow {
    pub fn new(backends: Arc<Backends>, limits: ExecutionLimits) -> Self {
        Self {
            backends,
            limits,
            execution_lane: Arc::new(Mutex::new(())),
        }
    }

    /// 处理一次提交，所有分支结束后返回
    pub async fn run(&self, ctx: SubmissionCtx, sink: Arc<dyn ResultSink>) {
        info!(
            "{} 🚀 开始处理: {}",
            ctx,
            truncate_text(ctx.submission.code().trim(), 40)
        );

        let execution = {
            let (flow, ctx, sink) = (self.clone(), ctx.clone(), sink.clone());
            tokio::spawn(async move { flow.run_execution(&ctx, sink.as_ref()).await })
        };
        let analysis = {
            let (flow, ctx, sink) = (self.clone(), ctx.clone(), sink.clone());
            tokio::spawn(async move { flow.run_analysis(&ctx, sink.as_ref()).await })
        };
        let visualization = {
            let (flow, ctx, sink) = (self.clone(), ctx.clone(), sink.clone());
            tokio::spawn(async move { flow.run_visualization(&ctx, sink.as_ref(), false).await })
        };

        for joined in join_all([execution, analysis, visualization]).await {
            if let Err(e) = joined {
                error!("{} ❌ 分支异常退出: {}", ctx, e);
            }
        }

        let elapsed = chrono::Utc::now() - ctx.submission.created_at();
        debug!(
            "{} 所有分支已结束 (自提交起 {} ms)",
            ctx,
            elapsed.num_milliseconds()
        );
    }

    /// 执行分支
    pub async fn run_execution(&self, ctx: &SubmissionCtx, sink: &dyn ResultSink) {
        // 排队时被取代则不再启动进程
        let Some(_lane) = until_cancelled(&ctx.token, self.execution_lane.lock()).await else {
            debug!("{} 排队等待执行时被取消", ctx);
            return;
        };

        debug!("{} ▶️ 开始执行", ctx);
        let result = match self
            .backends
            .executor
            .run(&ctx.submission, &self.limits, &ctx.token)
            .await
        {
            Ok(result) => result,
            Err(SandboxError::Cancelled) => {
                debug!("{} 执行已取消", ctx);
                return;
            }
            Err(e) => {
                error!("{} ❌ 沙箱错误: {}", ctx, e);
                ExecutionResult::system_error(ctx.id(), e.to_string())
            }
        };

        sink.offer(BranchOutput::Execution(result));
    }

    /// 分析分支（分析被接受后继续合成语音）
    pub async fn run_analysis(&self, ctx: &SubmissionCtx, sink: &dyn ResultSink) {
        let Some(analysis) =
            until_cancelled(&ctx.token, self.backends.analysis.analyze(&ctx.submission)).await
        else {
            debug!("{} 分析已取消", ctx);
            return;
        };

        let feedback = analysis.feedback_text.clone();
        if sink.offer(BranchOutput::Analysis(analysis)) {
            self.run_speech(ctx, sink, &feedback, false).await;
        }
    }

    /// 可视化分支
    pub async fn run_visualization(
        &self,
        ctx: &SubmissionCtx,
        sink: &dyn ResultSink,
        regenerate: bool,
    ) {
        let visualization = &self.backends.visualization;
        let produce = async {
            if regenerate {
                visualization.regenerate(&ctx.submission).await
            } else {
                visualization.visualize(&ctx.submission).await
            }
        };

        match until_cancelled(&ctx.token, produce).await {
            Some(artifact) => {
                sink.offer(BranchOutput::Artifact(artifact));
            }
            None => debug!("{} 可视化已取消", ctx),
        }
    }

    /// 语音分支
    pub async fn run_speech(
        &self,
        ctx: &SubmissionCtx,
        sink: &dyn ResultSink,
        feedback: &str,
        regenerate: bool,
    ) {
        let speech = &self.backends.speech;
        let produce = async {
            if regenerate {
                speech.regenerate(ctx.id(), feedback).await
            } else {
                speech.speak(ctx.id(), feedback).await
            }
        };

        match until_cancelled(&ctx.token, produce).await {
            Some(artifact) => {
                sink.offer(BranchOutput::Artifact(artifact));
            }
            None => debug!("{} 语音合成已取消", ctx),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::error::BackendError;
    use crate::infrastructure::CodeExecutor;
    use crate::models::{
        AnalysisSource, ArtifactKind, ExecutionStatus, Submission,
    };
    use crate::services::{ImageGenerator, SpeechSynthesizer, TextGenerator};
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;

    struct EchoExecutor;

    #[async_trait]
    impl CodeExecutor for EchoExecutor {
        async fn run(
            &self,
            submission: &Submission,
            _limits: &ExecutionLimits,
            _cancel: &CancellationToken,
        ) -> Result<ExecutionResult, SandboxError> {
            Ok(ExecutionResult {
                submission_id: submission.id(),
                status: ExecutionStatus::Ok,
                stdout: submission.code().to_string(),
                stderr: String::new(),
                duration_ms: 0,
                exit_code: Some(0),
                truncated: false,
            })
        }
    }

    struct Down;

    #[async_trait]
    impl TextGenerator for Down {
        async fn generate(&self, _s: &str, _u: &str) -> Result<String, BackendError> {
            Err(BackendError::unavailable("analysis", "offline"))
        }
    }

    #[async_trait]
    impl ImageGenerator for Down {
        async fn generate_image(&self, _p: &str) -> Result<String, BackendError> {
            Err(BackendError::unavailable("visualization", "offline"))
        }
    }

    struct Beep;

    #[async_trait]
    impl SpeechSynthesizer for Beep {
        async fn synthesize(&self, _t: &str) -> Result<Vec<u8>, BackendError> {
            Ok(vec![7])
        }
    }

    /// 记录所有结果，可配置是否拒绝分析结果
    struct RecordingSink {
        outputs: StdMutex<Vec<BranchOutput>>,
        accept_analysis: bool,
    }

    impl ResultSink for RecordingSink {
        fn offer(&self, output: BranchOutput) -> bool {
            let accepted = self.accept_analysis || !matches!(output, BranchOutput::Analysis(_));
            self.outputs.lock().unwrap().push(output);
            accepted
        }
    }

    fn flow() -> SubmissionFlow {
        let backends = Backends::new(
            Arc::new(EchoExecutor),
            Arc::new(Down),
            Arc::new(Down),
            Arc::new(Beep),
            &Config::default(),
        );
        SubmissionFlow::new(Arc::new(backends), ExecutionLimits::default())
    }

    fn sink(accept_analysis: bool) -> Arc<RecordingSink> {
        Arc::new(RecordingSink {
            outputs: StdMutex::new(Vec::new()),
            accept_analysis,
        })
    }

    #[tokio::test]
    async fn test_all_branches_deliver_despite_failures() {
        let sink = sink(true);
        let ctx = SubmissionCtx::new(Submission::new(SubmissionId(1), "print('hello world')"));

        flow().run(ctx, sink.clone()).await;

        let outputs = sink.outputs.lock().unwrap();
        assert_eq!(outputs.len(), 4);
        assert!(outputs.iter().all(|o| o.submission_id() == SubmissionId(1)));
        assert!(outputs.iter().any(|o| matches!(
            o,
            BranchOutput::Analysis(a) if a.source == AnalysisSource::Fallback
        )));
        assert!(outputs.iter().any(|o| matches!(
            o,
            BranchOutput::Artifact(a) if a.kind == ArtifactKind::Speech && a.is_ready()
        )));
        assert!(outputs.iter().any(|o| matches!(
            o,
            BranchOutput::Artifact(a) if a.kind == ArtifactKind::Visualization && !a.is_ready()
        )));
    }

    #[tokio::test]
    async fn test_speech_skipped_when_analysis_rejected() {
        let sink = sink(false);
        let ctx = SubmissionCtx::new(Submission::new(SubmissionId(1), "print(1)"));

        flow().run_analysis(&ctx, sink.as_ref()).await;

        let outputs = sink.outputs.lock().unwrap();
        assert_eq!(outputs.len(), 1);
        assert!(matches!(outputs[0], BranchOutput::Analysis(_)));
    }

    #[tokio::test]
    async fn test_cancelled_before_start_delivers_nothing() {
        let sink = sink(true);
        let ctx = SubmissionCtx::new(Submission::new(SubmissionId(1), "print('hello world')"));
        ctx.token.cancel();

        flow().run(ctx, sink.clone()).await;

        assert!(sink.outputs.lock().unwrap().is_empty());
    }
}
