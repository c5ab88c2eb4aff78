//! 集成测试共用的能力替身

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use ctrl_learn::error::{BackendError, SandboxError};
use ctrl_learn::models::{ExecutionLimits, ExecutionResult, ExecutionStatus};
use ctrl_learn::{
    Backends, CodeExecutor, Config, ImageGenerator, Session, SpeechSynthesizer, Submission,
    TextGenerator,
};
use tokio_util::sync::CancellationToken;

/// 代码中含有该标记时执行、分析都会很慢
pub const SLOW_MARKER: &str = "slow";

pub const SLOW: Duration = Duration::from_secs(5);

/// 可编排的执行器：记录并发数、启动顺序和取消次数
pub struct ScriptedExecutor {
    pub honor_cancel: bool,
    pub active: AtomicUsize,
    pub max_active: AtomicUsize,
    pub cancelled: AtomicUsize,
    pub started: Mutex<Vec<u64>>,
}

impl ScriptedExecutor {
    pub fn new(honor_cancel: bool) -> Arc<Self> {
        Arc::new(Self {
            honor_cancel,
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
            cancelled: AtomicUsize::new(0),
            started: Mutex::new(Vec::new()),
        })
    }

    pub fn started(&self) -> Vec<u64> {
        self.started.lock().unwrap().clone()
    }
}

struct ActiveGuard<'a>(&'a AtomicUsize);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl CodeExecutor for ScriptedExecutor {
    async fn run(
        &self,
        submission: &Submission,
        _limits: &ExecutionLimits,
        cancel: &CancellationToken,
    ) -> Result<ExecutionResult, SandboxError> {
        self.started.lock().unwrap().push(submission.id().get());
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        let _guard = ActiveGuard(&self.active);

        let delay = if submission.code().contains(SLOW_MARKER) {
            SLOW
        } else {
            Duration::from_millis(50)
        };

        if self.honor_cancel {
            tokio::select! {
                _ = cancel.cancelled() => {
                    self.cancelled.fetch_add(1, Ordering::SeqCst);
                    return Err(SandboxError::Cancelled);
                }
                _ = tokio::time::sleep(delay) => {}
            }
        } else {
            tokio::time::sleep(delay).await;
        }

        Ok(ExecutionResult {
            submission_id: submission.id(),
            status: ExecutionStatus::Ok,
            stdout: submission.code().to_string(),
            stderr: String::new(),
            duration_ms: delay.as_millis() as u64,
            exit_code: Some(0),
            truncated: false,
        })
    }
}

/// 返回固定 JSON 报告的文本生成器
pub struct ReviewText;

pub const REVIEW_SUMMARY: &str = "Looks fine.";

#[async_trait]
impl TextGenerator for ReviewText {
    async fn generate(&self, _system: &str, user: &str) -> Result<String, BackendError> {
        let delay = if user.contains(SLOW_MARKER) {
            SLOW
        } else {
            Duration::from_millis(20)
        };
        tokio::time::sleep(delay).await;
        Ok(format!(
            r#"{{"summary": "{}", "issues": [], "suggestions": []}}"#,
            REVIEW_SUMMARY
        ))
    }
}

/// 所有外部能力都不可用
pub struct Offline;

#[async_trait]
impl TextGenerator for Offline {
    async fn generate(&self, _system: &str, _user: &str) -> Result<String, BackendError> {
        Err(BackendError::unavailable("analysis", "connection refused"))
    }
}

#[async_trait]
impl ImageGenerator for Offline {
    async fn generate_image(&self, _prompt: &str) -> Result<String, BackendError> {
        Err(BackendError::unavailable("visualization", "connection refused"))
    }
}

#[async_trait]
impl SpeechSynthesizer for Offline {
    async fn synthesize(&self, _text: &str) -> Result<Vec<u8>, BackendError> {
        Err(BackendError::unavailable("speech", "connection refused"))
    }
}

/// 前 `failures` 次调用失败，之后成功
pub struct FlakyImages {
    failures: usize,
    calls: AtomicUsize,
}

impl FlakyImages {
    pub fn new(failures: usize) -> Arc<Self> {
        Arc::new(Self {
            failures,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ImageGenerator for FlakyImages {
    async fn generate_image(&self, _prompt: &str) -> Result<String, BackendError> {
        tokio::time::sleep(Duration::from_millis(10)).await;
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if n < self.failures {
            Err(BackendError::unavailable("visualization", "rate limited"))
        } else {
            Ok(format!("https://images.test/{}.png", n))
        }
    }
}

/// 记录朗读内容的语音合成器
#[derive(Default)]
pub struct RecordingSpeech {
    pub inputs: Mutex<Vec<String>>,
}

#[async_trait]
impl SpeechSynthesizer for RecordingSpeech {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, BackendError> {
        tokio::time::sleep(Duration::from_millis(10)).await;
        self.inputs.lock().unwrap().push(text.to_string());
        Ok(vec![0xff; 16])
    }
}

pub fn session_with(
    executor: Arc<dyn CodeExecutor>,
    text: Arc<dyn TextGenerator>,
    images: Arc<dyn ImageGenerator>,
    speech: Arc<dyn SpeechSynthesizer>,
) -> Session {
    let config = Config::default();
    let backends = Backends::new(executor, text, images, speech, &config);
    Session::with_settings(
        Arc::new(backends),
        config.execution_limits(),
        config.quiescence(),
    )
}
