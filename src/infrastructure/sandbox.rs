//! 沙箱运行器 - 基础设施层
//!
//! 在独立进程中执行一次不可信的代码提交，限制时间和输出大小。
//!
//! ## 隔离方式
//! - 代码写入唯一命名的临时工作区，进程的工作目录就是该工作区
//! - 清空环境变量，只保留 PATH 和编码设置；stdin 为空
//! - 解释器默认以 `-I -B -u` 运行（隔离模式、不写字节码、无缓冲输出）
//! - 可配置启动前缀（如 `unshare -rn`）进一步收紧网络和文件系统权限
//! - 子进程独占一个进程组，结束、超时或取消时整组 SIGKILL，提交代码派生的进程不会残留

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::SandboxError;
use crate::infrastructure::workspace::EphemeralWorkspace;
use crate::models::{ExecutionLimits, ExecutionResult, ExecutionStatus, Submission};

/// 进程结束后等待输出读取完成的最长时间
const OUTPUT_DRAIN_GRACE: Duration = Duration::from_millis(250);

/// 代码执行能力
///
/// `Err(SandboxError::Cancelled)` 表示提交在完成前被取消，此时不产生执行结果；
/// 其余失败都以 `ExecutionStatus::SystemError` 的结果返回。
#[async_trait]
pub trait CodeExecutor: Send + Sync {
    async fn run(
        &self,
        submission: &Submission,
        limits: &ExecutionLimits,
        cancel: &CancellationToken,
    ) -> Result<ExecutionResult, SandboxError>;
}

/// 基于本地子进程的沙箱
///
/// 职责：
/// - 每次调用独占一个临时工作区和一个子进程
/// - 超时或取消时强制终止子进程
/// - 调用之间不保留任何可变状态
#[derive(Debug, Clone)]
pub struct ProcessSandbox {
    interpreter: String,
    interpreter_args: Vec<String>,
    launcher: Vec<String>,
    workspace_dir: Option<PathBuf>,
}

impl ProcessSandbox {
    /// 根据配置创建沙箱
    pub fn new(config: &Config) -> Self {
        Self {
            interpreter: config.interpreter.clone(),
            interpreter_args: config.interpreter_args.clone(),
            launcher: config.launcher.clone(),
            workspace_dir: config.workspace_dir.as_ref().map(PathBuf::from),
        }
    }

    /// 使用自定义解释器创建沙箱（不带启动前缀）
    pub fn with_interpreter(interpreter: impl Into<String>) -> Self {
        let defaults = Config::default();
        Self {
            interpreter: interpreter.into(),
            interpreter_args: defaults.interpreter_args,
            launcher: Vec::new(),
            workspace_dir: None,
        }
    }

    /// 指定临时工作区的父目录
    pub fn with_workspace_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.workspace_dir = Some(dir.into());
        self
    }

    /// 检查解释器是否可用
    pub async fn is_available(&self) -> bool {
        Command::new(&self.interpreter)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|s| s.success())
            .unwrap_or(false)
    }

    /// 构建启动命令：`[launcher...] interpreter [args...] script`
    fn command(&self, workspace: &EphemeralWorkspace) -> (String, Command) {
        let mut argv: Vec<String> = self.launcher.clone();
        argv.push(self.interpreter.clone());
        argv.extend(self.interpreter_args.iter().cloned());
        argv.push(workspace.script_path().display().to_string());

        let program = argv.remove(0);
        let mut cmd = Command::new(&program);
        cmd.args(&argv)
            .current_dir(workspace.path())
            .env_clear()
            .env("LANG", "C.UTF-8")
            .env("PYTHONIOENCODING", "utf-8")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);
        if let Some(path) = std::env::var_os("PATH") {
            cmd.env("PATH", path);
        }

        (program, cmd)
    }

    async fn execute(
        &self,
        submission: &Submission,
        limits: &ExecutionLimits,
        cancel: &CancellationToken,
    ) -> Result<ExecutionResult, SandboxError> {
        let id = submission.id();

        // 工作区必须先于子进程声明：Drop 时先杀进程，再删目录
        let workspace = EphemeralWorkspace::create(
            self.workspace_dir.as_deref(),
            &id.get().to_string(),
            submission.code(),
        )?;

        let (program, mut cmd) = self.command(&workspace);
        let mut child = cmd
            .spawn()
            .map_err(|source| SandboxError::Spawn { program, source })?;
        let group = ProcessGroup::of(&child);
        debug!("[提交 {}] 子进程已启动 (pid: {:?})", id, child.id());

        let limit = limits.max_output_bytes;
        let stdout_task = tokio::spawn(capture(child.stdout.take(), limit));
        let stderr_task = tokio::spawn(capture(child.stderr.take(), limit));

        let started = Instant::now();
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            waited = tokio::time::timeout(limits.timeout, child.wait()) => Some(waited),
        };

        let (status, exit_code) = match outcome {
            None => {
                terminate(&mut child, &group).await;
                stdout_task.abort();
                stderr_task.abort();
                debug!("[提交 {}] 执行被取消，子进程已终止", id);
                return Err(SandboxError::Cancelled);
            }
            Some(Err(_elapsed)) => {
                terminate(&mut child, &group).await;
                warn!("[提交 {}] ⏱️ 执行超时 ({:?})，子进程已终止", id, limits.timeout);
                (ExecutionStatus::TimedOut, None)
            }
            Some(Ok(Ok(exit))) if exit.success() => (ExecutionStatus::Ok, exit.code()),
            Some(Ok(Ok(exit))) => (ExecutionStatus::RuntimeError, exit.code()),
            Some(Ok(Err(e))) => {
                terminate(&mut child, &group).await;
                return Err(SandboxError::Io(e));
            }
        };
        let duration = started.elapsed();

        // 主进程已退出，清理仍在运行的派生进程，它们持有的管道随之关闭
        group.kill();

        let stdout = collect(stdout_task).await;
        let mut stderr = collect(stderr_task).await;

        if status == ExecutionStatus::TimedOut {
            if !stderr.text.is_empty() && !stderr.text.ends_with('\n') {
                stderr.text.push('\n');
            }
            stderr.text.push_str(&format!(
                "Execution timed out after {} ms",
                limits.timeout.as_millis()
            ));
        }

        Ok(ExecutionResult {
            submission_id: id,
            status,
            stdout: stdout.text,
            stderr: stderr.text,
            duration_ms: duration.as_millis() as u64,
            exit_code,
            truncated: stdout.truncated || stderr.truncated,
        })
    }
}

#[async_trait]
impl CodeExecutor for ProcessSandbox {
    async fn run(
        &self,
        submission: &Submission,
        limits: &ExecutionLimits,
        cancel: &CancellationToken,
    ) -> Result<ExecutionResult, SandboxError> {
        match self.execute(submission, limits, cancel).await {
            Ok(result) => {
                info!(
                    "[提交 {}] ✓ 执行结束: {:?} ({} ms)",
                    submission.id(),
                    result.status,
                    result.duration_ms
                );
                Ok(result)
            }
            Err(SandboxError::Cancelled) => Err(SandboxError::Cancelled),
            Err(e) => {
                error!("[提交 {}] ❌ 沙箱错误: {}", submission.id(), e);
                Ok(ExecutionResult::system_error(submission.id(), e.to_string()))
            }
        }
    }
}

/// 强制终止子进程所在的进程组并回收子进程
async fn terminate(child: &mut Child, group: &ProcessGroup) {
    group.kill();
    if let Err(e) = child.start_kill() {
        debug!("终止子进程失败（可能已退出）: {}", e);
    }
    let _ = child.wait().await;
}

/// 子进程所在的进程组
///
/// 子进程以 `process_group(0)` 启动，进程组号等于其 pid。
/// 只发送一次 SIGKILL；Drop 时补发，覆盖调用方直接丢弃 future 的情况。
struct ProcessGroup {
    pgid: Option<u32>,
    killed: AtomicBool,
}

impl ProcessGroup {
    fn of(child: &Child) -> Self {
        Self {
            pgid: child.id(),
            killed: AtomicBool::new(false),
        }
    }

    #[cfg(unix)]
    fn kill(&self) {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        let Some(pgid) = self.pgid else {
            return;
        };
        if self.killed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Err(e) = killpg(Pid::from_raw(pgid as i32), Signal::SIGKILL) {
            // ESRCH: 组内进程已全部退出
            debug!("终止进程组 {} 失败: {}", pgid, e);
        }
    }

    #[cfg(not(unix))]
    fn kill(&self) {
        self.killed.store(true, Ordering::SeqCst);
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        self.kill();
    }
}

/// 捕获的输出
#[derive(Debug, Default)]
struct Captured {
    text: String,
    truncated: bool,
}

/// 读取输出流，最多保留 `limit` 字节，超出部分继续读取但丢弃
async fn capture<R: AsyncRead + Unpin>(reader: Option<R>, limit: usize) -> Captured {
    let Some(mut reader) = reader else {
        return Captured::default();
    };

    let mut kept: Vec<u8> = Vec::new();
    let mut truncated = false;
    let mut buf = [0u8; 8192];

    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                let room = limit.saturating_sub(kept.len());
                kept.extend_from_slice(&buf[..n.min(room)]);
                if n > room {
                    truncated = true;
                }
            }
            Err(e) => {
                debug!("读取子进程输出失败: {}", e);
                break;
            }
        }
    }

    let mut text = String::from_utf8_lossy(&kept).into_owned();
    if truncated {
        if !text.ends_with('\n') {
            text.push('\n');
        }
        text.push_str(&format!("...[output truncated after {} bytes]", limit));
    }

    Captured { text, truncated }
}

/// 等待输出读取任务；孙进程可能仍持有管道，超过宽限期则放弃
async fn collect(task: JoinHandle<Captured>) -> Captured {
    let abort = task.abort_handle();
    match tokio::time::timeout(OUTPUT_DRAIN_GRACE, task).await {
        Ok(Ok(captured)) => captured,
        Ok(Err(e)) => {
            debug!("输出读取任务异常结束: {}", e);
            Captured::default()
        }
        Err(_) => {
            abort.abort();
            debug!("输出读取超过宽限期，已放弃");
            Captured::default()
        }
    }
}
