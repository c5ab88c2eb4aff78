//! 请求合并器 - 流程层
//!
//! 把一串快速的编辑事件合并成一次延迟的"最新提交"。
//!
//! - `notify`：取消待发的调度，在静默窗口后以最新代码重新调度
//! - `run_now`：跳过计时器，取消待发的调度并立即分发
//! - `cancel`：丢弃待发的调度
//!
//! 空代码（只含空白）永远不会被分发，而是交给 `resolve_empty`。
//!
//! 分发在持有调度槽锁时进行：计时器与 `run_now` 的分发顺序与 epoch 顺序一致，
//! 已被 `run_now` 作废的草稿不会在其之后分发。

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::models::is_blank;

/// 合并器的分发目标
pub trait DispatchTarget: Send + Sync + 'static {
    /// 分发一次非空代码
    fn dispatch(&self, code: String);

    /// 代码为空时调用，不应触发任何后端
    fn resolve_empty(&self);
}

#[derive(Default)]
struct PendingSlot {
    /// 每次调度或取消都会加一，计时结束时用来判断自己是否仍是最新的调度
    epoch: u64,
    timer: Option<CancellationToken>,
    latest: Option<String>,
}

impl PendingSlot {
    /// 作废当前待发的调度，返回新的 epoch
    fn invalidate(&mut self) -> u64 {
        self.epoch += 1;
        if let Some(timer) = self.timer.take() {
            timer.cancel();
        }
        self.latest = None;
        self.epoch
    }
}

/// 请求合并器
pub struct RequestCoalescer {
    quiescence: Duration,
    target: Arc<dyn DispatchTarget>,
    slot: Arc<Mutex<PendingSlot>>,
}

impl RequestCoalescer {
    pub fn new(quiescence: Duration, target: Arc<dyn DispatchTarget>) -> Self {
        Self {
            quiescence,
            target,
            slot: Arc::new(Mutex::new(PendingSlot::default())),
        }
    }

    /// 记录一次编辑，静默窗口结束后分发最新代码
    ///
    /// 必须在 tokio 运行时中调用。
    pub fn notify(&self, code: impl Into<String>) {
        let timer = CancellationToken::new();
        let epoch = {
            let mut slot = lock(&self.slot);
            let epoch = slot.invalidate();
            slot.timer = Some(timer.clone());
            slot.latest = Some(code.into());
            epoch
        };

        let slot = self.slot.clone();
        let target = self.target.clone();
        let quiescence = self.quiescence;

        tokio::spawn(async move {
            tokio::select! {
                _ = timer.cancelled() => return,
                _ = tokio::time::sleep(quiescence) => {}
            }

            let mut slot = lock(&slot);
            if slot.epoch != epoch {
                return;
            }
            slot.timer = None;
            if let Some(code) = slot.latest.take() {
                fire(target.as_ref(), code);
            }
        });
    }

    /// 立即分发，取消任何待发的调度
    pub fn run_now(&self, code: impl Into<String>) {
        let mut slot = lock(&self.slot);
        slot.invalidate();
        fire(self.target.as_ref(), code.into());
    }

    /// 丢弃待发的调度
    pub fn cancel(&self) {
        let mut slot = lock(&self.slot);
        if slot.timer.is_some() {
            debug!("丢弃待发的编辑调度");
        }
        slot.invalidate();
    }

    /// 是否有待发的调度
    pub fn has_pending(&self) -> bool {
        lock(&self.slot).timer.is_some()
    }
}

impl Drop for RequestCoalescer {
    fn drop(&mut self) {
        lock(&self.slot).invalidate();
    }
}

fn fire(target: &dyn DispatchTarget, code: String) {
    if is_blank(&code) {
        debug!("代码为空，不分发");
        target.resolve_empty();
    } else {
        target.dispatch(code);
    }
}

fn lock(slot: &Mutex<PendingSlot>) -> MutexGuard<'_, PendingSlot> {
    slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct RecordingTarget {
        dispatched: Mutex<Vec<String>>,
        empties: Mutex<usize>,
    }

    impl DispatchTarget for RecordingTarget {
        fn dispatch(&self, code: String) {
            self.dispatched.lock().unwrap().push(code);
        }

        fn resolve_empty(&self) {
            *self.empties.lock().unwrap() += 1;
        }
    }

    fn coalescer() -> (Arc<RecordingTarget>, RequestCoalescer) {
        let target = Arc::new(RecordingTarget::default());
        let coalescer = RequestCoalescer::new(Duration::from_millis(1000), target.clone());
        (target, coalescer)
    }

    async fn sleep_ms(ms: u64) {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_dispatches_once_with_last_code() {
        let (target, coalescer) = coalescer();

        for i in 0..5 {
            coalescer.notify(format!("print({})", i));
            sleep_ms(200).await;
        }
        assert!(target.dispatched.lock().unwrap().is_empty());
        assert!(coalescer.has_pending());

        sleep_ms(1000).await;
        assert_eq!(*target.dispatched.lock().unwrap(), vec!["print(4)".to_string()]);
        assert!(!coalescer.has_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn test_separate_bursts_dispatch_separately() {
        let (target, coalescer) = coalescer();

        coalescer.notify("a = 1");
        sleep_ms(1500).await;
        coalescer.notify("a = 2");
        sleep_ms(1500).await;

        assert_eq!(
            *target.dispatched.lock().unwrap(),
            vec!["a = 1".to_string(), "a = 2".to_string()]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_now_supersedes_pending() {
        let (target, coalescer) = coalescer();

        coalescer.notify("draft");
        sleep_ms(100).await;
        coalescer.run_now("final");
        assert_eq!(*target.dispatched.lock().unwrap(), vec!["final".to_string()]);

        sleep_ms(2000).await;
        assert_eq!(target.dispatched.lock().unwrap().len(), 1);
    }

    /// 分发草稿时较慢的目标，用来放大计时器与 `run_now` 的交错
    #[derive(Default)]
    struct SlowDraftTarget {
        dispatched: Mutex<Vec<String>>,
    }

    impl DispatchTarget for SlowDraftTarget {
        fn dispatch(&self, code: String) {
            if code == "draft" {
                std::thread::sleep(Duration::from_millis(50));
            }
            self.dispatched.lock().unwrap().push(code);
        }

        fn resolve_empty(&self) {}
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_run_now_is_never_followed_by_older_draft() {
        let target = Arc::new(SlowDraftTarget::default());
        let coalescer = RequestCoalescer::new(Duration::from_millis(10), target.clone());

        coalescer.notify("draft");
        // 计时器已到期，草稿正在分发中
        tokio::time::sleep(Duration::from_millis(25)).await;
        coalescer.run_now("final");
        tokio::time::sleep(Duration::from_millis(100)).await;

        let dispatched = target.dispatched.lock().unwrap().clone();
        assert_eq!(dispatched.last().map(String::as_str), Some("final"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_drops_pending() {
        let (target, coalescer) = coalescer();

        coalescer.notify("print(1)");
        coalescer.cancel();
        sleep_ms(2000).await;

        assert!(target.dispatched.lock().unwrap().is_empty());
        assert_eq!(*target.empties.lock().unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_blank_code_is_never_dispatched() {
        let (target, coalescer) = coalescer();

        coalescer.notify("print(1)");
        coalescer.notify("   \n ");
        sleep_ms(1500).await;
        coalescer.run_now("");

        assert!(target.dispatched.lock().unwrap().is_empty());
        assert_eq!(*target.empties.lock().unwrap(), 2);
    }
}
