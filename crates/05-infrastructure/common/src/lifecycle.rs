//! 应用生命周期管理
//!
//! [`AppContext`] 持有一个可取消的根令牌和任务组，后台任务只能通过
//! [`AppContext::go`] 启动，关闭时统一取消并等待。

use crate::errors::{BoxError, LifecycleError};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

/// 容器生命周期状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LifecycleState {
    /// 接受注册
    #[default]
    Registering,
    /// 刷新中
    Refreshing,
    /// 已完成装配
    Refreshed,
    /// 关闭中
    ShuttingDown,
    /// 已关闭
    Closed,
}

impl LifecycleState {
    /// 是否还能注册组件
    pub fn accepts_registration(&self) -> bool {
        matches!(self, Self::Registering)
    }
}

/// 任务组关闭结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ShutdownReport {
    /// 宽限期内未退出而被放弃的任务数
    pub abandoned: usize,
}

impl ShutdownReport {
    /// 所有任务是否都已退出
    pub fn is_clean(&self) -> bool {
        self.abandoned == 0
    }
}

struct AppContextInner {
    token: CancellationToken,
    tracker: TaskTracker,
    shutting_down: Mutex<bool>,
}

/// 应用上下文
///
/// 克隆后共享同一个取消令牌和任务组。
#[derive(Clone)]
pub struct AppContext {
    inner: Arc<AppContextInner>,
}

impl AppContext {
    /// 创建新的应用上下文
    pub fn new() -> Self {
        Self {
            inner: Arc::new(AppContextInner {
                token: CancellationToken::new(),
                tracker: TaskTracker::new(),
                shutting_down: Mutex::new(false),
            }),
        }
    }

    /// 启动受管后台任务
    ///
    /// 任务收到根令牌的子令牌，关闭开始后调用返回 `ShutdownInProgress`。
    pub fn go<F, Fut>(
        &self,
        name: impl Into<String>,
        task: F,
    ) -> Result<JoinHandle<()>, LifecycleError>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        if self.is_shutting_down() {
            warn!("应用正在关闭，拒绝启动任务: {}", name);
            return Err(LifecycleError::ShutdownInProgress { task: name });
        }
        let handle = tokio::runtime::Handle::try_current()
            .map_err(|_| LifecycleError::NoRuntime { task: name.clone() })?;

        let future = task(self.inner.token.child_token());
        let task_name = name.clone();
        // 标志检查与登记必须在同一把锁内完成
        let guard = self.inner.shutting_down.lock();
        if *guard {
            warn!("应用正在关闭，拒绝启动任务: {}", name);
            return Err(LifecycleError::ShutdownInProgress { task: name });
        }
        let join = self.inner.tracker.spawn_on(
            async move {
                future.await;
                debug!("后台任务结束: {}", task_name);
            },
            &handle,
        );
        drop(guard);

        debug!("启动后台任务: {}", name);
        Ok(join)
    }

    /// 获取根令牌的子令牌
    pub fn token(&self) -> CancellationToken {
        self.inner.token.child_token()
    }

    /// 等待上下文被取消
    pub async fn cancelled(&self) {
        self.inner.token.cancelled().await;
    }

    /// 上下文是否已取消
    pub fn is_cancelled(&self) -> bool {
        self.inner.token.is_cancelled()
    }

    /// 是否已开始关闭
    pub fn is_shutting_down(&self) -> bool {
        *self.inner.shutting_down.lock()
    }

    /// 仍在运行的任务数
    pub fn task_count(&self) -> usize {
        self.inner.tracker.len()
    }

    /// 拒绝新任务并取消根令牌，不等待任务退出
    ///
    /// 可在同步代码中调用，之后仍可用 [`AppContext::shutdown`] 等待。
    pub fn cancel(&self) {
        {
            let mut guard = self.inner.shutting_down.lock();
            if !*guard {
                *guard = true;
                self.inner.tracker.close();
            }
        }
        self.inner.token.cancel();
    }

    /// 关闭任务组
    ///
    /// 拒绝新任务，取消根令牌，然后在宽限期内等待全部任务退出。
    /// 超过宽限期仍未退出的任务被放弃，不会被强制终止。
    pub async fn shutdown(&self, grace: Option<Duration>) -> ShutdownReport {
        self.cancel();

        let running = self.inner.tracker.len();
        info!("取消应用上下文，等待 {} 个后台任务退出", running);

        let wait = self.inner.tracker.wait();
        let abandoned = match grace {
            Some(limit) => match tokio::time::timeout(limit, wait).await {
                Ok(()) => 0,
                Err(_) => self.inner.tracker.len(),
            },
            None => {
                wait.await;
                0
            }
        };

        if abandoned > 0 {
            warn!("宽限期已过，放弃 {} 个未退出的后台任务", abandoned);
        } else {
            info!("所有后台任务已退出");
        }
        ShutdownReport { abandoned }
    }
}

impl Default for AppContext {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for AppContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppContext")
            .field("cancelled", &self.is_cancelled())
            .field("shutting_down", &self.is_shutting_down())
            .field("tasks", &self.task_count())
            .finish()
    }
}

/// 装配完成后执行一次的组件
#[async_trait]
pub trait AppRunner: Send + Sync {
    /// 执行
    async fn run(&self, ctx: &AppContext) -> Result<(), BoxError>;
}

/// 应用启动/停止事件
#[async_trait]
pub trait AppEvent: Send + Sync {
    /// 应用启动
    async fn on_start(&self, ctx: &AppContext) -> Result<(), BoxError>;

    /// 应用停止
    async fn on_stop(&self, ctx: &AppContext) -> Result<(), BoxError> {
        let _ = ctx;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_tasks_observe_cancellation() {
        let ctx = AppContext::new();
        let observed = Arc::new(AtomicUsize::new(0));

        for i in 0..3 {
            let observed = observed.clone();
            ctx.go(format!("worker-{i}"), move |token| async move {
                token.cancelled().await;
                observed.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        }
        assert_eq!(ctx.task_count(), 3);

        let report = ctx.shutdown(Some(Duration::from_secs(1))).await;
        assert!(report.is_clean());
        assert_eq!(observed.load(Ordering::SeqCst), 3);
        assert!(ctx.is_cancelled());
    }

    #[tokio::test]
    async fn test_go_rejected_after_shutdown() {
        let ctx = AppContext::new();
        ctx.shutdown(None).await;

        let err = ctx.go("late", |_| async {}).unwrap_err();
        assert_eq!(err.kind(), crate::errors::ErrorKind::ShutdownInProgress);
    }

    #[tokio::test]
    async fn test_cancel_then_shutdown_waits_for_tasks() {
        let ctx = AppContext::new();
        let observed = Arc::new(AtomicUsize::new(0));
        let counter = observed.clone();
        ctx.go("worker", move |token| async move {
            token.cancelled().await;
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

        ctx.cancel();
        assert!(ctx.is_cancelled());
        assert!(ctx.is_shutting_down());
        assert!(ctx.go("late", |_| async {}).is_err());

        let report = ctx.shutdown(Some(Duration::from_secs(1))).await;
        assert!(report.is_clean());
        assert_eq!(observed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stubborn_task_is_abandoned() {
        let ctx = AppContext::new();
        ctx.go("stubborn", |_| async {
            tokio::time::sleep(Duration::from_secs(30)).await;
        })
        .unwrap();

        let report = ctx.shutdown(Some(Duration::from_millis(50))).await;
        assert_eq!(report.abandoned, 1);
    }

    #[test]
    fn test_go_without_runtime() {
        let ctx = AppContext::new();
        let err = ctx.go("orphan", |_| async {}).unwrap_err();
        assert!(matches!(err, LifecycleError::NoRuntime { .. }));
    }
}
