//! 优雅关闭
//!
//! Ctrl+C / SIGTERM / 传输层结束都汇聚到同一个 ShutdownManager（首个原因生效），触发后：
//! - 传输层停止接受新连接、读循环退出
//! - 协调器按注册顺序执行清理（如操作桥：放弃排队操作，限时回收后台线程）

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::bridge::OperationBridge;

/// 关闭原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// Ctrl+C
    UserInitiated,
    /// SIGTERM
    Signal,
    /// 传输层结束（如 stdio 被关闭）
    TransportClosed,
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ShutdownReason::UserInitiated => "interrupted",
            ShutdownReason::Signal => "terminated",
            ShutdownReason::TransportClosed => "transport closed",
        };
        f.write_str(text)
    }
}

/// 关闭信号：一个取消 token 加上首个触发原因
#[derive(Debug, Default)]
pub struct ShutdownManager {
    token: CancellationToken,
    reason: Mutex<Option<ShutdownReason>>,
}

impl ShutdownManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// 交给服务循环 select 的 token
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// 触发关闭；只有第一次调用会记录原因，返回本次是否为首次触发
    pub fn shutdown(&self, reason: ShutdownReason) -> bool {
        let first = {
            let mut slot = self.reason.lock().unwrap_or_else(|e| e.into_inner());
            if slot.is_none() {
                *slot = Some(reason);
                true
            } else {
                false
            }
        };
        if first {
            tracing::info!(reason = %reason, "shutdown requested");
        }
        self.token.cancel();
        first
    }

    pub fn is_shutdown(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn reason(&self) -> Option<ShutdownReason> {
        *self.reason.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub async fn wait_for_shutdown(&self) {
        self.token.cancelled().await;
    }

    /// Ctrl+C 与 SIGTERM（unix）都转成 shutdown
    pub fn install_signal_handlers(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                manager.shutdown(ShutdownReason::UserInitiated);
            }
        });

        #[cfg(unix)]
        {
            let manager = Arc::clone(self);
            tokio::spawn(async move {
                use tokio::signal::unix::{signal, SignalKind};
                match signal(SignalKind::terminate()) {
                    Ok(mut sigterm) => {
                        sigterm.recv().await;
                        manager.shutdown(ShutdownReason::Signal);
                    }
                    Err(e) => tracing::warn!(error = %e, "SIGTERM handler not installed"),
                }
            });
        }
    }
}

/// 关闭时执行的清理任务
#[async_trait::async_trait]
pub trait ShutdownCleanup: Send + Sync {
    async fn cleanup(&self) -> anyhow::Result<()>;

    fn name(&self) -> &'static str;
}

/// 单个清理任务的结果
#[derive(Debug, Clone, PartialEq)]
pub struct CleanupOutcome {
    pub name: &'static str,
    pub result: Result<(), String>,
}

/// 关闭协调器：按注册顺序执行清理，每项受同一超时限制，失败不影响后续任务
pub struct ShutdownCoordinator {
    manager: Arc<ShutdownManager>,
    tasks: Vec<Box<dyn ShutdownCleanup>>,
    timeout: Duration,
}

impl ShutdownCoordinator {
    pub fn new(manager: Arc<ShutdownManager>) -> Self {
        Self {
            manager,
            tasks: Vec::new(),
            timeout: Duration::from_secs(5),
        }
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout = Duration::from_secs(secs);
        self
    }

    pub fn register<T: ShutdownCleanup + 'static>(&mut self, task: T) {
        self.tasks.push(Box::new(task));
    }

    pub async fn run_cleanup(&self) -> Vec<CleanupOutcome> {
        let mut outcomes = Vec::with_capacity(self.tasks.len());
        for task in &self.tasks {
            let name = task.name();
            let result = match tokio::time::timeout(self.timeout, task.cleanup()).await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(format!("{:#}", e)),
                Err(_) => Err(format!("timed out after {}s", self.timeout.as_secs())),
            };
            match &result {
                Ok(()) => tracing::info!(task = name, "cleanup finished"),
                Err(e) => tracing::warn!(task = name, error = %e, "cleanup failed"),
            }
            outcomes.push(CleanupOutcome { name, result });
        }
        outcomes
    }

    pub fn manager(&self) -> &Arc<ShutdownManager> {
        &self.manager
    }
}

/// 操作桥清理：放弃排队中的操作，限时回收后台线程
pub struct BridgeCleanup {
    bridge: Arc<OperationBridge>,
}

impl BridgeCleanup {
    pub fn new(bridge: Arc<OperationBridge>) -> Self {
        Self { bridge }
    }
}

#[async_trait::async_trait]
impl ShutdownCleanup for BridgeCleanup {
    async fn cleanup(&self) -> anyhow::Result<()> {
        let bridge = Arc::clone(&self.bridge);
        // shutdown 会阻塞等待后台线程
        let joined = tokio::task::spawn_blocking(move || bridge.shutdown()).await?;
        if !joined {
            anyhow::bail!("background worker did not stop within the join timeout");
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "operation_bridge"
    }
}

/// 运行应用直到其自行结束或收到关闭信号，然后执行清理；返回触发关闭的原因（应用自行结束时为 None）
pub async fn run_with_graceful_shutdown<F, C, Fut>(
    manager: Arc<ShutdownManager>,
    app: F,
    cleanup: C,
) -> Option<ShutdownReason>
where
    F: Future<Output = ()>,
    C: FnOnce() -> Fut,
    Fut: Future<Output = ()>,
{
    manager.install_signal_handlers();

    tokio::select! {
        _ = app => tracing::debug!("application future finished"),
        _ = manager.wait_for_shutdown() => tracing::debug!("shutdown signal observed"),
    }

    cleanup().await;
    manager.reason()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    use crate::config::BridgeSection;

    #[test]
    fn test_first_reason_wins() {
        let manager = ShutdownManager::new();
        let token = manager.token();
        assert!(!manager.is_shutdown());
        assert_eq!(manager.reason(), None);

        assert!(manager.shutdown(ShutdownReason::TransportClosed));
        assert!(!manager.shutdown(ShutdownReason::UserInitiated));
        assert!(token.is_cancelled());
        assert_eq!(manager.reason(), Some(ShutdownReason::TransportClosed));
    }

    struct Flag(Arc<AtomicBool>);

    #[async_trait::async_trait]
    impl ShutdownCleanup for Flag {
        async fn cleanup(&self) -> anyhow::Result<()> {
            self.0.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn name(&self) -> &'static str {
            "flag"
        }
    }

    struct Stuck;

    #[async_trait::async_trait]
    impl ShutdownCleanup for Stuck {
        async fn cleanup(&self) -> anyhow::Result<()> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        }

        fn name(&self) -> &'static str {
            "stuck"
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_coordinator_continues_after_timeout() {
        let manager = Arc::new(ShutdownManager::new());
        let mut coordinator = ShutdownCoordinator::new(manager).with_timeout(1);
        let called = Arc::new(AtomicBool::new(false));
        coordinator.register(Stuck);
        coordinator.register(Flag(Arc::clone(&called)));

        let outcomes = coordinator.run_cleanup().await;
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes[0].result.as_ref().unwrap_err().contains("timed out"));
        assert_eq!(outcomes[1].result, Ok(()));
        assert!(called.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_bridge_cleanup_stops_bridge() {
        let bridge = Arc::new(OperationBridge::new(&BridgeSection::default()));
        let cleanup = BridgeCleanup::new(Arc::clone(&bridge));
        cleanup.cleanup().await.unwrap();
        assert!(bridge.is_shut_down());
    }

    #[tokio::test]
    async fn test_graceful_run_reports_reason() {
        let manager = Arc::new(ShutdownManager::new());
        let trigger = Arc::clone(&manager);
        let cleaned = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cleaned);

        let reason = run_with_graceful_shutdown(
            manager,
            async move {
                trigger.shutdown(ShutdownReason::TransportClosed);
                std::future::pending::<()>().await;
            },
            move || async move {
                flag.store(true, Ordering::SeqCst);
            },
        )
        .await;

        assert_eq!(reason, Some(ShutdownReason::TransportClosed));
        assert!(cleaned.load(Ordering::SeqCst));
    }
}
