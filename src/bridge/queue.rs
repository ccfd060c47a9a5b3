//! 主线程 / 后台双队列
//!
//! 任意线程都可以提交操作；主队列只在宿主调用 `tick()` 的回合里执行，每回合最多执行
//! `main_batch_size` 个，剩余的等下一回合；后台队列由一个专用线程持续消费，空闲时短暂休眠。
//! 每个操作都在 catch_unwind 中执行，失败只会让自己的 BridgeFuture 以错误结束，不影响队列继续运转。

use std::collections::VecDeque;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::task::{Context, Poll};
use std::thread::JoinHandle;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::config::BridgeSection;
use crate::core::{panic_message, BridgeError};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// 单个 FIFO 队列 + 深度计数
#[derive(Default)]
struct JobQueue {
    items: Mutex<VecDeque<Job>>,
    depth: AtomicUsize,
}

impl JobQueue {
    /// 在持有队列锁时检查关闭信号；已关闭则拒绝入队并返回 false。
    /// shutdown 先取消再清空队列，所以入队要么被清空，要么看到取消。
    fn push(&self, job: Job, cancel: &CancellationToken) -> bool {
        let mut items = self.items.lock().unwrap_or_else(|e| e.into_inner());
        if cancel.is_cancelled() {
            return false;
        }
        items.push_back(job);
        self.depth.fetch_add(1, Ordering::SeqCst);
        true
    }

    fn pop(&self) -> Option<Job> {
        let mut items = self.items.lock().unwrap_or_else(|e| e.into_inner());
        let job = items.pop_front();
        if job.is_some() {
            self.depth.fetch_sub(1, Ordering::SeqCst);
        }
        job
    }

    /// 清空队列；被丢弃的操作其 future 以 Abandoned 结束
    fn abandon_all(&self) -> usize {
        let drained: Vec<Job> = {
            let mut items = self.items.lock().unwrap_or_else(|e| e.into_inner());
            self.depth.store(0, Ordering::SeqCst);
            items.drain(..).collect()
        };
        drained.len()
    }

    fn depth(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }
}

/// 提交操作后得到的句柄：恰好完成一次（成功值 / 操作错误 / 被放弃）
pub struct BridgeFuture<T> {
    rx: oneshot::Receiver<Result<T, BridgeError>>,
}

impl<T> BridgeFuture<T> {
    fn ready(result: Result<T, BridgeError>) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(result);
        Self { rx }
    }

    /// 非阻塞地取结果；尚未执行时返回 None（供宿主线程同步轮询）
    pub fn try_take(&mut self) -> Option<Result<T, BridgeError>> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(BridgeError::Abandoned)),
        }
    }
}

impl<T> Future for BridgeFuture<T> {
    type Output = Result<T, BridgeError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(|received| match received {
            Ok(result) => result,
            Err(_) => Err(BridgeError::Abandoned),
        })
    }
}

/// 后台线程句柄与其退出信号
struct Worker {
    handle: JoinHandle<()>,
    exited: mpsc::Receiver<()>,
}

/// 操作桥：显式创建、显式关闭，整个宿主进程共用一个实例（以 Arc 传递）
pub struct OperationBridge {
    main: Arc<JobQueue>,
    background: Arc<JobQueue>,
    batch_size: usize,
    join_timeout: Duration,
    cancel: CancellationToken,
    worker: Mutex<Option<Worker>>,
}

impl OperationBridge {
    /// 创建并启动后台消费线程
    pub fn new(cfg: &BridgeSection) -> Self {
        let background = Arc::new(JobQueue::default());
        let cancel = CancellationToken::new();
        let worker = spawn_worker(
            Arc::clone(&background),
            cancel.clone(),
            Duration::from_millis(cfg.background_idle_ms.max(1)),
        );

        Self {
            main: Arc::new(JobQueue::default()),
            background,
            batch_size: cfg.main_batch_size.max(1),
            join_timeout: Duration::from_millis(cfg.join_timeout_ms),
            cancel,
            worker: Mutex::new(worker),
        }
    }

    /// 提交必须在宿主主回合执行的操作；从不在调用线程内联执行
    pub fn enqueue_main<T, F>(&self, work: F) -> BridgeFuture<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T, String> + Send + 'static,
    {
        self.enqueue(&self.main, work)
    }

    /// 提交可在任意工作线程执行的操作
    pub fn enqueue_background<T, F>(&self, work: F) -> BridgeFuture<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T, String> + Send + 'static,
    {
        self.enqueue(&self.background, work)
    }

    fn enqueue<T, F>(&self, queue: &JobQueue, work: F) -> BridgeFuture<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T, String> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let job: Job = Box::new(move || {
            let result = match catch_unwind(AssertUnwindSafe(work)) {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(e)) => {
                    tracing::debug!(error = %e, "bridge operation failed");
                    Err(BridgeError::Failed(e))
                }
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    tracing::warn!(error = %message, "bridge operation panicked");
                    Err(BridgeError::Panicked(message))
                }
            };
            // 调用方可能已放弃等待
            let _ = tx.send(result);
        });
        if !queue.push(job, &self.cancel) {
            return BridgeFuture::ready(Err(BridgeError::ShutDown));
        }
        BridgeFuture { rx }
    }

    /// 宿主主回合驱动：必须由宿主主线程调用；最多执行 batch_size 个操作，返回实际执行数
    pub fn tick(&self) -> usize {
        if self.cancel.is_cancelled() {
            return 0;
        }
        let mut executed = 0;
        while executed < self.batch_size {
            let Some(job) = self.main.pop() else {
                break;
            };
            job();
            executed += 1;
        }
        executed
    }

    pub fn main_depth(&self) -> usize {
        self.main.depth()
    }

    pub fn background_depth(&self) -> usize {
        self.background.depth()
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn is_shut_down(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// 关闭：停止后台线程，放弃两个队列中尚未执行的操作，主回合驱动不再执行任何操作。
    /// 等待后台线程最多 join_timeout；按时退出返回 true。可重复调用。
    pub fn shutdown(&self) -> bool {
        self.cancel.cancel();
        let abandoned = self.main.abandon_all() + self.background.abandon_all();
        if abandoned > 0 {
            tracing::info!(abandoned, "bridge shutdown abandoned queued operations");
        }

        let worker = self
            .worker
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        let Some(worker) = worker else {
            return true;
        };
        match worker.exited.recv_timeout(self.join_timeout) {
            Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => {
                let _ = worker.handle.join();
                true
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {
                tracing::warn!(
                    timeout_ms = self.join_timeout.as_millis() as u64,
                    "bridge background worker did not exit in time, detaching"
                );
                false
            }
        }
    }
}

impl Drop for OperationBridge {
    fn drop(&mut self) {
        // 不等待，只通知后台线程退出
        self.cancel.cancel();
    }
}

fn spawn_worker(
    queue: Arc<JobQueue>,
    cancel: CancellationToken,
    idle: Duration,
) -> Option<Worker> {
    let (exited_tx, exited) = mpsc::channel();
    let spawned = std::thread::Builder::new()
        .name("stagehand-bridge-bg".to_string())
        .spawn(move || {
            while !cancel.is_cancelled() {
                match queue.pop() {
                    Some(job) => job(),
                    None => std::thread::sleep(idle),
                }
            }
            let _ = exited_tx.send(());
        });
    match spawned {
        Ok(handle) => Some(Worker { handle, exited }),
        Err(e) => {
            tracing::error!(error = %e, "failed to spawn bridge background worker");
            None
        }
    }
}
