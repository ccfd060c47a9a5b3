//! 订阅者列表：按 id 幂等增删，通知时遍历快照，单个回调失败互不影响

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

use crate::core::panic_message;

/// 订阅回调：参数为发生变化的资源 URI
pub type SubscriberCallback = Arc<dyn Fn(&str) -> Result<(), String> + Send + Sync>;

/// 一个订阅者；id 决定身份（同一连接重复订阅是 no-op）
#[derive(Clone)]
pub struct Subscriber {
    id: String,
    callback: SubscriberCallback,
}

impl Subscriber {
    pub fn new<F>(id: impl Into<String>, callback: F) -> Self
    where
        F: Fn(&str) -> Result<(), String> + Send + Sync + 'static,
    {
        Self {
            id: id.into(),
            callback: Arc::new(callback),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

impl std::fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscriber").field("id", &self.id).finish()
    }
}

/// 一次通知的投递结果
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct NotifyReport {
    pub delivered: usize,
    pub failed: usize,
}

/// 资源自有的订阅者列表
#[derive(Default)]
pub struct Subscribers {
    list: Mutex<Vec<Subscriber>>,
}

impl Subscribers {
    pub fn new() -> Self {
        Self::default()
    }

    /// 添加；id 已存在时不变，返回 false
    pub fn add(&self, subscriber: Subscriber) -> bool {
        let mut list = self.list.lock().unwrap_or_else(|e| e.into_inner());
        if list.iter().any(|s| s.id == subscriber.id) {
            return false;
        }
        list.push(subscriber);
        true
    }

    /// 移除；不存在时返回 false
    pub fn remove(&self, id: &str) -> bool {
        let mut list = self.list.lock().unwrap_or_else(|e| e.into_inner());
        let before = list.len();
        list.retain(|s| s.id != id);
        list.len() != before
    }

    pub fn contains(&self, id: &str) -> bool {
        self.list
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .any(|s| s.id == id)
    }

    pub fn len(&self) -> usize {
        self.list.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 通知全部订阅者。先在锁内拷贝快照再释放锁，回调期间可以安全地增删订阅。
    pub fn notify(&self, uri: &str) -> NotifyReport {
        let snapshot: Vec<Subscriber> = self
            .list
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();

        let mut report = NotifyReport::default();
        for subscriber in snapshot {
            let callback = Arc::clone(&subscriber.callback);
            let outcome = match catch_unwind(AssertUnwindSafe(|| callback(uri))) {
                Ok(result) => result,
                Err(payload) => Err(format!("panicked: {}", panic_message(payload.as_ref()))),
            };
            match outcome {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    tracing::warn!(uri = %uri, subscriber = %subscriber.id, error = %e, "resource subscriber failed");
                    report.failed += 1;
                }
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting(id: &str, counter: &Arc<AtomicUsize>) -> Subscriber {
        let counter = Arc::clone(counter);
        Subscriber::new(id, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    #[test]
    fn test_add_and_remove_are_idempotent() {
        let subs = Subscribers::new();
        let counter = Arc::new(AtomicUsize::new(0));
        assert!(subs.add(counting("a", &counter)));
        assert!(!subs.add(counting("a", &counter)));
        assert_eq!(subs.len(), 1);

        assert!(subs.remove("a"));
        assert!(!subs.remove("a"));
        assert!(subs.is_empty());
    }

    #[test]
    fn test_failing_subscriber_does_not_block_others() {
        let subs = Subscribers::new();
        let counter = Arc::new(AtomicUsize::new(0));
        subs.add(counting("first", &counter));
        subs.add(Subscriber::new("broken", |_| Err("socket closed".into())));
        subs.add(Subscriber::new("panics", |_| panic!("subscriber bug")));
        subs.add(counting("last", &counter));

        let report = subs.notify("host://scene");
        assert_eq!(report, NotifyReport { delivered: 2, failed: 2 });
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_callback_may_mutate_list_during_notify() {
        let subs = Arc::new(Subscribers::new());
        let inner = Arc::clone(&subs);
        subs.add(Subscriber::new("self-removing", move |_| {
            inner.remove("self-removing");
            Ok(())
        }));

        let report = subs.notify("host://scene");
        assert_eq!(report.delivered, 1);
        assert!(subs.is_empty());
    }
}
