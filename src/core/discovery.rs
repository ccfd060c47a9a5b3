//! 能力发现：显式的候选构造函数列表
//!
//! 启动时遍历候选、逐个构造并注册；单个候选失败（返回 Err 或 panic）只记录并跳过。

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use crate::core::panic_message;

/// 一个候选：标签 + 构造函数
pub struct Candidate<T: ?Sized> {
    pub label: String,
    build: Box<dyn FnOnce() -> Result<Arc<T>, String> + Send>,
}

impl<T: ?Sized> Candidate<T> {
    pub fn new<F>(label: impl Into<String>, build: F) -> Self
    where
        F: FnOnce() -> Result<Arc<T>, String> + Send + 'static,
    {
        Self {
            label: label.into(),
            build: Box::new(build),
        }
    }

    /// 构造；panic 被捕获为 Err
    pub fn build(self) -> (String, Result<Arc<T>, String>) {
        let Candidate { label, build } = self;
        let result = match catch_unwind(AssertUnwindSafe(build)) {
            Ok(result) => result,
            Err(payload) => Err(format!(
                "constructor panicked: {}",
                panic_message(payload.as_ref())
            )),
        };
        (label, result)
    }
}

/// 发现结果：成功注册的名称与失败的 (标签, 原因)
#[derive(Debug, Default, Clone)]
pub struct DiscoveryReport {
    pub registered: Vec<String>,
    pub failed: Vec<(String, String)>,
}

impl DiscoveryReport {
    /// 合并多轮发现的结果
    pub fn merge(&mut self, other: DiscoveryReport) {
        self.registered.extend(other.registered);
        self.failed.extend(other.failed);
    }
}
