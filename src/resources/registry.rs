//! 资源注册表
//!
//! 与工具注册表相同的注册 / 查找约定（同名 URI 覆盖并告警、批量发现跳过坏候选），
//! 另外提供订阅：未知 URI 的订阅 / 退订返回 NotFound。订阅者列表归资源自身所有。

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use crate::core::{Candidate, DiscoveryReport, RegistryError};
use crate::protocol::{ResourceContent, ResourceDescriptor};
use crate::resources::subscribers::{NotifyReport, Subscriber, Subscribers};

/// 读取参数
#[derive(Debug, Clone)]
pub struct ReadParams {
    pub uri: String,
    pub caller_id: String,
}

impl ReadParams {
    pub fn new(uri: impl Into<String>, caller_id: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            caller_id: caller_id.into(),
        }
    }
}

/// 只读资源：URI 寻址，可被订阅
#[async_trait]
pub trait Resource: Send + Sync {
    fn uri(&self) -> &str;

    fn name(&self) -> &str;

    fn description(&self) -> &str;

    fn mime_type(&self) -> &str {
        "application/json"
    }

    fn subscribers(&self) -> &Subscribers;

    async fn read(&self, params: &ReadParams) -> Result<ResourceContent, String>;
}

/// 发现阶段的资源候选
pub type ResourceCandidate = Candidate<dyn Resource>;

#[derive(Default)]
pub struct ResourceRegistry {
    resources: RwLock<BTreeMap<String, Arc<dyn Resource>>>,
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, resource: impl Resource + 'static) {
        self.register_arc(Arc::new(resource));
    }

    /// 注册（同 URI 覆盖并告警），返回被替换的旧资源
    pub fn register_arc(&self, resource: Arc<dyn Resource>) -> Option<Arc<dyn Resource>> {
        let uri = resource.uri().to_string();
        let previous = self
            .resources
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(uri.clone(), resource);
        if previous.is_some() {
            tracing::warn!(uri = %uri, "resource re-registered, previous binding replaced");
        }
        previous
    }

    pub fn get(&self, uri: &str) -> Option<Arc<dyn Resource>> {
        self.resources
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(uri)
            .cloned()
    }

    pub fn unregister(&self, uri: &str) -> bool {
        self.resources
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(uri)
            .is_some()
    }

    pub fn clear(&self) {
        self.resources
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    pub fn len(&self) -> usize {
        self.resources.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 按 URI 排序的描述快照
    pub fn list(&self) -> Vec<ResourceDescriptor> {
        let resources = self.resources.read().unwrap_or_else(|e| e.into_inner());
        resources
            .values()
            .map(|r| ResourceDescriptor {
                uri: r.uri().to_string(),
                name: r.name().to_string(),
                description: r.description().to_string(),
                mime_type: r.mime_type().to_string(),
            })
            .collect()
    }

    pub fn discover(&self, candidates: Vec<ResourceCandidate>) -> DiscoveryReport {
        let mut report = DiscoveryReport::default();
        for candidate in candidates {
            match candidate.build() {
                (_, Ok(resource)) => {
                    report.registered.push(resource.uri().to_string());
                    self.register_arc(resource);
                }
                (label, Err(reason)) => {
                    tracing::warn!(candidate = %label, error = %reason, "resource discovery skipped candidate");
                    report.failed.push((label, reason));
                }
            }
        }
        tracing::info!(
            registered = report.registered.len(),
            failed = report.failed.len(),
            "resource discovery finished"
        );
        report
    }

    fn require(&self, uri: &str) -> Result<Arc<dyn Resource>, RegistryError> {
        self.get(uri)
            .ok_or_else(|| RegistryError::NotFound(uri.to_string()))
    }

    /// 读取资源；外层 Err 为未知 URI，内层 Err 为资源自身的读取失败
    pub async fn read(
        &self,
        params: &ReadParams,
    ) -> Result<Result<ResourceContent, String>, RegistryError> {
        let resource = self.require(&params.uri)?;
        Ok(resource.read(params).await)
    }

    /// 订阅；同 id 重复订阅返回 Ok(false)
    pub fn subscribe(&self, uri: &str, subscriber: Subscriber) -> Result<bool, RegistryError> {
        let resource = self.require(uri)?;
        let added = resource.subscribers().add(subscriber);
        tracing::debug!(uri = %uri, added, "resource subscribe");
        Ok(added)
    }

    /// 退订；不存在的订阅返回 Ok(false)
    pub fn unsubscribe(&self, uri: &str, subscriber_id: &str) -> Result<bool, RegistryError> {
        let resource = self.require(uri)?;
        Ok(resource.subscribers().remove(subscriber_id))
    }

    /// 从所有资源移除该订阅者（连接关闭时调用），返回移除的订阅数
    pub fn unsubscribe_all(&self, subscriber_id: &str) -> usize {
        let resources: Vec<Arc<dyn Resource>> = self
            .resources
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect();
        resources
            .iter()
            .filter(|r| r.subscribers().remove(subscriber_id))
            .count()
    }

    /// 通知某个资源的订阅者其内容已变化
    pub fn notify_updated(&self, uri: &str) -> Result<NotifyReport, RegistryError> {
        let resource = self.require(uri)?;
        Ok(resource.subscribers().notify(uri))
    }
}
