//! 宿主快照资源：读取在宿主主回合执行，结果序列化为 JSON 文本

use std::sync::Arc;

use async_trait::async_trait;

use crate::bridge::OperationBridge;
use crate::core::Candidate;
use crate::host::{HostOperations, SnapshotDescriptor};
use crate::protocol::ResourceContent;
use crate::resources::registry::{ReadParams, Resource, ResourceCandidate};
use crate::resources::subscribers::Subscribers;

pub struct HostSnapshotResource {
    descriptor: SnapshotDescriptor,
    host: Arc<dyn HostOperations>,
    bridge: Arc<OperationBridge>,
    subscribers: Subscribers,
}

impl HostSnapshotResource {
    pub fn new(
        descriptor: SnapshotDescriptor,
        host: Arc<dyn HostOperations>,
        bridge: Arc<OperationBridge>,
    ) -> Self {
        Self {
            descriptor,
            host,
            bridge,
            subscribers: Subscribers::new(),
        }
    }

    /// 为宿主声明的每个快照生成一个发现候选
    pub fn candidates(
        host: &Arc<dyn HostOperations>,
        bridge: &Arc<OperationBridge>,
    ) -> Vec<ResourceCandidate> {
        host.snapshots()
            .into_iter()
            .map(|descriptor| {
                let host = Arc::clone(host);
                let bridge = Arc::clone(bridge);
                Candidate::new(descriptor.uri.clone(), move || {
                    if descriptor.uri.is_empty() {
                        return Err(format!("snapshot '{}' has no uri", descriptor.name));
                    }
                    Ok(Arc::new(HostSnapshotResource::new(descriptor, host, bridge)) as Arc<dyn Resource>)
                })
            })
            .collect()
    }
}

#[async_trait]
impl Resource for HostSnapshotResource {
    fn uri(&self) -> &str {
        &self.descriptor.uri
    }

    fn name(&self) -> &str {
        &self.descriptor.name
    }

    fn description(&self) -> &str {
        &self.descriptor.description
    }

    fn subscribers(&self) -> &Subscribers {
        &self.subscribers
    }

    async fn read(&self, params: &ReadParams) -> Result<ResourceContent, String> {
        let host = Arc::clone(&self.host);
        let name = self.descriptor.name.clone();
        let snapshot = self
            .bridge
            .enqueue_main(move || host.read_snapshot(&name))
            .await
            .map_err(|e| e.to_string())?;
        let text = serde_json::to_string_pretty(&snapshot).map_err(|e| e.to_string())?;
        Ok(ResourceContent::text(&params.uri, self.mime_type(), text))
    }
}
