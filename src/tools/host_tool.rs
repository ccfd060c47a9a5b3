//! 宿主操作适配：把宿主枚举出的每个操作注册为工具
//!
//! 执行时按操作的执行域经 OperationBridge 投递（Main → 主回合，Background → 后台线程），
//! 成功后通知该操作声明会影响的资源。

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::bridge::OperationBridge;
use crate::core::DiscoveryReport;
use crate::host::{Affinity, ExecutionContext, HostOperations, OperationDescriptor};
use crate::protocol::ToolResult;
use crate::resources::ResourceRegistry;
use crate::tools::{Tool, ToolCandidate, ToolRegistry};

pub struct HostOperationTool {
    descriptor: OperationDescriptor,
    host: Arc<dyn HostOperations>,
    bridge: Arc<OperationBridge>,
    resources: Option<Arc<ResourceRegistry>>,
}

impl HostOperationTool {
    pub fn new(
        descriptor: OperationDescriptor,
        host: Arc<dyn HostOperations>,
        bridge: Arc<OperationBridge>,
        resources: Option<Arc<ResourceRegistry>>,
    ) -> Self {
        Self {
            descriptor,
            host,
            bridge,
            resources,
        }
    }

    pub fn affinity(&self) -> Affinity {
        self.descriptor.affinity
    }

    fn notify_touched(&self) {
        let Some(resources) = &self.resources else {
            return;
        };
        for uri in &self.descriptor.touches {
            if let Err(e) = resources.notify_updated(uri) {
                tracing::debug!(operation = %self.descriptor.name, error = %e, "touched resource not registered");
            }
        }
    }
}

#[async_trait]
impl Tool for HostOperationTool {
    fn name(&self) -> &str {
        &self.descriptor.name
    }

    fn description(&self) -> &str {
        &self.descriptor.description
    }

    fn input_schema(&self) -> Value {
        self.descriptor.input_schema.clone()
    }

    async fn execute(&self, args: Value, ctx: &ExecutionContext) -> Result<ToolResult, String> {
        let host = Arc::clone(&self.host);
        let name = self.descriptor.name.clone();
        let work = move || host.execute(&name, &args);
        let pending = match self.descriptor.affinity {
            Affinity::Main => self.bridge.enqueue_main(work),
            Affinity::Background => self.bridge.enqueue_background(work),
        };
        tracing::debug!(
            operation = %self.descriptor.name,
            affinity = ?self.descriptor.affinity,
            caller = %ctx.caller_id,
            "host operation queued"
        );

        let blocks = pending.await.map_err(|e| e.to_string())?;
        self.notify_touched();
        Ok(ToolResult::success(blocks))
    }
}

/// 把宿主的全部操作注册为工具；名称为空或 schema 不是对象的操作被跳过
pub fn register_host_operations(
    registry: &ToolRegistry,
    host: Arc<dyn HostOperations>,
    bridge: Arc<OperationBridge>,
    resources: Option<Arc<ResourceRegistry>>,
) -> DiscoveryReport {
    let candidates = host
        .operations()
        .into_iter()
        .map(|descriptor| {
            let host = Arc::clone(&host);
            let bridge = Arc::clone(&bridge);
            let resources = resources.clone();
            let label = format!("host:{}", descriptor.name);
            ToolCandidate::new(label, move || {
                if descriptor.name.trim().is_empty() {
                    return Err("operation has an empty name".to_string());
                }
                if !descriptor.input_schema.is_object() {
                    return Err(format!(
                        "operation '{}' input schema is not an object",
                        descriptor.name
                    ));
                }
                Ok(Arc::new(HostOperationTool::new(descriptor, host, bridge, resources)) as Arc<dyn Tool>)
            })
        })
        .collect();
    registry.discover(candidates)
}
