//! 工具注册表
//!
//! 所有工具实现 Tool trait（name / description / input_schema / execute），由 ToolRegistry 按名注册与查找。
//! 注册表可被多个连接并发读取；写操作在同一把锁内完成，读取拿到的是一致的快照。
//! 同名重复注册以后者为准并打 warn；批量发现时单个候选构造失败只记录并跳过。

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde_json::Value;

use crate::core::{Candidate, DiscoveryReport};
use crate::host::ExecutionContext;
use crate::protocol::{ToolDescriptor, ToolResult};
use crate::tools::schema::empty_object_schema;

/// 工具 trait：名称、描述（供客户端与 LLM 理解）、参数 schema、异步执行
#[async_trait]
pub trait Tool: Send + Sync {
    /// 工具名称（tools/call 的 name 字段）
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// 参数 JSON Schema；默认是不限字段的空对象
    fn input_schema(&self) -> Value {
        empty_object_schema()
    }

    /// 执行工具；Err 表示业务失败，会以 isError=true 的结果返回给调用方
    async fn execute(&self, args: Value, ctx: &ExecutionContext) -> Result<ToolResult, String>;
}

/// 发现阶段的工具候选
pub type ToolCandidate = Candidate<dyn Tool>;

/// 工具注册表：按名称有序存储 Arc<dyn Tool>
#[derive(Default)]
pub struct ToolRegistry {
    tools: RwLock<BTreeMap<String, Arc<dyn Tool>>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, tool: impl Tool + 'static) {
        self.register_arc(Arc::new(tool));
    }

    /// 注册（同名覆盖并告警），返回被替换的旧工具
    pub fn register_arc(&self, tool: Arc<dyn Tool>) -> Option<Arc<dyn Tool>> {
        let name = tool.name().to_string();
        let previous = self
            .tools
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name.clone(), tool);
        if previous.is_some() {
            tracing::warn!(tool = %name, "tool re-registered, previous binding replaced");
        }
        previous
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
    }

    pub fn unregister(&self, name: &str) -> bool {
        self.tools
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(name)
            .is_some()
    }

    pub fn clear(&self) {
        self.tools.write().unwrap_or_else(|e| e.into_inner()).clear();
    }

    pub fn len(&self) -> usize {
        self.tools.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(name)
    }

    /// 按名称排序的描述快照（不含处理器）
    pub fn list(&self) -> Vec<ToolDescriptor> {
        let tools = self.tools.read().unwrap_or_else(|e| e.into_inner());
        tools
            .values()
            .map(|tool| ToolDescriptor {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                input_schema: tool.input_schema(),
            })
            .collect()
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.tools
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect()
    }

    /// 返回 (name, description) 列表，用于拼规划 prompt 的工具目录
    pub fn tool_descriptions(&self) -> Vec<(String, String)> {
        self.tools
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(name, tool)| (name.clone(), tool.description().to_string()))
            .collect()
    }

    /// 批量发现：逐个构造并注册，构造失败（含 panic）的候选记录后跳过，绝不中断整个扫描
    pub fn discover(&self, candidates: Vec<ToolCandidate>) -> DiscoveryReport {
        let mut report = DiscoveryReport::default();
        for candidate in candidates {
            match candidate.build() {
                (_, Ok(tool)) => {
                    report.registered.push(tool.name().to_string());
                    self.register_arc(tool);
                }
                (label, Err(reason)) => {
                    tracing::warn!(candidate = %label, error = %reason, "tool discovery skipped candidate");
                    report.failed.push((label, reason));
                }
            }
        }
        tracing::info!(
            registered = report.registered.len(),
            failed = report.failed.len(),
            "tool discovery finished"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::EchoTool;

    struct Named {
        name: &'static str,
        description: &'static str,
    }

    #[async_trait]
    impl Tool for Named {
        fn name(&self) -> &str {
            self.name
        }

        fn description(&self) -> &str {
            self.description
        }

        async fn execute(&self, _args: Value, _ctx: &ExecutionContext) -> Result<ToolResult, String> {
            Ok(ToolResult::text(self.description))
        }
    }

    fn named(name: &'static str, description: &'static str) -> Named {
        Named { name, description }
    }

    #[test]
    fn test_register_then_get_and_overwrite() {
        let registry = ToolRegistry::new();
        registry.register(named("spawn", "v1"));
        assert_eq!(registry.get("spawn").unwrap().description(), "v1");

        let previous = registry.register_arc(Arc::new(named("spawn", "v2")));
        assert_eq!(previous.unwrap().description(), "v1");
        assert_eq!(registry.get("spawn").unwrap().description(), "v2");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_get_unknown_is_none() {
        let registry = ToolRegistry::new();
        assert!(registry.get("missing").is_none());
        assert!(!registry.unregister("missing"));
    }

    #[test]
    fn test_list_contains_current_entries_sorted() {
        let registry = ToolRegistry::new();
        registry.register(named("b", "second"));
        registry.register(named("a", "first"));
        registry.register(named("c", "third"));
        registry.register(named("a", "first again"));

        let list = registry.list();
        let names: Vec<_> = list.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
        assert_eq!(list[0].description, "first again");
        assert_eq!(list[0].input_schema["type"], "object");
    }

    #[test]
    fn test_unregister_and_clear() {
        let registry = ToolRegistry::new();
        registry.register(EchoTool);
        registry.register(named("x", "x"));
        assert!(registry.unregister("x"));
        assert!(!registry.contains("x"));
        registry.clear();
        assert!(registry.is_empty());
    }

    #[test]
    fn test_discover_skips_failing_candidates() {
        let registry = ToolRegistry::new();
        let report = registry.discover(vec![
            ToolCandidate::new("ok-1", || Ok(Arc::new(named("one", "1")) as Arc<dyn Tool>)),
            ToolCandidate::new("broken", || Err("missing dependency".to_string())),
            ToolCandidate::new("panics", || panic!("constructor exploded")),
            ToolCandidate::new("ok-2", || Ok(Arc::new(named("two", "2")) as Arc<dyn Tool>)),
        ]);

        assert_eq!(report.registered, vec!["one", "two"]);
        assert_eq!(report.failed.len(), 2);
        assert_eq!(report.failed[0].0, "broken");
        assert!(report.failed[1].1.contains("constructor exploded"));
        assert_eq!(registry.tool_names(), vec!["one", "two"]);
    }

    #[test]
    fn test_concurrent_reads_during_writes() {
        let registry = Arc::new(ToolRegistry::new());
        let writer = {
            let registry = Arc::clone(&registry);
            std::thread::spawn(move || {
                for _ in 0..200 {
                    registry.register(named("flip", "on"));
                    registry.unregister("flip");
                }
            })
        };
        for _ in 0..200 {
            let list = registry.list();
            assert!(list.len() <= 1);
        }
        writer.join().unwrap();
    }
}
