//! 应用构建器：统一的组装逻辑
//!
//! serve / plan / run 三个入口与集成测试共用同一套组装：宿主 → 操作桥 → 工具与资源注册表 → Agent → 协议引擎。

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::agent::{AgentContextManager, AgentPlanner, PlanExecutor, TemplateSet};
use crate::bridge::OperationBridge;
use crate::config::AppConfig;
use crate::core::DiscoveryReport;
use crate::host::{HostEnvironment, HostOperations, InMemoryHost};
use crate::llm::{LlmClient, OfflineLlmClient};
use crate::protocol::McpServer;
use crate::resources::{HostSnapshotResource, ResourceRegistry};
use crate::tools::{
    register_host_operations, DebugLogTool, EchoTool, PlanGoalTool, Tool, ToolCandidate,
    ToolExecutor, ToolRegistry,
};

/// 构建器：宿主与 LLM 可替换，其余按配置组装
pub struct AppBuilder {
    config: AppConfig,
    operations: Arc<dyn HostOperations>,
    environment: Arc<dyn HostEnvironment>,
    llm: Arc<dyn LlmClient>,
    templates: Option<TemplateSet>,
}

/// 组装完成的应用
pub struct App {
    pub config: AppConfig,
    pub bridge: Arc<OperationBridge>,
    pub tools: Arc<ToolRegistry>,
    pub resources: Arc<ResourceRegistry>,
    pub executor: ToolExecutor,
    pub context: Arc<AgentContextManager>,
    pub planner: Arc<AgentPlanner>,
    pub server: Arc<McpServer>,
    /// 启动时的发现结果（工具与资源合并）
    pub discovery: DiscoveryReport,
}

impl AppBuilder {
    /// 默认使用内存宿主与离线 LLM（规划退回模板 / 兜底计划）
    pub fn new(config: AppConfig) -> Self {
        let host = Arc::new(InMemoryHost::new("Untitled"));
        Self {
            config,
            operations: host.clone(),
            environment: host,
            llm: Arc::new(OfflineLlmClient),
            templates: None,
        }
    }

    pub fn with_host<H>(mut self, host: Arc<H>) -> Self
    where
        H: HostOperations + HostEnvironment + 'static,
    {
        self.operations = host.clone() as Arc<dyn HostOperations>;
        self.environment = host as Arc<dyn HostEnvironment>;
        self
    }

    pub fn with_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = llm;
        self
    }

    /// 直接指定模板集，忽略配置中的模板文件
    pub fn with_templates(mut self, templates: TemplateSet) -> Self {
        self.templates = Some(templates);
        self
    }

    /// 内置模板 + 配置的模板文件；文件无法加载时告警并只用内置模板
    fn build_templates(&self) -> TemplateSet {
        let mut templates = TemplateSet::builtin();
        if let Some(path) = &self.config.agent.templates_file {
            match TemplateSet::load(path) {
                Ok(extra) => {
                    tracing::info!(path = %path.display(), count = extra.len(), "plan templates loaded");
                    templates.extend(extra);
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "plan templates ignored");
                }
            }
        }
        templates
    }

    fn builtin_tools() -> Vec<ToolCandidate> {
        vec![
            ToolCandidate::new("builtin:echo", || Ok(Arc::new(EchoTool) as Arc<dyn Tool>)),
            ToolCandidate::new("builtin:debug_log", || Ok(Arc::new(DebugLogTool) as Arc<dyn Tool>)),
        ]
    }

    pub fn build(mut self) -> App {
        let templates = match self.templates.take() {
            Some(templates) => templates,
            None => self.build_templates(),
        };
        let config = self.config;
        let pricing = config.pricing_table();

        let bridge = Arc::new(OperationBridge::new(&config.bridge));
        let tools = Arc::new(ToolRegistry::new());
        let resources = Arc::new(ResourceRegistry::new());

        let mut discovery = tools.discover(Self::builtin_tools());
        discovery.merge(resources.discover(HostSnapshotResource::candidates(
            &self.operations,
            &bridge,
        )));
        discovery.merge(register_host_operations(
            &tools,
            Arc::clone(&self.operations),
            Arc::clone(&bridge),
            Some(Arc::clone(&resources)),
        ));

        let context = Arc::new(AgentContextManager::new(
            Arc::clone(&self.environment),
            config.agent.clone(),
            pricing.clone(),
        ));
        let planner = Arc::new(
            AgentPlanner::new(self.llm, Arc::clone(&tools), &config.agent, &pricing)
                .with_templates(templates),
        );
        tools.register(PlanGoalTool::new(&planner, Arc::clone(&context)));

        let executor = ToolExecutor::new(Arc::clone(&tools), config.server.tool_timeout_secs);
        let server = Arc::new(
            McpServer::new(&config.server, executor.clone(), Arc::clone(&resources))
                .with_host(self.environment),
        );

        tracing::info!(
            tools = tools.len(),
            resources = resources.len(),
            failed = discovery.failed.len(),
            "application assembled"
        );

        App {
            config,
            bridge,
            tools,
            resources,
            executor,
            context,
            planner,
            server,
            discovery,
        }
    }
}

impl App {
    pub fn plan_executor(&self) -> PlanExecutor {
        PlanExecutor::new(
            Arc::clone(&self.planner),
            Arc::clone(&self.context),
            self.executor.clone(),
        )
    }

    /// 模拟宿主主线程：按 tick_interval_ms 驱动主回合，直到取消或桥关闭
    pub fn spawn_host_loop(&self, shutdown: CancellationToken) -> std::io::Result<thread::JoinHandle<()>> {
        let bridge = Arc::clone(&self.bridge);
        let interval = Duration::from_millis(self.config.bridge.tick_interval_ms.max(1));
        thread::Builder::new().name("host".to_string()).spawn(move || {
            while !shutdown.is_cancelled() && !bridge.is_shut_down() {
                bridge.tick();
                thread::sleep(interval);
            }
            tracing::debug!("host loop stopped");
        })
    }
}
