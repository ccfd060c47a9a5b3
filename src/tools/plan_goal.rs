//! 规划工具：把 Agent 规划器暴露给协议客户端
//!
//! 只返回计划，不执行。持有规划器的弱引用，避免与工具注册表形成引用环。

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;

use crate::agent::{AgentContextManager, AgentPlanner};
use crate::host::ExecutionContext;
use crate::protocol::ToolResult;
use crate::tools::schema::schema_of;
use crate::tools::Tool;

pub const PLAN_GOAL_TOOL: &str = "plan_goal";

/// Agent 自身的工具，不出现在规划器提供给模型的目录里
pub const AGENT_TOOLS: &[&str] = &[PLAN_GOAL_TOOL];

#[derive(Deserialize, JsonSchema)]
struct PlanGoalArgs {
    /// Natural-language goal to plan for
    goal: String,
}

pub struct PlanGoalTool {
    planner: Weak<AgentPlanner>,
    context: Arc<AgentContextManager>,
}

impl PlanGoalTool {
    pub fn new(planner: &Arc<AgentPlanner>, context: Arc<AgentContextManager>) -> Self {
        Self {
            planner: Arc::downgrade(planner),
            context,
        }
    }
}

#[async_trait]
impl Tool for PlanGoalTool {
    fn name(&self) -> &str {
        PLAN_GOAL_TOOL
    }

    fn description(&self) -> &str {
        "Turn a natural-language goal into an ordered plan of tool calls (returned as JSON, not executed)."
    }

    fn input_schema(&self) -> Value {
        schema_of::<PlanGoalArgs>()
    }

    async fn execute(&self, args: Value, ctx: &ExecutionContext) -> Result<ToolResult, String> {
        let args: PlanGoalArgs =
            serde_json::from_value(args).map_err(|e| format!("Invalid arguments: {}", e))?;
        let goal = args.goal.trim();
        if goal.is_empty() {
            return Err("Goal must not be empty".to_string());
        }
        let planner = self
            .planner
            .upgrade()
            .ok_or_else(|| "Planner is no longer available".to_string())?;

        let context = self.context.build_context(goal);
        let plan = planner.create_plan(goal, &context).await;
        tracing::info!(caller = %ctx.caller_id, plan = %plan.id, steps = plan.len(), "plan_goal produced plan");
        Ok(ToolResult::text(plan.to_pretty_json()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use serde_json::json;

    use crate::config::AgentSection;
    use crate::host::InMemoryHost;
    use crate::llm::MockLlmClient;
    use crate::tools::{DebugLogTool, ToolRegistry};

    #[tokio::test]
    async fn test_plan_goal_returns_plan_json() {
        let registry = Arc::new(ToolRegistry::new());
        registry.register(DebugLogTool);
        let cfg = AgentSection::default();
        let planner = Arc::new(AgentPlanner::new(
            Arc::new(MockLlmClient::failing("offline")),
            Arc::clone(&registry),
            &cfg,
            &HashMap::new(),
        ));
        let context = Arc::new(AgentContextManager::new(
            Arc::new(InMemoryHost::new("S")),
            cfg,
            HashMap::new(),
        ));
        let tool = PlanGoalTool::new(&planner, context);
        let ctx = ExecutionContext::detached("t");

        let out = tool.execute(json!({"goal": "ponder"}), &ctx).await.unwrap();
        let plan: Value = serde_json::from_str(&out.text_content()).unwrap();
        assert_eq!(plan["source"], "fallback");
        assert_eq!(plan["steps"][0]["toolName"], "debug_log");

        assert!(tool.execute(json!({"goal": "  "}), &ctx).await.is_err());
        drop(planner);
        assert!(tool.execute(json!({"goal": "x"}), &ctx).await.is_err());
    }
}
