//! 计划执行器
//!
//! run(goal)：组装上下文 → 规划 → 按顺序执行步骤 → 失败时调整计划重试（最多 max_adaptations 次）。
//! 只执行 Pending 步骤；依赖的步骤存在但未完成时跳过，依赖序号在计划中不存在时视为已满足。
//! 依赖按步骤的原始序号解析，调整计划后重新编号不影响依赖关系。
//! 有步骤失败或被跳过的运行不算成功。
//! 每一步都写入长期记忆，成功结果写入短期记忆（category = step_result），规划调用的 token 计入成本。

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;

use crate::agent::context::AgentContextManager;
use crate::agent::plan::{Plan, StepStatus};
use crate::agent::planner::{AgentPlanner, ExecutionError};
use crate::tools::ToolExecutor;

/// 短期记忆中步骤结果的类别
pub const STEP_RESULT_CATEGORY: &str = "step_result";

const OUTPUT_PREVIEW_CHARS: usize = 200;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepOutcome {
    /// 第几轮执行（0 为初始计划，之后每次调整 +1）
    pub attempt: usize,
    pub step_number: usize,
    pub tool_name: String,
    pub status: StepStatus,
    pub output: String,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionReport {
    pub goal: String,
    /// 最后执行的计划（含步骤最终状态）
    pub plan: Plan,
    pub outcomes: Vec<StepOutcome>,
    pub adaptations: usize,
    pub success: bool,
}

pub struct PlanExecutor {
    planner: Arc<AgentPlanner>,
    context: Arc<AgentContextManager>,
    tools: ToolExecutor,
    max_adaptations: usize,
    caller_id: String,
}

impl PlanExecutor {
    pub fn new(planner: Arc<AgentPlanner>, context: Arc<AgentContextManager>, tools: ToolExecutor) -> Self {
        let max_adaptations = context.config().max_adaptations;
        Self {
            planner,
            context,
            tools,
            max_adaptations,
            caller_id: "agent".to_string(),
        }
    }

    pub fn with_caller_id(mut self, caller_id: impl Into<String>) -> Self {
        self.caller_id = caller_id.into();
        self
    }

    pub async fn run(&self, goal: &str) -> ExecutionReport {
        let context = self.context.build_context(goal);
        let usage_before = self.planner.token_usage();
        let mut plan = self.planner.create_plan(goal, &context).await;
        self.track_planning_cost(usage_before);
        tracing::info!(
            plan = %plan.id,
            source = ?plan.source,
            steps = plan.len(),
            confidence = plan.confidence,
            "plan created"
        );
        self.context
            .record_action(&format!("Planned '{}' with {} step(s)", goal, plan.len()));

        let mut outcomes = Vec::new();
        let mut adaptations = 0;
        loop {
            match self.run_plan(&mut plan, adaptations, &mut outcomes).await {
                None => {
                    let success = plan.count_status(StepStatus::Failed) == 0
                        && plan.count_status(StepStatus::Skipped) == 0;
                    self.context.record_action(&format!(
                        "Finished '{}': {} completed, {} skipped",
                        goal,
                        plan.count_status(StepStatus::Completed),
                        plan.count_status(StepStatus::Skipped),
                    ));
                    return ExecutionReport {
                        goal: goal.to_string(),
                        plan,
                        outcomes,
                        adaptations,
                        success,
                    };
                }
                Some(error) if adaptations < self.max_adaptations => {
                    adaptations += 1;
                    plan = self.planner.adapt_plan(&plan, &error);
                    self.context.record_action(&format!(
                        "Adapted plan after step {} failed ({}); {} step(s) remain",
                        error.step_number,
                        error.message,
                        plan.len()
                    ));
                }
                Some(error) => {
                    tracing::warn!(step = error.step_number, error = %error.message, "giving up after max adaptations");
                    self.context
                        .record_action(&format!("Gave up on '{}': {}", goal, error.message));
                    return ExecutionReport {
                        goal: goal.to_string(),
                        plan,
                        outcomes,
                        adaptations,
                        success: false,
                    };
                }
            }
        }
    }

    /// 执行计划中的 Pending 步骤；返回第一个失败
    async fn run_plan(
        &self,
        plan: &mut Plan,
        attempt: usize,
        outcomes: &mut Vec<StepOutcome>,
    ) -> Option<ExecutionError> {
        for index in 0..plan.steps.len() {
            if plan.steps[index].status != StepStatus::Pending {
                continue;
            }
            let blocked = plan.steps[index].dependencies.iter().copied().find(|dep| {
                plan.dependency(*dep)
                    .map(|d| d.status != StepStatus::Completed)
                    .unwrap_or(false)
            });

            let step = &mut plan.steps[index];
            if let Some(dep) = blocked {
                step.status = StepStatus::Skipped;
                let note = format!("dependency step {} did not complete", dep);
                self.context.record_action(&format!(
                    "Skipped step {} ({}): {}",
                    step.step_number, step.tool_name, note
                ));
                outcomes.push(StepOutcome {
                    attempt,
                    step_number: step.step_number,
                    tool_name: step.tool_name.clone(),
                    status: StepStatus::Skipped,
                    output: note,
                    duration_ms: 0,
                });
                continue;
            }

            step.status = StepStatus::InProgress;
            let ctx = self.context.execution_context(&self.caller_id);
            let start = Instant::now();
            let result = self
                .tools
                .execute(&step.tool_name, Some(step.tool_arguments.clone()), &ctx)
                .await;
            let duration_ms = start.elapsed().as_millis() as u64;

            let (status, output) = match result {
                Ok(r) if !r.is_error => (StepStatus::Completed, r.text_content()),
                Ok(r) => (StepStatus::Failed, r.text_content()),
                Err(e) => (StepStatus::Failed, e.to_string()),
            };
            step.status = status;
            let preview = preview(&output);
            self.context.record_action(&format!(
                "Step {} ({}) {}: {}",
                step.step_number,
                step.tool_name,
                if status == StepStatus::Completed { "completed" } else { "failed" },
                preview
            ));
            if status == StepStatus::Completed {
                self.context.update_memory(
                    &format!("last_result:{}", step.tool_name),
                    &preview,
                    STEP_RESULT_CATEGORY,
                );
            }
            outcomes.push(StepOutcome {
                attempt,
                step_number: step.step_number,
                tool_name: step.tool_name.clone(),
                status,
                output: output.clone(),
                duration_ms,
            });

            if status == StepStatus::Failed {
                return Some(ExecutionError::new(step.step_number, output));
            }
        }
        None
    }

    fn track_planning_cost(&self, before: (u64, u64, u64)) {
        let after = self.planner.token_usage();
        let input = after.0.saturating_sub(before.0);
        let output = after.1.saturating_sub(before.1);
        if input + output > 0 {
            let cost = self.context.track_usage(self.planner.model(), input, output);
            tracing::debug!(model = %self.planner.model(), input, output, cost, "planning usage tracked");
        }
    }
}

fn preview(text: &str) -> String {
    if text.chars().count() > OUTPUT_PREVIEW_CHARS {
        format!("{}...", text.chars().take(OUTPUT_PREVIEW_CHARS).collect::<String>())
    } else {
        text.to_string()
    }
}
