//! 计划与步骤
//!
//! Plan 交给执行器后除步骤状态外不再修改；调整计划总是生成新的 Plan。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 步骤状态：执行期间唯一可变的字段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Skipped,
}

/// 计划来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanSource {
    Template,
    Model,
    Fallback,
    Adapted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    /// 1 起、连续
    pub step_number: usize,
    pub description: String,
    pub tool_name: String,
    pub tool_arguments: Value,
    /// 必须先完成的步骤序号（按 original_step_number 解释）
    pub dependencies: Vec<usize>,
    pub status: StepStatus,
    /// 首次生成计划时的序号；调整计划重新编号后依赖仍指向它。插入的权限步骤为 0
    #[serde(default)]
    pub original_step_number: usize,
}

impl Step {
    pub fn new(
        step_number: usize,
        description: impl Into<String>,
        tool_name: impl Into<String>,
        tool_arguments: Value,
        dependencies: Vec<usize>,
    ) -> Self {
        Self {
            step_number,
            description: description.into(),
            tool_name: tool_name.into(),
            tool_arguments,
            dependencies,
            status: StepStatus::Pending,
            original_step_number: step_number,
        }
    }

    pub fn depends_on(&self, step_number: usize) -> bool {
        self.dependencies.contains(&step_number)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    pub id: String,
    pub goal: String,
    pub steps: Vec<Step>,
    /// [0, 1]
    pub confidence: f64,
    pub estimated_tokens: u64,
    pub estimated_cost: f64,
    pub estimated_duration_secs: u64,
    /// 去重后的工具名（按首次出现顺序）
    pub required_tools: Vec<String>,
    pub risks: Vec<String>,
    pub source: PlanSource,
    pub created_at: DateTime<Utc>,
}

impl Plan {
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn step(&self, step_number: usize) -> Option<&Step> {
        self.steps.iter().find(|s| s.step_number == step_number)
    }

    pub fn step_mut(&mut self, step_number: usize) -> Option<&mut Step> {
        self.steps.iter_mut().find(|s| s.step_number == step_number)
    }

    /// 按依赖引用查找步骤（依赖写的是原始序号）
    pub fn dependency(&self, reference: usize) -> Option<&Step> {
        if reference == 0 {
            return None;
        }
        self.steps.iter().find(|s| s.original_step_number == reference)
    }

    pub fn count_status(&self, status: StepStatus) -> usize {
        self.steps.iter().filter(|s| s.status == status).count()
    }

    /// 所有步骤都已完成
    pub fn is_complete(&self) -> bool {
        self.steps.iter().all(|s| s.status == StepStatus::Completed)
    }

    pub fn to_pretty_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| format!("{:?}", self))
    }
}

/// 步骤引用到的工具名，去重并保持首次出现顺序
pub fn required_tools(steps: &[Step]) -> Vec<String> {
    let mut tools: Vec<String> = Vec::new();
    for step in steps {
        if !tools.iter().any(|t| t == &step.tool_name) {
            tools.push(step.tool_name.clone());
        }
    }
    tools
}
