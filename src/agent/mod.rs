//! Agent 子系统：上下文组装、记忆、成本、规划（模板 / LLM / 兜底）、计划调整与执行

pub mod context;
pub mod cost;
pub mod executor;
pub mod memory;
pub mod parse;
pub mod plan;
pub mod planner;
pub mod templates;

pub use context::{AgentContext, AgentContextManager, CAPABILITY_PREAMBLE};
pub use cost::{CostTracker, ModelUsage};
pub use executor::{ExecutionReport, PlanExecutor, StepOutcome, STEP_RESULT_CATEGORY};
pub use memory::{ActionRecord, AgentMemory, MemoryEntry};
pub use plan::{Plan, PlanSource, Step, StepStatus};
pub use planner::{AgentPlanner, ExecutionError};
pub use templates::{PlanTemplate, StepTemplate, TemplateSet};
