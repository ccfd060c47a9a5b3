//! 工具层：Tool trait、注册表、执行器、参数校验与内置工具

pub mod debug_log;
pub mod echo;
pub mod executor;
pub mod host_tool;
pub mod plan_goal;
pub mod registry;
pub mod schema;

pub use debug_log::{DebugLogTool, DEBUG_LOG_TOOL};
pub use echo::EchoTool;
pub use executor::ToolExecutor;
pub use host_tool::{register_host_operations, HostOperationTool};
pub use plan_goal::{PlanGoalTool, AGENT_TOOLS, PLAN_GOAL_TOOL};
pub use registry::{Tool, ToolCandidate, ToolRegistry};
