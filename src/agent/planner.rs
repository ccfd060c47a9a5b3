//! 规划器：目标 → 计划
//!
//! create_plan：模板命中 → 模板计划（置信度 0.9）；否则一次 LLM 结构化生成（0.7）；
//! LLM 失败或输出不可解析 → 只记录目标的单步兜底计划（0.3）。任何路径都不返回错误。
//! 模型给出的序号可能重复或不连续，入计划前统一重编为 1..n 并改写依赖。
//! adapt_plan：跳过失败步骤及直接依赖它的步骤（只看一层），剩余步骤重新连续编号，
//! 依赖序号原样保留（按 original_step_number 解释）；权限类错误时在最前面插入一个
//! 请求权限的诊断步骤；置信度 × 0.8。

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

use crate::agent::context::AgentContext;
use crate::agent::parse::parse_plan;
use crate::agent::plan::{required_tools, Plan, PlanSource, Step};
use crate::agent::templates::{normalize_goal, PlanTemplate, TemplateSet};
use crate::config::{AgentSection, ModelPrice};
use crate::core::AgentError;
use crate::llm::{CompletionOptions, LlmClient};
use crate::tools::{ToolRegistry, DEBUG_LOG_TOOL};

pub const TEMPLATE_CONFIDENCE: f64 = 0.9;
pub const MODEL_CONFIDENCE: f64 = 0.7;
pub const FALLBACK_CONFIDENCE: f64 = 0.3;
/// 每次调整后置信度乘以该系数
pub const ADAPT_DECAY: f64 = 0.8;
pub const TEMPLATE_DURATION_SECS: u64 = 30;
pub const SECS_PER_STEP: u64 = 10;

const AUTH_KEYWORDS: &[&str] = &[
    "permission",
    "unauthorized",
    "forbidden",
    "access denied",
    "not allowed",
];

const PLANNING_SYSTEM_PROMPT: &str = "You are a planning assistant. Break the user's goal into an \
ordered list of tool calls using only the tools listed. Respond with a single JSON object and nothing else.";

/// 触发调整的执行错误
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionError {
    pub step_number: usize,
    pub message: String,
}

impl ExecutionError {
    pub fn new(step_number: usize, message: impl Into<String>) -> Self {
        Self {
            step_number,
            message: message.into(),
        }
    }

    /// 是否为权限类错误（关键字，大小写不敏感）
    pub fn is_authorization(&self) -> bool {
        let lower = self.message.to_lowercase();
        AUTH_KEYWORDS.iter().any(|k| lower.contains(k))
    }
}

pub struct AgentPlanner {
    llm: Arc<dyn LlmClient>,
    tools: Arc<ToolRegistry>,
    templates: TemplateSet,
    options: CompletionOptions,
    tokens_per_step: u64,
    price: Option<ModelPrice>,
    /// 不出现在提供给模型的工具目录中的工具（Agent 自身的工具）
    excluded: HashSet<String>,
}

impl AgentPlanner {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        tools: Arc<ToolRegistry>,
        cfg: &AgentSection,
        pricing: &HashMap<String, ModelPrice>,
    ) -> Self {
        Self {
            llm,
            tools,
            templates: TemplateSet::builtin(),
            options: CompletionOptions::for_model(&cfg.model).with_system(PLANNING_SYSTEM_PROMPT),
            tokens_per_step: cfg.tokens_per_step,
            price: pricing.get(&cfg.model).copied(),
            excluded: crate::tools::AGENT_TOOLS.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn with_templates(mut self, templates: TemplateSet) -> Self {
        self.templates = templates;
        self
    }

    pub fn templates(&self) -> &TemplateSet {
        &self.templates
    }

    pub fn model(&self) -> &str {
        &self.options.model
    }

    /// LLM 累计 token 使用：(prompt, completion, total)
    pub fn token_usage(&self) -> (u64, u64, u64) {
        self.llm.token_usage()
    }

    /// 规划模型可见的工具目录：(name, description)
    pub fn catalog(&self) -> Vec<(String, String)> {
        self.tools
            .tool_descriptions()
            .into_iter()
            .filter(|(name, _)| !self.excluded.contains(name))
            .collect()
    }

    pub async fn create_plan(&self, goal: &str, context: &AgentContext) -> Plan {
        let goal = normalize_goal(goal);
        if let Some(template) = self.templates.match_goal(&goal) {
            tracing::info!(template = %template.name, "goal matched plan template");
            return self.from_template(template, &goal);
        }

        match self.plan_with_model(&goal, context).await {
            Ok(plan) => plan,
            Err(e) => {
                tracing::warn!(error = %e, "model planning failed, using fallback plan");
                self.fallback(&goal)
            }
        }
    }

    fn from_template(&self, template: &PlanTemplate, goal: &str) -> Plan {
        // 模板序号 → 新序号；工具未注册的步骤被跳过
        let mut renumbered: HashMap<usize, usize> = HashMap::new();
        let mut steps = Vec::new();
        for (index, tpl) in template.steps.iter().enumerate() {
            if !self.tools.contains(&tpl.tool) {
                tracing::debug!(template = %template.name, tool = %tpl.tool, "template step skipped, tool not registered");
                continue;
            }
            let number = steps.len() + 1;
            renumbered.insert(index + 1, number);
            let dependencies = tpl
                .depends_on
                .iter()
                .filter_map(|d| renumbered.get(d).copied())
                .collect();
            steps.push(Step::new(
                number,
                tpl.description.clone(),
                tpl.tool.clone(),
                template.render_arguments(tpl, goal),
                dependencies,
            ));
        }
        let mut plan = self.assemble(goal, steps, template.risks.clone(), TEMPLATE_CONFIDENCE, PlanSource::Template);
        plan.estimated_duration_secs = TEMPLATE_DURATION_SECS;
        plan
    }

    async fn plan_with_model(&self, goal: &str, context: &AgentContext) -> Result<Plan, AgentError> {
        let prompt = self.build_prompt(goal, context);
        let output = self
            .llm
            .complete(&prompt, &self.options)
            .await
            .map_err(AgentError::LlmError)?;
        let parsed = parse_plan(&output)?;
        let steps = renumber_model_steps(parsed.steps);
        Ok(self.assemble(goal, steps, parsed.risks, MODEL_CONFIDENCE, PlanSource::Model))
    }

    /// 结构化生成请求：目标、工具目录、上下文，以及要求的 JSON 形状
    pub fn build_prompt(&self, goal: &str, context: &AgentContext) -> String {
        let catalog = self
            .catalog()
            .into_iter()
            .map(|(name, description)| format!("- {}: {}", name, description))
            .collect::<Vec<_>>()
            .join("\n");
        format!(
            "{context}\n\n## Available tools\n{catalog}\n\n## Task\nCreate a plan for the goal: {goal}\n\n\
Respond with JSON of the form:\n\
{{\"steps\": [{{\"stepNumber\": 1, \"description\": \"...\", \"toolName\": \"...\", \"toolArguments\": {{}}, \"dependencies\": []}}], \"risks\": [\"...\"]}}",
            context = context.render(),
            catalog = catalog,
            goal = goal,
        )
    }

    /// 兜底计划：只用诊断工具记录目标
    pub fn fallback(&self, goal: &str) -> Plan {
        let step = Step::new(
            1,
            "Log the goal for manual follow-up",
            DEBUG_LOG_TOOL,
            json!({ "message": format!("Unplanned goal: {}", goal), "level": "warn" }),
            Vec::new(),
        );
        self.assemble(
            goal,
            vec![step],
            vec!["No executable plan could be produced".to_string()],
            FALLBACK_CONFIDENCE,
            PlanSource::Fallback,
        )
    }

    pub fn adapt_plan(&self, original: &Plan, error: &ExecutionError) -> Plan {
        let failed = error.step_number;
        // 依赖写的是原始序号；插入的权限步骤（原始序号 0）没有依赖者
        let failed_reference = original
            .step(failed)
            .map(|s| s.original_step_number)
            .filter(|n| *n > 0);
        let mut steps = Vec::with_capacity(original.steps.len() + 1);
        if error.is_authorization() {
            steps.push(Step::new(
                0,
                "Request the permission needed to continue",
                DEBUG_LOG_TOOL,
                json!({
                    "message": format!("Permission required after step {} failed: {}", failed, error.message),
                    "level": "warn",
                }),
                Vec::new(),
            ));
        }
        steps.extend(
            original
                .steps
                .iter()
                .filter(|s| {
                    s.step_number != failed
                        && !failed_reference.is_some_and(|reference| s.depends_on(reference))
                })
                .cloned(),
        );
        for (index, step) in steps.iter_mut().enumerate() {
            step.step_number = index + 1;
        }

        let skipped = original.steps.len() + usize::from(error.is_authorization()) - steps.len();
        tracing::info!(failed_step = failed, skipped, remaining = steps.len(), "plan adapted");

        let mut plan = self.assemble(
            &original.goal,
            steps,
            original.risks.clone(),
            original.confidence * ADAPT_DECAY,
            PlanSource::Adapted,
        );
        plan.risks.push(format!("Adapted after step {} failed: {}", failed, error.message));
        plan
    }

    fn assemble(
        &self,
        goal: &str,
        steps: Vec<Step>,
        risks: Vec<String>,
        confidence: f64,
        source: PlanSource,
    ) -> Plan {
        let estimated_tokens = steps.len() as u64 * self.tokens_per_step;
        let estimated_cost = self
            .price
            .map(|p| estimated_tokens as f64 / 1000.0 * p.input_per_1k)
            .unwrap_or(0.0);
        Plan {
            id: Uuid::new_v4().to_string(),
            goal: goal.to_string(),
            required_tools: required_tools(&steps),
            estimated_duration_secs: steps.len() as u64 * SECS_PER_STEP,
            steps,
            confidence: confidence.clamp(0.0, 1.0),
            estimated_tokens,
            estimated_cost,
            risks,
            source,
            created_at: Utc::now(),
        }
    }
}

/// 模型步骤重编为 1..n。依赖按旧序号映射（重复序号取第一次出现的步骤），
/// 无法解析的依赖和指向自身的依赖被丢弃
fn renumber_model_steps(mut steps: Vec<Step>) -> Vec<Step> {
    let mut renumbered: HashMap<usize, usize> = HashMap::new();
    for (index, step) in steps.iter().enumerate() {
        renumbered.entry(step.step_number).or_insert(index + 1);
    }
    for (index, step) in steps.iter_mut().enumerate() {
        let number = index + 1;
        let mut dependencies: Vec<usize> = Vec::with_capacity(step.dependencies.len());
        for dep in &step.dependencies {
            match renumbered.get(dep).copied() {
                Some(mapped) if mapped != number && !dependencies.contains(&mapped) => {
                    dependencies.push(mapped)
                }
                Some(_) => {}
                None => {
                    tracing::debug!(step = number, dependency = dep, "unresolved model dependency dropped")
                }
            }
        }
        step.step_number = number;
        step.original_step_number = number;
        step.dependencies = dependencies;
    }
    steps
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::plan::StepStatus;
    use crate::agent::templates::StepTemplate;
    use crate::host::HostSummary;
    use crate::llm::MockLlmClient;
    use crate::tools::{DebugLogTool, EchoTool, Tool};
    use async_trait::async_trait;
    use serde_json::Value;

    use crate::host::ExecutionContext;
    use crate::protocol::ToolResult;

    struct Stub(&'static str);

    #[async_trait]
    impl Tool for Stub {
        fn name(&self) -> &str {
            self.0
        }
        fn description(&self) -> &str {
            "stub"
        }
        async fn execute(&self, _args: Value, _ctx: &ExecutionContext) -> Result<ToolResult, String> {
            Ok(ToolResult::text("ok"))
        }
    }

    fn context(goal: &str) -> AgentContext {
        AgentContext {
            goal: goal.to_string(),
            preamble: String::new(),
            host: HostSummary::default(),
            relevant_memories: Vec::new(),
            recent_actions: Vec::new(),
            estimated_tokens: 0,
        }
    }

    fn planner(llm: MockLlmClient, tools: &[&'static str]) -> AgentPlanner {
        let registry = Arc::new(ToolRegistry::new());
        registry.register(DebugLogTool);
        for t in tools {
            registry.register(Stub(*t));
        }
        AgentPlanner::new(Arc::new(llm), registry, &AgentSection::default(), &HashMap::new())
    }

    #[tokio::test]
    async fn test_template_plan_skips_unregistered_tools() {
        // save_scene 未注册
        let p = planner(MockLlmClient::new(), &["create_scene", "create_object"]);
        let plan = p.create_plan("create a new scene please", &context("g")).await;
        assert_eq!(plan.source, PlanSource::Template);
        assert_eq!(plan.len(), 3);
        assert_eq!(plan.confidence, TEMPLATE_CONFIDENCE);
        assert_eq!(plan.estimated_duration_secs, TEMPLATE_DURATION_SECS);
        let numbers: Vec<_> = plan.steps.iter().map(|s| s.step_number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
        assert_eq!(plan.required_tools, vec!["create_scene", "create_object"]);
        assert_eq!(plan.estimated_tokens, 3 * 500);
    }

    #[tokio::test]
    async fn test_template_dependencies_follow_surviving_steps() {
        let tpl = PlanTemplate::new(
            "t",
            "^go$",
            vec![
                StepTemplate { description: "a".into(), tool: "missing".into(), arguments: json!({}), depends_on: vec![] },
                StepTemplate { description: "b".into(), tool: "b".into(), arguments: json!({}), depends_on: vec![] },
                StepTemplate { description: "c".into(), tool: "c".into(), arguments: json!({}), depends_on: vec![1, 2] },
            ],
            vec![],
        )
        .unwrap();
        let mut set = TemplateSet::empty();
        set.push(tpl);
        let p = planner(MockLlmClient::new(), &["b", "c"]).with_templates(set);
        let plan = p.create_plan("go", &context("go")).await;
        assert_eq!(plan.steps[1].step_number, 2);
        assert_eq!(plan.steps[1].dependencies, vec![1]);
    }

    #[tokio::test]
    async fn test_model_plan_and_catalog_excludes_agent_tools() {
        let llm = MockLlmClient::with_responses([r#"```json
{"steps": [{"stepNumber": 1, "description": "say", "toolName": "echo", "toolArguments": {"text": "hi"}}], "risks": ["none"]}
```"#]);
        let registry = Arc::new(ToolRegistry::new());
        registry.register(EchoTool);
        registry.register(Stub(crate::tools::PLAN_GOAL_TOOL));
        let llm = Arc::new(llm);
        let p = AgentPlanner::new(llm.clone(), registry, &AgentSection::default(), &HashMap::new());

        let plan = p.create_plan("greet the world", &context("greet the world")).await;
        assert_eq!(plan.source, PlanSource::Model);
        assert_eq!(plan.confidence, MODEL_CONFIDENCE);
        assert_eq!(plan.steps[0].tool_name, "echo");
        assert_eq!(plan.risks, vec!["none"]);
        assert_eq!(plan.estimated_duration_secs, SECS_PER_STEP);

        let prompt = &llm.prompts()[0];
        assert!(prompt.contains("- echo:"));
        assert!(!prompt.contains(crate::tools::PLAN_GOAL_TOOL));
        assert!(prompt.contains("greet the world"));
    }

    #[tokio::test]
    async fn test_model_step_numbers_become_dense() {
        let llm = MockLlmClient::with_responses([r#"{"steps": [
            {"stepNumber": 3, "toolName": "a"},
            {"stepNumber": 3, "toolName": "b", "dependencies": [3]},
            {"stepNumber": 7, "toolName": "c", "dependencies": [3, 9, 7]}
        ]}"#]);
        let p = planner(llm, &["a", "b", "c"]);
        let plan = p.create_plan("unmatched goal", &context("g")).await;
        assert_eq!(plan.source, PlanSource::Model);

        let numbers: Vec<_> = plan.steps.iter().map(|s| s.step_number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
        assert_eq!(plan.steps[1].dependencies, vec![1]);
        // 9 不存在，7 指向自身
        assert_eq!(plan.steps[2].dependencies, vec![1]);
        assert_eq!(plan.steps[2].original_step_number, 3);

        // 只移除失败的那一步及其依赖者
        let adapted = p.adapt_plan(&plan, &ExecutionError::new(2, "boom"));
        let numbers: Vec<_> = adapted.steps.iter().map(|s| s.step_number).collect();
        assert_eq!(numbers, vec![1, 2]);
        assert_eq!(adapted.steps[1].tool_name, "c");
    }

    #[tokio::test]
    async fn test_fallback_on_failure_or_garbage() {
        let p = planner(MockLlmClient::failing("timeout"), &[]);
        let plan = p.create_plan("do something odd", &context("g")).await;
        assert_eq!(plan.source, PlanSource::Fallback);
        assert_eq!(plan.confidence, FALLBACK_CONFIDENCE);
        assert_eq!(plan.len(), 1);
        assert_eq!(plan.steps[0].tool_name, DEBUG_LOG_TOOL);

        let p = planner(MockLlmClient::with_responses(["I cannot help with that."]), &[]);
        let plan = p.create_plan("do something odd", &context("g")).await;
        assert_eq!(plan.source, PlanSource::Fallback);
    }

    fn three_step_plan(p: &AgentPlanner) -> Plan {
        let steps = vec![
            Step::new(1, "one", "a", json!({}), vec![]),
            Step::new(2, "two", "b", json!({"x": 1}), vec![1]),
            Step::new(3, "three", "c", json!({}), vec![]),
        ];
        p.assemble("goal", steps, vec![], 0.9, PlanSource::Model)
    }

    #[test]
    fn test_adapt_skips_failed_and_direct_dependents() {
        let p = planner(MockLlmClient::new(), &[]);
        let original = three_step_plan(&p);
        let adapted = p.adapt_plan(&original, &ExecutionError::new(1, "object not found"));

        assert_eq!(adapted.len(), 1);
        assert_eq!(adapted.steps[0].step_number, 1);
        assert_eq!(adapted.steps[0].tool_name, "c");
        assert!((adapted.confidence - 0.72).abs() < 1e-9);
        assert_eq!(adapted.source, PlanSource::Adapted);
        assert_ne!(adapted.id, original.id);
        // 原计划不变
        assert_eq!(original.len(), 3);
    }

    #[test]
    fn test_adapt_keeps_dependency_numbers_verbatim() {
        let p = planner(MockLlmClient::new(), &[]);
        let steps = vec![
            Step::new(1, "one", "a", json!({}), vec![]),
            Step::new(2, "two", "b", json!({}), vec![]),
            Step::new(3, "three", "c", json!({}), vec![1]),
        ];
        let original = p.assemble("goal", steps, vec![], 0.5, PlanSource::Model);
        let adapted = p.adapt_plan(&original, &ExecutionError::new(2, "boom"));
        assert_eq!(adapted.len(), 2);
        assert_eq!(adapted.steps[1].step_number, 2);
        assert_eq!(adapted.steps[1].dependencies, vec![1]);
        assert_eq!(adapted.steps[1].status, StepStatus::Pending);
    }

    #[test]
    fn test_adapt_prepends_permission_step_for_auth_errors() {
        let p = planner(MockLlmClient::new(), &[]);
        let original = three_step_plan(&p);
        let adapted = p.adapt_plan(&original, &ExecutionError::new(3, "Access Denied by policy"));

        assert_eq!(adapted.len(), 3);
        assert_eq!(adapted.steps[0].tool_name, DEBUG_LOG_TOOL);
        assert_eq!(adapted.steps[0].step_number, 1);
        assert_eq!(adapted.steps[1].tool_name, "a");
        assert_eq!(adapted.steps[2].step_number, 3);
        assert!(adapted.required_tools.contains(&DEBUG_LOG_TOOL.to_string()));

        let twice = p.adapt_plan(&adapted, &ExecutionError::new(1, "still failing"));
        assert!((twice.confidence - 0.9 * 0.8 * 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_second_adaptation_matches_dependents_by_original_number() {
        let p = planner(MockLlmClient::new(), &[]);
        let steps = vec![
            Step::new(1, "one", "a", json!({}), vec![]),
            Step::new(2, "two", "b", json!({}), vec![]),
            Step::new(3, "three", "c", json!({}), vec![]),
            Step::new(4, "four", "d", json!({}), vec![3]),
            Step::new(5, "five", "e", json!({}), vec![2]),
        ];
        let original = p.assemble("goal", steps, vec![], 0.9, PlanSource::Model);
        let first = p.adapt_plan(&original, &ExecutionError::new(1, "boom"));
        // c d e 变成 2 3 4（原 b 仍是 1）
        assert_eq!(first.steps[1].tool_name, "c");
        assert_eq!(first.steps[1].original_step_number, 3);

        // 新序号 2 的步骤失败：依赖原始序号 3 的 d 被移除，依赖原始序号 2 的 e 保留
        let second = p.adapt_plan(&first, &ExecutionError::new(2, "boom again"));
        let tools: Vec<_> = second.steps.iter().map(|s| s.tool_name.as_str()).collect();
        assert_eq!(tools, vec!["b", "e"]);
        assert_eq!(second.steps[1].dependencies, vec![2]);
        assert_eq!(second.steps[1].step_number, 2);
    }
}
