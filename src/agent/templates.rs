//! 规划模板：正则模式 → 固定步骤序列
//!
//! 目标按声明顺序逐个匹配（大小写不敏感），第一个命中的模板生效。参数中的字符串可以引用
//! `{goal}` 或模式里的命名捕获组 `{name}`；未捕获到的组替换为空串。
//! 模板也可以从 TOML 文件加载：
//!
//! ```toml
//! [[template]]
//! name = "inspect"
//! pattern = '\b(list|show)\b.*\bobjects\b'
//!
//! [[template.steps]]
//! description = "List the objects in the scene"
//! tool = "list_objects"
//! ```

use std::path::Path;
use std::sync::OnceLock;

use regex::{Captures, Regex, RegexBuilder};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::core::AgentError;

/// 模板中的一步
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StepTemplate {
    pub description: String,
    pub tool: String,
    #[serde(default = "empty_object")]
    pub arguments: Value,
    /// 依赖的模板步骤序号（1 起，按模板原始编号）
    #[serde(default)]
    pub depends_on: Vec<usize>,
}

fn empty_object() -> Value {
    Value::Object(Default::default())
}

#[derive(Debug, Clone)]
pub struct PlanTemplate {
    pub name: String,
    pattern: Regex,
    pub steps: Vec<StepTemplate>,
    pub risks: Vec<String>,
}

impl PlanTemplate {
    pub fn new(
        name: impl Into<String>,
        pattern: &str,
        steps: Vec<StepTemplate>,
        risks: Vec<String>,
    ) -> Result<Self, AgentError> {
        let name = name.into();
        let pattern = RegexBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .map_err(|e| AgentError::TemplateError(format!("{}: {}", name, e)))?;
        Ok(Self {
            name,
            pattern,
            steps,
            risks,
        })
    }

    pub fn pattern(&self) -> &str {
        self.pattern.as_str()
    }

    pub fn is_match(&self, goal: &str) -> bool {
        self.pattern.is_match(goal)
    }

    /// 把步骤参数中的占位符替换为目标文本 / 捕获组
    pub fn render_arguments(&self, step: &StepTemplate, goal: &str) -> Value {
        let captures = self.pattern.captures(goal);
        substitute(&step.arguments, goal, captures.as_ref())
    }
}

fn substitute(value: &Value, goal: &str, captures: Option<&Captures<'_>>) -> Value {
    match value {
        Value::String(s) => Value::String(fill(s, goal, captures)),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|v| substitute(v, goal, captures))
                .collect(),
        ),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), substitute(v, goal, captures)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// `{name}` 占位符，编译一次后复用
fn placeholder_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)\}").ok())
        .as_ref()
}

fn fill(template: &str, goal: &str, captures: Option<&Captures<'_>>) -> String {
    if !template.contains('{') {
        return template.to_string();
    }
    let Some(placeholder) = placeholder_pattern() else {
        return template.to_string();
    };
    placeholder
        .replace_all(template, |caps: &Captures<'_>| {
            let key = &caps[1];
            if key == "goal" {
                return goal.to_string();
            }
            captures
                .and_then(|c| c.name(key))
                .map(|m| m.as_str().to_string())
                .unwrap_or_default()
        })
        .into_owned()
}

#[derive(Deserialize)]
struct TemplateFile {
    #[serde(default)]
    template: Vec<RawTemplate>,
}

#[derive(Deserialize)]
struct RawTemplate {
    name: String,
    pattern: String,
    #[serde(default)]
    steps: Vec<StepTemplate>,
    #[serde(default)]
    risks: Vec<String>,
}

/// 有序模板集合
#[derive(Debug, Clone, Default)]
pub struct TemplateSet {
    templates: Vec<PlanTemplate>,
}

impl TemplateSet {
    pub fn empty() -> Self {
        Self::default()
    }

    /// 面向演示宿主的内置模板
    pub fn builtin() -> Self {
        let step = |description: &str, tool: &str, arguments: Value, depends_on: Vec<usize>| StepTemplate {
            description: description.to_string(),
            tool: tool.to_string(),
            arguments,
            depends_on,
        };
        let defs = vec![
            (
                "new_scene",
                r"\b(create|make|start|new)\b.*\bscene\b",
                vec![
                    step("Create an empty scene", "create_scene", json!({"name": "Untitled"}), vec![]),
                    step(
                        "Add a main camera",
                        "create_object",
                        json!({"name": "Main Camera", "kind": "camera", "position": [0.0, 1.0, -10.0]}),
                        vec![1],
                    ),
                    step(
                        "Add a directional light",
                        "create_object",
                        json!({"name": "Directional Light", "kind": "light", "position": [0.0, 3.0, 0.0]}),
                        vec![1],
                    ),
                    step("Save the new scene", "save_scene", json!({}), vec![1]),
                ],
                vec!["Replaces the currently open scene".to_string()],
            ),
            (
                "inspect_scene",
                r"\b(list|show|describe|inspect)\b.*\b(objects|scene)\b",
                vec![step("List the objects in the scene", "list_objects", json!({}), vec![])],
                vec![],
            ),
            (
                "add_primitive",
                r"\b(add|create|spawn|place)\b.*?\b(?P<kind>cube|sphere|light|camera)\b",
                vec![
                    step(
                        "Create the requested object",
                        "create_object",
                        json!({"name": "New {kind}", "kind": "{kind}"}),
                        vec![],
                    ),
                    step("Select the new object", "select_object", json!({"name": "New {kind}"}), vec![1]),
                ],
                vec!["Fails if an object with the same name already exists".to_string()],
            ),
        ];

        let mut set = Self::empty();
        for (name, pattern, steps, risks) in defs {
            match PlanTemplate::new(name, pattern, steps, risks) {
                Ok(t) => set.push(t),
                Err(e) => tracing::warn!(template = %name, error = %e, "builtin template skipped"),
            }
        }
        set
    }

    pub fn from_toml_str(text: &str) -> Result<Self, AgentError> {
        let file: TemplateFile =
            toml::from_str(text).map_err(|e| AgentError::TemplateError(e.to_string()))?;
        let mut set = Self::empty();
        for raw in file.template {
            set.push(PlanTemplate::new(raw.name, &raw.pattern, raw.steps, raw.risks)?);
        }
        Ok(set)
    }

    pub fn load(path: &Path) -> Result<Self, AgentError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| AgentError::TemplateError(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&text)
    }

    pub fn push(&mut self, template: PlanTemplate) {
        self.templates.push(template);
    }

    /// 追加另一组模板（优先级低于已有模板）
    pub fn extend(&mut self, other: TemplateSet) {
        self.templates.extend(other.templates);
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    /// 第一个命中的模板；目标先去掉首尾空白并折叠内部空白
    pub fn match_goal(&self, goal: &str) -> Option<&PlanTemplate> {
        let normalized = normalize_goal(goal);
        self.templates.iter().find(|t| t.is_match(&normalized))
    }
}

pub fn normalize_goal(goal: &str) -> String {
    goal.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_first_match_wins() {
        let set = TemplateSet::builtin();
        let t = set.match_goal("Create a NEW scene please").unwrap();
        assert_eq!(t.name, "new_scene");
        // 同时命中 new_scene 与 add_primitive 时取声明在前的
        let t = set.match_goal("create a cube in a new scene").unwrap();
        assert_eq!(t.name, "new_scene");
        assert!(set.match_goal("what time is it").is_none());
    }

    #[test]
    fn test_placeholders_use_captures_and_goal() {
        let set = TemplateSet::builtin();
        let goal = "please add a sphere";
        let t = set.match_goal(goal).unwrap();
        assert_eq!(t.name, "add_primitive");
        let args = t.render_arguments(&t.steps[0], goal);
        assert_eq!(args["name"], "New sphere");
        assert_eq!(args["kind"], "sphere");

        let custom = PlanTemplate::new(
            "note",
            r"^note",
            vec![StepTemplate {
                description: "log".into(),
                tool: "debug_log".into(),
                arguments: json!({"message": "goal={goal} missing={nope}"}),
                depends_on: vec![],
            }],
            vec![],
        )
        .unwrap();
        let args = custom.render_arguments(&custom.steps[0], "note this");
        assert_eq!(args["message"], "goal=note this missing=");
    }

    #[test]
    fn test_placeholder_pattern_compiled_once() {
        let first = placeholder_pattern().unwrap();
        let second = placeholder_pattern().unwrap();
        assert!(std::ptr::eq(first, second));
        assert_eq!(fill("{goal}!", "wave", None), "wave!");
        assert_eq!(fill("no braces", "wave", None), "no braces");
    }

    #[test]
    fn test_load_from_toml() {
        let text = r#"
            [[template]]
            name = "tidy"
            pattern = '\bclean\s*up\b'
            risks = ["deletes objects"]

            [[template.steps]]
            description = "List first"
            tool = "list_objects"

            [[template.steps]]
            description = "Remove the default cube"
            tool = "delete_object"
            arguments = { name = "Cube" }
            depends_on = [1]
        "#;
        let set = TemplateSet::from_toml_str(text).unwrap();
        let t = set.match_goal("Clean up the scene").unwrap();
        assert_eq!(t.steps.len(), 2);
        assert_eq!(t.steps[1].arguments["name"], "Cube");
        assert_eq!(t.steps[1].depends_on, vec![1]);
        assert_eq!(t.steps[0].arguments, json!({}));

        let bad = TemplateSet::from_toml_str("[[template]]\nname = \"x\"\npattern = '('\n");
        assert!(matches!(bad, Err(AgentError::TemplateError(_))));
    }
}
