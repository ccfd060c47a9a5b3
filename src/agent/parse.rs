//! LLM 规划输出的容错解析
//!
//! 解析链：直接解析 → 去掉 markdown 代码围栏 → 截取最大的 `{...}` 片段 → 放弃（由规划器走兜底计划）。
//! 每一步都可单独测试。字段缺失时按默认值补齐，而不是整体失败。

use serde_json::Value;

use crate::agent::plan::Step;
use crate::core::AgentError;

/// 缺少 description 时的占位文本
pub const PLACEHOLDER_DESCRIPTION: &str = "Execute step";

/// 从模型输出中解析出的计划
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedPlan {
    pub steps: Vec<Step>,
    pub risks: Vec<String>,
}

pub fn try_direct(text: &str) -> Option<Value> {
    serde_json::from_str::<Value>(text.trim())
        .ok()
        .filter(Value::is_object)
}

/// 取第一个 ``` 围栏内的内容（忽略语言标记）
pub fn strip_code_fences(text: &str) -> Option<&str> {
    let start = text.find("```")?;
    let rest = &text[start + 3..];
    let body_start = rest.find('\n').map(|i| i + 1).unwrap_or(0);
    let body = &rest[body_start..];
    let end = body.find("```").unwrap_or(body.len());
    Some(body[..end].trim())
}

/// 第一个 `{` 到最后一个 `}` 之间的片段
pub fn largest_brace_span(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

/// 按解析链提取 JSON 对象
pub fn extract_json(text: &str) -> Result<Value, AgentError> {
    if let Some(v) = try_direct(text) {
        return Ok(v);
    }
    if let Some(v) = strip_code_fences(text).and_then(try_direct) {
        return Ok(v);
    }
    if let Some(v) = largest_brace_span(text).and_then(try_direct) {
        return Ok(v);
    }
    let preview: String = text.chars().take(120).collect();
    Err(AgentError::JsonParseError(format!(
        "no JSON object found in model output: {}",
        preview
    )))
}

/// 解析模型输出为计划。缺 stepNumber → 上一步序号 + 1；缺 description → 占位文本；
/// 缺 toolArguments 或不是对象 → `{}`；没有工具名的步骤丢弃。
pub fn parse_plan(text: &str) -> Result<ParsedPlan, AgentError> {
    let doc = extract_json(text)?;
    let raw_steps = field(&doc, &["steps"])
        .and_then(Value::as_array)
        .ok_or_else(|| AgentError::JsonParseError("missing steps array".to_string()))?;

    let mut steps = Vec::with_capacity(raw_steps.len());
    let mut previous = 0usize;
    for raw in raw_steps {
        let Some(tool_name) = field(raw, &["toolName", "tool_name", "tool"])
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
        else {
            tracing::warn!(step = %raw, "model step without tool name dropped");
            continue;
        };
        let step_number = field(raw, &["stepNumber", "step_number", "step"])
            .and_then(as_ordinal)
            .unwrap_or(previous + 1);
        previous = step_number;

        let description = field(raw, &["description"])
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(PLACEHOLDER_DESCRIPTION);
        let arguments = field(raw, &["toolArguments", "tool_arguments", "arguments", "args"])
            .filter(|v| v.is_object())
            .cloned()
            .unwrap_or_else(|| Value::Object(Default::default()));
        let dependencies = field(raw, &["dependencies", "depends_on"])
            .and_then(Value::as_array)
            .map(|deps| deps.iter().filter_map(as_ordinal).collect())
            .unwrap_or_default();

        steps.push(Step::new(step_number, description, tool_name, arguments, dependencies));
    }
    if steps.is_empty() {
        return Err(AgentError::EmptyPlan);
    }

    let risks = field(&doc, &["risks"])
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|r| r.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default();

    Ok(ParsedPlan { steps, risks })
}

fn field<'a>(value: &'a Value, names: &[&str]) -> Option<&'a Value> {
    names.iter().find_map(|n| value.get(*n)).filter(|v| !v.is_null())
}

/// 正整数或数字字符串
fn as_ordinal(value: &Value) -> Option<usize> {
    match value {
        Value::Number(n) => n.as_u64().filter(|n| *n > 0).map(|n| n as usize),
        Value::String(s) => s.trim().parse::<usize>().ok().filter(|n| *n > 0),
        _ => None,
    }
}
