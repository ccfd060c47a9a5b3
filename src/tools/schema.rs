//! 工具参数 Schema：schemars 生成 + 调用前的轻量校验
//!
//! 校验只覆盖 required 字段与基本类型；更细的约束由工具自己在反序列化时报告。

use schemars::{schema_for, JsonSchema};
use serde_json::{json, Value};

/// 不限字段的空对象 schema
pub fn empty_object_schema() -> Value {
    json!({
        "type": "object",
        "properties": {},
        "required": []
    })
}

/// 由参数结构体生成 input schema（去掉 $schema 元字段）
pub fn schema_of<T: JsonSchema>() -> Value {
    let schema = schema_for!(T);
    let mut value = serde_json::to_value(&schema).unwrap_or_else(|_| empty_object_schema());
    if let Some(obj) = value.as_object_mut() {
        obj.remove("$schema");
    }
    value
}

fn type_matches(expected: &str, value: &Value) -> bool {
    match expected {
        "string" => value.is_string(),
        "boolean" => value.is_boolean(),
        "integer" => value.is_i64() || value.is_u64(),
        "number" => value.is_number(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        "null" => value.is_null(),
        _ => true,
    }
}

/// 校验参数：必须是对象；required 字段齐全；声明了基本类型的字段类型匹配
pub fn validate_arguments(schema: &Value, args: &Value) -> Result<(), String> {
    let Some(obj) = args.as_object() else {
        return Err("Invalid arguments: expected a JSON object".to_string());
    };

    if let Some(required) = schema.get("required").and_then(|r| r.as_array()) {
        let missing: Vec<&str> = required
            .iter()
            .filter_map(|r| r.as_str())
            .filter(|key| !obj.contains_key(*key))
            .collect();
        if !missing.is_empty() {
            return Err(format!(
                "Invalid arguments: missing required field(s): {}",
                missing.join(", ")
            ));
        }
    }

    if let Some(properties) = schema.get("properties").and_then(|p| p.as_object()) {
        for (key, value) in obj {
            let Some(declared) = properties.get(key).and_then(|p| p.get("type")) else {
                continue;
            };
            let ok = match declared {
                Value::String(t) => type_matches(t, value),
                Value::Array(types) => types
                    .iter()
                    .filter_map(|t| t.as_str())
                    .any(|t| type_matches(t, value)),
                _ => true,
            };
            if !ok {
                return Err(format!(
                    "Invalid arguments: field '{}' should be of type {}",
                    key, declared
                ));
            }
        }
    }

    Ok(())
}
