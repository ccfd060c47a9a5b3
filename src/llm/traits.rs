//! LLM 客户端抽象
//!
//! 规划器只依赖纯文本补全：`complete(prompt, options) → text`，不假设输出一定是合法 JSON。

use async_trait::async_trait;
use serde::Serialize;

/// 单次补全的参数
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletionOptions {
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    /// 可选的 system 提示
    pub system: Option<String>,
}

impl CompletionOptions {
    pub fn for_model(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            max_tokens: 2000,
            temperature: 0.2,
            system: None,
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }
}

/// LLM 客户端 trait
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, prompt: &str, options: &CompletionOptions) -> Result<String, String>;

    /// 获取累计 token 使用统计：(prompt_tokens, completion_tokens, total_tokens)
    /// 默认返回 (0, 0, 0)，具体实现可覆盖
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}
