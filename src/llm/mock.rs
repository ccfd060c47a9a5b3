//! Mock 与离线 LLM 客户端（用于测试与未配置模型的部署，无需 API）

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::llm::{CompletionOptions, LlmClient};

/// 粗略 token 估算：每 4 个字符记 1 个 token
fn rough_tokens(text: &str) -> u64 {
    (text.chars().count() as u64).div_ceil(4)
}

#[derive(Debug, Default)]
struct MockState {
    responses: VecDeque<Result<String, String>>,
    prompts: Vec<String>,
    prompt_tokens: u64,
    completion_tokens: u64,
}

/// Mock 客户端：按顺序返回预设的回复；预设用完后返回错误
#[derive(Debug, Default)]
pub struct MockLlmClient {
    state: Mutex<MockState>,
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_responses<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let client = Self::new();
        for r in responses {
            client.push_response(r);
        }
        client
    }

    /// 每次调用都失败
    pub fn failing(message: impl Into<String>) -> Self {
        let client = Self::new();
        client.push_error(message);
        client
    }

    pub fn push_response(&self, response: impl Into<String>) {
        self.lock().responses.push_back(Ok(response.into()));
    }

    pub fn push_error(&self, message: impl Into<String>) {
        self.lock().responses.push_back(Err(message.into()));
    }

    /// 已收到的 prompt（按调用顺序）
    pub fn prompts(&self) -> Vec<String> {
        self.lock().prompts.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, prompt: &str, _options: &CompletionOptions) -> Result<String, String> {
        let mut state = self.lock();
        state.prompts.push(prompt.to_string());
        state.prompt_tokens += rough_tokens(prompt);
        // 只剩一条错误时保持失败
        let next = if state.responses.len() == 1 && state.responses[0].is_err() {
            state.responses[0].clone()
        } else {
            state
                .responses
                .pop_front()
                .unwrap_or_else(|| Err("mock has no scripted response".to_string()))
        };
        if let Ok(text) = &next {
            state.completion_tokens += rough_tokens(text);
        }
        next
    }

    fn token_usage(&self) -> (u64, u64, u64) {
        let state = self.lock();
        (
            state.prompt_tokens,
            state.completion_tokens,
            state.prompt_tokens + state.completion_tokens,
        )
    }
}

/// 未配置模型时使用：总是失败，规划器因此只走模板或兜底计划
#[derive(Debug, Default)]
pub struct OfflineLlmClient;

#[async_trait]
impl LlmClient for OfflineLlmClient {
    async fn complete(&self, _prompt: &str, options: &CompletionOptions) -> Result<String, String> {
        Err(format!("no language model backend configured for '{}'", options.model))
    }
}
