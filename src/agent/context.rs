//! Agent 上下文管理
//!
//! build_context 每次现取宿主摘要（不缓存），加上高频短期记忆与最近的行动摘要，
//! 并按「总字符数 / 每 token 字符数」粗估 token。记忆与成本追踪归这里所有，跨目标存活。

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::Serialize;

use crate::agent::cost::{CostTracker, ModelUsage};
use crate::agent::memory::{ActionRecord, AgentMemory, MemoryEntry};
use crate::config::{AgentSection, ModelPrice};
use crate::host::{ExecutionContext, HostEnvironment, HostSummary};

/// 固定的能力说明前言
pub const CAPABILITY_PREAMBLE: &str = "You are an assistant embedded in a creative editing host. \
You act only by calling the registered tools; each tool call runs against the live document. \
Prefer few, precise steps and never invent tool names.";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentContext {
    pub goal: String,
    pub preamble: String,
    pub host: HostSummary,
    pub relevant_memories: Vec<MemoryEntry>,
    pub recent_actions: Vec<ActionRecord>,
    pub estimated_tokens: usize,
}

impl AgentContext {
    /// 拼成 prompt 用的纯文本
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str(&self.preamble);
        out.push_str("\n\n## Host state\n");
        out.push_str(&format!(
            "Document: {}\nObjects ({}): {}\nSelection: {}\n",
            self.host.document_name,
            self.host.object_count,
            self.host.object_names.join(", "),
            self.host.selection.join(", "),
        ));
        if !self.relevant_memories.is_empty() {
            out.push_str("\n## Relevant memory\n");
            for m in &self.relevant_memories {
                out.push_str(&format!("- [{}] {}: {}\n", m.category, m.key, m.value));
            }
        }
        if !self.recent_actions.is_empty() {
            out.push_str("\n## Recent actions\n");
            for a in &self.recent_actions {
                out.push_str(&format!("- {}\n", a.summary));
            }
        }
        out.push_str("\n## Goal\n");
        out.push_str(&self.goal);
        out
    }
}

pub struct AgentContextManager {
    host: Arc<dyn HostEnvironment>,
    memory: Mutex<AgentMemory>,
    costs: Mutex<CostTracker>,
    cfg: AgentSection,
}

impl AgentContextManager {
    pub fn new(
        host: Arc<dyn HostEnvironment>,
        cfg: AgentSection,
        pricing: HashMap<String, ModelPrice>,
    ) -> Self {
        Self {
            host,
            memory: Mutex::new(AgentMemory::new(cfg.short_term_capacity, cfg.long_term_capacity)),
            costs: Mutex::new(CostTracker::new(pricing)),
            cfg,
        }
    }

    pub fn config(&self) -> &AgentSection {
        &self.cfg
    }

    fn memory(&self) -> std::sync::MutexGuard<'_, AgentMemory> {
        self.memory.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn costs(&self) -> std::sync::MutexGuard<'_, CostTracker> {
        self.costs.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn build_context(&self, goal: &str) -> AgentContext {
        let host = self.host.summary();
        let (relevant_memories, recent_actions) = {
            let memory = self.memory();
            (
                memory.relevant(self.cfg.access_threshold, self.cfg.max_relevant_memories),
                memory.recent_actions(self.cfg.recent_actions),
            )
        };
        let mut context = AgentContext {
            goal: goal.to_string(),
            preamble: CAPABILITY_PREAMBLE.to_string(),
            host,
            relevant_memories,
            recent_actions,
            estimated_tokens: 0,
        };
        context.estimated_tokens =
            context.render().chars().count() / self.cfg.chars_per_token.max(1);
        context
    }

    /// 以当前宿主身份构造一次工具调用的上下文
    pub fn execution_context(&self, caller_id: &str) -> ExecutionContext {
        ExecutionContext::capture(caller_id, self.host.as_ref())
    }

    pub fn record_action(&self, summary: &str) {
        self.memory().record_action(summary);
    }

    pub fn update_memory(&self, key: &str, value: &str, category: &str) {
        if let Some(evicted) = self.memory().upsert(key, value, category) {
            tracing::debug!(key = %evicted.key, "short-term memory evicted oldest entry");
        }
    }

    pub fn recall(&self, key: &str) -> Option<String> {
        self.memory().recall(key)
    }

    pub fn recent_actions(&self, n: usize) -> Vec<ActionRecord> {
        self.memory().recent_actions(n)
    }

    pub fn short_term_len(&self) -> usize {
        self.memory().short_term_len()
    }

    pub fn track_usage(&self, model: &str, input_tokens: u64, output_tokens: u64) -> f64 {
        self.costs().track_usage(model, input_tokens, output_tokens)
    }

    pub fn total_cost(&self) -> f64 {
        self.costs().total_cost()
    }

    pub fn total_tokens(&self) -> u64 {
        self.costs().total_tokens()
    }

    pub fn cost_summary(&self) -> Vec<(String, ModelUsage)> {
        self.costs().summary()
    }
}
