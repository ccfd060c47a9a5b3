//! Agent 记忆
//!
//! 短期：有容量上限的 key/value，记录访问次数；超出容量时淘汰创建最早的那一条（每次插入最多淘汰一条）。
//! 长期：带时间戳的行动摘要，环形缓冲，超出容量丢弃最旧的。

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryEntry {
    pub key: String,
    pub value: String,
    pub category: String,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    pub access_count: u32,
    /// 创建顺序，时间戳相同时用于确定淘汰对象
    #[serde(skip)]
    seq: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionRecord {
    pub timestamp: DateTime<Utc>,
    pub summary: String,
}

#[derive(Debug)]
pub struct AgentMemory {
    short_term: HashMap<String, MemoryEntry>,
    short_term_capacity: usize,
    long_term: VecDeque<ActionRecord>,
    long_term_capacity: usize,
    next_seq: u64,
}

impl AgentMemory {
    pub fn new(short_term_capacity: usize, long_term_capacity: usize) -> Self {
        Self {
            short_term: HashMap::new(),
            short_term_capacity: short_term_capacity.max(1),
            long_term: VecDeque::new(),
            long_term_capacity: long_term_capacity.max(1),
            next_seq: 0,
        }
    }

    /// 写入短期记忆。已存在的 key 更新值与类别、计一次访问，创建时间不变；
    /// 新 key 插入后若超出容量，淘汰创建最早的一条并返回它。
    pub fn upsert(&mut self, key: &str, value: &str, category: &str) -> Option<MemoryEntry> {
        let now = Utc::now();
        if let Some(entry) = self.short_term.get_mut(key) {
            entry.value = value.to_string();
            entry.category = category.to_string();
            entry.last_accessed = now;
            entry.access_count += 1;
            return None;
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        self.short_term.insert(
            key.to_string(),
            MemoryEntry {
                key: key.to_string(),
                value: value.to_string(),
                category: category.to_string(),
                created_at: now,
                last_accessed: now,
                access_count: 0,
                seq,
            },
        );

        if self.short_term.len() > self.short_term_capacity {
            let oldest = self
                .short_term
                .values()
                .min_by_key(|e| e.seq)
                .map(|e| e.key.clone())?;
            return self.short_term.remove(&oldest);
        }
        None
    }

    /// 读取并计一次访问
    pub fn recall(&mut self, key: &str) -> Option<String> {
        let entry = self.short_term.get_mut(key)?;
        entry.access_count += 1;
        entry.last_accessed = Utc::now();
        Some(entry.value.clone())
    }

    /// 只读查看，不计访问
    pub fn peek(&self, key: &str) -> Option<&MemoryEntry> {
        self.short_term.get(key)
    }

    /// 访问次数大于 threshold 的条目，按访问次数降序，最多 limit 条
    pub fn relevant(&self, threshold: u32, limit: usize) -> Vec<MemoryEntry> {
        let mut entries: Vec<MemoryEntry> = self
            .short_term
            .values()
            .filter(|e| e.access_count > threshold)
            .cloned()
            .collect();
        entries.sort_by(|a, b| b.access_count.cmp(&a.access_count).then(a.seq.cmp(&b.seq)));
        entries.truncate(limit);
        entries
    }

    pub fn short_term_len(&self) -> usize {
        self.short_term.len()
    }

    pub fn record_action(&mut self, summary: &str) {
        self.long_term.push_back(ActionRecord {
            timestamp: Utc::now(),
            summary: summary.to_string(),
        });
        while self.long_term.len() > self.long_term_capacity {
            self.long_term.pop_front();
        }
    }

    /// 最近 n 条行动摘要（按时间先后）
    pub fn recent_actions(&self, n: usize) -> Vec<ActionRecord> {
        let skip = self.long_term.len().saturating_sub(n);
        self.long_term.iter().skip(skip).cloned().collect()
    }

    pub fn long_term_len(&self) -> usize {
        self.long_term.len()
    }
}
