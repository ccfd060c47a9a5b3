//! 成本追踪：按模型累计 token 与估算费用，只增不减
//!
//! 价格表外的模型视为未定价：token 照常累计，费用记 0。

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;

use crate::config::ModelPrice;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelUsage {
    pub calls: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost: f64,
}

impl ModelUsage {
    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

#[derive(Debug, Clone, Default)]
pub struct CostTracker {
    prices: HashMap<String, ModelPrice>,
    usage: BTreeMap<String, ModelUsage>,
}

impl CostTracker {
    pub fn new(prices: HashMap<String, ModelPrice>) -> Self {
        Self {
            prices,
            usage: BTreeMap::new(),
        }
    }

    pub fn price(&self, model: &str) -> Option<ModelPrice> {
        self.prices.get(model).copied()
    }

    /// 记录一次调用，返回本次费用
    pub fn track_usage(&mut self, model: &str, input_tokens: u64, output_tokens: u64) -> f64 {
        let cost = match self.price(model) {
            Some(price) => {
                input_tokens as f64 / 1000.0 * price.input_per_1k
                    + output_tokens as f64 / 1000.0 * price.output_per_1k
            }
            None => {
                tracing::debug!(model = %model, "unpriced model, cost recorded as zero");
                0.0
            }
        };
        let entry = self.usage.entry(model.to_string()).or_default();
        entry.calls += 1;
        entry.input_tokens += input_tokens;
        entry.output_tokens += output_tokens;
        entry.cost += cost.max(0.0);
        cost
    }

    pub fn total_cost(&self) -> f64 {
        self.usage.values().map(|u| u.cost).sum()
    }

    pub fn total_tokens(&self) -> u64 {
        self.usage.values().map(ModelUsage::total_tokens).sum()
    }

    pub fn usage(&self, model: &str) -> Option<&ModelUsage> {
        self.usage.get(model)
    }

    /// 按模型名排序的明细
    pub fn summary(&self) -> Vec<(String, ModelUsage)> {
        self.usage
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}
