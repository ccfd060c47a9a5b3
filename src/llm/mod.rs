//! LLM 层：客户端抽象与 Mock / 离线实现（具体厂商的 HTTP 客户端不在本 crate 内）

pub mod mock;
pub mod traits;

pub use mock::{MockLlmClient, OfflineLlmClient};
pub use traits::{CompletionOptions, LlmClient};
