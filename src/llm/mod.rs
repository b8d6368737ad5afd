//! LLM 层：客户端抽象、退避重试与实现（OpenAI 兼容 / Mock）

pub mod mock;
pub mod openai;
pub mod retry;
pub mod traits;

pub use mock::{MockLlmClient, RecordedCall};
pub use openai::{OpenAiClient, TokenUsage};
pub use retry::{RetryConfig, RetryingLlmClient};
pub use traits::{CompletionOptions, LlmClient, LlmError, Message, Role};
