//! LLM 客户端抽象
//!
//! 所有后端（OpenAI 兼容 / Mock）实现 LlmClient：complete 发送 system + user 消息并返回原始文本。
//! LlmError 区分「过载/限流」（可重试）与其它错误（鉴权、请求格式等，立即失败）。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 消息角色（与 LLM API 一致）
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    User,
    Assistant,
    System,
}

/// 单条消息
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }
}

/// 单次调用参数：模型名为空时使用客户端默认模型
#[derive(Clone, Debug, PartialEq)]
pub struct CompletionOptions {
    pub model: Option<String>,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for CompletionOptions {
    fn default() -> Self {
        Self {
            model: None,
            max_tokens: 8000,
            temperature: 0.3,
        }
    }
}

impl CompletionOptions {
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }
}

/// 模型调用错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LlmError {
    /// 服务过载（如 HTTP 529 / overloaded_error）
    #[error("Model overloaded: {0}")]
    Overloaded(String),

    /// 限流（HTTP 429）
    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Request cancelled")]
    Cancelled,

    #[error("LLM error: {0}")]
    Other(String),
}

impl LlmError {
    /// 是否为过载信号（唯一会触发退避重试的错误类别）
    pub fn is_overload(&self) -> bool {
        matches!(self, LlmError::Overloaded(_) | LlmError::RateLimited(_))
    }

    /// 根据服务端返回的错误文本归类
    pub fn classify(message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_lowercase();
        if lower.contains("overloaded") || lower.contains("529") || lower.contains("503") {
            LlmError::Overloaded(message)
        } else if lower.contains("rate limit")
            || lower.contains("rate_limit")
            || lower.contains("429")
            || lower.contains("too many requests")
        {
            LlmError::RateLimited(message)
        } else if lower.contains("api key")
            || lower.contains("api-key")
            || lower.contains("api_key")
            || lower.contains("authentication")
            || lower.contains("unauthorized")
            || lower.contains("401")
        {
            LlmError::Authentication(message)
        } else if lower.contains("invalid_request") || lower.contains("400") {
            LlmError::InvalidRequest(message)
        } else if lower.contains("connection") || lower.contains("timed out") {
            LlmError::Network(message)
        } else {
            LlmError::Other(message)
        }
    }
}

/// LLM 客户端 trait
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 非流式完成，返回模型首条回复的原始文本
    async fn complete(
        &self,
        messages: &[Message],
        options: &CompletionOptions,
    ) -> Result<String, LlmError>;

    /// 获取累计 token 使用统计：(prompt_tokens, completion_tokens, total_tokens)
    /// 默认返回 (0, 0, 0)，具体实现可覆盖
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_overload() {
        assert!(LlmError::classify("Error 529: overloaded_error").is_overload());
        assert!(LlmError::classify("429 Too Many Requests").is_overload());
        assert!(LlmError::classify("rate_limit_exceeded").is_overload());
    }

    #[test]
    fn test_classify_non_transient() {
        let err = LlmError::classify("invalid x-api-key");
        assert!(matches!(err, LlmError::Authentication(_)));
        assert!(!err.is_overload());

        let err = LlmError::classify("invalid_request_error: max_tokens too large");
        assert!(matches!(err, LlmError::InvalidRequest(_)));
        assert!(!err.is_overload());

        assert!(matches!(LlmError::classify("boom"), LlmError::Other(_)));
    }

    #[test]
    fn test_completion_options_builder() {
        let opts = CompletionOptions::default()
            .with_max_tokens(16000)
            .with_temperature(0.0)
            .with_model("gpt-4o");
        assert_eq!(opts.max_tokens, 16000);
        assert_eq!(opts.temperature, 0.0);
        assert_eq!(opts.model.as_deref(), Some("gpt-4o"));
    }
}
