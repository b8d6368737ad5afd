//! 带退避重试的 LLM 调用
//!
//! 仅对过载信号（限流 / overloaded）重试，等待时间 base * 2^attempt；
//! 其它错误（鉴权、请求格式）立即返回。等待期间可被 CancellationToken 打断。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::llm::{CompletionOptions, LlmClient, LlmError, Message};

/// 重试策略：总尝试次数与基础等待时间
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// 总尝试次数（含首次调用）
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(3),
        }
    }
}

impl RetryConfig {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// 第 attempt 次失败（0 起）后的等待时间
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(1u32 << attempt.min(16))
    }
}

/// Resilient Invoker：包装任意 LlmClient，过载时指数退避重试
pub struct RetryingLlmClient {
    inner: Arc<dyn LlmClient>,
    config: RetryConfig,
}

impl RetryingLlmClient {
    pub fn new(inner: Arc<dyn LlmClient>, config: RetryConfig) -> Self {
        Self { inner, config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// 发送 (system, user) 提示对；cancel 被触发时在退避等待中立即返回 Cancelled
    pub async fn invoke(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        options: &CompletionOptions,
        cancel: &CancellationToken,
    ) -> Result<String, LlmError> {
        let messages = [Message::system(system_prompt), Message::user(user_prompt)];
        self.complete_with_cancel(&messages, options, cancel).await
    }

    async fn complete_with_cancel(
        &self,
        messages: &[Message],
        options: &CompletionOptions,
        cancel: &CancellationToken,
    ) -> Result<String, LlmError> {
        let mut attempt = 0u32;
        loop {
            if cancel.is_cancelled() {
                return Err(LlmError::Cancelled);
            }
            match self.inner.complete(messages, options).await {
                Ok(text) => return Ok(text),
                Err(e) if e.is_overload() && attempt + 1 < self.config.max_attempts => {
                    let wait = self.config.delay_for(attempt);
                    tracing::warn!(
                        "Model overloaded on attempt {}/{}, retrying in {:?}: {}",
                        attempt + 1,
                        self.config.max_attempts,
                        wait,
                        e
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(wait) => {}
                        _ = cancel.cancelled() => return Err(LlmError::Cancelled),
                    }
                    attempt += 1;
                }
                Err(e) => {
                    if e.is_overload() {
                        tracing::error!(
                            "Model still overloaded after {} attempts: {}",
                            self.config.max_attempts,
                            e
                        );
                    }
                    return Err(e);
                }
            }
        }
    }
}

#[async_trait]
impl LlmClient for RetryingLlmClient {
    async fn complete(
        &self,
        messages: &[Message],
        options: &CompletionOptions,
    ) -> Result<String, LlmError> {
        self.complete_with_cancel(messages, options, &CancellationToken::new())
            .await
    }

    fn token_usage(&self) -> (u64, u64, u64) {
        self.inner.token_usage()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlmClient;

    fn overloaded() -> LlmError {
        LlmError::Overloaded("overloaded_error".to_string())
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_until_success_with_exponential_delays() {
        let mock = Arc::new(MockLlmClient::new());
        mock.push_err(overloaded());
        mock.push_err(overloaded());
        mock.push_err(overloaded());
        mock.push_ok("{\"ok\": true}");

        let client = RetryingLlmClient::new(
            mock.clone(),
            RetryConfig::new(5, Duration::from_secs(3)),
        );
        let out = client
            .invoke("sys", "user", &CompletionOptions::default(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(out, "{\"ok\": true}");
        assert_eq!(mock.call_count(), 4);

        let times = mock.call_instants();
        let gaps: Vec<Duration> = times.windows(2).map(|w| w[1] - w[0]).collect();
        assert_eq!(
            gaps,
            vec![
                Duration::from_secs(3),
                Duration::from_secs(6),
                Duration::from_secs(12)
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_budget_exhausted() {
        let mock = Arc::new(MockLlmClient::new());
        for _ in 0..6 {
            mock.push_err(overloaded());
        }
        let client = RetryingLlmClient::new(mock.clone(), RetryConfig::default());
        let err = client
            .invoke("sys", "user", &CompletionOptions::default(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.is_overload());
        assert_eq!(mock.call_count(), 5);

        let times = mock.call_instants();
        let total = *times.last().unwrap() - times[0];
        assert_eq!(total, Duration::from_secs(3 * 15));
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_overload_error_not_retried() {
        let mock = Arc::new(MockLlmClient::new());
        mock.push_err(LlmError::Authentication("bad key".to_string()));
        mock.push_ok("never reached");
        let client = RetryingLlmClient::new(mock.clone(), RetryConfig::default());
        let err = client
            .invoke("sys", "user", &CompletionOptions::default(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::Authentication(_)));
        assert_eq!(mock.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_backoff() {
        let mock = Arc::new(MockLlmClient::new());
        mock.push_err(overloaded());
        mock.push_ok("late");
        let client = RetryingLlmClient::new(mock.clone(), RetryConfig::default());
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });
        let err = client
            .invoke("sys", "user", &CompletionOptions::default(), &cancel)
            .await
            .unwrap_err();
        assert_eq!(err, LlmError::Cancelled);
        assert_eq!(mock.call_count(), 1);
    }

    #[test]
    fn test_delay_doubles() {
        let cfg = RetryConfig::new(5, Duration::from_millis(100));
        assert_eq!(cfg.delay_for(0), Duration::from_millis(100));
        assert_eq!(cfg.delay_for(1), Duration::from_millis(200));
        assert_eq!(cfg.delay_for(3), Duration::from_millis(800));
    }
}
