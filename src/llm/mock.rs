//! Mock LLM 客户端（用于测试，无需 API）
//!
//! 按脚本顺序返回预置回复或错误，并记录每次调用的消息与时间点，便于断言重试节奏与提示词内容。

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::llm::{CompletionOptions, LlmClient, LlmError, Message};

/// 单次调用记录
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub messages: Vec<Message>,
    pub options: CompletionOptions,
    pub at: Instant,
}

/// Mock 客户端：脚本耗尽后返回 Other 错误
#[derive(Debug, Default)]
pub struct MockLlmClient {
    script: Mutex<VecDeque<Result<String, LlmError>>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// 按顺序预置回复
    pub fn with_responses<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mock = Self::new();
        for r in responses {
            mock.push_ok(r);
        }
        mock
    }

    pub fn push_ok(&self, text: impl Into<String>) {
        if let Ok(mut s) = self.script.lock() {
            s.push_back(Ok(text.into()));
        }
    }

    pub fn push_err(&self, err: LlmError) {
        if let Ok(mut s) = self.script.lock() {
            s.push_back(Err(err));
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|c| c.len()).unwrap_or(0)
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn call_instants(&self) -> Vec<Instant> {
        self.calls().into_iter().map(|c| c.at).collect()
    }

    /// 第 n 次调用的 user 消息
    pub fn user_prompt(&self, n: usize) -> Option<String> {
        self.calls().get(n).and_then(|c| {
            c.messages
                .iter()
                .rev()
                .find(|m| matches!(m.role, crate::llm::Role::User))
                .map(|m| m.content.clone())
        })
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(
        &self,
        messages: &[Message],
        options: &CompletionOptions,
    ) -> Result<String, LlmError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(RecordedCall {
                messages: messages.to_vec(),
                options: options.clone(),
                at: Instant::now(),
            });
        }
        self.script
            .lock()
            .ok()
            .and_then(|mut s| s.pop_front())
            .unwrap_or_else(|| Err(LlmError::Other("mock script exhausted".to_string())))
    }
}
