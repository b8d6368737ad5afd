//! 分析流水线错误类型与错误类别
//!
//! ErrorKind 对应配置 / 引用 / 瞬时服务 / 输出格式等类别，供调用方映射为对外状态码。

use thiserror::Error;

use crate::core::PipelineState;
use crate::corpus::CorpusError;
use crate::llm::LlmError;
use crate::store::StoreError;

/// 分析过程中可能出现的错误
#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("No API key configured for the model provider")]
    NoApiKey,

    #[error("Invalid passage reference: {0}")]
    InvalidReference(String),

    #[error("Passage not found: {0}")]
    PassageNotFound(String),

    #[error("No participants for passage {0}; run phase 1 first")]
    NoParticipants(String),

    /// 所有修复层均失败；tail 为原始文本末尾，便于排查截断位置
    #[error("Malformed model response (tail: {tail})")]
    MalformedResponse { tail: String },

    #[error("Model call failed: {0}")]
    ModelCall(#[from] LlmError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Corpus error: {0}")]
    Corpus(#[from] CorpusError),

    #[error("Illegal pipeline transition {from:?} -> {to:?}")]
    InvalidTransition {
        from: PipelineState,
        to: PipelineState,
    },

    #[error("Analysis cancelled")]
    Cancelled,

    #[error("Config error: {0}")]
    Config(String),
}

/// 错误类别
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// 缺少凭据等配置问题，不重试
    Configuration,
    /// 引用无法解析或章节不存在
    Reference,
    /// 模型过载，重试耗尽后才会出现
    TransientService,
    /// 修复解析全部失败
    MalformedOutput,
    Cancelled,
    Internal,
}

impl AnalysisError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AnalysisError::NoApiKey | AnalysisError::Config(_) => ErrorKind::Configuration,
            AnalysisError::InvalidReference(_)
            | AnalysisError::PassageNotFound(_)
            | AnalysisError::NoParticipants(_) => ErrorKind::Reference,
            AnalysisError::ModelCall(e) if e.is_overload() => ErrorKind::TransientService,
            AnalysisError::ModelCall(LlmError::Cancelled) | AnalysisError::Cancelled => {
                ErrorKind::Cancelled
            }
            AnalysisError::MalformedResponse { .. } => ErrorKind::MalformedOutput,
            AnalysisError::Corpus(CorpusError::InvalidReference(_)) => ErrorKind::Reference,
            _ => ErrorKind::Internal,
        }
    }

    /// 截取原始文本末尾（按字符，避免切断 UTF-8）构造 MalformedResponse
    pub fn malformed(raw: &str) -> Self {
        const TAIL_CHARS: usize = 200;
        let count = raw.chars().count();
        let tail: String = raw.chars().skip(count.saturating_sub(TAIL_CHARS)).collect();
        AnalysisError::MalformedResponse { tail }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        assert_eq!(AnalysisError::NoApiKey.kind(), ErrorKind::Configuration);
        assert_eq!(
            AnalysisError::PassageNotFound("Ruth 1:1".into()).kind(),
            ErrorKind::Reference
        );
        assert_eq!(
            AnalysisError::ModelCall(LlmError::Overloaded("x".into())).kind(),
            ErrorKind::TransientService
        );
        assert_eq!(
            AnalysisError::ModelCall(LlmError::Authentication("x".into())).kind(),
            ErrorKind::Internal
        );
        assert_eq!(AnalysisError::malformed("{").kind(), ErrorKind::MalformedOutput);
    }

    #[test]
    fn test_malformed_keeps_tail() {
        let raw = format!("{}END", "x".repeat(500));
        match AnalysisError::malformed(&raw) {
            AnalysisError::MalformedResponse { tail } => {
                assert_eq!(tail.chars().count(), 200);
                assert!(tail.ends_with("END"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
