//! 语料源：按规范化引用返回有序子句
//!
//! 语料以显式构造、注入流水线的依赖形式存在（load / is_loaded / status），便于测试替换为内存数据。

pub mod json;
pub mod reference;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::analysis::Clause;

pub use json::{CorpusRecord, JsonCorpus};
pub use reference::{normalize_book, PassageRef};

#[derive(Error, Debug)]
pub enum CorpusError {
    #[error("Invalid passage reference: {0}")]
    InvalidReference(String),

    #[error("Corpus failed to load: {0}")]
    LoadFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corpus parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

/// 语料加载状态
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum CorpusStatus {
    Unloaded,
    Loading,
    Ready { clauses: usize },
    Failed { reason: String },
}

#[async_trait]
pub trait CorpusSource: Send + Sync {
    /// 加载语料；已加载时直接返回
    async fn load(&self) -> Result<(), CorpusError>;

    fn is_loaded(&self) -> bool;

    fn status(&self) -> CorpusStatus;

    /// 返回引用范围内的子句，clause_id 从 1 起连续编号；未加载时先加载
    async fn clauses(&self, reference: &PassageRef) -> Result<Vec<Clause>, CorpusError>;
}
