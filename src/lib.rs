//! Pericope - 章节语义分析流水线
//!
//! 模块划分：
//! - **analysis**: 两阶段分析（参与者/关系 -> 分组 -> 事件/话语）、JSON 修复、显示单元校验、进度流
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误类型与流水线状态机
//! - **corpus**: 章节引用解析与子句语料
//! - **llm**: LLM 客户端抽象、退避重试与实现（OpenAI 兼容 / Mock）
//! - **observability**: tracing 初始化
//! - **store**: 分析结果持久化（内存 / SQLite）

pub mod analysis;
pub mod config;
pub mod core;
pub mod corpus;
pub mod llm;
pub mod observability;
pub mod store;

pub use analysis::{
    AnalysisOptions, AnalysisSummary, Analyzer, ProgressEvent, ProgressStep, ProgressStream,
};
pub use config::{load_config, AppConfig};
pub use core::{AnalysisError, ErrorKind, PipelineState};
