//! 两阶段语义分析流水线
//!
//! - **types**: 子句、显示单元、参与者、事件等数据模型（宽松解码）
//! - **repair**: 截断 / 带说明文字的 JSON 修复解析
//! - **units**: 显示单元校验
//! - **prompts**: 提示词构建
//! - **pipeline**: Analyzer 编排（Phase 1 -> 分组 -> Phase 2）
//! - **progress**: 进度事件与流式运行

pub mod grouping;
pub mod outcome;
mod phase1;
mod phase2;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod repair;
pub mod types;
pub mod units;

pub use grouping::parse_suggestion;
pub use outcome::{
    AnalysisSummary, GroupingResolution, GroupingSource, Phase1Result, Phase2Result, SaveOutcome,
    SaveSummary, TokenUsageSummary,
};
pub use pipeline::{create_llm_from_config, AnalysisOptions, Analyzer};
pub(crate) use progress::SaveTally;
pub use progress::{Progress, ProgressEvent, ProgressStep, ProgressStream};
pub use prompts::{participants_context, DefaultPrompts, PromptBuilder, UnitContext};
pub use repair::{extract_json_text, repair_parse};
pub use types::{
    items, parse_ids, Clause, DiscourseRelation, DisplayUnit, Emotion, Event, EventModifiers,
    EventRole, Figurative, KeyTerm, NewDiscourse, NewEvent, NewParticipant, NewRelation,
    Participant, ParticipantProperty, ParticipantRelation, Passage, Pragmatics, ResolvedRole,
    SpeechAct, StorageId, StoredDiscourse, StoredEvent, StoredParticipant, StoredRelation,
};
pub use units::{check_units, default_units, validate, UnitValidation};
