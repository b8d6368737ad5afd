//! 逐条写入结果与阶段汇总
//!
//! 无法解析外键的关系 / 角色不报错，而是记为 Skipped 并计入汇总，调用方可直接断言跳过数量。

use serde::Serialize;

use crate::analysis::{
    DisplayUnit, Passage, StorageId, StoredDiscourse, StoredEvent, StoredParticipant,
    StoredRelation,
};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SaveOutcome {
    Saved { id: StorageId },
    Skipped { reason: String },
}

impl SaveOutcome {
    pub fn skipped(reason: impl Into<String>) -> Self {
        SaveOutcome::Skipped {
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SaveSummary {
    pub saved: usize,
    pub skipped: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub skip_reasons: Vec<String>,
}

impl SaveSummary {
    pub fn record(&mut self, outcome: &SaveOutcome) {
        match outcome {
            SaveOutcome::Saved { .. } => self.saved += 1,
            SaveOutcome::Skipped { reason } => {
                self.skipped += 1;
                self.skip_reasons.push(reason.clone());
            }
        }
    }

    pub fn total(&self) -> usize {
        self.saved + self.skipped
    }
}

/// 分组来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupingSource {
    /// 复用已存且校验通过的分组
    Cached,
    /// 采用模型建议
    Suggested,
    /// 每子句一个单元
    Default,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupingResolution {
    pub units: Vec<DisplayUnit>,
    pub source: GroupingSource,
    /// 模型建议被拒绝或调用失败的原因
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Phase1Result {
    pub passage: Passage,
    pub participants: Vec<StoredParticipant>,
    pub relations: Vec<StoredRelation>,
    pub participant_summary: SaveSummary,
    pub relation_summary: SaveSummary,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Phase2Result {
    pub passage: Passage,
    pub grouping: GroupingResolution,
    pub events: Vec<StoredEvent>,
    pub discourse: Vec<StoredDiscourse>,
    pub event_summary: SaveSummary,
    pub discourse_summary: SaveSummary,
    /// 因参与者无法解析而丢弃的角色数
    pub dropped_roles: usize,
    /// 事件数与显示单元数不一致等非致命问题
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TokenUsageSummary {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl TokenUsageSummary {
    pub fn delta(before: (u64, u64, u64), after: (u64, u64, u64)) -> Self {
        Self {
            prompt_tokens: after.0.saturating_sub(before.0),
            completion_tokens: after.1.saturating_sub(before.1),
            total_tokens: after.2.saturating_sub(before.2),
        }
    }
}

/// 完整分析结束时的汇总（complete 事件携带）
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisSummary {
    pub reference: String,
    pub passage_id: StorageId,
    pub participants: SaveSummary,
    pub relations: SaveSummary,
    pub events: SaveSummary,
    pub discourse: SaveSummary,
    pub dropped_roles: usize,
    pub display_units: usize,
    pub grouping: GroupingSource,
    pub warnings: Vec<String>,
    pub token_usage: TokenUsageSummary,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_counts() {
        let mut s = SaveSummary::default();
        s.record(&SaveOutcome::Saved { id: "a".into() });
        s.record(&SaveOutcome::skipped("unresolved endpoint p9"));
        s.record(&SaveOutcome::Saved { id: "b".into() });
        assert_eq!((s.saved, s.skipped, s.total()), (2, 1, 3));
        assert_eq!(s.skip_reasons, vec!["unresolved endpoint p9".to_string()]);
    }

    #[test]
    fn test_token_delta_saturates() {
        let d = TokenUsageSummary::delta((10, 5, 15), (30, 5, 35));
        assert_eq!(d.prompt_tokens, 20);
        assert_eq!(d.completion_tokens, 0);
        assert_eq!(TokenUsageSummary::delta((5, 5, 5), (0, 0, 0)).total_tokens, 0);
    }
}
