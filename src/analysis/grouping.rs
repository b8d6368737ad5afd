//! 显示单元分组：复用已存分组，或请求模型建议并校验，失败时回退为每子句一个单元

use serde_json::Value;

use crate::analysis::{
    check_units, default_units, parse_ids, Analyzer, Clause, DisplayUnit, GroupingResolution,
    GroupingSource, Passage, Progress, ProgressEvent, ProgressStep, UnitValidation,
};
use crate::core::{AnalysisError, PipelineState, PipelineTracker};

impl Analyzer {
    /// 请求模型建议子句合并；任何失败都回退为默认划分，不向外报错
    pub async fn suggest_clause_merges(&self, clauses: &[Clause]) -> Vec<DisplayUnit> {
        match self.request_grouping(clauses, &Progress::silent()).await {
            Ok(resolution) => resolution.units,
            Err(e) => {
                tracing::warn!("Clause merge suggestion failed: {}", e);
                default_units(&clause_ids(clauses))
            }
        }
    }

    /// 决定 Phase 2 使用的显示单元，并保存到章节
    pub(crate) async fn resolve_display_units(
        &self,
        passage: &Passage,
        force_regroup: bool,
        tracker: &mut PipelineTracker,
        progress: &Progress,
    ) -> Result<GroupingResolution, AnalysisError> {
        progress.emit(
            ProgressEvent::new(
                ProgressStep::Grouping,
                format!("Resolving display units for {} clauses", passage.clauses.len()),
            )
            .in_phase(2),
        )?;

        let all_ids = passage.clause_ids();
        let cached = if force_regroup {
            None
        } else {
            self.store.load_display_units(&passage.id).await?
        };

        let resolution = match cached.map(|units| check_units(&units, &all_ids)) {
            Some(UnitValidation::Valid(units)) => {
                tracing::info!(
                    "Reusing {} stored display units for {}",
                    units.len(),
                    passage.reference
                );
                GroupingResolution {
                    units,
                    source: GroupingSource::Cached,
                    fallback_reason: None,
                }
            }
            stale => {
                if let Some(UnitValidation::Invalid { reason }) = stale {
                    tracing::warn!(
                        "Stored display units for {} are invalid ({}), regrouping",
                        passage.reference,
                        reason
                    );
                }
                let resolution = self.request_grouping(&passage.clauses, progress).await?;
                self.store
                    .save_display_units(&passage.id, &resolution.units)
                    .await?;
                resolution
            }
        };

        tracker.advance(PipelineState::GroupingResolved)?;
        let merged = resolution.units.iter().filter(|u| u.merged).count();
        progress.emit(
            ProgressEvent::new(
                ProgressStep::GroupingResolved,
                format!(
                    "{} display units ({} merged, {:?})",
                    resolution.units.len(),
                    merged,
                    resolution.source
                ),
            )
            .in_state(tracker.state()),
        )?;
        Ok(resolution)
    }

    /// 请求分组建议并校验；只有取消会作为错误返回
    async fn request_grouping(
        &self,
        clauses: &[Clause],
        progress: &Progress,
    ) -> Result<GroupingResolution, AnalysisError> {
        let all_ids = clause_ids(clauses);
        if clauses.len() <= 1 {
            return Ok(GroupingResolution {
                units: default_units(&all_ids),
                source: GroupingSource::Default,
                fallback_reason: None,
            });
        }

        let fallback = |reason: String| {
            tracing::warn!("Falling back to one unit per clause: {}", reason);
            GroupingResolution {
                units: default_units(&all_ids),
                source: GroupingSource::Default,
                fallback_reason: Some(reason),
            }
        };

        let doc = match self
            .call_model(
                &self.prompts.grouping_system(),
                &self.prompts.build_grouping_prompt(clauses),
                &self.options.grouping,
                progress,
            )
            .await
        {
            Ok(doc) => doc,
            Err(AnalysisError::Cancelled) => return Err(AnalysisError::Cancelled),
            Err(e) => return Ok(fallback(format!("grouping call failed: {}", e))),
        };

        let Some(units) = parse_suggestion(&doc) else {
            return Ok(fallback("grouping response has no unit list".to_string()));
        };
        Ok(match check_units(&units, &all_ids) {
            UnitValidation::Valid(units) => GroupingResolution {
                units,
                source: GroupingSource::Suggested,
                fallback_reason: None,
            },
            UnitValidation::Invalid { reason } => fallback(format!("invalid grouping: {}", reason)),
        })
    }
}

fn clause_ids(clauses: &[Clause]) -> Vec<u32> {
    clauses.iter().map(|c| c.clause_id).collect()
}

/// 接受 `{"units":[{"clauseIds":[..]}]}`、`{"groups":[[..]]}` 或直接的 `[[1],[2,3]]`
pub fn parse_suggestion(doc: &Value) -> Option<Vec<DisplayUnit>> {
    let groups = match doc {
        Value::Array(groups) => groups,
        Value::Object(obj) => ["units", "displayUnits", "groups"]
            .iter()
            .find_map(|key| obj.get(*key).and_then(Value::as_array))?,
        _ => return None,
    };
    Some(
        groups
            .iter()
            .map(|group| {
                let ids = match group {
                    Value::Object(obj) => ["clauseIds", "clause_ids", "clauses"]
                        .iter()
                        .find_map(|key| obj.get(*key))
                        .map(parse_ids)
                        .unwrap_or_default(),
                    other => parse_ids(other),
                };
                DisplayUnit::new(ids)
            })
            .collect(),
    )
}
