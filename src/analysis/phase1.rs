//! Phase 1：参与者与参与者关系
//!
//! 解析成功后才删除旧结果（连同引用旧参与者的 Phase 2 事件）再写入；逻辑 ID 缺失时按输出顺序补为 p{n}。
//! 两端都能映射到已存参与者的关系才写入，其余记为跳过。

use std::collections::HashMap;

use serde_json::Value;

use crate::analysis::{
    items, Analyzer, NewParticipant, NewRelation, Participant, ParticipantRelation, Passage,
    Phase1Result, Progress, ProgressEvent, ProgressStep, SaveOutcome, SaveTally, StorageId,
};
use crate::core::{AnalysisError, PipelineState, PipelineTracker};

impl Analyzer {
    pub(crate) async fn phase1(
        &self,
        passage: &Passage,
        tracker: &mut PipelineTracker,
        progress: &Progress,
    ) -> Result<Phase1Result, AnalysisError> {
        self.require_llm()?;
        tracker.advance(PipelineState::Phase1Running)?;
        progress.emit(
            ProgressEvent::new(
                ProgressStep::Phase1Calling,
                format!(
                    "Extracting participants from {} clauses",
                    passage.clauses.len()
                ),
            )
            .in_state(tracker.state()),
        )?;

        let doc = self
            .call_model(
                &self.prompts.phase1_system(),
                &self.prompts.build_phase1_prompt(&passage.clauses),
                &self.options.phase1,
                progress,
            )
            .await?;
        let raw_participants = items(&doc, "participants");
        let raw_relations = items(&doc, "relations");
        tracing::info!(
            "Phase 1 for {}: model returned {} participants, {} relations",
            passage.reference,
            raw_participants.len(),
            raw_relations.len()
        );
        progress.emit(
            ProgressEvent::new(
                ProgressStep::Phase1Parsed,
                format!(
                    "Found {} participants and {} relations",
                    raw_participants.len(),
                    raw_relations.len()
                ),
            )
            .in_state(tracker.state()),
        )?;

        // 事件角色引用参与者存储 ID，旧事件随参与者一起清除
        self.store.delete_phase2(&passage.id).await?;
        self.store.delete_phase1(&passage.id).await?;

        let mut id_map: HashMap<String, StorageId> = HashMap::new();
        let mut participants = Vec::with_capacity(raw_participants.len());
        let mut tally = SaveTally::new(
            "participant",
            ProgressStep::ParticipantSaved,
            raw_participants.len(),
        );
        for (index, value) in raw_participants.iter().enumerate() {
            let outcome = match decode_participant(value, index) {
                Ok(new) if id_map.contains_key(&new.logical_id) => {
                    SaveOutcome::skipped(format!("duplicate participant id {}", new.logical_id))
                }
                Ok(new) => {
                    let logical_id = new.logical_id.clone();
                    let stored = self.store.create_participant(&passage.id, new).await?;
                    id_map.insert(logical_id, stored.id.clone());
                    let id = stored.id.clone();
                    participants.push(stored);
                    SaveOutcome::Saved { id }
                }
                Err(reason) => SaveOutcome::skipped(reason),
            };
            tally.record(&outcome, tracker.state(), progress)?;
        }
        let participant_summary = tally.finish();

        let mut relations = Vec::with_capacity(raw_relations.len());
        let mut tally = SaveTally::new("relation", ProgressStep::RelationSaved, raw_relations.len());
        for (index, value) in raw_relations.iter().enumerate() {
            let outcome = match resolve_relation(value, index, &id_map) {
                Ok(new) => {
                    let stored = self.store.create_relation(&passage.id, new).await?;
                    let id = stored.id.clone();
                    relations.push(stored);
                    SaveOutcome::Saved { id }
                }
                Err(reason) => SaveOutcome::skipped(reason),
            };
            tally.record(&outcome, tracker.state(), progress)?;
        }
        let relation_summary = tally.finish();

        tracker.advance(PipelineState::Phase1Saved)?;
        progress.emit(
            ProgressEvent::new(
                ProgressStep::Phase1Complete,
                format!(
                    "Phase 1 saved {} participants, {} relations",
                    participant_summary.saved, relation_summary.saved
                ),
            )
            .in_state(tracker.state()),
        )?;
        tracing::info!(
            "Phase 1 for {} saved {} participants ({} skipped), {} relations ({} skipped)",
            passage.reference,
            participant_summary.saved,
            participant_summary.skipped,
            relation_summary.saved,
            relation_summary.skipped
        );

        Ok(Phase1Result {
            passage: passage.clone(),
            participants,
            relations,
            participant_summary,
            relation_summary,
        })
    }
}

/// 解码单个参与者并确定逻辑 ID
fn decode_participant(value: &Value, index: usize) -> Result<NewParticipant, String> {
    let mut data: Participant = serde_json::from_value(value.clone())
        .map_err(|e| format!("participant {} could not be decoded: {}", index + 1, e))?;
    let logical_id = data
        .participant_id
        .clone()
        .unwrap_or_else(|| format!("p{}", index + 1));
    data.participant_id = Some(logical_id.clone());
    Ok(NewParticipant { logical_id, data })
}

/// 把关系两端的逻辑 ID 映射为存储 ID
fn resolve_relation(
    value: &Value,
    index: usize,
    id_map: &HashMap<String, StorageId>,
) -> Result<NewRelation, String> {
    let rel: ParticipantRelation = serde_json::from_value(value.clone())
        .map_err(|e| format!("relation {} could not be decoded: {}", index + 1, e))?;
    let endpoint = |id: &Option<String>| -> Result<StorageId, String> {
        match id {
            Some(logical) => id_map
                .get(logical)
                .cloned()
                .ok_or_else(|| format!("unresolved endpoint {}", logical)),
            None => Err("missing endpoint".to_string()),
        }
    };
    Ok(NewRelation {
        source_id: endpoint(&rel.source_id)?,
        target_id: endpoint(&rel.target_id)?,
        category: rel.category,
        relation_type: rel.relation_type,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_logical_id_fallback_by_position() {
        let p = decode_participant(&json!({"gloss": "Naomi"}), 2).unwrap();
        assert_eq!(p.logical_id, "p3");
        assert_eq!(p.data.participant_id.as_deref(), Some("p3"));

        let p = decode_participant(&json!({"participantId": "p7"}), 0).unwrap();
        assert_eq!(p.logical_id, "p7");
    }

    #[test]
    fn test_non_object_participant_rejected() {
        assert!(decode_participant(&json!("Naomi"), 0).is_err());
    }

    #[test]
    fn test_relation_endpoints_resolved() {
        let mut map = HashMap::new();
        map.insert("p1".to_string(), "s-1".to_string());
        map.insert("p2".to_string(), "s-2".to_string());

        let rel = resolve_relation(
            &json!({"sourceId": "p1", "targetId": "p2", "type": "mother-in-law"}),
            0,
            &map,
        )
        .unwrap();
        assert_eq!((rel.source_id.as_str(), rel.target_id.as_str()), ("s-1", "s-2"));
        assert_eq!(rel.relation_type.as_deref(), Some("mother-in-law"));

        let err = resolve_relation(&json!({"sourceId": "p1", "targetId": "p9"}), 1, &map)
            .unwrap_err();
        assert!(err.contains("p9"));
        assert!(resolve_relation(&json!({"sourceId": "p1"}), 2, &map).is_err());
    }
}
