//! Phase 2：事件与话语关系
//!
//! 上下文按显示单元（而非原始子句）组织，要求模型为每个单元恰好输出一个事件。
//! 事件数与单元数不一致只记警告，全部事件照常写入；所有事件写完后才处理话语关系。

use std::collections::HashMap;

use serde_json::Value;

use crate::analysis::{
    items, participants_context, Analyzer, DiscourseRelation, DisplayUnit, Event,
    GroupingResolution, NewDiscourse, NewEvent, Passage, Phase2Result, Progress, ProgressEvent,
    ProgressStep, ResolvedRole, SaveOutcome, SaveTally, StorageId, StoredParticipant,
    UnitContext,
};
use crate::core::{AnalysisError, PipelineState, PipelineTracker};

impl Analyzer {
    pub(crate) async fn phase2(
        &self,
        passage: &Passage,
        participants: &[StoredParticipant],
        grouping: GroupingResolution,
        tracker: &mut PipelineTracker,
        progress: &Progress,
    ) -> Result<Phase2Result, AnalysisError> {
        self.require_llm()?;
        tracker.advance(PipelineState::Phase2Running)?;

        let participant_map: HashMap<&str, &StoredParticipant> = participants
            .iter()
            .map(|p| (p.logical_id.as_str(), p))
            .collect();
        let units = UnitContext::from_units(&grouping.units, &passage.clauses);

        progress.emit(
            ProgressEvent::new(
                ProgressStep::Phase2Calling,
                format!("Extracting events for {} display units", units.len()),
            )
            .in_state(tracker.state()),
        )?;

        let doc = self
            .call_model(
                &self.prompts.phase2_system(),
                &self
                    .prompts
                    .build_phase2_prompt(&participants_context(participants), &units),
                &self.options.phase2,
                progress,
            )
            .await?;
        let raw_events = items(&doc, "events");
        let raw_discourse = items(&doc, "discourse");
        progress.emit(
            ProgressEvent::new(
                ProgressStep::Phase2Parsed,
                format!(
                    "Found {} events and {} discourse relations",
                    raw_events.len(),
                    raw_discourse.len()
                ),
            )
            .in_state(tracker.state()),
        )?;

        let mut warnings = Vec::new();
        if raw_events.len() != grouping.units.len() {
            let warning = format!(
                "Model returned {} events for {} display units",
                raw_events.len(),
                grouping.units.len()
            );
            tracing::warn!("{} ({})", warning, passage.reference);
            progress.emit(
                ProgressEvent::new(ProgressStep::Warning, warning.clone())
                    .in_state(tracker.state()),
            )?;
            warnings.push(warning);
        }

        self.store.delete_phase2(&passage.id).await?;

        let mut event_map: HashMap<String, StorageId> = HashMap::new();
        let mut events = Vec::with_capacity(raw_events.len());
        let mut dropped_roles = 0usize;
        let mut tally = SaveTally::new("event", ProgressStep::EventSaved, raw_events.len());
        for (index, value) in raw_events.iter().enumerate() {
            let outcome = match decode_event(value, index, passage, &grouping.units) {
                Ok(event) if event_map.contains_key(&event.logical_id) => {
                    SaveOutcome::skipped(format!("duplicate event id {}", event.logical_id))
                }
                Ok(event) => {
                    let (event, dropped) = resolve_roles(event, &participant_map);
                    dropped_roles += dropped;
                    let logical_id = event.logical_id.clone();
                    let stored = self.store.create_event(&passage.id, event).await?;
                    event_map.insert(logical_id, stored.id.clone());
                    let id = stored.id.clone();
                    events.push(stored);
                    SaveOutcome::Saved { id }
                }
                Err(reason) => SaveOutcome::skipped(reason),
            };
            tally.record(&outcome, tracker.state(), progress)?;
        }
        let event_summary = tally.finish();

        let mut discourse = Vec::with_capacity(raw_discourse.len());
        let mut tally = SaveTally::new(
            "discourse relation",
            ProgressStep::DiscourseSaved,
            raw_discourse.len(),
        );
        for (index, value) in raw_discourse.iter().enumerate() {
            let outcome = match resolve_discourse(value, index, &event_map) {
                Ok(new) => {
                    let stored = self.store.create_discourse(&passage.id, new).await?;
                    let id = stored.id.clone();
                    discourse.push(stored);
                    SaveOutcome::Saved { id }
                }
                Err(reason) => SaveOutcome::skipped(reason),
            };
            tally.record(&outcome, tracker.state(), progress)?;
        }
        let discourse_summary = tally.finish();

        if dropped_roles > 0 {
            tracing::warn!(
                "Dropped {} roles with unresolved participants in {}",
                dropped_roles,
                passage.reference
            );
        }

        tracker.advance(PipelineState::Phase2Saved)?;
        progress.emit(
            ProgressEvent::new(
                ProgressStep::Phase2Complete,
                format!(
                    "Phase 2 saved {} events, {} discourse relations",
                    event_summary.saved, discourse_summary.saved
                ),
            )
            .in_state(tracker.state()),
        )?;
        tracing::info!(
            "Phase 2 for {} saved {} events ({} skipped), {} discourse ({} skipped)",
            passage.reference,
            event_summary.saved,
            event_summary.skipped,
            discourse_summary.saved,
            discourse_summary.skipped
        );

        Ok(Phase2Result {
            passage: passage.clone(),
            grouping,
            events,
            discourse,
            event_summary,
            discourse_summary,
            dropped_roles,
            warnings,
        })
    }
}

/// 解码单个事件：确定逻辑 ID 与所属子句（缺失时取同位置的显示单元）
fn decode_event(
    value: &Value,
    index: usize,
    passage: &Passage,
    units: &[DisplayUnit],
) -> Result<NewEvent, String> {
    let mut data: Event = serde_json::from_value(value.clone())
        .map_err(|e| format!("event {} could not be decoded: {}", index + 1, e))?;
    let logical_id = data
        .event_id
        .clone()
        .unwrap_or_else(|| format!("e{}", index + 1));
    data.event_id = Some(logical_id.clone());

    let tagged: Vec<u32> = data
        .unit_clause_ids
        .iter()
        .copied()
        .filter(|id| passage.has_clause(*id))
        .collect();
    let unit = if tagged.is_empty() {
        units
            .get(index)
            .cloned()
            .unwrap_or_else(|| DisplayUnit::new(Vec::new()))
    } else {
        DisplayUnit::new(tagged)
    };
    data.unit_clause_ids = unit.clause_ids.clone();

    Ok(NewEvent {
        logical_id,
        primary_clause: unit.primary_clause(),
        unit_clause_ids: unit.clause_ids,
        roles: Vec::new(),
        data,
    })
}

/// 角色参与者映射为存储 ID；无法解析的角色被丢弃，返回丢弃数量
fn resolve_roles(
    mut event: NewEvent,
    participants: &HashMap<&str, &StoredParticipant>,
) -> (NewEvent, usize) {
    let mut dropped = 0;
    let mut kept = Vec::with_capacity(event.data.roles.len());
    for role in std::mem::take(&mut event.data.roles) {
        match role
            .participant_id
            .as_deref()
            .and_then(|id| participants.get(id))
        {
            Some(p) => {
                event.roles.push(ResolvedRole {
                    role: role.role.clone(),
                    participant_id: p.id.clone(),
                    participant_logical_id: p.logical_id.clone(),
                });
                kept.push(role);
            }
            None => {
                tracing::debug!(
                    "Event {} role {:?} references unknown participant {:?}",
                    event.logical_id,
                    role.role,
                    role.participant_id
                );
                dropped += 1;
            }
        }
    }
    event.data.roles = kept;
    (event, dropped)
}

fn resolve_discourse(
    value: &Value,
    index: usize,
    event_map: &HashMap<String, StorageId>,
) -> Result<NewDiscourse, String> {
    let rel: DiscourseRelation = serde_json::from_value(value.clone())
        .map_err(|e| format!("discourse relation {} could not be decoded: {}", index + 1, e))?;
    let endpoint = |id: &Option<String>| -> Result<StorageId, String> {
        match id {
            Some(logical) => event_map
                .get(logical)
                .cloned()
                .ok_or_else(|| format!("unresolved event {}", logical)),
            None => Err("missing endpoint".to_string()),
        }
    };
    Ok(NewDiscourse {
        source_id: endpoint(&rel.source_id)?,
        target_id: endpoint(&rel.target_id)?,
        relation_type: rel.relation_type,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{Clause, Participant};
    use serde_json::json;

    fn passage() -> Passage {
        let clause = |id: u32| Clause {
            clause_id: id,
            verse: 1,
            text: format!("c{id}"),
            gloss: String::new(),
            clause_type: String::new(),
            lemma: None,
        };
        Passage {
            id: "passage-1".into(),
            reference: "Ruth 1:1".into(),
            clauses: vec![clause(1), clause(2), clause(3)],
        }
    }

    fn units() -> Vec<DisplayUnit> {
        vec![DisplayUnit::single(1), DisplayUnit::new(vec![2, 3])]
    }

    #[test]
    fn test_event_clause_ids_from_model() {
        let e = decode_event(&json!({"unitClauseIds": [2, 3]}), 0, &passage(), &units()).unwrap();
        assert_eq!(e.logical_id, "e1");
        assert_eq!(e.unit_clause_ids, vec![2, 3]);
        assert_eq!(e.primary_clause, Some(2));
    }

    #[test]
    fn test_event_clause_ids_fall_back_to_unit_position() {
        let e = decode_event(&json!({"eventId": "e5", "unitClauseIds": [99]}), 1, &passage(), &units())
            .unwrap();
        assert_eq!(e.logical_id, "e5");
        assert_eq!(e.unit_clause_ids, vec![2, 3]);

        let extra = decode_event(&json!({}), 2, &passage(), &units()).unwrap();
        assert!(extra.unit_clause_ids.is_empty());
        assert_eq!(extra.primary_clause, None);
    }

    #[test]
    fn test_unresolved_roles_dropped() {
        let naomi = StoredParticipant {
            id: "s-1".into(),
            passage_id: "passage-1".into(),
            logical_id: "p1".into(),
            data: Participant::default(),
        };
        let map: HashMap<&str, &StoredParticipant> = [("p1", &naomi)].into_iter().collect();
        let event = decode_event(
            &json!({"roles": [
                {"role": "agent", "participantId": "p1"},
                {"role": "patient", "participantId": "p4"},
                {"role": "location"}
            ]}),
            0,
            &passage(),
            &units(),
        )
        .unwrap();
        let (event, dropped) = resolve_roles(event, &map);
        assert_eq!(dropped, 2);
        assert_eq!(event.roles.len(), 1);
        assert_eq!(event.roles[0].participant_id, "s-1");
        assert_eq!(event.data.roles.len(), 1);
    }

    #[test]
    fn test_discourse_requires_both_events() {
        let mut map = HashMap::new();
        map.insert("e1".to_string(), "ev-1".to_string());
        map.insert("e2".to_string(), "ev-2".to_string());
        let ok = resolve_discourse(&json!({"sourceId": "e1", "targetId": "e2", "type": "sequence"}), 0, &map)
            .unwrap();
        assert_eq!(ok.target_id, "ev-2");
        assert!(resolve_discourse(&json!({"sourceId": "e1", "targetId": "e3"}), 1, &map).is_err());
    }
}
