//! 提示词构建
//!
//! 纯函数：根据子句 / 显示单元 / 参与者摘要拼出 user prompt。
//! system prompt 在构造时读取 prompts_dir 下的 phase1.txt / phase2.txt / grouping.txt，缺失时用内置文本。

use std::path::PathBuf;

use serde::Serialize;

use crate::analysis::{Clause, DisplayUnit, StoredParticipant};

/// Phase 2 上下文中的一个显示单元
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnitContext {
    pub unit: usize,
    pub clause_ids: Vec<u32>,
    pub merged: bool,
    pub text: String,
    pub gloss: String,
}

impl UnitContext {
    pub fn from_units(units: &[DisplayUnit], clauses: &[Clause]) -> Vec<Self> {
        units
            .iter()
            .enumerate()
            .map(|(i, u)| {
                let (text, gloss) = u.combined(clauses);
                UnitContext {
                    unit: i + 1,
                    clause_ids: u.clause_ids.clone(),
                    merged: u.merged,
                    text,
                    gloss,
                }
            })
            .collect()
    }
}

pub trait PromptBuilder: Send + Sync {
    fn phase1_system(&self) -> String;

    fn phase2_system(&self) -> String;

    fn grouping_system(&self) -> String;

    fn build_phase1_prompt(&self, clauses: &[Clause]) -> String;

    fn build_phase2_prompt(&self, participants_context: &str, units: &[UnitContext]) -> String;

    fn build_grouping_prompt(&self, clauses: &[Clause]) -> String;
}

const PHASE1_SYSTEM: &str = "You are a biblical-language annotator. Identify every participant \
(person, group, place, object, abstract entity) in the passage and the relations between them. \
Respond with a single JSON object: {\"participants\": [{\"participantId\": \"p1\", \"hebrew\": \"...\", \
\"gloss\": \"...\", \"type\": \"...\", \"quantity\": \"...\", \"referenceStatus\": \"...\", \
\"properties\": [{\"dimension\": \"...\", \"value\": \"...\"}]}], \"relations\": [{\"sourceId\": \"p1\", \
\"targetId\": \"p2\", \"category\": \"...\", \"type\": \"...\"}]}. Output JSON only.";

const PHASE2_SYSTEM: &str = "You are a biblical-language annotator. For EACH display unit produce \
exactly one event, in unit order, tagged with that unit's clause ids. Reference participants only \
by the ids given. Respond with a single JSON object: {\"events\": [{\"eventId\": \"e1\", \
\"unitClauseIds\": [1], \"category\": \"...\", \"eventCore\": \"...\", \"modifiers\": {}, \
\"roles\": [{\"role\": \"...\", \"participantId\": \"p1\"}], \"speechAct\": {}, \"emotions\": [], \
\"pragmatic\": {}, \"figurative\": {}, \"keyTerms\": []}], \"discourse\": [{\"sourceId\": \"e1\", \
\"targetId\": \"e2\", \"type\": \"...\"}]}. Output JSON only.";

const GROUPING_SYSTEM: &str = "You group consecutive clauses that together express a single event. \
Every clause id must appear exactly once, in order, and each group must be a contiguous run. \
Respond with a single JSON object: {\"units\": [{\"clauseIds\": [1]}, {\"clauseIds\": [2, 3]}]}. \
Output JSON only.";

/// 默认提示词：构造时从目录读取一次 system prompt 覆盖
#[derive(Debug, Clone)]
pub struct DefaultPrompts {
    phase1: String,
    phase2: String,
    grouping: String,
}

impl Default for DefaultPrompts {
    fn default() -> Self {
        Self::new(None)
    }
}

impl DefaultPrompts {
    pub fn new(prompts_dir: Option<PathBuf>) -> Self {
        let load = |file: &str, fallback: &str| {
            prompts_dir
                .as_ref()
                .and_then(|dir| std::fs::read_to_string(dir.join(file)).ok())
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| fallback.to_string())
        };
        Self {
            phase1: load("phase1.txt", PHASE1_SYSTEM),
            phase2: load("phase2.txt", PHASE2_SYSTEM),
            grouping: load("grouping.txt", GROUPING_SYSTEM),
        }
    }
}

fn clause_lines(clauses: &[Clause]) -> String {
    clauses
        .iter()
        .map(|c| {
            let mut line = format!(
                "[{}] v{} ({}) {} | {}",
                c.clause_id, c.verse, c.clause_type, c.text, c.gloss
            );
            if let Some(lemma) = &c.lemma {
                line.push_str(&format!(" | head: {}", lemma));
            }
            line
        })
        .collect::<Vec<_>>()
        .join("\n")
}

impl PromptBuilder for DefaultPrompts {
    fn phase1_system(&self) -> String {
        self.phase1.clone()
    }

    fn phase2_system(&self) -> String {
        self.phase2.clone()
    }

    fn grouping_system(&self) -> String {
        self.grouping.clone()
    }

    fn build_phase1_prompt(&self, clauses: &[Clause]) -> String {
        format!(
            "Passage clauses ({} total):\n{}\n\nExtract participants and relations.",
            clauses.len(),
            clause_lines(clauses)
        )
    }

    fn build_phase2_prompt(&self, participants_context: &str, units: &[UnitContext]) -> String {
        let unit_lines = units
            .iter()
            .map(|u| {
                format!(
                    "UNIT {} clauses {:?}{}: {} | {}",
                    u.unit,
                    u.clause_ids,
                    if u.merged { " (merged)" } else { "" },
                    u.text,
                    u.gloss
                )
            })
            .collect::<Vec<_>>()
            .join("\n");
        format!(
            "Participants:\n{}\n\nDisplay units ({} total, produce exactly {} events):\n{}",
            participants_context,
            units.len(),
            units.len(),
            unit_lines
        )
    }

    fn build_grouping_prompt(&self, clauses: &[Clause]) -> String {
        format!(
            "Clauses ({} total):\n{}\n\nSuggest display units.",
            clauses.len(),
            clause_lines(clauses)
        )
    }
}

/// Phase 1 结果摘要（供 Phase 2 上下文使用）
pub fn participants_context(participants: &[StoredParticipant]) -> String {
    participants
        .iter()
        .map(|p| {
            let mut line = format!(
                "{}: {}",
                p.logical_id,
                p.data.gloss.as_deref().unwrap_or("(unnamed)")
            );
            if let Some(hebrew) = &p.data.hebrew {
                line.push_str(&format!(" [{}]", hebrew));
            }
            if let Some(kind) = &p.data.kind {
                line.push_str(&format!(" ({})", kind));
            }
            line
        })
        .collect::<Vec<_>>()
        .join("\n")
}
