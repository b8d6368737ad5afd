//! 数据模型：子句、显示单元、参与者、关系、事件与话语关系
//!
//! 模型输出的字段逐项可选、形状不稳定，统一宽松解码：缺失、null、空串、空对象都视为「不存在」，
//! 类型不符的子结构丢弃而不是整体报错。

use serde::de::{DeserializeOwned, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 持久化层分配的 ID
pub type StorageId = String;

/// 子句：章节内按顺序编号（从 1 开始），从语料中抽取后不可变
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Clause {
    pub clause_id: u32,
    pub verse: u32,
    pub text: String,
    #[serde(default)]
    pub gloss: String,
    #[serde(default)]
    pub clause_type: String,
    #[serde(default)]
    pub lemma: Option<String>,
}

/// 显示单元：一个或多个连续子句，Phase 2 中对应恰好一个事件
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplayUnit {
    pub clause_ids: Vec<u32>,
    pub merged: bool,
}

impl DisplayUnit {
    pub fn new(clause_ids: Vec<u32>) -> Self {
        let merged = clause_ids.len() > 1;
        Self { clause_ids, merged }
    }

    pub fn single(clause_id: u32) -> Self {
        Self {
            clause_ids: vec![clause_id],
            merged: false,
        }
    }

    pub fn primary_clause(&self) -> Option<u32> {
        self.clause_ids.first().copied()
    }

    /// 合并后的原文与释义（以空格连接）
    pub fn combined(&self, clauses: &[Clause]) -> (String, String) {
        let members: Vec<&Clause> = self
            .clause_ids
            .iter()
            .filter_map(|id| clauses.iter().find(|c| c.clause_id == *id))
            .collect();
        let text = members.iter().map(|c| c.text.as_str()).collect::<Vec<_>>().join(" ");
        let gloss = members.iter().map(|c| c.gloss.as_str()).collect::<Vec<_>>().join(" ");
        (text, gloss)
    }
}

/// 章节：分析的基本单位，独占其下所有子句与分析结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Passage {
    pub id: StorageId,
    pub reference: String,
    pub clauses: Vec<Clause>,
}

impl Passage {
    pub fn clause_ids(&self) -> Vec<u32> {
        self.clauses.iter().map(|c| c.clause_id).collect()
    }

    pub fn has_clause(&self, clause_id: u32) -> bool {
        self.clauses.iter().any(|c| c.clause_id == clause_id)
    }
}

// ---------------------------------------------------------------------------
// Phase 1 输出
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Participant {
    #[serde(alias = "id", deserialize_with = "lenient_string")]
    pub participant_id: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub hebrew: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub gloss: Option<String>,
    #[serde(rename = "type", deserialize_with = "lenient_string")]
    pub kind: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub quantity: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub reference_status: Option<String>,
    #[serde(deserialize_with = "lenient_vec")]
    pub properties: Vec<ParticipantProperty>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ParticipantProperty {
    #[serde(deserialize_with = "lenient_string")]
    pub dimension: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub value: Option<String>,
}

/// 参与者之间的有向关系（以逻辑 ID 引用两端）
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ParticipantRelation {
    #[serde(alias = "source", alias = "from", deserialize_with = "lenient_string")]
    pub source_id: Option<String>,
    #[serde(alias = "target", alias = "to", deserialize_with = "lenient_string")]
    pub target_id: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub category: Option<String>,
    #[serde(rename = "type", alias = "relationType", deserialize_with = "lenient_string")]
    pub relation_type: Option<String>,
}

// ---------------------------------------------------------------------------
// Phase 2 输出
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Event {
    #[serde(alias = "id", deserialize_with = "lenient_string")]
    pub event_id: Option<String>,
    #[serde(alias = "clauseIds", alias = "clauseId", deserialize_with = "lenient_ids")]
    pub unit_clause_ids: Vec<u32>,
    #[serde(deserialize_with = "lenient_string")]
    pub category: Option<String>,
    #[serde(alias = "predicate", deserialize_with = "lenient_string")]
    pub event_core: Option<String>,
    #[serde(deserialize_with = "lenient_record")]
    pub modifiers: Option<EventModifiers>,
    #[serde(deserialize_with = "lenient_vec")]
    pub roles: Vec<EventRole>,
    #[serde(deserialize_with = "lenient_record")]
    pub speech_act: Option<SpeechAct>,
    #[serde(deserialize_with = "lenient_vec")]
    pub emotions: Vec<Emotion>,
    #[serde(alias = "pragmatics", deserialize_with = "lenient_record")]
    pub pragmatic: Option<Pragmatics>,
    #[serde(deserialize_with = "lenient_record")]
    pub figurative: Option<Figurative>,
    #[serde(deserialize_with = "lenient_vec")]
    pub key_terms: Vec<KeyTerm>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EventModifiers {
    #[serde(deserialize_with = "lenient_string")]
    pub happened: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub realness: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub when: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub viewpoint: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub phase: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub repetition: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub on_purpose: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub how_known: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub causation: Option<String>,
}

/// 事件角色：participant_id 为 Phase 1 的逻辑 ID（如 "p3"）
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EventRole {
    #[serde(alias = "type", deserialize_with = "lenient_string")]
    pub role: Option<String>,
    #[serde(alias = "participant", deserialize_with = "lenient_string")]
    pub participant_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SpeechAct {
    #[serde(rename = "type", deserialize_with = "lenient_string")]
    pub act_type: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub quotation_type: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub speaker_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Emotion {
    #[serde(deserialize_with = "lenient_string")]
    pub participant_id: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub primary: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub secondary: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub intensity: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub source: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub confidence: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Pragmatics {
    #[serde(deserialize_with = "lenient_string")]
    pub register: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub social_axis: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub prominence: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub pacing: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Figurative {
    #[serde(deserialize_with = "lenient_bool")]
    pub is_figurative: bool,
    #[serde(deserialize_with = "lenient_string")]
    pub figure_type: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub literal_meaning: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub intended_meaning: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub transferability: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct KeyTerm {
    #[serde(deserialize_with = "lenient_string")]
    pub term_id: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub source_lemma: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub semantic_domain: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub consistency: Option<String>,
}

/// 事件之间的有向话语关系（以逻辑 ID 引用两端）
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DiscourseRelation {
    #[serde(alias = "source", alias = "from", deserialize_with = "lenient_string")]
    pub source_id: Option<String>,
    #[serde(alias = "target", alias = "to", deserialize_with = "lenient_string")]
    pub target_id: Option<String>,
    #[serde(rename = "type", alias = "relationType", deserialize_with = "lenient_string")]
    pub relation_type: Option<String>,
}

// ---------------------------------------------------------------------------
// 写入与已持久化记录
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct NewParticipant {
    pub logical_id: String,
    pub data: Participant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredParticipant {
    pub id: StorageId,
    pub passage_id: StorageId,
    pub logical_id: String,
    pub data: Participant,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewRelation {
    pub source_id: StorageId,
    pub target_id: StorageId,
    pub category: Option<String>,
    pub relation_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRelation {
    pub id: StorageId,
    pub passage_id: StorageId,
    pub source_id: StorageId,
    pub target_id: StorageId,
    pub category: Option<String>,
    pub relation_type: Option<String>,
}

/// 解析到已存参与者的角色
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedRole {
    pub role: Option<String>,
    pub participant_id: StorageId,
    pub participant_logical_id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewEvent {
    pub logical_id: String,
    pub primary_clause: Option<u32>,
    pub unit_clause_ids: Vec<u32>,
    pub roles: Vec<ResolvedRole>,
    pub data: Event,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEvent {
    pub id: StorageId,
    pub passage_id: StorageId,
    pub logical_id: String,
    pub primary_clause: Option<u32>,
    pub unit_clause_ids: Vec<u32>,
    pub roles: Vec<ResolvedRole>,
    pub data: Event,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewDiscourse {
    pub source_id: StorageId,
    pub target_id: StorageId,
    pub relation_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredDiscourse {
    pub id: StorageId,
    pub passage_id: StorageId,
    pub source_id: StorageId,
    pub target_id: StorageId,
    pub relation_type: Option<String>,
}

// ---------------------------------------------------------------------------
// 宽松解码
// ---------------------------------------------------------------------------

/// 取文档中某键下的数组元素；缺失或非数组时为空
pub fn items(doc: &Value, key: &str) -> Vec<Value> {
    doc.get(key)
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

fn is_empty_value(v: &Value) -> bool {
    match v {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        _ => false,
    }
}

fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let v = Value::deserialize(deserializer)?;
    Ok(match v {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    })
}

fn lenient_bool<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let v = Value::deserialize(deserializer)?;
    Ok(match v {
        Value::Bool(b) => b,
        Value::String(s) => matches!(s.trim().to_lowercase().as_str(), "true" | "yes" | "y"),
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        _ => false,
    })
}

fn lenient_record<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let v = Value::deserialize(deserializer)?;
    if is_empty_value(&v) {
        return Ok(None);
    }
    Ok(serde_json::from_value(v).ok())
}

fn lenient_vec<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let v = Value::deserialize(deserializer)?;
    Ok(match v {
        Value::Array(arr) => arr
            .into_iter()
            .filter(|item| !is_empty_value(item))
            .filter_map(|item| serde_json::from_value(item).ok())
            .collect(),
        Value::Object(_) if !is_empty_value(&v) => {
            serde_json::from_value(v).ok().into_iter().collect()
        }
        _ => Vec::new(),
    })
}

/// 子句序号列表：接受数字、数字数组、数字字符串或 "2,3" 形式
fn lenient_ids<'de, D>(deserializer: D) -> Result<Vec<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    let v = Value::deserialize(deserializer)?;
    Ok(parse_ids(&v))
}

pub fn parse_ids(v: &Value) -> Vec<u32> {
    match v {
        Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()).into_iter().collect(),
        Value::String(s) => s
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter_map(|p| p.trim().parse::<u32>().ok())
            .collect(),
        Value::Array(arr) => arr.iter().flat_map(parse_ids).collect(),
        _ => Vec::new(),
    }
}
