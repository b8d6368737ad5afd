//! 进程内存储
//!
//! 所有数据放在一把 RwLock 之下；单条写入即原子，无需额外事务。

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::analysis::{
    Clause, DisplayUnit, NewDiscourse, NewEvent, NewParticipant, NewRelation, Passage,
    StoredDiscourse, StoredEvent, StoredParticipant, StoredRelation,
};
use crate::store::{Store, StoreError};

#[derive(Debug, Default)]
struct Tables {
    passages: HashMap<String, Passage>,
    participants: Vec<StoredParticipant>,
    relations: Vec<StoredRelation>,
    events: Vec<StoredEvent>,
    discourse: Vec<StoredDiscourse>,
    display_units: HashMap<String, Vec<DisplayUnit>>,
}

impl Tables {
    fn ensure_passage(&self, passage_id: &str) -> Result<(), StoreError> {
        if self.passages.values().any(|p| p.id == passage_id) {
            Ok(())
        } else {
            Err(StoreError::UnknownPassage(passage_id.to_string()))
        }
    }
}

#[derive(Debug, Default)]
pub struct InMemoryStore {
    tables: RwLock<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[async_trait]
impl Store for InMemoryStore {
    async fn find_passage(&self, reference: &str) -> Result<Option<Passage>, StoreError> {
        Ok(self.tables.read().await.passages.get(reference).cloned())
    }

    async fn create_passage(
        &self,
        reference: &str,
        clauses: &[Clause],
    ) -> Result<Passage, StoreError> {
        let mut t = self.tables.write().await;
        let passage = t
            .passages
            .entry(reference.to_string())
            .or_insert_with(|| Passage {
                id: new_id(),
                reference: reference.to_string(),
                clauses: clauses.to_vec(),
            })
            .clone();
        Ok(passage)
    }

    async fn list_participants(
        &self,
        passage_id: &str,
    ) -> Result<Vec<StoredParticipant>, StoreError> {
        let t = self.tables.read().await;
        Ok(t.participants
            .iter()
            .filter(|p| p.passage_id == passage_id)
            .cloned()
            .collect())
    }

    async fn list_relations(&self, passage_id: &str) -> Result<Vec<StoredRelation>, StoreError> {
        let t = self.tables.read().await;
        Ok(t.relations
            .iter()
            .filter(|r| r.passage_id == passage_id)
            .cloned()
            .collect())
    }

    async fn delete_phase1(&self, passage_id: &str) -> Result<(), StoreError> {
        let mut t = self.tables.write().await;
        t.relations.retain(|r| r.passage_id != passage_id);
        t.participants.retain(|p| p.passage_id != passage_id);
        Ok(())
    }

    async fn create_participant(
        &self,
        passage_id: &str,
        participant: NewParticipant,
    ) -> Result<StoredParticipant, StoreError> {
        let mut t = self.tables.write().await;
        t.ensure_passage(passage_id)?;
        let stored = StoredParticipant {
            id: new_id(),
            passage_id: passage_id.to_string(),
            logical_id: participant.logical_id,
            data: participant.data,
        };
        t.participants.push(stored.clone());
        Ok(stored)
    }

    async fn create_relation(
        &self,
        passage_id: &str,
        relation: NewRelation,
    ) -> Result<StoredRelation, StoreError> {
        let mut t = self.tables.write().await;
        t.ensure_passage(passage_id)?;
        for id in [&relation.source_id, &relation.target_id] {
            if !t.participants.iter().any(|p| &p.id == id) {
                return Err(StoreError::UnknownRecord(id.clone()));
            }
        }
        let stored = StoredRelation {
            id: new_id(),
            passage_id: passage_id.to_string(),
            source_id: relation.source_id,
            target_id: relation.target_id,
            category: relation.category,
            relation_type: relation.relation_type,
        };
        t.relations.push(stored.clone());
        Ok(stored)
    }

    async fn list_events(&self, passage_id: &str) -> Result<Vec<StoredEvent>, StoreError> {
        let t = self.tables.read().await;
        Ok(t.events
            .iter()
            .filter(|e| e.passage_id == passage_id)
            .cloned()
            .collect())
    }

    async fn list_discourse(&self, passage_id: &str) -> Result<Vec<StoredDiscourse>, StoreError> {
        let t = self.tables.read().await;
        Ok(t.discourse
            .iter()
            .filter(|d| d.passage_id == passage_id)
            .cloned()
            .collect())
    }

    async fn delete_phase2(&self, passage_id: &str) -> Result<(), StoreError> {
        let mut t = self.tables.write().await;
        t.discourse.retain(|d| d.passage_id != passage_id);
        t.events.retain(|e| e.passage_id != passage_id);
        Ok(())
    }

    async fn create_event(
        &self,
        passage_id: &str,
        event: NewEvent,
    ) -> Result<StoredEvent, StoreError> {
        let mut t = self.tables.write().await;
        t.ensure_passage(passage_id)?;
        let stored = StoredEvent {
            id: new_id(),
            passage_id: passage_id.to_string(),
            logical_id: event.logical_id,
            primary_clause: event.primary_clause,
            unit_clause_ids: event.unit_clause_ids,
            roles: event.roles,
            data: event.data,
        };
        t.events.push(stored.clone());
        Ok(stored)
    }

    async fn create_discourse(
        &self,
        passage_id: &str,
        discourse: NewDiscourse,
    ) -> Result<StoredDiscourse, StoreError> {
        let mut t = self.tables.write().await;
        t.ensure_passage(passage_id)?;
        for id in [&discourse.source_id, &discourse.target_id] {
            if !t.events.iter().any(|e| &e.id == id) {
                return Err(StoreError::UnknownRecord(id.clone()));
            }
        }
        let stored = StoredDiscourse {
            id: new_id(),
            passage_id: passage_id.to_string(),
            source_id: discourse.source_id,
            target_id: discourse.target_id,
            relation_type: discourse.relation_type,
        };
        t.discourse.push(stored.clone());
        Ok(stored)
    }

    async fn load_display_units(
        &self,
        passage_id: &str,
    ) -> Result<Option<Vec<DisplayUnit>>, StoreError> {
        Ok(self.tables.read().await.display_units.get(passage_id).cloned())
    }

    async fn save_display_units(
        &self,
        passage_id: &str,
        units: &[DisplayUnit],
    ) -> Result<(), StoreError> {
        let mut t = self.tables.write().await;
        t.ensure_passage(passage_id)?;
        t.display_units.insert(passage_id.to_string(), units.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::Participant;

    fn clause(id: u32) -> Clause {
        Clause {
            clause_id: id,
            verse: 1,
            text: format!("c{id}"),
            gloss: String::new(),
            clause_type: String::new(),
            lemma: None,
        }
    }

    #[tokio::test]
    async fn test_create_passage_is_idempotent() {
        let store = InMemoryStore::new();
        let a = store.create_passage("Ruth 1:1-2", &[clause(1)]).await.unwrap();
        let b = store.create_passage("Ruth 1:1-2", &[clause(1), clause(2)]).await.unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(b.clauses.len(), 1);
    }

    #[tokio::test]
    async fn test_phase1_delete_is_scoped_to_passage() {
        let store = InMemoryStore::new();
        let a = store.create_passage("Ruth 1:1", &[clause(1)]).await.unwrap();
        let b = store.create_passage("Ruth 1:2", &[clause(1)]).await.unwrap();
        for p in [&a, &b] {
            store
                .create_participant(
                    &p.id,
                    NewParticipant {
                        logical_id: "p1".into(),
                        data: Participant::default(),
                    },
                )
                .await
                .unwrap();
        }
        store.delete_phase1(&a.id).await.unwrap();
        assert!(store.list_participants(&a.id).await.unwrap().is_empty());
        assert_eq!(store.list_participants(&b.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_relation_requires_existing_endpoints() {
        let store = InMemoryStore::new();
        let p = store.create_passage("Ruth 1:1", &[clause(1)]).await.unwrap();
        let err = store
            .create_relation(
                &p.id,
                NewRelation {
                    source_id: "nope".into(),
                    target_id: "nope".into(),
                    category: None,
                    relation_type: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::UnknownRecord(_)));
    }

    #[tokio::test]
    async fn test_display_units_roundtrip() {
        let store = InMemoryStore::new();
        let p = store.create_passage("Ruth 1:1", &[clause(1), clause(2)]).await.unwrap();
        assert!(store.load_display_units(&p.id).await.unwrap().is_none());
        let units = vec![DisplayUnit::new(vec![1, 2])];
        store.save_display_units(&p.id, &units).await.unwrap();
        assert_eq!(store.load_display_units(&p.id).await.unwrap(), Some(units));
        assert!(store.save_display_units("missing", &[]).await.is_err());
    }
}
