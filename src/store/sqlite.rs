//! 异步 SQLite 存储（sqlx）
//!
//! 事件子结构以 JSON 存于 events.data，角色单独入 event_roles 表，二者在同一事务内写入。

use std::path::Path;

use async_trait::async_trait;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;

use crate::analysis::{
    Clause, DisplayUnit, NewDiscourse, NewEvent, NewParticipant, NewRelation, Passage,
    ResolvedRole, StoredDiscourse, StoredEvent, StoredParticipant, StoredRelation,
};
use crate::store::{Store, StoreError};

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// 连接数据库（url 形如 `sqlite:data/pericope.db?mode=rwc`）并建表
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect(database_url)
            .await?;
        let store = Self { pool };
        store.init_tables().await?;
        Ok(store)
    }

    /// 按文件路径打开（不存在则创建）
    pub async fn open(db_path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let url = format!("sqlite:{}?mode=rwc", db_path.as_ref().display());
        Self::connect(&url, 5).await
    }

    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn init_tables(&self) -> Result<(), StoreError> {
        let statements = [
            "CREATE TABLE IF NOT EXISTS passages (
                id TEXT PRIMARY KEY,
                reference TEXT NOT NULL UNIQUE,
                created_at TEXT NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS clauses (
                passage_id TEXT NOT NULL,
                clause_id INTEGER NOT NULL,
                verse INTEGER NOT NULL,
                text TEXT NOT NULL,
                gloss TEXT NOT NULL,
                clause_type TEXT NOT NULL,
                lemma TEXT,
                PRIMARY KEY (passage_id, clause_id),
                FOREIGN KEY (passage_id) REFERENCES passages(id) ON DELETE CASCADE
            )",
            "CREATE TABLE IF NOT EXISTS participants (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                passage_id TEXT NOT NULL,
                logical_id TEXT NOT NULL,
                data TEXT NOT NULL,
                FOREIGN KEY (passage_id) REFERENCES passages(id) ON DELETE CASCADE
            )",
            "CREATE TABLE IF NOT EXISTS relations (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                passage_id TEXT NOT NULL,
                source_id TEXT NOT NULL,
                target_id TEXT NOT NULL,
                category TEXT,
                relation_type TEXT,
                FOREIGN KEY (source_id) REFERENCES participants(id) ON DELETE CASCADE,
                FOREIGN KEY (target_id) REFERENCES participants(id) ON DELETE CASCADE
            )",
            "CREATE TABLE IF NOT EXISTS events (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                passage_id TEXT NOT NULL,
                logical_id TEXT NOT NULL,
                primary_clause INTEGER,
                unit_clause_ids TEXT NOT NULL,
                data TEXT NOT NULL,
                FOREIGN KEY (passage_id) REFERENCES passages(id) ON DELETE CASCADE
            )",
            "CREATE TABLE IF NOT EXISTS event_roles (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                event_id TEXT NOT NULL,
                role TEXT,
                participant_id TEXT NOT NULL,
                participant_logical_id TEXT NOT NULL,
                FOREIGN KEY (event_id) REFERENCES events(id) ON DELETE CASCADE
            )",
            "CREATE TABLE IF NOT EXISTS discourse (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                passage_id TEXT NOT NULL,
                source_id TEXT NOT NULL,
                target_id TEXT NOT NULL,
                relation_type TEXT,
                FOREIGN KEY (source_id) REFERENCES events(id) ON DELETE CASCADE,
                FOREIGN KEY (target_id) REFERENCES events(id) ON DELETE CASCADE
            )",
            "CREATE TABLE IF NOT EXISTS display_units (
                passage_id TEXT NOT NULL,
                position INTEGER NOT NULL,
                clause_ids TEXT NOT NULL,
                merged INTEGER NOT NULL,
                PRIMARY KEY (passage_id, position),
                FOREIGN KEY (passage_id) REFERENCES passages(id) ON DELETE CASCADE
            )",
            "CREATE INDEX IF NOT EXISTS idx_participants_passage ON participants(passage_id)",
            "CREATE INDEX IF NOT EXISTS idx_events_passage ON events(passage_id)",
        ];
        for sql in statements {
            sqlx::query(sql).execute(&self.pool).await?;
        }
        Ok(())
    }

    async fn passage_exists(&self, passage_id: &str) -> Result<(), StoreError> {
        let row = sqlx::query("SELECT 1 FROM passages WHERE id = ?")
            .bind(passage_id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(_) => Ok(()),
            None => Err(StoreError::UnknownPassage(passage_id.to_string())),
        }
    }

    async fn load_clauses(&self, passage_id: &str) -> Result<Vec<Clause>, StoreError> {
        let rows = sqlx::query(
            "SELECT clause_id, verse, text, gloss, clause_type, lemma
             FROM clauses WHERE passage_id = ? ORDER BY clause_id ASC",
        )
        .bind(passage_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| {
                Ok(Clause {
                    clause_id: row.try_get::<i64, _>("clause_id")? as u32,
                    verse: row.try_get::<i64, _>("verse")? as u32,
                    text: row.try_get("text")?,
                    gloss: row.try_get("gloss")?,
                    clause_type: row.try_get("clause_type")?,
                    lemma: row.try_get("lemma")?,
                })
            })
            .collect()
    }

    async fn load_roles(&self, event_id: &str) -> Result<Vec<ResolvedRole>, StoreError> {
        let rows = sqlx::query(
            "SELECT role, participant_id, participant_logical_id
             FROM event_roles WHERE event_id = ? ORDER BY seq ASC",
        )
        .bind(event_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| {
                Ok(ResolvedRole {
                    role: row.try_get("role")?,
                    participant_id: row.try_get("participant_id")?,
                    participant_logical_id: row.try_get("participant_logical_id")?,
                })
            })
            .collect()
    }
}

fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn participant_from_row(row: &SqliteRow) -> Result<StoredParticipant, StoreError> {
    let data: String = row.try_get("data")?;
    Ok(StoredParticipant {
        id: row.try_get("id")?,
        passage_id: row.try_get("passage_id")?,
        logical_id: row.try_get("logical_id")?,
        data: serde_json::from_str(&data)?,
    })
}

#[async_trait]
impl Store for SqliteStore {
    async fn find_passage(&self, reference: &str) -> Result<Option<Passage>, StoreError> {
        let row = sqlx::query("SELECT id, reference FROM passages WHERE reference = ?")
            .bind(reference)
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let id: String = row.try_get("id")?;
        let clauses = self.load_clauses(&id).await?;
        Ok(Some(Passage {
            id,
            reference: row.try_get("reference")?,
            clauses,
        }))
    }

    async fn create_passage(
        &self,
        reference: &str,
        clauses: &[Clause],
    ) -> Result<Passage, StoreError> {
        if let Some(existing) = self.find_passage(reference).await? {
            return Ok(existing);
        }
        let id = new_id();
        let now = chrono::Utc::now().to_rfc3339();
        let mut tx = self.pool.begin().await?;
        sqlx::query("INSERT INTO passages (id, reference, created_at) VALUES (?, ?, ?)")
            .bind(&id)
            .bind(reference)
            .bind(&now)
            .execute(&mut *tx)
            .await?;
        for c in clauses {
            sqlx::query(
                "INSERT INTO clauses (passage_id, clause_id, verse, text, gloss, clause_type, lemma)
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&id)
            .bind(c.clause_id as i64)
            .bind(c.verse as i64)
            .bind(&c.text)
            .bind(&c.gloss)
            .bind(&c.clause_type)
            .bind(&c.lemma)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(Passage {
            id,
            reference: reference.to_string(),
            clauses: clauses.to_vec(),
        })
    }

    async fn list_participants(
        &self,
        passage_id: &str,
    ) -> Result<Vec<StoredParticipant>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, passage_id, logical_id, data FROM participants
             WHERE passage_id = ? ORDER BY seq ASC",
        )
        .bind(passage_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(participant_from_row).collect()
    }

    async fn list_relations(&self, passage_id: &str) -> Result<Vec<StoredRelation>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, passage_id, source_id, target_id, category, relation_type
             FROM relations WHERE passage_id = ? ORDER BY seq ASC",
        )
        .bind(passage_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| {
                Ok(StoredRelation {
                    id: row.try_get("id")?,
                    passage_id: row.try_get("passage_id")?,
                    source_id: row.try_get("source_id")?,
                    target_id: row.try_get("target_id")?,
                    category: row.try_get("category")?,
                    relation_type: row.try_get("relation_type")?,
                })
            })
            .collect()
    }

    async fn delete_phase1(&self, passage_id: &str) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM relations WHERE passage_id = ?")
            .bind(passage_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM participants WHERE passage_id = ?")
            .bind(passage_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn create_participant(
        &self,
        passage_id: &str,
        participant: NewParticipant,
    ) -> Result<StoredParticipant, StoreError> {
        self.passage_exists(passage_id).await?;
        let id = new_id();
        sqlx::query(
            "INSERT INTO participants (id, passage_id, logical_id, data) VALUES (?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(passage_id)
        .bind(&participant.logical_id)
        .bind(serde_json::to_string(&participant.data)?)
        .execute(&self.pool)
        .await?;
        Ok(StoredParticipant {
            id,
            passage_id: passage_id.to_string(),
            logical_id: participant.logical_id,
            data: participant.data,
        })
    }

    async fn create_relation(
        &self,
        passage_id: &str,
        relation: NewRelation,
    ) -> Result<StoredRelation, StoreError> {
        let id = new_id();
        sqlx::query(
            "INSERT INTO relations (id, passage_id, source_id, target_id, category, relation_type)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(passage_id)
        .bind(&relation.source_id)
        .bind(&relation.target_id)
        .bind(&relation.category)
        .bind(&relation.relation_type)
        .execute(&self.pool)
        .await?;
        Ok(StoredRelation {
            id,
            passage_id: passage_id.to_string(),
            source_id: relation.source_id,
            target_id: relation.target_id,
            category: relation.category,
            relation_type: relation.relation_type,
        })
    }

    async fn list_events(&self, passage_id: &str) -> Result<Vec<StoredEvent>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, passage_id, logical_id, primary_clause, unit_clause_ids, data
             FROM events WHERE passage_id = ? ORDER BY seq ASC",
        )
        .bind(passage_id)
        .fetch_all(&self.pool)
        .await?;
        let mut events = Vec::with_capacity(rows.len());
        for row in rows {
            let id: String = row.try_get("id")?;
            let unit_clause_ids: String = row.try_get("unit_clause_ids")?;
            let data: String = row.try_get("data")?;
            let primary_clause: Option<i64> = row.try_get("primary_clause")?;
            let roles = self.load_roles(&id).await?;
            events.push(StoredEvent {
                id,
                passage_id: row.try_get("passage_id")?,
                logical_id: row.try_get("logical_id")?,
                primary_clause: primary_clause.map(|c| c as u32),
                unit_clause_ids: serde_json::from_str(&unit_clause_ids)?,
                roles,
                data: serde_json::from_str(&data)?,
            });
        }
        Ok(events)
    }

    async fn list_discourse(&self, passage_id: &str) -> Result<Vec<StoredDiscourse>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, passage_id, source_id, target_id, relation_type
             FROM discourse WHERE passage_id = ? ORDER BY seq ASC",
        )
        .bind(passage_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| {
                Ok(StoredDiscourse {
                    id: row.try_get("id")?,
                    passage_id: row.try_get("passage_id")?,
                    source_id: row.try_get("source_id")?,
                    target_id: row.try_get("target_id")?,
                    relation_type: row.try_get("relation_type")?,
                })
            })
            .collect()
    }

    async fn delete_phase2(&self, passage_id: &str) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM discourse WHERE passage_id = ?")
            .bind(passage_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "DELETE FROM event_roles WHERE event_id IN (SELECT id FROM events WHERE passage_id = ?)",
        )
        .bind(passage_id)
        .execute(&mut *tx)
        .await?;
        sqlx::query("DELETE FROM events WHERE passage_id = ?")
            .bind(passage_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn create_event(
        &self,
        passage_id: &str,
        event: NewEvent,
    ) -> Result<StoredEvent, StoreError> {
        self.passage_exists(passage_id).await?;
        let id = new_id();
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO events (id, passage_id, logical_id, primary_clause, unit_clause_ids, data)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(passage_id)
        .bind(&event.logical_id)
        .bind(event.primary_clause.map(i64::from))
        .bind(serde_json::to_string(&event.unit_clause_ids)?)
        .bind(serde_json::to_string(&event.data)?)
        .execute(&mut *tx)
        .await?;
        for role in &event.roles {
            sqlx::query(
                "INSERT INTO event_roles (event_id, role, participant_id, participant_logical_id)
                 VALUES (?, ?, ?, ?)",
            )
            .bind(&id)
            .bind(&role.role)
            .bind(&role.participant_id)
            .bind(&role.participant_logical_id)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(StoredEvent {
            id,
            passage_id: passage_id.to_string(),
            logical_id: event.logical_id,
            primary_clause: event.primary_clause,
            unit_clause_ids: event.unit_clause_ids,
            roles: event.roles,
            data: event.data,
        })
    }

    async fn create_discourse(
        &self,
        passage_id: &str,
        discourse: NewDiscourse,
    ) -> Result<StoredDiscourse, StoreError> {
        let id = new_id();
        sqlx::query(
            "INSERT INTO discourse (id, passage_id, source_id, target_id, relation_type)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(passage_id)
        .bind(&discourse.source_id)
        .bind(&discourse.target_id)
        .bind(&discourse.relation_type)
        .execute(&self.pool)
        .await?;
        Ok(StoredDiscourse {
            id,
            passage_id: passage_id.to_string(),
            source_id: discourse.source_id,
            target_id: discourse.target_id,
            relation_type: discourse.relation_type,
        })
    }

    async fn load_display_units(
        &self,
        passage_id: &str,
    ) -> Result<Option<Vec<DisplayUnit>>, StoreError> {
        let rows = sqlx::query(
            "SELECT clause_ids, merged FROM display_units WHERE passage_id = ? ORDER BY position ASC",
        )
        .bind(passage_id)
        .fetch_all(&self.pool)
        .await?;
        if rows.is_empty() {
            return Ok(None);
        }
        let units = rows
            .iter()
            .map(|row| {
                let ids: String = row.try_get("clause_ids")?;
                let merged: i64 = row.try_get("merged")?;
                Ok(DisplayUnit {
                    clause_ids: serde_json::from_str(&ids)?,
                    merged: merged != 0,
                })
            })
            .collect::<Result<Vec<_>, StoreError>>()?;
        Ok(Some(units))
    }

    async fn save_display_units(
        &self,
        passage_id: &str,
        units: &[DisplayUnit],
    ) -> Result<(), StoreError> {
        self.passage_exists(passage_id).await?;
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM display_units WHERE passage_id = ?")
            .bind(passage_id)
            .execute(&mut *tx)
            .await?;
        for (pos, unit) in units.iter().enumerate() {
            sqlx::query(
                "INSERT INTO display_units (passage_id, position, clause_ids, merged) VALUES (?, ?, ?, ?)",
            )
            .bind(passage_id)
            .bind(pos as i64)
            .bind(serde_json::to_string(&unit.clause_ids)?)
            .bind(unit.merged as i64)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{Event, Participant};

    fn clause(id: u32) -> Clause {
        Clause {
            clause_id: id,
            verse: 1,
            text: format!("c{id}"),
            gloss: format!("g{id}"),
            clause_type: "WayX".into(),
            lemma: Some("hlk".into()),
        }
    }

    async fn open_temp() -> (tempfile::TempDir, SqliteStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::open(dir.path().join("test.db")).await.unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn test_passage_and_clauses_persist() {
        let (_dir, store) = open_temp().await;
        let created = store
            .create_passage("Ruth 1:1-2", &[clause(1), clause(2)])
            .await
            .unwrap();
        let found = store.find_passage("Ruth 1:1-2").await.unwrap().unwrap();
        assert_eq!(found.id, created.id);
        assert_eq!(found.clauses, vec![clause(1), clause(2)]);
        assert!(store.find_passage("Ruth 2:1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_event_with_roles_roundtrip_and_phase2_delete() {
        let (_dir, store) = open_temp().await;
        let p = store.create_passage("Ruth 1:1", &[clause(1)]).await.unwrap();
        let naomi = store
            .create_participant(
                &p.id,
                NewParticipant {
                    logical_id: "p1".into(),
                    data: Participant {
                        gloss: Some("Naomi".into()),
                        ..Default::default()
                    },
                },
            )
            .await
            .unwrap();
        let event = store
            .create_event(
                &p.id,
                NewEvent {
                    logical_id: "e1".into(),
                    primary_clause: Some(1),
                    unit_clause_ids: vec![1],
                    roles: vec![ResolvedRole {
                        role: Some("agent".into()),
                        participant_id: naomi.id.clone(),
                        participant_logical_id: "p1".into(),
                    }],
                    data: Event {
                        event_core: Some("RETURN".into()),
                        ..Default::default()
                    },
                },
            )
            .await
            .unwrap();
        store
            .create_discourse(
                &p.id,
                NewDiscourse {
                    source_id: event.id.clone(),
                    target_id: event.id.clone(),
                    relation_type: Some("sequence".into()),
                },
            )
            .await
            .unwrap();

        let events = store.list_events(&p.id).await.unwrap();
        assert_eq!(events, vec![event]);
        assert_eq!(store.list_discourse(&p.id).await.unwrap().len(), 1);

        store.delete_phase2(&p.id).await.unwrap();
        assert!(store.list_events(&p.id).await.unwrap().is_empty());
        assert!(store.list_discourse(&p.id).await.unwrap().is_empty());
        assert_eq!(store.list_participants(&p.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_display_units_replace() {
        let (_dir, store) = open_temp().await;
        let p = store
            .create_passage("Ruth 1:1", &[clause(1), clause(2), clause(3)])
            .await
            .unwrap();
        store
            .save_display_units(&p.id, &[DisplayUnit::single(1), DisplayUnit::new(vec![2, 3])])
            .await
            .unwrap();
        store
            .save_display_units(&p.id, &[DisplayUnit::new(vec![1, 2, 3])])
            .await
            .unwrap();
        let units = store.load_display_units(&p.id).await.unwrap().unwrap();
        assert_eq!(units, vec![DisplayUnit::new(vec![1, 2, 3])]);
    }
}
