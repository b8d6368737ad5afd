//! 持久化层：按章节（Passage）组织的记录存储
//!
//! - **memory**: 进程内实现（测试与临时运行）
//! - **sqlite**: sqlx 异步 SQLite 实现（需 `sqlite` feature，默认开启）

pub mod memory;
#[cfg(feature = "sqlite")]
pub mod sqlite;

use async_trait::async_trait;
use thiserror::Error;

use crate::analysis::{
    Clause, DisplayUnit, NewDiscourse, NewEvent, NewParticipant, NewRelation, Passage, StorageId,
    StoredDiscourse, StoredEvent, StoredParticipant, StoredRelation,
};

pub use memory::InMemoryStore;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Passage {0} does not exist")]
    UnknownPassage(StorageId),

    #[error("Record {0} does not exist")]
    UnknownRecord(StorageId),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[cfg(feature = "sqlite")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// 存储接口：章节 / 子句读取，各阶段实体的批量写入与整体删除，显示单元读写
#[async_trait]
pub trait Store: Send + Sync {
    async fn find_passage(&self, reference: &str) -> Result<Option<Passage>, StoreError>;

    async fn create_passage(
        &self,
        reference: &str,
        clauses: &[Clause],
    ) -> Result<Passage, StoreError>;

    async fn list_participants(
        &self,
        passage_id: &str,
    ) -> Result<Vec<StoredParticipant>, StoreError>;

    async fn list_relations(&self, passage_id: &str) -> Result<Vec<StoredRelation>, StoreError>;

    /// 删除章节下全部参与者与参与者关系
    async fn delete_phase1(&self, passage_id: &str) -> Result<(), StoreError>;

    async fn create_participant(
        &self,
        passage_id: &str,
        participant: NewParticipant,
    ) -> Result<StoredParticipant, StoreError>;

    async fn create_relation(
        &self,
        passage_id: &str,
        relation: NewRelation,
    ) -> Result<StoredRelation, StoreError>;

    async fn list_events(&self, passage_id: &str) -> Result<Vec<StoredEvent>, StoreError>;

    async fn list_discourse(&self, passage_id: &str) -> Result<Vec<StoredDiscourse>, StoreError>;

    /// 删除章节下全部事件（含子结构）与话语关系
    async fn delete_phase2(&self, passage_id: &str) -> Result<(), StoreError>;

    /// 事件与其角色等子结构一并原子写入
    async fn create_event(
        &self,
        passage_id: &str,
        event: NewEvent,
    ) -> Result<StoredEvent, StoreError>;

    async fn create_discourse(
        &self,
        passage_id: &str,
        discourse: NewDiscourse,
    ) -> Result<StoredDiscourse, StoreError>;

    async fn load_display_units(
        &self,
        passage_id: &str,
    ) -> Result<Option<Vec<DisplayUnit>>, StoreError>;

    /// 整体替换章节的显示单元
    async fn save_display_units(
        &self,
        passage_id: &str,
        units: &[DisplayUnit],
    ) -> Result<(), StoreError>;
}
