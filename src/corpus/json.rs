//! JSON 文件语料：子句记录数组（按书卷/章/节顺序排列）

use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::analysis::Clause;
use crate::corpus::{CorpusError, CorpusSource, CorpusStatus, PassageRef};

/// 语料中的一条子句记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CorpusRecord {
    pub book: String,
    pub chapter: u32,
    pub verse: u32,
    pub text: String,
    #[serde(default)]
    pub gloss: String,
    #[serde(default)]
    pub clause_type: String,
    #[serde(default)]
    pub lemma: Option<String>,
}

#[derive(Debug)]
struct LoadState {
    status: CorpusStatus,
    records: Arc<Vec<CorpusRecord>>,
}

pub struct JsonCorpus {
    path: Option<PathBuf>,
    state: RwLock<LoadState>,
}

impl JsonCorpus {
    /// 从文件加载（调用 load 或首次查询时读取）
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            state: RwLock::new(LoadState {
                status: CorpusStatus::Unloaded,
                records: Arc::new(Vec::new()),
            }),
        }
    }

    /// 直接使用内存记录（已加载）
    pub fn from_records(records: Vec<CorpusRecord>) -> Self {
        Self {
            path: None,
            state: RwLock::new(LoadState {
                status: CorpusStatus::Ready {
                    clauses: records.len(),
                },
                records: Arc::new(records),
            }),
        }
    }

    fn set_status(&self, status: CorpusStatus, records: Option<Vec<CorpusRecord>>) {
        if let Ok(mut s) = self.state.write() {
            s.status = status;
            if let Some(r) = records {
                s.records = Arc::new(r);
            }
        }
    }

    fn records(&self) -> Arc<Vec<CorpusRecord>> {
        self.state
            .read()
            .map(|s| s.records.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl CorpusSource for JsonCorpus {
    async fn load(&self) -> Result<(), CorpusError> {
        if self.is_loaded() {
            return Ok(());
        }
        let Some(path) = self.path.clone() else {
            return Err(CorpusError::LoadFailed("no corpus path configured".to_string()));
        };

        self.set_status(CorpusStatus::Loading, None);
        tracing::info!("Loading corpus from {}", path.display());

        let loaded = async {
            let data = tokio::fs::read_to_string(&path).await?;
            let records: Vec<CorpusRecord> = serde_json::from_str(&data)?;
            Ok::<_, CorpusError>(records)
        }
        .await;

        match loaded {
            Ok(records) => {
                tracing::info!("Corpus ready: {} clauses", records.len());
                self.set_status(
                    CorpusStatus::Ready {
                        clauses: records.len(),
                    },
                    Some(records),
                );
                Ok(())
            }
            Err(e) => {
                tracing::error!("Corpus load failed: {}", e);
                self.set_status(
                    CorpusStatus::Failed {
                        reason: e.to_string(),
                    },
                    None,
                );
                Err(e)
            }
        }
    }

    fn is_loaded(&self) -> bool {
        matches!(self.status(), CorpusStatus::Ready { .. })
    }

    fn status(&self) -> CorpusStatus {
        self.state
            .read()
            .map(|s| s.status.clone())
            .unwrap_or_else(|e| CorpusStatus::Failed {
                reason: e.to_string(),
            })
    }

    async fn clauses(&self, reference: &PassageRef) -> Result<Vec<Clause>, CorpusError> {
        if !self.is_loaded() {
            self.load().await?;
        }
        let records = self.records();
        Ok(records
            .iter()
            .filter(|r| reference.contains(&r.book, r.chapter, r.verse))
            .zip(1u32..)
            .map(|(r, clause_id)| Clause {
                clause_id,
                verse: r.verse,
                text: r.text.clone(),
                gloss: r.gloss.clone(),
                clause_type: r.clause_type.clone(),
                lemma: r.lemma.clone(),
            })
            .collect())
    }
}
