//! 分析编排器：Phase 1 -> 分组 -> Phase 2
//!
//! 每次运行持有一个 PipelineTracker 记录状态；Phase 1 的逻辑 ID 映射完整建立后才开始构造 Phase 2 上下文。
//! 单次运行内无并发，多个章节可由独立的调用并行分析。

use std::sync::Arc;

use serde_json::Value;

use crate::analysis::{
    repair_parse, AnalysisSummary, DefaultPrompts, Passage, Phase1Result, Phase2Result, Progress,
    ProgressEvent, ProgressStep, PromptBuilder, StoredParticipant, TokenUsageSummary,
};
use crate::config::{AppConfig, PhaseOptions};
use crate::core::{AnalysisError, PipelineState, PipelineTracker};
use crate::corpus::{CorpusSource, PassageRef};
use crate::llm::{
    CompletionOptions, LlmClient, LlmError, MockLlmClient, OpenAiClient, RetryConfig,
    RetryingLlmClient,
};
use crate::store::Store;

/// 单次分析的选项
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AnalysisOptions {
    /// 忽略已存的显示单元，重新请求分组建议
    pub force_regroup: bool,
}

impl AnalysisOptions {
    pub fn force_regroup() -> Self {
        Self {
            force_regroup: true,
        }
    }
}

/// 根据配置创建 LLM 客户端；openai 未配置 Key 时返回 None（首次调用时报 NoApiKey）
pub fn create_llm_from_config(cfg: &AppConfig) -> Result<Option<Arc<dyn LlmClient>>, AnalysisError> {
    match cfg.llm.provider.to_lowercase().as_str() {
        "mock" => {
            tracing::warn!("Using Mock LLM (provider = mock)");
            Ok(Some(Arc::new(MockLlmClient::new())))
        }
        "openai" => match cfg.llm.api_key() {
            Some(key) => {
                tracing::info!("Using OpenAI-compatible LLM ({})", cfg.llm.model);
                let client = OpenAiClient::new(cfg.llm.base_url.as_deref(), &cfg.llm.model, &key)
                    .with_request_timeout(std::time::Duration::from_secs(
                        cfg.llm.timeouts.request,
                    ));
                Ok(Some(Arc::new(client)))
            }
            None => {
                tracing::warn!(
                    "{} is not set; analysis calls will fail with NoApiKey",
                    cfg.llm.api_key_env
                );
                Ok(None)
            }
        },
        other => Err(AnalysisError::Config(format!(
            "unknown llm provider: {}",
            other
        ))),
    }
}

/// Phase Orchestrator
pub struct Analyzer {
    llm: Option<Arc<RetryingLlmClient>>,
    pub(crate) store: Arc<dyn Store>,
    corpus: Arc<dyn CorpusSource>,
    pub(crate) prompts: Arc<dyn PromptBuilder>,
    pub(crate) options: PhaseOptions,
}

impl Analyzer {
    pub fn new(
        llm: Option<Arc<dyn LlmClient>>,
        retry: RetryConfig,
        store: Arc<dyn Store>,
        corpus: Arc<dyn CorpusSource>,
    ) -> Self {
        Self {
            llm: llm.map(|inner| Arc::new(RetryingLlmClient::new(inner, retry))),
            store,
            corpus,
            prompts: Arc::new(DefaultPrompts::default()),
            options: PhaseOptions::default(),
        }
    }

    pub fn from_config(
        cfg: &AppConfig,
        store: Arc<dyn Store>,
        corpus: Arc<dyn CorpusSource>,
    ) -> Result<Self, AnalysisError> {
        let llm = create_llm_from_config(cfg)?;
        Ok(Self::new(llm, cfg.analysis.retry_config(), store, corpus)
            .with_prompts(Arc::new(DefaultPrompts::new(
                cfg.analysis.prompts_dir.clone(),
            )))
            .with_options(cfg.phase_options()))
    }

    pub fn with_prompts(mut self, prompts: Arc<dyn PromptBuilder>) -> Self {
        self.prompts = prompts;
        self
    }

    pub fn with_options(mut self, options: PhaseOptions) -> Self {
        self.options = options;
        self
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// 累计 token 用量 (prompt, completion, total)
    pub fn token_usage(&self) -> (u64, u64, u64) {
        self.llm
            .as_ref()
            .map(|llm| llm.token_usage())
            .unwrap_or_default()
    }

    pub(crate) fn require_llm(&self) -> Result<&RetryingLlmClient, AnalysisError> {
        self.llm.as_deref().ok_or(AnalysisError::NoApiKey)
    }

    /// 调用模型并修复解析；重试耗尽或取消时返回相应错误
    pub(crate) async fn call_model(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        options: &CompletionOptions,
        progress: &Progress,
    ) -> Result<Value, AnalysisError> {
        let llm = self.require_llm()?;
        let raw = llm
            .invoke(system_prompt, user_prompt, options, progress.token())
            .await
            .map_err(model_error)?;
        progress.check()?;
        repair_parse(&raw)
    }

    /// 解析引用并取得章节；库中没有时从语料抽取子句并建档
    pub async fn resolve_passage(&self, reference: &str) -> Result<Passage, AnalysisError> {
        let parsed = PassageRef::parse(reference)
            .map_err(|_| AnalysisError::InvalidReference(reference.to_string()))?;
        let normalized = parsed.to_string();

        if let Some(passage) = self.store.find_passage(&normalized).await? {
            return Ok(passage);
        }

        let clauses = self.corpus.clauses(&parsed).await?;
        if clauses.is_empty() {
            return Err(AnalysisError::PassageNotFound(normalized));
        }
        tracing::info!(
            "Materializing passage {} ({} clauses)",
            normalized,
            clauses.len()
        );
        Ok(self.store.create_passage(&normalized, &clauses).await?)
    }

    /// Phase 1：参与者与关系（整体替换该章节已有的 Phase 1 结果）
    pub async fn run_phase1(&self, reference: &str) -> Result<Phase1Result, AnalysisError> {
        self.require_llm()?;
        let passage = self.resolve_passage(reference).await?;
        let mut tracker = PipelineTracker::new();
        let result: Result<_, AnalysisError> = async {
            let result = self.phase1(&passage, &mut tracker, &Progress::silent()).await?;
            tracker.advance(PipelineState::Complete)?;
            Ok(result)
        }
        .await;
        if result.is_err() {
            tracker.fail();
        }
        result
    }

    pub async fn run_phase2(&self, reference: &str) -> Result<Phase2Result, AnalysisError> {
        self.run_phase2_with(reference, AnalysisOptions::default())
            .await
    }

    /// Phase 2：事件与话语关系；尚无参与者时先自动运行 Phase 1
    pub async fn run_phase2_with(
        &self,
        reference: &str,
        options: AnalysisOptions,
    ) -> Result<Phase2Result, AnalysisError> {
        self.require_llm()?;
        let passage = self.resolve_passage(reference).await?;
        let progress = Progress::silent();
        let mut tracker = PipelineTracker::new();
        let result: Result<_, AnalysisError> = async {
            let participants = self
                .ensure_participants(&passage, &mut tracker, &progress)
                .await?;
            let grouping = self
                .resolve_display_units(&passage, options.force_regroup, &mut tracker, &progress)
                .await?;
            let result = self
                .phase2(&passage, &participants, grouping, &mut tracker, &progress)
                .await?;
            tracker.advance(PipelineState::Complete)?;
            Ok(result)
        }
        .await;
        if result.is_err() {
            tracker.fail();
        }
        result
    }

    /// 完整分析：每一步经 progress 推送；返回汇总
    pub async fn run_full_analysis(
        &self,
        reference: &str,
        options: AnalysisOptions,
        progress: &Progress,
    ) -> Result<AnalysisSummary, AnalysisError> {
        self.require_llm()?;
        let usage_before = self.token_usage();
        let passage = self.resolve_passage(reference).await?;
        let mut tracker = PipelineTracker::new();

        progress.emit(ProgressEvent::new(
            ProgressStep::Start,
            format!(
                "Analyzing {} ({} clauses)",
                passage.reference,
                passage.clauses.len()
            ),
        ))?;

        let result: Result<_, AnalysisError> = async {
            let p1 = self.phase1(&passage, &mut tracker, progress).await?;
            if p1.participants.is_empty() {
                return Err(AnalysisError::NoParticipants(passage.reference.clone()));
            }
            let grouping = self
                .resolve_display_units(&passage, options.force_regroup, &mut tracker, progress)
                .await?;
            let p2 = self
                .phase2(&passage, &p1.participants, grouping, &mut tracker, progress)
                .await?;
            tracker.advance(PipelineState::Complete)?;
            Ok((p1, p2))
        }
        .await;

        let (p1, p2) = match result {
            Ok(done) => done,
            Err(e) => {
                tracker.fail();
                return Err(e);
            }
        };

        let summary = AnalysisSummary {
            reference: passage.reference.clone(),
            passage_id: passage.id.clone(),
            participants: p1.participant_summary,
            relations: p1.relation_summary,
            events: p2.event_summary,
            discourse: p2.discourse_summary,
            dropped_roles: p2.dropped_roles,
            display_units: p2.grouping.units.len(),
            grouping: p2.grouping.source,
            warnings: p2.warnings,
            token_usage: TokenUsageSummary::delta(usage_before, self.token_usage()),
        };
        tracing::info!(
            "Analysis of {} complete: {} participants, {} relations, {} events, {} discourse",
            summary.reference,
            summary.participants.saved,
            summary.relations.saved,
            summary.events.saved,
            summary.discourse.saved
        );
        Ok(summary)
    }

    /// 取已存参与者；没有时自动运行 Phase 1，仍为空则 NoParticipants
    async fn ensure_participants(
        &self,
        passage: &Passage,
        tracker: &mut PipelineTracker,
        progress: &Progress,
    ) -> Result<Vec<StoredParticipant>, AnalysisError> {
        let existing = self.store.list_participants(&passage.id).await?;
        if !existing.is_empty() {
            tracker.advance(PipelineState::Phase1Saved)?;
            return Ok(existing);
        }

        tracing::info!(
            "No participants for {}, running phase 1 first",
            passage.reference
        );
        match self.phase1(passage, tracker, progress).await {
            Ok(result) if !result.participants.is_empty() => Ok(result.participants),
            Ok(_) => Err(AnalysisError::NoParticipants(passage.reference.clone())),
            Err(AnalysisError::Cancelled) => Err(AnalysisError::Cancelled),
            Err(e) => {
                tracing::warn!("Automatic phase 1 for {} failed: {}", passage.reference, e);
                Err(AnalysisError::NoParticipants(passage.reference.clone()))
            }
        }
    }
}

fn model_error(e: LlmError) -> AnalysisError {
    match e {
        LlmError::Cancelled => AnalysisError::Cancelled,
        other => AnalysisError::ModelCall(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::{CorpusRecord, JsonCorpus};
    use crate::store::InMemoryStore;

    fn corpus() -> Arc<JsonCorpus> {
        Arc::new(JsonCorpus::from_records(vec![CorpusRecord {
            book: "Ruth".into(),
            chapter: 1,
            verse: 1,
            text: "wayhi".into(),
            gloss: "and it was".into(),
            clause_type: "Way0".into(),
            lemma: None,
        }]))
    }

    fn analyzer(llm: Option<Arc<dyn LlmClient>>) -> Analyzer {
        Analyzer::new(
            llm,
            RetryConfig::default(),
            Arc::new(InMemoryStore::new()),
            corpus(),
        )
    }

    #[tokio::test]
    async fn test_no_api_key_checked_first() {
        let a = analyzer(None);
        assert!(matches!(
            a.run_phase1("not a reference").await,
            Err(AnalysisError::NoApiKey)
        ));
        assert!(matches!(
            a.run_phase2("Ruth 1:1").await,
            Err(AnalysisError::NoApiKey)
        ));
    }

    #[tokio::test]
    async fn test_resolve_passage_materializes_once() {
        let a = analyzer(Some(Arc::new(MockLlmClient::new())));
        let first = a.resolve_passage("ruth 1:1").await.unwrap();
        assert_eq!(first.reference, "Ruth 1:1");
        assert_eq!(first.clauses.len(), 1);
        let again = a.resolve_passage("Ruth 1:1").await.unwrap();
        assert_eq!(again.id, first.id);
    }

    #[tokio::test]
    async fn test_resolve_passage_errors() {
        let a = analyzer(Some(Arc::new(MockLlmClient::new())));
        assert!(matches!(
            a.resolve_passage("Ruth").await,
            Err(AnalysisError::InvalidReference(_))
        ));
        assert!(matches!(
            a.resolve_passage("Ruth 4:1").await,
            Err(AnalysisError::PassageNotFound(_))
        ));
    }

    #[test]
    fn test_create_llm_from_config() {
        let mut cfg = AppConfig::default();
        cfg.llm.provider = "mock".into();
        assert!(create_llm_from_config(&cfg).unwrap().is_some());

        cfg.llm.provider = "openai".into();
        cfg.llm.api_key_env = "PERICOPE_TEST_UNSET_KEY_VAR".into();
        assert!(create_llm_from_config(&cfg).unwrap().is_none());

        cfg.llm.provider = "carrier-pigeon".into();
        assert!(matches!(
            create_llm_from_config(&cfg),
            Err(AnalysisError::Config(_))
        ));
    }

    #[test]
    fn test_cancelled_model_error_maps_to_cancelled() {
        assert!(matches!(
            model_error(LlmError::Cancelled),
            AnalysisError::Cancelled
        ));
        assert!(matches!(
            model_error(LlmError::Overloaded("x".into())),
            AnalysisError::ModelCall(_)
        ));
    }
}
