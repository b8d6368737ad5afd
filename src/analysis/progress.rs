//! 分析进度事件：供 SSE / NDJSON 等流式前端逐步展示
//!
//! 每写入一行都会推送一个事件，再尝试下一行；消费端放弃读取（通道关闭或令牌取消）时，
//! 流水线在下一个推送点停止，不再发起新的模型调用与写入。已提交的数据不回滚。

use std::pin::Pin;
use std::sync::Arc;

use futures_util::stream::{self, Stream};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::analysis::{AnalysisOptions, AnalysisSummary, Analyzer, SaveOutcome, SaveSummary};
use crate::core::{AnalysisError, PipelineState};

/// 进度事件类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStep {
    Start,
    Phase1Calling,
    Phase1Parsed,
    ParticipantSaved,
    RelationSaved,
    Phase1Complete,
    Grouping,
    GroupingResolved,
    Phase2Calling,
    Phase2Parsed,
    EventSaved,
    DiscourseSaved,
    Phase2Complete,
    /// 跳过的行（外键无法解析、解码失败等）
    Skipped,
    /// 非致命问题（如事件数与显示单元数不一致）
    Warning,
    Complete,
    Error,
}

/// 单条进度事件（可序列化为 JSON）
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressEvent {
    pub step: ProgressStep,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<usize>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<AnalysisSummary>,
}

impl ProgressEvent {
    pub fn new(step: ProgressStep, message: impl Into<String>) -> Self {
        Self {
            step,
            phase: None,
            current: None,
            total: None,
            message: message.into(),
            summary: None,
        }
    }

    pub fn in_state(mut self, state: PipelineState) -> Self {
        self.phase = state.phase_number();
        self
    }

    /// 分组在 GroupingResolved 之前发出，与其同属 Phase 2
    pub fn in_phase(mut self, phase: u8) -> Self {
        self.phase = Some(phase);
        self
    }

    pub fn counted(mut self, current: usize, total: usize) -> Self {
        self.current = Some(current);
        self.total = Some(total);
        self
    }

    pub fn complete(summary: AnalysisSummary) -> Self {
        let message = format!(
            "Analysis complete: {} participants, {} events",
            summary.participants.saved, summary.events.saved
        );
        Self {
            summary: Some(summary),
            ..Self::new(ProgressStep::Complete, message)
        }
    }

    pub fn error(err: &AnalysisError) -> Self {
        Self::new(ProgressStep::Error, err.to_string())
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.step, ProgressStep::Complete | ProgressStep::Error)
    }
}

/// 进度推送端：可选事件通道 + 取消令牌
#[derive(Debug, Clone, Default)]
pub struct Progress {
    tx: Option<mpsc::UnboundedSender<ProgressEvent>>,
    cancel: CancellationToken,
}

impl Progress {
    /// 不推送事件（非流式调用）
    pub fn silent() -> Self {
        Self::default()
    }

    pub fn new(tx: mpsc::UnboundedSender<ProgressEvent>, cancel: CancellationToken) -> Self {
        Self {
            tx: Some(tx),
            cancel,
        }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// 已取消时返回 Cancelled
    pub fn check(&self) -> Result<(), AnalysisError> {
        if self.cancel.is_cancelled() {
            Err(AnalysisError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// 推送事件；接收端已关闭视为取消
    pub fn emit(&self, event: ProgressEvent) -> Result<(), AnalysisError> {
        self.check()?;
        if let Some(tx) = &self.tx {
            if tx.send(event).is_err() {
                self.cancel.cancel();
                return Err(AnalysisError::Cancelled);
            }
        }
        Ok(())
    }
}

/// 逐行写入计数：每条记录保存或跳过后立即推送一个事件
pub(crate) struct SaveTally {
    label: &'static str,
    saved_step: ProgressStep,
    total: usize,
    summary: SaveSummary,
}

impl SaveTally {
    pub(crate) fn new(label: &'static str, saved_step: ProgressStep, total: usize) -> Self {
        Self {
            label,
            saved_step,
            total,
            summary: SaveSummary::default(),
        }
    }

    pub(crate) fn record(
        &mut self,
        outcome: &SaveOutcome,
        state: PipelineState,
        progress: &Progress,
    ) -> Result<(), AnalysisError> {
        self.summary.record(outcome);
        let current = self.summary.total();
        let event = match outcome {
            SaveOutcome::Saved { .. } => ProgressEvent::new(
                self.saved_step,
                format!("Saved {} {}/{}", self.label, current, self.total),
            ),
            SaveOutcome::Skipped { reason } => {
                tracing::warn!(
                    "Skipped {} {}/{}: {}",
                    self.label,
                    current,
                    self.total,
                    reason
                );
                ProgressEvent::new(
                    ProgressStep::Skipped,
                    format!("Skipped {} {}/{}: {}", self.label, current, self.total, reason),
                )
            }
        };
        progress.emit(event.in_state(state).counted(current, self.total))
    }

    pub(crate) fn finish(self) -> SaveSummary {
        self.summary
    }
}

/// 进度事件流；丢弃该流即取消对应的分析
pub type ProgressStream = Pin<Box<dyn Stream<Item = ProgressEvent> + Send>>;

impl Analyzer {
    /// 在后台任务中运行完整分析，返回进度事件流。
    /// 最后一个事件为 complete（携带汇总）或 error；消费端中途放弃时不会收到终止事件。
    pub fn run_full_analysis_stream(
        self: &Arc<Self>,
        reference: impl Into<String>,
        options: AnalysisOptions,
    ) -> ProgressStream {
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let progress = Progress::new(tx.clone(), cancel.clone());
        let analyzer = Arc::clone(self);
        let reference = reference.into();

        tokio::spawn(async move {
            let terminal = match analyzer
                .run_full_analysis(&reference, options, &progress)
                .await
            {
                Ok(summary) => ProgressEvent::complete(summary),
                Err(AnalysisError::Cancelled) => {
                    tracing::info!("Analysis of {} abandoned by consumer", reference);
                    return;
                }
                Err(e) => {
                    tracing::error!("Analysis of {} failed: {}", reference, e);
                    ProgressEvent::error(&e)
                }
            };
            let _ = tx.send(terminal);
        });

        let guard = cancel.drop_guard();
        Box::pin(stream::unfold((rx, guard), |(mut rx, guard)| async move {
            rx.recv().await.map(|ev| (ev, (rx, guard)))
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization_shape() {
        let ev = ProgressEvent::new(ProgressStep::ParticipantSaved, "Saved participant 3/7")
            .in_state(PipelineState::Phase1Running)
            .counted(3, 7);
        let v = serde_json::to_value(&ev).unwrap();
        assert_eq!(v["step"], "participant_saved");
        assert_eq!(v["phase"], 1);
        assert_eq!(v["current"], 3);
        assert_eq!(v["total"], 7);
        assert!(v.get("summary").is_none());
    }

    #[test]
    fn test_emit_after_receiver_dropped_cancels() {
        let (tx, rx) = mpsc::unbounded_channel();
        let progress = Progress::new(tx, CancellationToken::new());
        progress
            .emit(ProgressEvent::new(ProgressStep::Start, "start"))
            .unwrap();
        drop(rx);
        let err = progress
            .emit(ProgressEvent::new(ProgressStep::Grouping, "x"))
            .unwrap_err();
        assert!(matches!(err, AnalysisError::Cancelled));
        assert!(progress.token().is_cancelled());
    }

    #[test]
    fn test_tally_emits_one_event_per_row() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let progress = Progress::new(tx, CancellationToken::new());
        let mut tally = SaveTally::new("relation", ProgressStep::RelationSaved, 2);
        tally
            .record(
                &SaveOutcome::Saved { id: "r1".into() },
                PipelineState::Phase1Running,
                &progress,
            )
            .unwrap();
        tally
            .record(
                &SaveOutcome::skipped("unresolved endpoint p9"),
                PipelineState::Phase1Running,
                &progress,
            )
            .unwrap();

        let first = rx.try_recv().unwrap();
        assert_eq!(first.step, ProgressStep::RelationSaved);
        assert_eq!((first.current, first.total), (Some(1), Some(2)));
        let second = rx.try_recv().unwrap();
        assert_eq!(second.step, ProgressStep::Skipped);
        assert!(second.message.contains("p9"));

        let summary = tally.finish();
        assert_eq!((summary.saved, summary.skipped), (1, 1));
    }

    #[test]
    fn test_silent_progress_never_cancels() {
        let progress = Progress::silent();
        assert!(progress
            .emit(ProgressEvent::new(ProgressStep::Start, "x"))
            .is_ok());
    }
}
