//! 流水线状态机
//!
//! Init -> Phase1Running -> Phase1Saved -> GroupingResolved -> Phase2Running -> Phase2Saved -> Complete；
//! 任一 Running 阶段可进入 Error。单独运行 Phase 2 时从 Init 经 Phase1Saved（已有参与者）进入分组。

use serde::Serialize;

use crate::core::AnalysisError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Init,
    Phase1Running,
    Phase1Saved,
    GroupingResolved,
    Phase2Running,
    Phase2Saved,
    Complete,
    Error,
}

impl PipelineState {
    /// 进度事件中的阶段号（1 / 2），Init / Complete / Error 无阶段
    pub fn phase_number(self) -> Option<u8> {
        match self {
            PipelineState::Phase1Running | PipelineState::Phase1Saved => Some(1),
            PipelineState::GroupingResolved
            | PipelineState::Phase2Running
            | PipelineState::Phase2Saved => Some(2),
            _ => None,
        }
    }

    pub fn is_running(self) -> bool {
        matches!(
            self,
            PipelineState::Phase1Running
                | PipelineState::Phase1Saved
                | PipelineState::GroupingResolved
                | PipelineState::Phase2Running
                | PipelineState::Phase2Saved
        )
    }

    pub fn can_transition_to(self, next: PipelineState) -> bool {
        use PipelineState::*;
        match (self, next) {
            (Init, Phase1Running) => true,
            // 已有 Phase 1 结果时直接复用
            (Init, Phase1Saved) => true,
            (Phase1Running, Phase1Saved) => true,
            (Phase1Saved, GroupingResolved) => true,
            (Phase1Saved, Complete) => true,
            (GroupingResolved, Phase2Running) => true,
            (Phase2Running, Phase2Saved) => true,
            (Phase2Saved, Complete) => true,
            (from, Error) => from.is_running(),
            _ => false,
        }
    }
}

/// 单次运行的状态跟踪
#[derive(Debug)]
pub struct PipelineTracker {
    state: PipelineState,
}

impl Default for PipelineTracker {
    fn default() -> Self {
        Self {
            state: PipelineState::Init,
        }
    }
}

impl PipelineTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn advance(&mut self, next: PipelineState) -> Result<(), AnalysisError> {
        if !self.state.can_transition_to(next) {
            return Err(AnalysisError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        tracing::debug!("pipeline {:?} -> {:?}", self.state, next);
        self.state = next;
        Ok(())
    }

    /// 进入 Error；已处于终态时保持不变
    pub fn fail(&mut self) {
        if self.state.can_transition_to(PipelineState::Error) {
            self.state = PipelineState::Error;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_happy_path() {
        let mut t = PipelineTracker::new();
        for next in [
            PipelineState::Phase1Running,
            PipelineState::Phase1Saved,
            PipelineState::GroupingResolved,
            PipelineState::Phase2Running,
            PipelineState::Phase2Saved,
            PipelineState::Complete,
        ] {
            t.advance(next).unwrap();
        }
        assert_eq!(t.state(), PipelineState::Complete);
    }

    #[test]
    fn test_cannot_skip_grouping() {
        let mut t = PipelineTracker::new();
        t.advance(PipelineState::Phase1Running).unwrap();
        t.advance(PipelineState::Phase1Saved).unwrap();
        let err = t.advance(PipelineState::Phase2Running).unwrap_err();
        assert!(matches!(err, AnalysisError::InvalidTransition { .. }));
        assert_eq!(t.state(), PipelineState::Phase1Saved);
    }

    #[test]
    fn test_error_only_from_running() {
        let mut t = PipelineTracker::new();
        t.fail();
        assert_eq!(t.state(), PipelineState::Init);
        t.advance(PipelineState::Phase1Running).unwrap();
        t.fail();
        assert_eq!(t.state(), PipelineState::Error);
    }

    #[test]
    fn test_phase_numbers() {
        assert_eq!(PipelineState::Phase1Running.phase_number(), Some(1));
        assert_eq!(PipelineState::Phase2Saved.phase_number(), Some(2));
        assert_eq!(PipelineState::Complete.phase_number(), None);
    }
}
