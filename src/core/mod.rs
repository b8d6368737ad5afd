//! 核心层：错误类型与流水线状态机

pub mod error;
pub mod state;

pub use error::{AnalysisError, ErrorKind};
pub use state::{PipelineState, PipelineTracker};
