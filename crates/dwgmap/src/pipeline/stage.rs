use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::StageError;
use crate::pipeline::context::PipelineContext;
use crate::pipeline::progress::ProgressSink;

/// The three stages every job passes through, in this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    Convert,
    Package,
    Publish,
}

impl StageKind {
    pub const ALL: [StageKind; 3] = [StageKind::Convert, StageKind::Package, StageKind::Publish];

    pub fn as_str(&self) -> &'static str {
        match self {
            StageKind::Convert => "convert",
            StageKind::Package => "package",
            StageKind::Publish => "publish",
        }
    }

    /// Progress band `(start, end)` this stage owns within the 0-100 scale.
    pub fn band(&self) -> (u8, u8) {
        match self {
            StageKind::Convert => (0, 40),
            StageKind::Package => (40, 70),
            StageKind::Publish => (70, 100),
        }
    }

    /// Status line shown to clients when the stage starts.
    pub fn start_message(&self) -> &'static str {
        match self {
            StageKind::Convert => "Converting DWG to DXF",
            StageKind::Package => "Packaging DXF into GeoPackage",
            StageKind::Publish => "Publishing layer to the map service",
        }
    }
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One pipeline stage. Implementations read their input from the context,
/// do the work synchronously, and write their products back into it.
pub trait StageAdapter: Send + Sync {
    fn kind(&self) -> StageKind;

    fn execute(
        &self,
        ctx: &mut PipelineContext,
        progress: &dyn ProgressSink,
    ) -> Result<(), StageError>;
}

/// Cooperative cancellation flag, checked at stage boundaries only; a stage
/// already running is never interrupted mid-flight.
#[derive(Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bands_cover_full_scale() {
        assert_eq!(StageKind::Convert.band(), (0, 40));
        assert_eq!(StageKind::Package.band(), (40, 70));
        assert_eq!(StageKind::Publish.band(), (70, 100));
        for pair in StageKind::ALL.windows(2) {
            assert_eq!(pair[0].band().1, pair[1].band().0);
        }
    }

    #[test]
    fn test_cancel_token() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn test_stage_kind_serializes_snake_case() {
        assert_eq!(serde_json::to_string(&StageKind::Convert).unwrap(), "\"convert\"");
    }
}
