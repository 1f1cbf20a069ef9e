use std::sync::atomic::{AtomicU32, Ordering};

/// Per-model query counters, bumped through `&self`.
#[derive(Debug, Default)]
pub struct CmStats {
    traces: AtomicU32,
    brush_traces: AtomicU32,
    point_contents: AtomicU32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CmStatsSnapshot {
    pub traces: u32,
    pub brush_traces: u32,
    pub point_contents: u32,
}

impl CmStats {
    #[inline]
    pub(crate) fn count_trace(&self) {
        self.traces.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn count_brush_trace(&self) {
        self.brush_traces.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn count_point_contents(&self) {
        self.point_contents.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CmStatsSnapshot {
        CmStatsSnapshot {
            traces: self.traces.load(Ordering::Relaxed),
            brush_traces: self.brush_traces.load(Ordering::Relaxed),
            point_contents: self.point_contents.load(Ordering::Relaxed),
        }
    }

    pub fn reset(&self) {
        self.traces.store(0, Ordering::Relaxed);
        self.brush_traces.store(0, Ordering::Relaxed);
        self.point_contents.store(0, Ordering::Relaxed);
    }
}
