//! Progress reporting hook.
//!
//! The observer is invoked by the sequencer after each segment reaches the sink, never by
//! workers, so implementations see a strictly increasing `completed` count.

use crate::model::SegmentProgress;

/// Receives count-based progress updates.
pub trait ProgressObserver: Send + Sync {
    fn on_segment(&self, progress: SegmentProgress);
}

impl<F> ProgressObserver for F
where
    F: Fn(SegmentProgress) + Send + Sync,
{
    fn on_segment(&self, progress: SegmentProgress) {
        self(progress)
    }
}

/// Observer that ignores every update.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl ProgressObserver for NoopObserver {
    fn on_segment(&self, _progress: SegmentProgress) {}
}
