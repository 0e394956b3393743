use std::sync::{Arc, Mutex};

/// Write-only view of the task entity that owns a run's progress counters and
/// log. The pipeline pushes totals, increments and log lines through this and
/// never reads task state back.
pub trait ProgressSink: Send + Sync {
    fn set_total(&self, total: u64);
    fn add_progress(&self, amount: u64);
    fn log(&self, line: &str);
}

/// Sink for runs nobody is watching (tests, ad-hoc invocations).
pub struct NullSink;

impl ProgressSink for NullSink {
    fn set_total(&self, _total: u64) {}
    fn add_progress(&self, _amount: u64) {}
    fn log(&self, _line: &str) {}
}

/// Coalesces per-item progress ticks so the sink sees one write per
/// `flush_every` completions instead of one per item. `flush` drains whatever
/// did not reach the interval; phases call it once at the end.
pub struct ProgressBatcher {
    sink: Arc<dyn ProgressSink>,
    flush_every: u64,
    pending: Mutex<u64>,
}

impl ProgressBatcher {
    pub fn new(sink: Arc<dyn ProgressSink>, flush_every: u64) -> Self {
        Self {
            sink,
            flush_every: flush_every.max(1),
            pending: Mutex::new(0),
        }
    }

    pub fn tick(&self) {
        let drained = {
            let mut pending = self.pending.lock().expect("progress batcher poisoned");
            *pending += 1;
            if *pending >= self.flush_every {
                std::mem::take(&mut *pending)
            } else {
                0
            }
        };
        if drained > 0 {
            self.sink.add_progress(drained);
        }
    }

    pub fn flush(&self) {
        let drained = {
            let mut pending = self.pending.lock().expect("progress batcher poisoned");
            std::mem::take(&mut *pending)
        };
        if drained > 0 {
            self.sink.add_progress(drained);
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testsink::RecordingSink;
    use super::*;

    #[test]
    fn increments_are_coalesced_into_interval_flushes() {
        let sink = Arc::new(RecordingSink::default());
        let batcher = ProgressBatcher::new(sink.clone(), 4);

        for _ in 0..10 {
            batcher.tick();
        }
        batcher.flush();

        let increments = sink.increments.lock().expect("sink").clone();
        assert_eq!(increments, vec![4, 4, 2]);
        assert_eq!(sink.current(), 10);
    }

    #[test]
    fn flush_with_nothing_pending_writes_nothing() {
        let sink = Arc::new(RecordingSink::default());
        let batcher = ProgressBatcher::new(sink.clone(), 4);
        batcher.flush();
        assert!(sink.increments.lock().expect("sink").is_empty());
    }
}
