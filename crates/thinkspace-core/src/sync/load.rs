use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};

/// Initial-load bookkeeping. A newer load aborts the older fetch, and only
/// the newest generation's result is applied.
#[derive(Debug, Default)]
pub struct LoadTracker {
    generation: u64,
    task: Option<JoinHandle<()>>,
    /// When `loading` is forced off. The fetch itself keeps running.
    deadline: Option<Instant>,
}

impl LoadTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new generation, aborting any fetch still in flight.
    pub fn begin(&mut self, timeout: Duration) -> u64 {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.generation += 1;
        self.deadline = Some(Instant::now() + timeout);
        self.generation
    }

    pub fn attach(&mut self, task: JoinHandle<()>) {
        self.task = Some(task);
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_current(&self, generation: u64) -> bool {
        generation == self.generation
    }

    /// The current fetch returned. Stale generations are rejected.
    pub fn finish(&mut self, generation: u64) -> bool {
        if !self.is_current(generation) {
            return false;
        }
        self.task = None;
        self.deadline = None;
        true
    }

    pub fn timed_out(&mut self) {
        self.deadline = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_new_load_supersedes_old() {
        let mut loads = LoadTracker::new();
        let first = loads.begin(Duration::from_secs(8));
        let slow = tokio::spawn(std::future::pending::<()>());
        let abort_probe = slow.abort_handle();
        loads.attach(slow);

        let second = loads.begin(Duration::from_secs(8));
        for _ in 0..10 {
            if abort_probe.is_finished() {
                break;
            }
            tokio::task::yield_now().await;
        }

        assert!(abort_probe.is_finished());
        assert!(!loads.finish(first));
        assert!(loads.finish(second));
        assert!(loads.deadline().is_none());
    }
}
