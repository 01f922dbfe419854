//! Periodic execution of batch jobs.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, info};
use tokio::time::{self, MissedTickBehavior};

/// A job invoked on a fixed period with the current time
#[async_trait]
pub trait ScheduledJob: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self, now: DateTime<Utc>);
}

/// Run `job` every `period`, forever.
///
/// Each run is awaited before the next tick, so runs never overlap; ticks
/// missed while a run is in progress are skipped.
pub async fn run_every(job: Arc<dyn ScheduledJob>, period: Duration) {
    info!("Scheduling {} every {:?}", job.name(), period);

    let mut interval = time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        interval.tick().await;
        debug!("Running {}", job.name());
        job.run(Utc::now()).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingJob {
        runs: AtomicUsize,
        running: AtomicUsize,
        overlapped: AtomicUsize,
    }

    #[async_trait]
    impl ScheduledJob for CountingJob {
        fn name(&self) -> &str {
            "counting"
        }

        async fn run(&self, _now: DateTime<Utc>) {
            if self.running.fetch_add(1, Ordering::SeqCst) > 0 {
                self.overlapped.fetch_add(1, Ordering::SeqCst);
            }
            time::sleep(Duration::from_millis(15)).await;
            self.running.fetch_sub(1, Ordering::SeqCst);
            self.runs.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_runs_repeatedly_without_overlap() {
        let job = Arc::new(CountingJob {
            runs: AtomicUsize::new(0),
            running: AtomicUsize::new(0),
            overlapped: AtomicUsize::new(0),
        });

        let handle = tokio::spawn(run_every(job.clone(), Duration::from_millis(5)));
        time::sleep(Duration::from_millis(120)).await;
        handle.abort();

        assert!(job.runs.load(Ordering::SeqCst) >= 2);
        assert_eq!(job.overlapped.load(Ordering::SeqCst), 0);
    }
}
