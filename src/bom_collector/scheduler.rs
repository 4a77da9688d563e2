// bom_collector - Bureau of Meteorology observation collector for InfluxDB
//
// Copyright 2022 Nick Pillitteri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.
//

use std::future::Future;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;

/// Runs a task immediately and then repeatedly at a fixed period.
///
/// Every tick starts a new instance of the task regardless of whether previous instances
/// have finished, so runs that take longer than the period will overlap. Ticks that are
/// missed while the runtime is busy are delayed rather than fired in a burst.
///
/// Stopping the scheduler prevents any new runs from starting and then waits for runs
/// that are already in progress to finish on their own.
#[derive(Debug)]
pub struct Scheduler {
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl Scheduler {
    /// Start running `task` every `period`, beginning now.
    ///
    /// # Panics
    ///
    /// If `period` is zero or this is called outside of a Tokio runtime.
    pub fn start<F, Fut>(period: Duration, task: F) -> Self
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (shutdown, rx) = oneshot::channel();
        let handle = tokio::spawn(drive(period, task, rx));
        Scheduler { shutdown, handle }
    }

    /// Stop starting new runs and wait for in progress runs to complete.
    pub async fn stop(self) {
        // The driver exits when the channel closes too, ignore it being gone already
        let _ = self.shutdown.send(());
        if let Err(e) = self.handle.await {
            tracing::error!(message = "scheduler exited abnormally", error = %e);
        }
    }
}

async fn drive<F, Fut>(period: Duration, task: F, mut shutdown: oneshot::Receiver<()>)
where
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut runs = JoinSet::new();

    tracing::info!(message = "scheduler started", period_secs = period.as_secs_f64());

    loop {
        tokio::select! {
            biased;

            _ = &mut shutdown => {
                break;
            }
            Some(res) = runs.join_next(), if !runs.is_empty() => {
                log_finished(res);
            }
            _ = interval.tick() => {
                runs.spawn(task());
                tracing::debug!(message = "started scheduled run", in_flight = runs.len());
            }
        }
    }

    tracing::info!(message = "scheduler stopping", in_flight = runs.len());
    while let Some(res) = runs.join_next().await {
        log_finished(res);
    }
    tracing::info!("scheduler stopped");
}

fn log_finished(res: Result<(), tokio::task::JoinError>) {
    if let Err(e) = res {
        tracing::error!(message = "scheduled run failed", error = %e);
    }
}

#[cfg(test)]
mod tests {
    use super::Scheduler;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_runs_immediately() {
        let count = Arc::new(AtomicUsize::new(0));
        let task_count = count.clone();

        let scheduler = Scheduler::start(Duration::from_secs(3600), move || {
            let count = task_count.clone();
            async move {
                count.fetch_add(1, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        scheduler.stop().await;
        assert_eq!(1, count.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_runs_repeatedly() {
        let count = Arc::new(AtomicUsize::new(0));
        let task_count = count.clone();

        let scheduler = Scheduler::start(Duration::from_millis(20), move || {
            let count = task_count.clone();
            async move {
                count.fetch_add(1, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_millis(150)).await;
        scheduler.stop().await;

        let runs = count.load(Ordering::SeqCst);
        assert!(runs >= 3, "expected at least 3 runs, got {}", runs);

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(runs, count.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_continues_after_panic() {
        let count = Arc::new(AtomicUsize::new(0));
        let task_count = count.clone();

        let scheduler = Scheduler::start(Duration::from_millis(20), move || {
            let count = task_count.clone();
            async move {
                if count.fetch_add(1, Ordering::SeqCst) == 0 {
                    panic!("first run fails");
                }
            }
        });

        tokio::time::sleep(Duration::from_millis(100)).await;
        scheduler.stop().await;
        assert!(count.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn test_runs_overlap() {
        let max_in_flight = Arc::new(AtomicUsize::new(0));
        let in_flight = Arc::new(AtomicUsize::new(0));
        let task_max = max_in_flight.clone();
        let task_in_flight = in_flight.clone();

        let scheduler = Scheduler::start(Duration::from_millis(10), move || {
            let max = task_max.clone();
            let current = task_in_flight.clone();
            async move {
                let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                max.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(100)).await;
                current.fetch_sub(1, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_millis(60)).await;
        scheduler.stop().await;

        assert!(max_in_flight.load(Ordering::SeqCst) > 1);
        assert_eq!(0, in_flight.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_stop_waits_for_in_flight() {
        let done = Arc::new(AtomicBool::new(false));
        let task_done = done.clone();

        let scheduler = Scheduler::start(Duration::from_secs(3600), move || {
            let done = task_done.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                done.store(true, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        scheduler.stop().await;
        assert!(done.load(Ordering::SeqCst));
    }
}
