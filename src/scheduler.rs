//! Per-feed recurring poll triggers.
//!
//! Every watched feed gets one background task that ticks at the feed's
//! refresh interval and runs the pipeline. A shared semaphore caps how many
//! polls run at the same time across all feeds.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::{mpsc, Mutex, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::config::SchedulerConfig;
use crate::pipeline::{PollOutcome, PollRunner};
use crate::registry::FeedRegistry;
use crate::Result;

/// Message types for job tasks.
enum JobMessage {
    Stop,
}

struct Job {
    interval: Duration,
    sender: mpsc::Sender<JobMessage>,
    task: JoinHandle<()>,
}

impl Job {
    /// Ask the task to stop after any run in progress.
    fn stop(&self) {
        // A full or closed channel means the task is already going away.
        let _ = self.sender.try_send(JobMessage::Stop);
    }
}

/// Owner of all poll triggers.
pub struct Scheduler {
    runner: Arc<dyn PollRunner>,
    permits: Arc<Semaphore>,
    jobs: Mutex<HashMap<String, Job>>,
}

impl Scheduler {
    pub fn new(runner: Arc<dyn PollRunner>, config: &SchedulerConfig) -> Self {
        Self {
            runner,
            permits: Arc::new(Semaphore::new(config.max_concurrent_polls.max(1))),
            jobs: Mutex::new(HashMap::new()),
        }
    }

    /// Create or replace the trigger of a feed.
    ///
    /// The first poll happens after one full interval, or right away when
    /// `run_now` is set.
    pub async fn schedule(&self, feed_id: &str, interval: Duration, run_now: bool) {
        let interval = interval.max(Duration::from_secs(1));
        let job = self.spawn_job(feed_id.to_string(), interval, run_now);

        let previous = self.jobs.lock().await.insert(feed_id.to_string(), job);
        match previous {
            Some(old) => {
                old.stop();
                info!("Rescheduled feed {} every {:?}", feed_id, interval);
            }
            None => info!("Scheduled feed {} every {:?}", feed_id, interval),
        }
    }

    /// Cancel the trigger of a feed. Does nothing if there is none.
    ///
    /// A poll already running for the feed is allowed to finish.
    pub async fn unschedule(&self, feed_id: &str) -> bool {
        match self.jobs.lock().await.remove(feed_id) {
            Some(job) => {
                job.stop();
                info!("Unscheduled feed {}", feed_id);
                true
            }
            None => false,
        }
    }

    /// Make the triggers match the registry.
    ///
    /// Every registered feed ends up with exactly one trigger at its persisted
    /// interval; triggers of unknown feeds are cancelled. Returns the number
    /// of triggers created or replaced.
    pub async fn reconcile(&self, registry: &dyn FeedRegistry) -> Result<usize> {
        let definitions = registry.list().await?;

        let mut changed = 0;
        for definition in &definitions {
            let interval = Duration::from_secs(definition.refresh_interval_secs);
            if self.interval_of(&definition.id).await == Some(interval) {
                continue;
            }
            self.schedule(&definition.id, interval, false).await;
            changed += 1;
        }

        let stale: Vec<String> = {
            let jobs = self.jobs.lock().await;
            jobs.keys()
                .filter(|id| !definitions.iter().any(|d| &d.id == *id))
                .cloned()
                .collect()
        };
        for id in stale {
            self.unschedule(&id).await;
        }

        info!(
            "Reconciled {} feeds ({} triggers created)",
            definitions.len(),
            changed
        );
        Ok(changed)
    }

    /// Whether the feed has an active trigger.
    pub async fn is_scheduled(&self, feed_id: &str) -> bool {
        self.jobs.lock().await.contains_key(feed_id)
    }

    /// Interval of the feed's trigger.
    pub async fn interval_of(&self, feed_id: &str) -> Option<Duration> {
        self.jobs.lock().await.get(feed_id).map(|job| job.interval)
    }

    /// Number of active triggers.
    pub async fn job_count(&self) -> usize {
        self.jobs.lock().await.len()
    }

    /// Cancel every trigger and wait for running polls to finish.
    pub async fn shutdown(&self) {
        let jobs: Vec<Job> = self.jobs.lock().await.drain().map(|(_, job)| job).collect();
        if jobs.is_empty() {
            return;
        }

        info!("Stopping {} feed triggers", jobs.len());
        for job in &jobs {
            job.stop();
        }
        for result in join_all(jobs.into_iter().map(|job| job.task)).await {
            if let Err(e) = result {
                warn!("Feed trigger ended abnormally: {}", e);
            }
        }
    }

    fn spawn_job(&self, feed_id: String, interval: Duration, run_now: bool) -> Job {
        let (sender, mut receiver) = mpsc::channel(1);
        let runner = self.runner.clone();
        let permits = self.permits.clone();

        let task = tokio::spawn(async move {
            let mut timer = tokio::time::interval(interval);
            timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

            // The first tick completes immediately
            if !run_now {
                timer.tick().await;
            }

            loop {
                tokio::select! {
                    _ = timer.tick() => {
                        // Waiting for a free slot must not hold off a stop.
                        let permit = tokio::select! {
                            permit = permits.acquire() => permit.ok(),
                            _ = receiver.recv() => None,
                        };
                        let Some(_permit) = permit else {
                            break;
                        };
                        run_once(runner.as_ref(), &feed_id).await;
                    }
                    msg = receiver.recv() => {
                        match msg {
                            Some(JobMessage::Stop) | None => break,
                        }
                    }
                }
            }
            debug!("Trigger for feed {} stopped", feed_id);
        });

        Job {
            interval,
            sender,
            task,
        }
    }
}

async fn run_once(runner: &dyn PollRunner, feed_id: &str) {
    match runner.run(feed_id).await {
        Ok(PollOutcome::Completed(report)) => {
            if report.new_items > 0 {
                info!(
                    "Feed {}: {} new items, {} notified, {} failed",
                    feed_id, report.new_items, report.notified, report.failed
                );
            }
        }
        Ok(PollOutcome::Aborted { stage, reason }) => {
            debug!("Poll of feed {} aborted at {}: {}", feed_id, stage, reason);
        }
        // The trigger stays; the next tick tries again.
        Err(e) => error!("Poll of feed {} failed: {}", feed_id, e),
    }
}
