//! Time-driven execution: one periodic check task per monitor plus one
//! cron task per schedule. Reconfiguration rebuilds the whole task set
//! instead of diffing it; reloads are rare enough that simplicity wins.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sea_orm::{DatabaseConnection, DbErr};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::db::services::monitor_service;

use super::failover::MonitorEngine;

pub struct Scheduler {
    db: DatabaseConnection,
    engine: Arc<MonitorEngine>,
    inner: tokio::sync::Mutex<Option<Generation>>,
}

/// One generation of spawned jobs. Cancelling the token stops every job
/// at its next wait point; checks already in flight run to completion.
struct Generation {
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl Scheduler {
    pub fn new(db: DatabaseConnection, engine: Arc<MonitorEngine>) -> Self {
        Self {
            db,
            engine,
            inner: tokio::sync::Mutex::new(None),
        }
    }

    /// Tears down the current job set and registers every monitor and
    /// schedule afresh. Serialized by the inner mutex.
    pub async fn reload(&self) -> Result<(), DbErr> {
        let mut guard = self.inner.lock().await;
        if let Some(old) = guard.take() {
            old.cancel.cancel();
        }

        let monitors = monitor_service::list_with_schedules(&self.db).await?;
        let cancel = CancellationToken::new();
        let mut tasks = Vec::new();
        let mut monitor_count = 0usize;
        let mut schedule_count = 0usize;

        for (mut m, schedules) in monitors {
            m.apply_defaults();
            monitor_count += 1;
            tasks.push(tokio::spawn(run_periodic(
                self.engine.clone(),
                m.id,
                m.interval_seconds as u64,
                cancel.clone(),
            )));

            for s in schedules {
                let schedule = match parse_cron(&s.cron_expression) {
                    Ok(schedule) => schedule,
                    Err(e) => {
                        warn!(
                            monitor = %m.name,
                            expression = %s.cron_expression,
                            error = %e,
                            "skipping schedule with bad cron expression"
                        );
                        continue;
                    }
                };
                schedule_count += 1;
                tasks.push(tokio::spawn(run_rotation(
                    self.engine.clone(),
                    m.id,
                    s.target_ip,
                    schedule,
                    cancel.clone(),
                )));
            }
        }

        *guard = Some(Generation { cancel, tasks });
        info!(monitors = monitor_count, schedules = schedule_count, "scheduler reloaded");
        Ok(())
    }

    /// Stops the current generation and waits up to `drain` for running
    /// checks to finish.
    pub async fn shutdown(&self, drain: Duration) {
        let mut guard = self.inner.lock().await;
        let Some(generation) = guard.take() else {
            return;
        };
        generation.cancel.cancel();
        if tokio::time::timeout(drain, futures::future::join_all(generation.tasks))
            .await
            .is_err()
        {
            warn!("drain window elapsed with checks still running");
        }
    }
}

/// Parses a cron expression, accepting the common 5-field crontab form by
/// prepending a zero seconds field.
pub fn parse_cron(expression: &str) -> Result<cron::Schedule, cron::error::Error> {
    let trimmed = expression.trim();
    if trimmed.split_whitespace().count() == 5 {
        cron::Schedule::from_str(&format!("0 {trimmed}"))
    } else {
        cron::Schedule::from_str(trimmed)
    }
}

/// Periodic check loop. The check runs inline, so a slow check delays the
/// next tick instead of overlapping it, and skipped ticks are dropped.
async fn run_periodic(
    engine: Arc<MonitorEngine>,
    monitor_id: i32,
    interval_seconds: u64,
    cancel: CancellationToken,
) {
    let period = Duration::from_secs(interval_seconds.max(1));
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                engine.run_check(monitor_id).await;
            }
        }
    }
}

/// Cron rotation loop: sleep until the next firing time, then attempt the
/// switch.
async fn run_rotation(
    engine: Arc<MonitorEngine>,
    monitor_id: i32,
    target_ip: String,
    schedule: cron::Schedule,
    cancel: CancellationToken,
) {
    loop {
        let Some(next) = schedule.upcoming(Utc).next() else {
            break;
        };
        let delay = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(delay) => {
                engine.scheduled_switch(monitor_id, &target_ip).await;
            }
        }
    }
}
