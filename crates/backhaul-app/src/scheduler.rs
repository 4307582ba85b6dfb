//! Time-based triggers for backup cycles.
//!
//! # Design
//! - One cycle on startup, then a regular cycle on every interval tick.
//! - Cycles run as tasks so a tick that lands on a running cycle is rejected and logged.
//! - The daily archive cycle fires at a fixed IST wall-clock time and queues for the slot.
//! - Shutdown stops new ticks and waits for in-flight cycles to finish their compensation.

use std::sync::Arc;
use std::time::Duration;

use backhaul_core::naming::{ist, to_ist};
use chrono::{DateTime, Days, NaiveTime, TimeZone, Utc};
use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior, interval_at, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::orchestrator::Orchestrator;
use crate::report::Trigger;

/// Drives regular and daily cycles until shutdown.
pub struct Scheduler {
    orchestrator: Arc<Orchestrator>,
    interval: Duration,
    daily_at: Option<NaiveTime>,
}

impl Scheduler {
    /// Build a scheduler; `daily_at` is ignored when the orchestrator has no archive folder.
    #[must_use]
    pub fn new(orchestrator: Arc<Orchestrator>, interval: Duration, daily_at: NaiveTime) -> Self {
        let daily_at = orchestrator.archive_enabled().then_some(daily_at);
        Self {
            orchestrator,
            interval,
            daily_at,
        }
    }

    /// Run until `shutdown` fires, then wait for in-flight cycles.
    pub async fn run(self, shutdown: CancellationToken) {
        let mut cycles = JoinSet::new();
        info!(
            interval_secs = self.interval.as_secs(),
            daily_at = ?self.daily_at,
            "scheduler started"
        );
        self.spawn_cycle(&mut cycles, false, Trigger::Startup);

        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut next_daily = self.daily_at.map(|at| next_daily_run(Utc::now(), at));
        loop {
            while cycles.try_join_next().is_some() {}
            let until_daily = next_daily.map(|next| until(Utc::now(), next));
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = ticker.tick() => self.spawn_cycle(&mut cycles, false, Trigger::Interval),
                () = sleep(until_daily.unwrap_or(Duration::MAX)), if until_daily.is_some() => {
                    self.spawn_cycle(&mut cycles, true, Trigger::Daily);
                    next_daily = next_daily
                        .zip(self.daily_at)
                        .map(|(fired, at)| next_daily_run(fired, at));
                }
            }
        }

        info!(in_flight = cycles.len(), "scheduler stopping");
        while let Some(joined) = cycles.join_next().await {
            if let Err(err) = joined {
                error!(error = %err, "cycle task panicked");
            }
        }
    }

    fn spawn_cycle(&self, cycles: &mut JoinSet<()>, archive: bool, trigger: Trigger) {
        let orchestrator = Arc::clone(&self.orchestrator);
        cycles.spawn(async move { run_logged(&orchestrator, archive, trigger).await });
    }
}

/// Run one cycle and log the outcome; never propagates.
pub async fn run_logged(orchestrator: &Orchestrator, archive: bool, trigger: Trigger) {
    match orchestrator.run_cycle(archive, trigger).await {
        Ok(report) if report.is_success() => {
            info!(trigger = trigger.as_str(), summary = %report.summary(), "cycle finished");
        }
        Ok(report) => {
            error!(trigger = trigger.as_str(), summary = %report.summary(), "cycle failed");
        }
        Err(err) => {
            warn!(trigger = trigger.as_str(), error = %err, "cycle skipped");
        }
    }
}

/// Next instant at which the IST wall clock reads `at`, strictly after `now`.
#[must_use]
pub fn next_daily_run(now: DateTime<Utc>, at: NaiveTime) -> DateTime<Utc> {
    let local = to_ist(now);
    let today = local.date_naive().and_time(at);
    let candidate = if today > local.naive_local() {
        today
    } else {
        today.checked_add_days(Days::new(1)).unwrap_or(today)
    };
    ist()
        .from_local_datetime(&candidate)
        .single()
        .map_or(now, |at| at.with_timezone(&Utc))
}

fn until(now: DateTime<Utc>, then: DateTime<Utc>) -> Duration {
    (then - now).to_std().unwrap_or(Duration::ZERO)
}
