//! Process-wide rate-limit budget.
//!
//! The budget is owned by a single actor task. Every other component holds a
//! cloneable [`BudgetHandle`]: increments and resets are messages to the actor,
//! and the actor publishes each new state on a `watch` channel so readers get a
//! consistent snapshot without locking.

use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDateTime, TimeDelta};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::clock::Clock;
use crate::error::JobError;

/// Counters of messages sent in the current hour and calendar day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RateLimitBudget {
    pub sent_this_hour: u32,
    pub sent_today: u32,
    pub hour_window_start: NaiveDateTime,
    pub day_window_start: NaiveDateTime,
}

/// Which windows a reset tick rolled over.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResetOutcome {
    pub hour: bool,
    pub day: bool,
}

impl RateLimitBudget {
    /// A fresh budget with both windows starting at `now`.
    pub fn new(now: NaiveDateTime) -> Self {
        Self {
            sent_this_hour: 0,
            sent_today: 0,
            hour_window_start: now,
            day_window_start: now,
        }
    }

    fn record_send(&mut self) {
        self.sent_this_hour = self.sent_this_hour.saturating_add(1);
        self.sent_today = self.sent_today.saturating_add(1);
    }

    /// Apply the reset rules: the hourly counter after a full hour has elapsed,
    /// the daily counter when the calendar date changes.
    fn reset_due(&mut self, now: NaiveDateTime) -> ResetOutcome {
        let mut outcome = ResetOutcome::default();

        if now - self.hour_window_start >= TimeDelta::hours(1) {
            self.sent_this_hour = 0;
            self.hour_window_start = now;
            outcome.hour = true;
        }

        if now.date() != self.day_window_start.date() {
            self.sent_today = 0;
            self.day_window_start = now;
            outcome.day = true;
        }

        outcome
    }
}

enum BudgetCommand {
    RecordSend {
        ack: oneshot::Sender<RateLimitBudget>,
    },
    Tick {
        now: NaiveDateTime,
        ack: oneshot::Sender<ResetOutcome>,
    },
}

/// Handle to the budget actor.
#[derive(Clone)]
pub struct BudgetHandle {
    tx: mpsc::Sender<BudgetCommand>,
    state: watch::Receiver<RateLimitBudget>,
}

impl BudgetHandle {
    /// Spawn the actor with an empty budget whose windows start at `now`.
    pub fn spawn(now: NaiveDateTime) -> Self {
        Self::spawn_with(RateLimitBudget::new(now))
    }

    /// Spawn the actor from an explicit starting state.
    pub fn spawn_with(initial: RateLimitBudget) -> Self {
        let (tx, mut rx) = mpsc::channel::<BudgetCommand>(64);
        let (state_tx, state_rx) = watch::channel(initial.clone());

        tokio::spawn(async move {
            let mut budget = initial;
            while let Some(command) = rx.recv().await {
                match command {
                    BudgetCommand::RecordSend { ack } => {
                        budget.record_send();
                        state_tx.send_replace(budget.clone());
                        let _ = ack.send(budget.clone());
                    }
                    BudgetCommand::Tick { now, ack } => {
                        let outcome = budget.reset_due(now);
                        if outcome.hour {
                            info!("Hourly message counter reset");
                        }
                        if outcome.day {
                            info!("Daily message counter reset");
                        }
                        if outcome.hour || outcome.day {
                            state_tx.send_replace(budget.clone());
                        }
                        let _ = ack.send(outcome);
                    }
                }
            }
            debug!("Budget actor stopped");
        });

        Self {
            tx,
            state: state_rx,
        }
    }

    /// Latest published budget.
    pub fn snapshot(&self) -> RateLimitBudget {
        self.state.borrow().clone()
    }

    /// Count one successful send against both windows. Returns once applied.
    pub async fn record_send(&self) -> Result<RateLimitBudget, JobError> {
        let (ack, rx) = oneshot::channel();
        self.tx
            .send(BudgetCommand::RecordSend { ack })
            .await
            .map_err(|_| JobError::BudgetUnavailable)?;
        rx.await.map_err(|_| JobError::BudgetUnavailable)
    }

    /// Run the reset rules against `now`.
    pub async fn tick(&self, now: NaiveDateTime) -> Result<ResetOutcome, JobError> {
        let (ack, rx) = oneshot::channel();
        self.tx
            .send(BudgetCommand::Tick { now, ack })
            .await
            .map_err(|_| JobError::BudgetUnavailable)?;
        rx.await.map_err(|_| JobError::BudgetUnavailable)
    }

    /// Suspend until fewer than `max_per_hour` messages have been sent in the
    /// current hourly window.
    pub async fn wait_for_hourly_capacity(&self, max_per_hour: u32) -> Result<(), JobError> {
        let mut state = self.state.clone();
        state
            .wait_for(|budget| budget.sent_this_hour < max_per_hour)
            .await
            .map(|_| ())
            .map_err(|_| JobError::BudgetUnavailable)
    }
}

/// Spawn the background routine that rolls the budget windows over.
pub fn spawn_reset_ticker(
    budget: BudgetHandle,
    clock: Arc<dyn Clock>,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // Skip immediate first tick
        ticker.tick().await;

        loop {
            ticker.tick().await;
            if budget.tick(clock.now()).await.is_err() {
                break;
            }
        }
    })
}
