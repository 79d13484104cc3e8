//! Blast dispatcher: job submission, the single-admission queue and the
//! per-job run loop.
//!
//! Every submitted job is pushed onto one queue drained by one worker task, so
//! only one blast consumes the shared budget at a time and sends go out in
//! true queue order. Within a run, each contact goes through:
//! global pause → admission decision → personalize → send → record → pacing.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use rand::Rng;
use serde::Serialize;
use tokio::sync::{Mutex, RwLock, mpsc, watch};
use tracing::{debug, error, info, warn};

use super::budget::BudgetHandle;
use super::control::PauseSwitch;
use super::model::{BlastJob, BlastResult, Channel, JobStatus, PauseReason, personalize};
use super::policy::{Decision, decide};
use super::store::JobStore;
use crate::channels::{MessageSink, SinkRegistry};
use crate::clock::Clock;
use crate::config::{AntiSpamConfig, AntiSpamOverrides, DispatcherConfig};
use crate::contacts::Contact;
use crate::error::{Error, JobError, SendError, SubmitError};
use crate::members::{MemberSink, MemberStatus};

const CANCELLED: &str = "cancelled by operator";

/// Collaborators the dispatcher drives.
pub struct DispatcherDeps {
    pub store: Arc<JobStore>,
    pub budget: BudgetHandle,
    pub sinks: SinkRegistry,
    pub members: Arc<dyn MemberSink>,
    pub clock: Arc<dyn Clock>,
}

/// Point-in-time view of the dispatcher.
#[derive(Debug, Clone, Serialize)]
pub struct DispatcherStats {
    pub sent_this_hour: u32,
    pub sent_today: u32,
    pub is_paused: bool,
    pub current_job_id: Option<String>,
    pub queued: usize,
}

/// Owns the dispatch queue and every job's run loop.
pub struct Dispatcher {
    store: Arc<JobStore>,
    budget: BudgetHandle,
    sinks: SinkRegistry,
    members: Arc<dyn MemberSink>,
    clock: Arc<dyn Clock>,
    defaults: AntiSpamConfig,
    send_timeout: Duration,
    pause: PauseSwitch,
    queue_tx: mpsc::UnboundedSender<String>,
    /// Jobs waiting in the queue.
    queued: Mutex<HashSet<String>>,
    /// Per-job cancellation flags.
    cancels: RwLock<HashMap<String, watch::Sender<bool>>>,
    current_job: RwLock<Option<String>>,
}

impl Dispatcher {
    /// Create the dispatcher and spawn its queue worker.
    pub fn start(config: &DispatcherConfig, deps: DispatcherDeps) -> Arc<Self> {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();

        let dispatcher = Arc::new(Self {
            store: deps.store,
            budget: deps.budget,
            sinks: deps.sinks,
            members: deps.members,
            clock: deps.clock,
            defaults: config.anti_spam.clone(),
            send_timeout: config.send_timeout,
            pause: PauseSwitch::new(),
            queue_tx,
            queued: Mutex::new(HashSet::new()),
            cancels: RwLock::new(HashMap::new()),
            current_job: RwLock::new(None),
        });

        tokio::spawn(Arc::clone(&dispatcher).run_queue(queue_rx));
        dispatcher
    }

    // ── Submission ──────────────────────────────────────────────────────

    /// Validate and enqueue a new blast. Returns the job id.
    pub async fn create_job(
        &self,
        contacts: Vec<Contact>,
        message: &str,
        channel: Channel,
        overrides: Option<AntiSpamOverrides>,
    ) -> Result<String, Error> {
        if contacts.is_empty() {
            return Err(SubmitError::NoContacts.into());
        }
        if message.trim().is_empty() {
            return Err(SubmitError::EmptyMessage.into());
        }
        if !self.sinks.contains(channel) {
            return Err(SubmitError::ChannelUnavailable {
                channel: channel.to_string(),
            }
            .into());
        }

        let anti_spam = match overrides {
            Some(overrides) => self.defaults.merged(&overrides),
            None => self.defaults.clone(),
        };
        anti_spam.validate()?;

        let job = BlastJob::new(contacts, message, channel, anti_spam);
        let job_id = job.id.clone();
        let total = job.total;

        let (cancel_tx, _) = watch::channel(false);
        self.cancels.write().await.insert(job_id.clone(), cancel_tx);
        self.store.create(job).await;
        self.enqueue(&job_id).await?;

        info!(job_id = %job_id, channel = %channel, total, "Blast job created");
        Ok(job_id)
    }

    async fn enqueue(&self, job_id: &str) -> Result<(), JobError> {
        let mut queued = self.queued.lock().await;
        if !queued.insert(job_id.to_string()) {
            return Err(JobError::AlreadyQueued {
                id: job_id.to_string(),
            });
        }
        if self.queue_tx.send(job_id.to_string()).is_err() {
            queued.remove(job_id);
            return Err(JobError::QueueClosed);
        }
        Ok(())
    }

    // ── Queries ─────────────────────────────────────────────────────────

    pub async fn get_job(&self, job_id: &str) -> Result<BlastJob, JobError> {
        self.store.get(job_id).await.ok_or_else(|| JobError::NotFound {
            id: job_id.to_string(),
        })
    }

    /// Every job, newest first.
    pub async fn list_jobs(&self) -> Vec<BlastJob> {
        self.store.list().await
    }

    pub async fn stats(&self) -> DispatcherStats {
        let budget = self.budget.snapshot();
        DispatcherStats {
            sent_this_hour: budget.sent_this_hour,
            sent_today: budget.sent_today,
            is_paused: self.pause.is_paused(),
            current_job_id: self.current_job.read().await.clone(),
            queued: self.queued.lock().await.len(),
        }
    }

    // ── Control ─────────────────────────────────────────────────────────

    /// Pause every blast at its next contact boundary.
    pub fn pause_all(&self) {
        if self.pause.pause() {
            info!("⏸️  Blasts paused by operator");
        }
    }

    /// Lift the global pause.
    pub fn resume_all(&self) {
        if self.pause.resume() {
            info!("▶️  Blasts resumed by operator");
        }
    }

    pub fn is_paused(&self) -> bool {
        self.pause.is_paused()
    }

    /// Cancel a job. Queued and policy-paused jobs fail immediately; a running
    /// job stops at its next contact boundary or wait.
    pub async fn cancel_job(&self, job_id: &str) -> Result<BlastJob, JobError> {
        let job = self.get_job(job_id).await?;
        if job.status.is_terminal() {
            return Err(JobError::InvalidTransition {
                id: job_id.to_string(),
                state: job.status.to_string(),
                target: JobStatus::Failed.to_string(),
            });
        }

        if let Some(flag) = self.cancels.read().await.get(job_id) {
            flag.send_replace(true);
        }

        let job = self
            .store
            .update(job_id, |job| {
                if job.status == JobStatus::Pending || job.is_policy_paused() {
                    let _ = job.fail(CANCELLED);
                }
                job.clone()
            })
            .await?;

        if job.status.is_terminal() {
            self.cancels.write().await.remove(job_id);
        }

        info!(job_id = %job_id, status = %job.status, "Blast cancellation requested");
        Ok(job)
    }

    /// Re-queue a job that an admission pause stopped. It continues from its
    /// current progress.
    pub async fn resume_job(&self, job_id: &str) -> Result<(), JobError> {
        let job = self.get_job(job_id).await?;
        if !job.is_policy_paused() {
            return Err(JobError::InvalidTransition {
                id: job_id.to_string(),
                state: job.status.to_string(),
                target: JobStatus::Running.to_string(),
            });
        }

        self.enqueue(job_id).await?;
        info!(job_id = %job_id, progress = job.progress, total = job.total, "Blast re-queued");
        Ok(())
    }

    // ── Queue worker ────────────────────────────────────────────────────

    async fn run_queue(self: Arc<Self>, mut rx: mpsc::UnboundedReceiver<String>) {
        info!("Blast dispatch worker started");

        while let Some(job_id) = rx.recv().await {
            self.queued.lock().await.remove(&job_id);

            // Run on its own task so a panic in a sink is contained to the job.
            let this = Arc::clone(&self);
            let id = job_id.clone();
            let outcome = tokio::spawn(async move { this.run_job(&id).await }).await;
            *self.current_job.write().await = None;

            let failure = match outcome {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(e.to_string()),
                Err(e) => Some(format!("run loop aborted: {e}")),
            };
            if let Some(reason) = failure {
                error!(job_id = %job_id, error = %reason, "Blast failed");
                self.mark_failed(&job_id, reason).await;
            }
            self.release_if_finished(&job_id).await;
        }

        debug!("Blast dispatch worker stopped");
    }

    async fn mark_failed(&self, job_id: &str, reason: String) {
        let result = self
            .store
            .update(job_id, |job| {
                if job.status.is_terminal() {
                    Ok(())
                } else {
                    job.fail(reason)
                }
            })
            .await;
        if let Err(e) = result.and_then(|r| r) {
            warn!(job_id = %job_id, error = %e, "Could not mark blast failed");
        }
    }

    /// Drop the cancellation flag of a job that can no longer run.
    async fn release_if_finished(&self, job_id: &str) {
        let finished = self
            .store
            .get(job_id)
            .await
            .is_some_and(|job| job.status.is_terminal());
        if finished {
            self.cancels.write().await.remove(job_id);
        }
    }

    /// Move a pending or policy-paused job to running and take a snapshot of
    /// it. `None` if the job is no longer runnable (e.g. cancelled while queued).
    async fn claim(&self, job_id: &str) -> Result<Option<BlastJob>, JobError> {
        self.store
            .update(job_id, |job| {
                if job.status != JobStatus::Pending && !job.is_policy_paused() {
                    return None;
                }
                job.transition_to(JobStatus::Running, Some("dispatched".to_string()))
                    .ok()?;
                Some(job.clone())
            })
            .await
    }

    async fn cancel_receiver(&self, job_id: &str) -> watch::Receiver<bool> {
        let mut cancels = self.cancels.write().await;
        cancels
            .entry(job_id.to_string())
            .or_insert_with(|| watch::channel(false).0)
            .subscribe()
    }

    async fn run_job(&self, job_id: &str) -> Result<(), Error> {
        let Some(job) = self.claim(job_id).await? else {
            debug!(job_id = %job_id, "Skipping blast that is no longer runnable");
            return Ok(());
        };
        *self.current_job.write().await = Some(job_id.to_string());

        let mut cancel = self.cancel_receiver(job_id).await;
        let sink = self.sinks.get(job.channel).ok_or_else(|| SendError::NotReady {
            channel: job.channel.to_string(),
            reason: "no transport registered".to_string(),
        })?;

        let config = &job.anti_spam_config;
        let mut batch_count: u32 = 0;

        info!(
            job_id = %job_id,
            channel = %job.channel,
            total = job.total,
            from = job.progress,
            "▶️  Blast running"
        );

        for index in job.progress..job.total {
            let contact = &job.contacts[index];

            let cancelled = *cancel.borrow();
            if cancelled {
                return self.finish_cancelled(job_id).await;
            }

            // 1. Global pause.
            if self.pause.is_paused() {
                self.store
                    .update(job_id, |job| job.pause(PauseReason::Operator))
                    .await??;
                warn!(job_id = %job_id, "⏸️  Blast paused");

                let cancelled = tokio::select! {
                    _ = self.pause.wait_resumed() => false,
                    _ = wait_cancelled(&mut cancel) => true,
                };
                if cancelled {
                    return self.finish_cancelled(job_id).await;
                }

                self.store
                    .update(job_id, |job| {
                        let reason = Some("resumed by operator".to_string());
                        job.transition_to(JobStatus::Running, reason)
                    })
                    .await??;
                info!(job_id = %job_id, "▶️  Blast resumed");
            }

            // 2. Admission.
            loop {
                let decision = decide(self.clock.now(), config, &self.budget.snapshot());
                if let Some(reason) = decision.pause_reason() {
                    return self.finish_paused(job_id, reason).await;
                }
                if decision == Decision::Proceed {
                    break;
                }

                warn!(
                    job_id = %job_id,
                    limit = config.max_messages_per_hour,
                    "⚠️  Hourly limit reached, waiting for the hourly window to reset"
                );
                let cancelled = tokio::select! {
                    res = self.budget.wait_for_hourly_capacity(config.max_messages_per_hour) => {
                        res?;
                        false
                    }
                    _ = wait_cancelled(&mut cancel) => true,
                };
                if cancelled {
                    return self.finish_cancelled(job_id).await;
                }
            }

            // 3-4. Personalize and send.
            let result = if contact.phone.is_empty() {
                BlastResult::skipped(contact.clone(), "missing phone number")
            } else {
                let text = personalize(&job.message, contact);
                match self.send_with_timeout(sink.as_ref(), &contact.phone, &text).await {
                    Ok(()) => {
                        self.budget.record_send().await?;
                        info!(
                            job_id = %job_id,
                            contact = %contact.name,
                            progress = index + 1,
                            total = job.total,
                            "✅ Message sent"
                        );
                        BlastResult::success(contact.clone())
                    }
                    Err(e) if e.is_contact_scoped() => {
                        warn!(
                            job_id = %job_id,
                            contact = %contact.name,
                            error = %e,
                            "❌ Send failed"
                        );
                        BlastResult::failed(contact.clone(), e.to_string())
                    }
                    Err(e) => {
                        return Err(JobError::Failed {
                            id: job_id.to_string(),
                            reason: e.to_string(),
                        }
                        .into());
                    }
                }
            };

            // 5. Advance.
            self.store.update(job_id, |job| job.record(result)).await?;
            batch_count += 1;

            if index + 1 == job.total {
                break;
            }

            // 6. Jittered spacing.
            let delay = random_delay(config);
            debug!(
                job_id = %job_id,
                delay_ms = delay.as_millis() as u64,
                "⏳ Waiting before next message"
            );
            if sleep_or_cancel(delay, &mut cancel).await {
                return self.finish_cancelled(job_id).await;
            }

            // 7. Batch pause.
            if batch_count >= config.batch_size {
                info!(
                    job_id = %job_id,
                    batch_size = config.batch_size,
                    delay_ms = config.batch_delay_ms,
                    "Batch complete, pausing"
                );
                if sleep_or_cancel(config.batch_delay(), &mut cancel).await {
                    return self.finish_cancelled(job_id).await;
                }
                batch_count = 0;
            }
        }

        let (sent, total, delivered) = self
            .store
            .update(job_id, |job| {
                job.transition_to(JobStatus::Completed, None)
                    .map(|_| (job.success_count(), job.total, job.delivered_contacts()))
            })
            .await??;
        info!(job_id = %job_id, sent, total, "✅ Blast completed");

        self.hand_off_members(job_id, delivered).await;
        Ok(())
    }

    async fn send_with_timeout(
        &self,
        sink: &dyn MessageSink,
        phone: &str,
        text: &str,
    ) -> Result<(), SendError> {
        match tokio::time::timeout(self.send_timeout, sink.send(phone, text)).await {
            Ok(result) => result,
            Err(_) => Err(SendError::Timeout {
                timeout: self.send_timeout,
            }),
        }
    }

    async fn finish_paused(&self, job_id: &str, reason: PauseReason) -> Result<(), Error> {
        let progress = self
            .store
            .update(job_id, |job| job.pause(reason).map(|_| job.progress))
            .await??;
        warn!(job_id = %job_id, progress, "⚠️  Blast paused: {}", reason);
        Ok(())
    }

    async fn finish_cancelled(&self, job_id: &str) -> Result<(), Error> {
        let progress = self
            .store
            .update(job_id, |job| job.fail(CANCELLED).map(|_| job.progress))
            .await??;
        info!(job_id = %job_id, progress, "Blast cancelled");
        Ok(())
    }

    /// Upsert every delivered contact as an active member. Best-effort: one
    /// failure is logged and does not affect the others or the job.
    async fn hand_off_members(&self, job_id: &str, contacts: Vec<Contact>) {
        if contacts.is_empty() {
            return;
        }
        let join_date = self.clock.now().date();
        let results = join_all(
            contacts
                .iter()
                .map(|contact| self.members.upsert(contact, join_date, MemberStatus::Active)),
        )
        .await;

        let mut failed = 0;
        for (contact, result) in contacts.iter().zip(results) {
            if let Err(e) = result {
                failed += 1;
                warn!(
                    job_id = %job_id,
                    contact = %contact.name,
                    error = %e,
                    "Failed to convert contact to member"
                );
            }
        }
        info!(
            job_id = %job_id,
            members = contacts.len() - failed,
            failed,
            "Delivered contacts handed off to member list"
        );
    }
}

fn random_delay(config: &AntiSpamConfig) -> Duration {
    let ms = rand::thread_rng().gen_range(config.min_delay_ms..=config.max_delay_ms);
    Duration::from_millis(ms)
}

/// Resolve once the cancellation flag is set.
async fn wait_cancelled(cancel: &mut watch::Receiver<bool>) {
    if cancel.wait_for(|cancelled| *cancelled).await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Sleep for `duration`; returns `true` if cancelled first.
async fn sleep_or_cancel(duration: Duration, cancel: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        biased;
        _ = wait_cancelled(cancel) => true,
        _ = tokio::time::sleep(duration) => false,
    }
}
