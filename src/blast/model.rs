//! Blast job data model and state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::AntiSpamConfig;
use crate::contacts::Contact;
use crate::error::{JobError, SubmitError};

/// Transport a blast is delivered over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Whatsapp,
    Sms,
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Whatsapp => write!(f, "whatsapp"),
            Self::Sms => write!(f, "sms"),
        }
    }
}

impl std::str::FromStr for Channel {
    type Err = SubmitError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "whatsapp" => Ok(Self::Whatsapp),
            "sms" => Ok(Self::Sms),
            _ => Err(SubmitError::InvalidChannel(s.to_string())),
        }
    }
}

/// Lifecycle state of a blast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Created and waiting in the dispatch queue.
    Pending,
    /// Owned by the queue worker and sending.
    Running,
    /// Halted by an operator pause or an admission policy decision.
    Paused,
    /// Every contact was attempted.
    Completed,
    /// Stopped by cancellation or an unexpected error.
    Failed,
}

impl JobStatus {
    /// Check if this state allows transitioning to another state.
    pub fn can_transition_to(&self, target: JobStatus) -> bool {
        use JobStatus::*;

        matches!(
            (self, target),
            (Pending, Running) | (Pending, Failed) |
            (Running, Paused) | (Running, Completed) | (Running, Failed) |
            (Paused, Running) | (Paused, Failed)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// Why a job is paused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PauseReason {
    /// Global operator pause; the job resumes with `resume_all`.
    Operator,
    /// Daily message cap reached.
    DailyLimit,
    /// Current hour is outside the allowed sending window.
    OutsideHours,
    /// Weekend and the job skips weekends.
    Weekend,
}

impl PauseReason {
    /// Policy pauses end the run; only an explicit job resume restarts it.
    pub fn is_policy(&self) -> bool {
        !matches!(self, Self::Operator)
    }
}

impl std::fmt::Display for PauseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Operator => "paused by operator",
            Self::DailyLimit => "daily message limit reached",
            Self::OutsideHours => "outside allowed sending hours",
            Self::Weekend => "weekend sending disabled",
        };
        write!(f, "{s}")
    }
}

/// Outcome for one contact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    Success,
    Failed,
    Skipped,
}

/// Delivery record for a single contact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlastResult {
    pub contact: Contact,
    pub status: ResultStatus,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BlastResult {
    pub fn success(contact: Contact) -> Self {
        Self {
            contact,
            status: ResultStatus::Success,
            timestamp: Utc::now(),
            error: None,
        }
    }

    pub fn failed(contact: Contact, error: impl Into<String>) -> Self {
        Self {
            contact,
            status: ResultStatus::Failed,
            timestamp: Utc::now(),
            error: Some(error.into()),
        }
    }

    pub fn skipped(contact: Contact, reason: impl Into<String>) -> Self {
        Self {
            contact,
            status: ResultStatus::Skipped,
            timestamp: Utc::now(),
            error: Some(reason.into()),
        }
    }
}

/// A state transition event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransition {
    pub from: JobStatus,
    pub to: JobStatus,
    pub timestamp: DateTime<Utc>,
    pub reason: Option<String>,
}

const MAX_TRANSITIONS: usize = 100;

/// A campaign: one message template sent to an ordered contact list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlastJob {
    pub id: String,
    pub contacts: Vec<Contact>,
    /// Message template with `{{name}}`, `{{phone}}` and `{{email}}` placeholders.
    pub message: String,
    pub channel: Channel,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pause_reason: Option<PauseReason>,
    /// Number of contacts attempted; always equals `results.len()`.
    pub progress: usize,
    pub total: usize,
    pub results: Vec<BlastResult>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Reason the job failed, if it did.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub anti_spam_config: AntiSpamConfig,
    pub transitions: Vec<StateTransition>,
}

impl BlastJob {
    pub fn new(
        contacts: Vec<Contact>,
        message: impl Into<String>,
        channel: Channel,
        anti_spam_config: AntiSpamConfig,
    ) -> Self {
        let total = contacts.len();
        Self {
            id: format!("blast_{}", Uuid::new_v4().simple()),
            contacts,
            message: message.into(),
            channel,
            status: JobStatus::Pending,
            pause_reason: None,
            progress: 0,
            total,
            results: Vec::with_capacity(total),
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            error: None,
            anti_spam_config,
            transitions: Vec::new(),
        }
    }

    /// Transition to a new state.
    pub fn transition_to(
        &mut self,
        new_status: JobStatus,
        reason: Option<String>,
    ) -> Result<(), JobError> {
        if !self.status.can_transition_to(new_status) {
            return Err(JobError::InvalidTransition {
                id: self.id.clone(),
                state: self.status.to_string(),
                target: new_status.to_string(),
            });
        }

        self.transitions.push(StateTransition {
            from: self.status,
            to: new_status,
            timestamp: Utc::now(),
            reason,
        });
        if self.transitions.len() > MAX_TRANSITIONS {
            let drain_count = self.transitions.len() - MAX_TRANSITIONS;
            self.transitions.drain(..drain_count);
        }

        self.status = new_status;
        if new_status != JobStatus::Paused {
            self.pause_reason = None;
        }

        match new_status {
            JobStatus::Running if self.started_at.is_none() => {
                self.started_at = Some(Utc::now());
            }
            JobStatus::Completed | JobStatus::Failed => {
                self.finished_at = Some(Utc::now());
            }
            _ => {}
        }

        Ok(())
    }

    /// Move to `Paused`, remembering why.
    pub fn pause(&mut self, reason: PauseReason) -> Result<(), JobError> {
        self.transition_to(JobStatus::Paused, Some(reason.to_string()))?;
        self.pause_reason = Some(reason);
        Ok(())
    }

    /// Move to `Failed` with an error message.
    pub fn fail(&mut self, error: impl Into<String>) -> Result<(), JobError> {
        let error = error.into();
        self.transition_to(JobStatus::Failed, Some(error.clone()))?;
        self.error = Some(error);
        Ok(())
    }

    /// Append the result for the next contact and advance progress.
    pub fn record(&mut self, result: BlastResult) {
        debug_assert!(self.results.len() < self.total);
        self.results.push(result);
        self.progress = self.results.len();
    }

    /// Whether a policy pause left this job waiting for an explicit resume.
    pub fn is_policy_paused(&self) -> bool {
        self.status == JobStatus::Paused && self.pause_reason.is_some_and(|r| r.is_policy())
    }

    pub fn success_count(&self) -> usize {
        self.results
            .iter()
            .filter(|r| r.status == ResultStatus::Success)
            .count()
    }

    /// Contacts whose send succeeded, in contact order.
    pub fn delivered_contacts(&self) -> Vec<Contact> {
        self.results
            .iter()
            .filter(|r| r.status == ResultStatus::Success)
            .map(|r| r.contact.clone())
            .collect()
    }
}

/// Substitute the contact placeholders in a message template.
pub fn personalize(template: &str, contact: &Contact) -> String {
    template
        .replace("{{name}}", &contact.name)
        .replace("{{phone}}", &contact.phone)
        .replace("{{email}}", contact.email.as_deref().unwrap_or(""))
}
