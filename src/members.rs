//! Member list fed by successfully delivered blasts.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;

use crate::contacts::Contact;
use crate::error::StorageError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberStatus {
    Active,
}

/// A persisted member record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Member {
    pub name: String,
    pub phone: String,
    pub email: Option<String>,
    pub birthday: Option<String>,
    pub join_date: NaiveDate,
    pub status: MemberStatus,
    pub updated_at: DateTime<Utc>,
}

/// Receives contacts that a blast reached, for upsert into the member list.
#[async_trait]
pub trait MemberSink: Send + Sync {
    async fn upsert(
        &self,
        contact: &Contact,
        join_date: NaiveDate,
        status: MemberStatus,
    ) -> Result<(), StorageError>;
}

/// In-memory member list keyed by phone number.
#[derive(Default)]
pub struct MemberRegistry {
    members: RwLock<HashMap<String, Member>>,
}

impl MemberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, phone: &str) -> Option<Member> {
        self.members.read().await.get(phone).cloned()
    }

    /// All members ordered by name.
    pub async fn list(&self) -> Vec<Member> {
        let mut members: Vec<Member> = self.members.read().await.values().cloned().collect();
        members.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.phone.cmp(&b.phone)));
        members
    }

    pub async fn len(&self) -> usize {
        self.members.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.members.read().await.is_empty()
    }
}

#[async_trait]
impl MemberSink for MemberRegistry {
    async fn upsert(
        &self,
        contact: &Contact,
        join_date: NaiveDate,
        status: MemberStatus,
    ) -> Result<(), StorageError> {
        if contact.phone.is_empty() {
            return Err(StorageError::Rejected {
                key: contact.name.clone(),
                reason: "missing phone".to_string(),
            });
        }

        let mut members = self.members.write().await;
        let now = Utc::now();
        members
            .entry(contact.phone.clone())
            .and_modify(|member| {
                member.name = contact.name.clone();
                if contact.email.is_some() {
                    member.email = contact.email.clone();
                }
                if contact.birthday.is_some() {
                    member.birthday = contact.birthday.clone();
                }
                member.status = status;
                member.updated_at = now;
            })
            .or_insert_with(|| Member {
                name: contact.name.clone(),
                phone: contact.phone.clone(),
                email: contact.email.clone(),
                birthday: contact.birthday.clone(),
                join_date,
                status,
                updated_at: now,
            });

        debug!(phone = %contact.phone, "Member upserted");
        Ok(())
    }
}
