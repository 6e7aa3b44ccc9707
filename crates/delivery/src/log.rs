//! Append-only delivery log.
//!
//! Entries are never updated or removed; the log is the audit trail of
//! record for every delivery attempt.

use std::sync::atomic::{AtomicU64, Ordering};

use campaign_core::types::{DeliveryLogEntry, DeliveryStatus};
use campaign_core::CampaignResult;
use chrono::Utc;
use dashmap::DashMap;
use uuid::Uuid;

pub trait DeliveryLogStore: Send + Sync {
    fn append(&self, entry: DeliveryLogEntry) -> CampaignResult<()>;

    /// Entries for a campaign in append order.
    fn entries_for_campaign(&self, campaign_id: &Uuid) -> CampaignResult<Vec<DeliveryLogEntry>>;
}

/// Builds a fresh entry stamped with a new id and the current time.
pub fn new_entry(
    campaign_id: Uuid,
    customer_id: Uuid,
    status: DeliveryStatus,
    attempt: u32,
    detail: Option<String>,
) -> DeliveryLogEntry {
    DeliveryLogEntry {
        id: Uuid::new_v4(),
        campaign_id,
        customer_id,
        status,
        attempt,
        detail,
        timestamp: Utc::now(),
    }
}

#[derive(Default)]
pub struct InMemoryDeliveryLog {
    entries: DashMap<Uuid, Vec<DeliveryLogEntry>>,
    total: AtomicU64,
}

impl InMemoryDeliveryLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn total_entries(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    /// Entries for one member of one campaign, in attempt order.
    pub fn entries_for_member(&self, campaign_id: &Uuid, customer_id: &Uuid) -> Vec<DeliveryLogEntry> {
        self.entries
            .get(campaign_id)
            .map(|entries| {
                entries
                    .iter()
                    .filter(|e| &e.customer_id == customer_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl DeliveryLogStore for InMemoryDeliveryLog {
    fn append(&self, entry: DeliveryLogEntry) -> CampaignResult<()> {
        self.entries.entry(entry.campaign_id).or_default().push(entry);
        self.total.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn entries_for_campaign(&self, campaign_id: &Uuid) -> CampaignResult<Vec<DeliveryLogEntry>> {
        Ok(self
            .entries
            .get(campaign_id)
            .map(|entries| entries.clone())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_and_query() {
        let log = InMemoryDeliveryLog::new();
        let campaign = Uuid::new_v4();
        let other_campaign = Uuid::new_v4();
        let member = Uuid::new_v4();

        log.append(new_entry(campaign, member, DeliveryStatus::Retrying, 1, Some("timeout".into())))
            .unwrap();
        log.append(new_entry(campaign, member, DeliveryStatus::Sent, 2, None))
            .unwrap();
        log.append(new_entry(other_campaign, member, DeliveryStatus::Sent, 1, None))
            .unwrap();

        let entries = log.entries_for_campaign(&campaign).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].attempt, 1);
        assert_eq!(entries[1].status, DeliveryStatus::Sent);
        assert_eq!(log.entries_for_member(&campaign, &member).len(), 2);
        assert_eq!(log.total_entries(), 3);
        assert!(log.entries_for_campaign(&Uuid::new_v4()).unwrap().is_empty());
    }
}
