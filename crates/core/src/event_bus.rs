//! Campaign lifecycle events.
//!
//! Components publish through an [`EventPublisher`], which stamps the
//! process's node id; the host decides where events land by choosing the
//! [`EventSink`].

use std::sync::{Arc, Mutex};

use chrono::Utc;
use uuid::Uuid;

use crate::types::{CampaignEvent, CampaignStatus, EventType};

pub trait EventSink: Send + Sync {
    fn emit(&self, event: CampaignEvent);
}

/// Drops every event.
pub struct NoOpSink;

impl EventSink for NoOpSink {
    fn emit(&self, _event: CampaignEvent) {}
}

/// Keeps every event in memory, in emission order.
#[derive(Default)]
pub struct CaptureSink {
    events: Mutex<Vec<CampaignEvent>>,
}

impl CaptureSink {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_events<R>(&self, f: impl FnOnce(&mut Vec<CampaignEvent>) -> R) -> R {
        // A panicking emitter cannot leave a half-written Vec behind.
        let mut events = self.events.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut events)
    }

    pub fn events(&self) -> Vec<CampaignEvent> {
        self.with_events(|events| events.clone())
    }

    pub fn count_type(&self, event_type: EventType) -> usize {
        self.with_events(|events| events.iter().filter(|e| e.event_type == event_type).count())
    }

    /// Events for one campaign, in emission order.
    pub fn for_campaign(&self, campaign_id: &Uuid) -> Vec<CampaignEvent> {
        self.with_events(|events| {
            events
                .iter()
                .filter(|e| &e.campaign_id == campaign_id)
                .cloned()
                .collect()
        })
    }
}

impl EventSink for CaptureSink {
    fn emit(&self, event: CampaignEvent) {
        self.with_events(|events| events.push(event));
    }
}

/// Builds events for one node and hands them to a sink. Cheap to clone.
#[derive(Clone)]
pub struct EventPublisher {
    node_id: Arc<str>,
    sink: Arc<dyn EventSink>,
}

impl EventPublisher {
    pub fn new(node_id: &str, sink: Arc<dyn EventSink>) -> Self {
        Self {
            node_id: Arc::from(node_id),
            sink,
        }
    }

    /// Publisher that discards everything.
    pub fn disabled(node_id: &str) -> Self {
        Self::new(node_id, Arc::new(NoOpSink))
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn publish(
        &self,
        event_type: EventType,
        campaign_id: Uuid,
        customer_id: Option<Uuid>,
        status: Option<CampaignStatus>,
    ) {
        self.sink.emit(CampaignEvent {
            event_id: Uuid::new_v4(),
            event_type,
            campaign_id,
            customer_id,
            status,
            node_id: self.node_id.to_string(),
            timestamp: Utc::now(),
        });
    }
}
