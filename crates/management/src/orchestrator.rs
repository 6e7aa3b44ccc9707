//! Orchestrator: the façade over rule parsing, audience resolution, the
//! campaign store, and the delivery pipeline.
//!
//! Delivery runs on a spawned task; `start_delivery` returns a
//! [`DeliveryHandle`] immediately and the caller polls or awaits it.

use std::sync::Arc;

use campaign_core::config::{AppConfig, DeliveryConfig};
use campaign_core::event_bus::{EventPublisher, EventSink};
use campaign_core::store::CustomerSource;
use campaign_core::types::{CampaignStatus, DeliveryLogEntry, EventType};
use campaign_core::{CampaignError, CampaignResult, ParseError};
use campaign_delivery::{
    DeliveryJob, DeliveryLogStore, DeliveryPipeline, DeliveryProgress, MessageSender,
    ProgressSnapshot,
};
use campaign_segmentation::{AudienceResolver, SegmentRule};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::messages::{suggest_messages, CampaignObjective, MessageTemplate};
use crate::models::{Campaign, CreateCampaignRequest};
use crate::state_machine::CampaignStateMachine;
use crate::store::{CampaignStore, StartDecision};

/// Poll/await surface for one campaign's delivery run. Cheap to clone.
#[derive(Clone)]
pub struct DeliveryHandle {
    campaign_id: Uuid,
    status: watch::Receiver<CampaignStatus>,
    progress: Arc<DeliveryProgress>,
    cancel: CancellationToken,
}

impl DeliveryHandle {
    /// Handle for a campaign with no live run, rebuilt from its recorded
    /// outcome and its delivery log.
    fn settled(campaign: &Campaign, attempts: u64) -> Self {
        let (_tx, status) = watch::channel(campaign.status);
        let progress = match &campaign.delivery {
            Some(outcome) => DeliveryProgress::settled(outcome, attempts),
            None => DeliveryProgress::new(campaign.audience_size()),
        };
        Self {
            campaign_id: campaign.id,
            status,
            progress: Arc::new(progress),
            cancel: CancellationToken::new(),
        }
    }

    pub fn campaign_id(&self) -> Uuid {
        self.campaign_id
    }

    pub fn status(&self) -> CampaignStatus {
        *self.status.borrow()
    }

    pub fn is_finished(&self) -> bool {
        self.status().is_terminal()
    }

    pub fn progress(&self) -> ProgressSnapshot {
        self.progress.snapshot()
    }

    /// Whether both handles observe the same delivery run.
    pub fn same_run(&self, other: &DeliveryHandle) -> bool {
        Arc::ptr_eq(&self.progress, &other.progress)
    }

    /// Stop scheduling new attempts. In-flight sends finish.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the campaign to reach a terminal state.
    pub async fn wait(&self) -> CampaignStatus {
        let mut rx = self.status.clone();
        let result = rx.wait_for(|s| s.is_terminal()).await.map(|s| *s);
        match result {
            Ok(status) => status,
            // Driver gone; the last value it published is final.
            Err(_) => *rx.borrow(),
        }
    }
}

impl std::fmt::Debug for DeliveryHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryHandle")
            .field("campaign_id", &self.campaign_id)
            .field("status", &self.status())
            .field("progress", &self.progress())
            .finish()
    }
}

pub struct Orchestrator {
    delivery_config: DeliveryConfig,
    campaigns: Arc<CampaignStore>,
    resolver: AudienceResolver,
    customers: Arc<dyn CustomerSource>,
    log: Arc<dyn DeliveryLogStore>,
    sender: Arc<dyn MessageSender>,
    pipeline: Arc<DeliveryPipeline>,
    events: EventPublisher,
    /// Live runs only; the driver removes its entry once the run settles.
    runs: Arc<DashMap<Uuid, DeliveryHandle>>,
}

impl Orchestrator {
    pub fn new(
        config: &AppConfig,
        customers: Arc<dyn CustomerSource>,
        log: Arc<dyn DeliveryLogStore>,
        sender: Arc<dyn MessageSender>,
    ) -> CampaignResult<Self> {
        config.validate()?;
        info!(
            node_id = %config.node_id,
            max_retries = config.delivery.max_retries,
            concurrency = config.delivery.concurrency_limit,
            "Orchestrator initialized"
        );
        Ok(Self {
            delivery_config: config.delivery.clone(),
            campaigns: Arc::new(CampaignStore::new()),
            resolver: AudienceResolver::new(),
            customers,
            log: log.clone(),
            sender,
            pipeline: Arc::new(DeliveryPipeline::new(&config.delivery, log)),
            events: EventPublisher::disabled(&config.node_id),
            runs: Arc::new(DashMap::new()),
        })
    }

    /// Route lifecycle and per-attempt events to `sink`.
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.events = EventPublisher::new(self.events.node_id(), sink);
        self.pipeline = Arc::new(
            DeliveryPipeline::new(&self.delivery_config, self.log.clone())
                .with_events(self.events.clone()),
        );
        self
    }

    // ─── Rules & audiences ─────────────────────────────────────────────────

    pub fn parse_rule(&self, text: &str) -> Result<SegmentRule, ParseError> {
        campaign_segmentation::parse(text)
    }

    /// Audience size the rule would produce right now. Evaluates the real
    /// rule over the customer store, like resolution does.
    pub fn preview_audience(&self, rule: &SegmentRule) -> CampaignResult<usize> {
        self.resolver.preview(rule, self.customers.as_ref())
    }

    // ─── Campaigns ─────────────────────────────────────────────────────────

    /// Parse the rule, store a draft, and resolve its audience.
    ///
    /// A parse failure stores nothing. A resolution failure leaves the
    /// campaign in `Draft` for [`Orchestrator::resolve_campaign`] to retry.
    pub fn create_campaign(&self, req: CreateCampaignRequest) -> CampaignResult<Campaign> {
        if req.name.trim().is_empty() {
            return Err(CampaignError::Validation("campaign name is required".into()));
        }
        let rule = self.parse_rule(&req.rule)?;
        let message = match (req.message.as_deref(), req.objective) {
            (Some(body), _) => Some(MessageTemplate::new(body)?),
            (None, Some(objective)) => suggest_messages(objective)
                .first()
                .map(|body| MessageTemplate::new(body))
                .transpose()?,
            (None, None) => None,
        };
        let draft = self
            .campaigns
            .insert_draft(req.name.trim(), rule, req.objective, message);
        self.emit(EventType::CampaignCreated, draft.id, Some(draft.status));

        self.resolve_campaign(&draft.id)
    }

    /// `Draft -> Created`: resolve the rule and freeze the audience.
    pub fn resolve_campaign(&self, id: &Uuid) -> CampaignResult<Campaign> {
        let campaign = self.get_campaign(id)?;
        CampaignStateMachine::validate(*id, campaign.status, CampaignStatus::Created)?;

        let audience = match self.resolver.resolve(&campaign.rule, self.customers.as_ref()) {
            Ok(audience) => audience,
            Err(e) => {
                warn!(campaign_id = %id, error = %e, "Audience resolution failed, campaign stays in draft");
                return Err(e);
            }
        };

        let created = self.campaigns.attach_audience(id, audience.member_ids)?;
        self.emit(EventType::AudienceResolved, *id, Some(created.status));
        info!(campaign_id = %id, audience = audience.count, "Campaign created");
        Ok(created)
    }

    pub fn get_campaign(&self, id: &Uuid) -> CampaignResult<Campaign> {
        self.campaigns.get(id).ok_or(CampaignError::NotFound(*id))
    }

    /// All campaigns, newest first.
    pub fn list_campaigns(&self) -> Vec<Campaign> {
        self.campaigns.list()
    }

    /// Canned message bodies for an objective, best fit first.
    pub fn suggest_messages(&self, objective: CampaignObjective) -> &'static [&'static str] {
        suggest_messages(objective)
    }

    /// The campaign's message as one customer would receive it. `None` when
    /// the campaign carries no message.
    pub fn render_message(
        &self,
        campaign_id: &Uuid,
        customer_id: &Uuid,
    ) -> CampaignResult<Option<String>> {
        let campaign = self.get_campaign(campaign_id)?;
        let Some(template) = campaign.message else {
            return Ok(None);
        };
        let customer = self.customers.get_customer(customer_id)?.ok_or_else(|| {
            CampaignError::Validation(format!("customer {} not found", customer_id))
        })?;
        Ok(Some(template.render(&customer)))
    }

    /// Delivery history for a campaign in append order.
    pub fn list_log_entries(&self, campaign_id: &Uuid) -> CampaignResult<Vec<DeliveryLogEntry>> {
        if self.campaigns.get(campaign_id).is_none() {
            return Err(CampaignError::NotFound(*campaign_id));
        }
        self.log.entries_for_campaign(campaign_id)
    }

    // ─── Delivery ──────────────────────────────────────────────────────────

    /// `Created -> Sending` and dispatch on a background task. Calling it
    /// again for the same campaign returns the live handle, or a settled one
    /// once the run is over, and never dispatches a second time. Must be
    /// called from within a Tokio runtime.
    pub fn start_delivery(&self, id: &Uuid) -> CampaignResult<DeliveryHandle> {
        let slot = match self.runs.entry(*id) {
            Entry::Occupied(existing) => return Ok(existing.get().clone()),
            Entry::Vacant(slot) => slot,
        };

        let campaign = match self.campaigns.begin_sending(id)? {
            StartDecision::Started(campaign) => campaign,
            StartDecision::AlreadyStarted(campaign) => {
                drop(slot);
                return Ok(self.settled_handle(&campaign));
            }
        };
        self.emit(EventType::DeliveryStarted, *id, Some(campaign.status));

        let audience: Vec<Uuid> = campaign.audience.iter().copied().collect();
        let progress = Arc::new(DeliveryProgress::new(audience.len()));
        let cancel = CancellationToken::new();
        let (status_tx, status_rx) = watch::channel(CampaignStatus::Sending);

        let handle = DeliveryHandle {
            campaign_id: *id,
            status: status_rx,
            progress: progress.clone(),
            cancel: cancel.clone(),
        };

        let campaign_id = *id;
        let campaigns = self.campaigns.clone();
        let pipeline = self.pipeline.clone();
        let sender = self.sender.clone();
        let events = self.events.clone();
        let runs = self.runs.clone();
        tokio::spawn(async move {
            let job = DeliveryJob {
                campaign_id,
                audience,
            };
            let outcome = pipeline.deliver(job, sender, cancel, progress).await;
            let terminal = outcome.terminal_status();

            let published = match campaigns.finish_sending(&campaign_id, terminal, outcome) {
                Ok(campaign) => campaign.status,
                Err(e) => {
                    error!(campaign_id = %campaign_id, error = %e, "Failed to record terminal state");
                    campaigns
                        .get(&campaign_id)
                        .map(|c| c.status)
                        .unwrap_or(terminal)
                }
            };

            let event_type = if published == CampaignStatus::Cancelled {
                EventType::DeliveryCancelled
            } else {
                EventType::DeliveryFinished
            };
            events.publish(event_type, campaign_id, None, Some(published));
            status_tx.send_replace(published);
            runs.remove(&campaign_id);
        });

        Ok(slot.insert(handle).clone())
    }

    /// Request cancellation of a running delivery. Returns the campaign's
    /// status at the time of the request; a finished campaign is left as is.
    pub fn cancel_delivery(&self, id: &Uuid) -> CampaignResult<CampaignStatus> {
        let campaign = self.get_campaign(id)?;
        match self.runs.get(id) {
            Some(handle) => {
                if !handle.is_finished() {
                    info!(campaign_id = %id, "Delivery cancellation requested");
                    handle.cancel();
                }
                Ok(handle.status())
            }
            None if campaign.status.is_terminal() => Ok(campaign.status),
            None => Err(CampaignError::InvalidTransition {
                campaign_id: *id,
                from: campaign.status,
                to: CampaignStatus::Cancelled,
                reason: "delivery has not started".into(),
            }),
        }
    }

    /// The live handle while delivery runs; a settled handle afterwards.
    /// `None` before delivery starts.
    pub fn delivery_handle(&self, id: &Uuid) -> Option<DeliveryHandle> {
        if let Some(handle) = self.runs.get(id) {
            return Some(handle.value().clone());
        }
        self.campaigns
            .get(id)
            .filter(|c| c.status.is_terminal())
            .map(|c| self.settled_handle(&c))
    }

    /// Number of deliveries currently running.
    pub fn active_runs(&self) -> usize {
        self.runs.len()
    }

    fn settled_handle(&self, campaign: &Campaign) -> DeliveryHandle {
        let attempts = match self.log.entries_for_campaign(&campaign.id) {
            Ok(entries) => entries.len() as u64,
            Err(e) => {
                warn!(campaign_id = %campaign.id, error = %e, "Delivery log unavailable");
                0
            }
        };
        DeliveryHandle::settled(campaign, attempts)
    }

    fn emit(&self, event_type: EventType, campaign_id: Uuid, status: Option<CampaignStatus>) {
        self.events.publish(event_type, campaign_id, None, status);
    }
}
