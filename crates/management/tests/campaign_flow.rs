//! End-to-end campaign flows through the orchestrator: ingestion, rule
//! parsing, audience resolution, delivery, and history.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use campaign_cdp::InMemoryCustomerStore;
use campaign_core::config::AppConfig;
use campaign_core::store::{CustomerSource, CustomerStore};
use campaign_core::types::{CampaignStatus, Customer, DeliveryStatus, NewCustomer};
use campaign_core::{CampaignError, CampaignResult};
use campaign_delivery::{DeliveryReceipt, InMemoryDeliveryLog, MessageSender, SendError};
use campaign_management::{CampaignObjective, CreateCampaignRequest, Orchestrator};
use tokio::sync::{Barrier, Semaphore};
use tokio::task::JoinSet;
use uuid::Uuid;

#[derive(Default)]
struct CountingSender {
    calls: AtomicUsize,
    reject: Option<Uuid>,
}

#[async_trait]
impl MessageSender for CountingSender {
    async fn send(&self, customer_id: Uuid) -> Result<DeliveryReceipt, SendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.reject == Some(customer_id) {
            return Err(SendError::PermanentRejection("invalid recipient".into()));
        }
        Ok(DeliveryReceipt {
            provider_message_id: Some(format!("msg-{}", customer_id)),
        })
    }
}

struct DownSender;

#[async_trait]
impl MessageSender for DownSender {
    async fn send(&self, _customer_id: Uuid) -> Result<DeliveryReceipt, SendError> {
        Err(SendError::Transport("connection reset".into()))
    }
}

/// Holds every send until the test opens the gate.
struct GatedSender {
    calls: AtomicUsize,
    gate: Semaphore,
}

impl GatedSender {
    fn closed() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            gate: Semaphore::new(0),
        }
    }
}

#[async_trait]
impl MessageSender for GatedSender {
    async fn send(&self, _customer_id: Uuid) -> Result<DeliveryReceipt, SendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let _permit = self
            .gate
            .acquire()
            .await
            .map_err(|_| SendError::Transport("gate closed".into()))?;
        Ok(DeliveryReceipt::default())
    }
}

/// Customer source that can be switched offline.
struct FlakySource {
    inner: Arc<InMemoryCustomerStore>,
    offline: AtomicBool,
}

impl CustomerSource for FlakySource {
    fn scan(&self, visit: &mut dyn FnMut(&Customer)) -> CampaignResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(CampaignError::Resolution("customer store unreachable".into()));
        }
        self.inner.scan(visit)
    }

    fn get_customer(&self, id: &Uuid) -> CampaignResult<Option<Customer>> {
        self.inner.get_customer(id)
    }
}

fn add(store: &InMemoryCustomerStore, name: &str, spend: f64, visits: u32) -> Customer {
    store
        .insert_customer(NewCustomer {
            name: name.into(),
            email: format!("{}@example.com", name.to_lowercase()),
            spend,
            visits,
        })
        .unwrap()
}

/// The three-customer dataset: spend {20000, 5000, 12000}, visits {1, 5, 2}.
fn seeded_store() -> (Arc<InMemoryCustomerStore>, [Customer; 3]) {
    let store = Arc::new(InMemoryCustomerStore::new());
    let a = add(&store, "Ana", 20_000.0, 1);
    let b = add(&store, "Ben", 5_000.0, 5);
    let c = add(&store, "Cleo", 12_000.0, 2);
    (store, [a, b, c])
}

fn orchestrator(
    customers: Arc<dyn CustomerSource>,
    log: Arc<InMemoryDeliveryLog>,
    sender: Arc<dyn MessageSender>,
) -> Orchestrator {
    Orchestrator::new(&AppConfig::default(), customers, log, sender).unwrap()
}

fn request(rule: &str) -> CreateCampaignRequest {
    CreateCampaignRequest {
        name: "high value".into(),
        rule: rule.into(),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_high_value_campaign_end_to_end() {
    let (store, [a, _b, c]) = seeded_store();
    let log = Arc::new(InMemoryDeliveryLog::new());
    let orch = orchestrator(store, log.clone(), Arc::new(CountingSender::default()));

    let rule = orch.parse_rule("spend > 10000 AND visits < 3").unwrap();
    assert_eq!(orch.preview_audience(&rule).unwrap(), 2);

    let campaign = orch.create_campaign(request("spend > 10000 AND visits < 3")).unwrap();
    assert_eq!(campaign.status, CampaignStatus::Created);
    assert_eq!(campaign.audience, BTreeSet::from([a.id, c.id]));

    let handle = orch.start_delivery(&campaign.id).unwrap();
    assert_eq!(handle.wait().await, CampaignStatus::Completed);

    let entries = orch.list_log_entries(&campaign.id).unwrap();
    assert_eq!(entries.len(), 2);
    assert!(entries.iter().all(|e| e.status == DeliveryStatus::Sent && e.attempt == 1));

    let finished = orch.get_campaign(&campaign.id).unwrap();
    assert_eq!(finished.status, CampaignStatus::Completed);
    let summary = finished.delivery.unwrap();
    assert_eq!((summary.total, summary.delivered), (2, 2));
    assert_eq!(handle.progress().pending, 0);
}

#[tokio::test]
async fn test_audience_snapshot_is_frozen() {
    let (store, [a, _b, c]) = seeded_store();
    let orch = orchestrator(
        store.clone(),
        Arc::new(InMemoryDeliveryLog::new()),
        Arc::new(CountingSender::default()),
    );
    let campaign = orch.create_campaign(request("spend > 10000")).unwrap();

    // Customer data moves on after creation.
    add(&store, "Dee", 99_000.0, 0);
    store.deactivate_customer(&a.id).unwrap();
    let rule = orch.parse_rule("spend > 10000").unwrap();
    assert_eq!(orch.preview_audience(&rule).unwrap(), 2);

    let reread = orch.get_campaign(&campaign.id).unwrap();
    assert_eq!(reread.audience, BTreeSet::from([a.id, c.id]));
}

#[tokio::test]
async fn test_start_delivery_twice_dispatches_once() {
    let (store, _) = seeded_store();
    let sender = Arc::new(CountingSender::default());
    let orch = orchestrator(store, Arc::new(InMemoryDeliveryLog::new()), sender.clone());
    let campaign = orch.create_campaign(request("visits >= 1")).unwrap();

    let first = orch.start_delivery(&campaign.id).unwrap();
    let second = orch.start_delivery(&campaign.id).unwrap();
    assert_eq!(first.wait().await, CampaignStatus::Completed);
    assert_eq!(second.wait().await, CampaignStatus::Completed);

    // Starting a finished campaign is a no-op too.
    let third = orch.start_delivery(&campaign.id).unwrap();
    assert_eq!(third.status(), CampaignStatus::Completed);

    assert_eq!(sender.calls.load(Ordering::SeqCst), 3);
    assert_eq!(orch.list_log_entries(&campaign.id).unwrap().len(), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_starts_share_one_run() {
    const CALLERS: usize = 8;
    let (store, _) = seeded_store();
    let log = Arc::new(InMemoryDeliveryLog::new());
    let sender = Arc::new(GatedSender::closed());
    let orch = Arc::new(orchestrator(store, log, sender.clone()));
    let campaign = orch.create_campaign(request("visits >= 1")).unwrap();
    assert_eq!(campaign.audience_size(), 3);

    let barrier = Arc::new(Barrier::new(CALLERS));
    let mut callers = JoinSet::new();
    for _ in 0..CALLERS {
        let orch = orch.clone();
        let barrier = barrier.clone();
        let id = campaign.id;
        callers.spawn(async move {
            barrier.wait().await;
            orch.start_delivery(&id)
        });
    }

    let mut handles = Vec::new();
    while let Some(joined) = callers.join_next().await {
        handles.push(joined.unwrap().unwrap());
    }
    assert_eq!(handles.len(), CALLERS);
    assert!(handles.iter().all(|h| h.same_run(&handles[0])));
    assert!(handles.iter().all(|h| h.status() == CampaignStatus::Sending));
    assert_eq!(orch.active_runs(), 1);

    sender.gate.add_permits(CALLERS);
    for handle in &handles {
        let status = tokio::time::timeout(Duration::from_secs(5), handle.wait())
            .await
            .unwrap();
        assert_eq!(status, CampaignStatus::Completed);
    }

    assert_eq!(sender.calls.load(Ordering::SeqCst), campaign.audience_size());
    assert_eq!(
        orch.list_log_entries(&campaign.id).unwrap().len(),
        campaign.audience_size()
    );
}

#[tokio::test]
async fn test_objective_message_renders_per_member() {
    let (store, [a, _b, c]) = seeded_store();
    let orch = orchestrator(
        store,
        Arc::new(InMemoryDeliveryLog::new()),
        Arc::new(CountingSender::default()),
    );
    let campaign = orch
        .create_campaign(CreateCampaignRequest {
            name: "come back".into(),
            rule: "spend > 10000 AND visits < 3".into(),
            objective: Some(CampaignObjective::WinBack),
            message: None,
        })
        .unwrap();
    assert_eq!(campaign.objective, Some(CampaignObjective::WinBack));

    let for_ana = orch.render_message(&campaign.id, &a.id).unwrap().unwrap();
    let for_cleo = orch.render_message(&campaign.id, &c.id).unwrap().unwrap();
    assert!(for_ana.contains("Ana"));
    assert!(for_cleo.contains("Cleo"));
    assert!(!for_ana.contains("{{"));

    let stored = orch.get_campaign(&campaign.id).unwrap();
    let json = serde_json::to_value(&stored).unwrap();
    assert_eq!(json["objective"], "win_back");
    assert_eq!(
        json["message"],
        orch.suggest_messages(CampaignObjective::WinBack)[0]
    );
}

#[tokio::test]
async fn test_permanent_rejection_gives_partial_failure() {
    let (store, [a, _b, c]) = seeded_store();
    let sender = Arc::new(CountingSender {
        reject: Some(c.id),
        ..Default::default()
    });
    let orch = orchestrator(store, Arc::new(InMemoryDeliveryLog::new()), sender);
    let campaign = orch.create_campaign(request("spend > 10000")).unwrap();

    let handle = orch.start_delivery(&campaign.id).unwrap();
    assert_eq!(handle.wait().await, CampaignStatus::PartiallyFailed);

    let entries = orch.list_log_entries(&campaign.id).unwrap();
    let failed: Vec<_> = entries.iter().filter(|e| e.status == DeliveryStatus::Failed).collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].customer_id, c.id);
    assert!(entries.iter().any(|e| e.customer_id == a.id && e.status == DeliveryStatus::Sent));
}

#[test]
fn test_preview_matches_resolution() {
    let (store, _) = seeded_store();
    add(&store, "Eve", 0.0, 0);
    let orch = orchestrator(
        store,
        Arc::new(InMemoryDeliveryLog::new()),
        Arc::new(CountingSender::default()),
    );

    for rule in [
        "spend > 10000 AND visits < 3",
        "spend >= 5000 OR visits == 0",
        "NOT status == Inactive",
        "(spend < 1 OR visits > 4) AND NOT email == 'ben@example.com'",
        "spend > 1000000",
    ] {
        let parsed = orch.parse_rule(rule).unwrap();
        let preview = orch.preview_audience(&parsed).unwrap();
        let campaign = orch.create_campaign(request(rule)).unwrap();
        assert_eq!(preview, campaign.audience_size(), "rule: {}", rule);
    }
}

#[test]
fn test_resolution_failure_keeps_draft() {
    let (store, _) = seeded_store();
    let source = Arc::new(FlakySource {
        inner: store,
        offline: AtomicBool::new(true),
    });
    let orch = orchestrator(
        source.clone(),
        Arc::new(InMemoryDeliveryLog::new()),
        Arc::new(CountingSender::default()),
    );

    let err = orch.create_campaign(request("spend > 10000")).unwrap_err();
    assert!(matches!(err, CampaignError::Resolution(_)));

    let drafts = orch.list_campaigns();
    assert_eq!(drafts.len(), 1);
    assert_eq!(drafts[0].status, CampaignStatus::Draft);
    assert!(drafts[0].audience.is_empty());

    source.offline.store(false, Ordering::SeqCst);
    let created = orch.resolve_campaign(&drafts[0].id).unwrap();
    assert_eq!(created.status, CampaignStatus::Created);
    assert_eq!(created.audience_size(), 2);
}

#[tokio::test]
async fn test_invalid_transitions_are_reported() {
    let (store, _) = seeded_store();
    let orch = orchestrator(
        store,
        Arc::new(InMemoryDeliveryLog::new()),
        Arc::new(CountingSender::default()),
    );

    // Nobody matches: Created with an empty snapshot cannot send.
    let empty = orch.create_campaign(request("spend > 1000000")).unwrap();
    match orch.start_delivery(&empty.id) {
        Err(CampaignError::InvalidTransition { from, to, .. }) => {
            assert_eq!(from, CampaignStatus::Created);
            assert_eq!(to, CampaignStatus::Sending);
        }
        other => panic!("expected InvalidTransition, got {:?}", other),
    }
    assert_eq!(orch.get_campaign(&empty.id).unwrap().status, CampaignStatus::Created);

    // Resolving twice is not allowed either.
    assert!(matches!(
        orch.resolve_campaign(&empty.id),
        Err(CampaignError::InvalidTransition { .. })
    ));

    assert!(matches!(
        orch.start_delivery(&Uuid::new_v4()),
        Err(CampaignError::NotFound(_))
    ));
    assert!(matches!(
        orch.list_log_entries(&Uuid::new_v4()),
        Err(CampaignError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_cancel_mid_run_lands_in_cancelled() {
    let (store, _) = seeded_store();
    let mut config = AppConfig::default();
    config.delivery.initial_backoff_ms = 10_000;
    config.delivery.max_backoff_ms = 10_000;
    config.delivery.jitter = false;
    let orch = Orchestrator::new(
        &config,
        store,
        Arc::new(InMemoryDeliveryLog::new()),
        Arc::new(DownSender),
    )
    .unwrap();
    let campaign = orch.create_campaign(request("spend > 10000")).unwrap();

    let handle = orch.start_delivery(&campaign.id).unwrap();
    while handle.progress().attempts < 2 {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    assert_eq!(orch.cancel_delivery(&campaign.id).unwrap(), CampaignStatus::Sending);

    let status = tokio::time::timeout(Duration::from_secs(5), handle.wait())
        .await
        .unwrap();
    assert_eq!(status, CampaignStatus::Cancelled);

    let finished = orch.get_campaign(&campaign.id).unwrap();
    assert_eq!(finished.status, CampaignStatus::Cancelled);
    assert_eq!(finished.delivery.unwrap().interrupted, 2);
    let entries = orch.list_log_entries(&campaign.id).unwrap();
    assert!(entries.iter().all(|e| e.status == DeliveryStatus::Retrying));

    // Cancelling again after the fact changes nothing.
    assert_eq!(orch.cancel_delivery(&campaign.id).unwrap(), CampaignStatus::Cancelled);
}

#[test]
fn test_orders_count_after_aggregation() {
    let (store, [_a, b, _c]) = seeded_store();
    let orch = orchestrator(
        store.clone(),
        Arc::new(InMemoryDeliveryLog::new()),
        Arc::new(CountingSender::default()),
    );
    let rule = orch.parse_rule("spend > 10000").unwrap();

    store.record_order("ord-1", &b.id, 6_000.0).unwrap();
    assert_eq!(orch.preview_audience(&rule).unwrap(), 2);

    store.aggregate_orders().unwrap();
    assert_eq!(orch.preview_audience(&rule).unwrap(), 3);
}
