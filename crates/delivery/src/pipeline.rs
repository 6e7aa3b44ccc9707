//! Delivery pipeline: fans a campaign's frozen audience out to a bounded
//! pool of workers, retries transport failures per member, and records one
//! log entry per attempt.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use campaign_core::config::DeliveryConfig;
use campaign_core::event_bus::EventPublisher;
use campaign_core::types::{CampaignStatus, DeliveryStatus, EventType};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::log::{new_entry, DeliveryLogStore};
use crate::retry::RetryPolicy;
use crate::sender::{MessageSender, SendError};

/// The members to deliver to for one campaign run.
#[derive(Debug, Clone)]
pub struct DeliveryJob {
    pub campaign_id: Uuid,
    pub audience: Vec<Uuid>,
}

/// How a single member's delivery ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberOutcome {
    Delivered,
    Failed,
    /// Cancelled while waiting to retry.
    Interrupted,
    /// Cancelled before the first attempt.
    NotStarted,
}

/// Aggregated result of a delivery run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryOutcome {
    pub campaign_id: Uuid,
    pub total: usize,
    pub delivered: usize,
    pub failed: usize,
    pub interrupted: usize,
    pub skipped: usize,
    pub cancelled: bool,
}

impl DeliveryOutcome {
    fn new(campaign_id: Uuid, total: usize) -> Self {
        Self {
            campaign_id,
            total,
            delivered: 0,
            failed: 0,
            interrupted: 0,
            skipped: 0,
            cancelled: false,
        }
    }

    fn tally(&mut self, outcome: MemberOutcome) {
        match outcome {
            MemberOutcome::Delivered => self.delivered += 1,
            MemberOutcome::Failed => self.failed += 1,
            MemberOutcome::Interrupted => self.interrupted += 1,
            MemberOutcome::NotStarted => self.skipped += 1,
        }
    }

    /// Terminal campaign state this outcome maps to. A cancelled run that
    /// left work undone is `Cancelled`; otherwise the success count decides.
    pub fn terminal_status(&self) -> CampaignStatus {
        if self.cancelled && self.interrupted + self.skipped > 0 {
            CampaignStatus::Cancelled
        } else if self.delivered == self.total {
            CampaignStatus::Completed
        } else if self.delivered == 0 {
            CampaignStatus::Failed
        } else {
            CampaignStatus::PartiallyFailed
        }
    }
}

/// Live counters for a run, shared between workers and pollers.
#[derive(Debug, Default)]
pub struct DeliveryProgress {
    total: AtomicUsize,
    attempts: AtomicU64,
    delivered: AtomicUsize,
    failed: AtomicUsize,
    unfinished: AtomicUsize,
    pending: AtomicUsize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub total: usize,
    pub attempts: u64,
    pub delivered: usize,
    pub failed: usize,
    /// Interrupted or never started because of cancellation.
    pub unfinished: usize,
    pub pending: usize,
}

impl DeliveryProgress {
    pub fn new(total: usize) -> Self {
        Self {
            total: AtomicUsize::new(total),
            pending: AtomicUsize::new(total),
            ..Default::default()
        }
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            total: self.total.load(Ordering::Acquire),
            attempts: self.attempts.load(Ordering::Acquire),
            delivered: self.delivered.load(Ordering::Acquire),
            failed: self.failed.load(Ordering::Acquire),
            unfinished: self.unfinished.load(Ordering::Acquire),
            pending: self.pending.load(Ordering::Acquire),
        }
    }

    /// Counters for a run that is already over, rebuilt from its summary.
    /// `attempts` is the number of log entries the run wrote.
    pub fn settled(outcome: &DeliveryOutcome, attempts: u64) -> Self {
        Self {
            total: AtomicUsize::new(outcome.total),
            attempts: AtomicU64::new(attempts),
            delivered: AtomicUsize::new(outcome.delivered),
            failed: AtomicUsize::new(outcome.failed),
            unfinished: AtomicUsize::new(outcome.interrupted + outcome.skipped),
            pending: AtomicUsize::new(0),
        }
    }

    fn record_attempt(&self) {
        self.attempts.fetch_add(1, Ordering::AcqRel);
    }

    /// Returns `true` for exactly one caller: the one finishing the last
    /// pending member.
    fn finish_member(&self, outcome: MemberOutcome) -> bool {
        match outcome {
            MemberOutcome::Delivered => self.delivered.fetch_add(1, Ordering::AcqRel),
            MemberOutcome::Failed => self.failed.fetch_add(1, Ordering::AcqRel),
            MemberOutcome::Interrupted | MemberOutcome::NotStarted => {
                self.unfinished.fetch_add(1, Ordering::AcqRel)
            }
        };
        self.pending.fetch_sub(1, Ordering::AcqRel) == 1
    }
}

pub struct DeliveryPipeline {
    policy: RetryPolicy,
    concurrency_limit: usize,
    log: Arc<dyn DeliveryLogStore>,
    events: EventPublisher,
}

impl DeliveryPipeline {
    pub fn new(config: &DeliveryConfig, log: Arc<dyn DeliveryLogStore>) -> Self {
        Self {
            policy: RetryPolicy::from(config),
            concurrency_limit: config.concurrency_limit.max(1),
            log,
            events: EventPublisher::disabled("local"),
        }
    }

    /// Publish a `DeliveryAttempted` event for every attempt.
    pub fn with_events(mut self, events: EventPublisher) -> Self {
        self.events = events;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Deliver to every member of `job.audience`, at most
    /// `concurrency_limit` at a time. Never fails: send errors end up in the
    /// log and the returned counts. After `cancel` fires, in-flight attempts
    /// finish but no new attempt starts.
    pub async fn deliver(
        &self,
        job: DeliveryJob,
        sender: Arc<dyn MessageSender>,
        cancel: CancellationToken,
        progress: Arc<DeliveryProgress>,
    ) -> DeliveryOutcome {
        let campaign_id = job.campaign_id;
        let mut outcome = DeliveryOutcome::new(campaign_id, job.audience.len());
        info!(
            campaign_id = %campaign_id,
            members = outcome.total,
            concurrency = self.concurrency_limit,
            max_retries = self.policy.max_retries,
            "Delivery run started"
        );

        let worker = MemberWorker {
            campaign_id,
            policy: self.policy.clone(),
            log: self.log.clone(),
            sender,
            events: self.events.clone(),
            cancel: cancel.clone(),
            progress: progress.clone(),
        };

        let semaphore = Arc::new(Semaphore::new(self.concurrency_limit));
        let mut workers = JoinSet::new();
        let mut members = job.audience.into_iter();

        while let Some(customer_id) = members.next() {
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                permit = semaphore.clone().acquire_owned() => permit.ok(),
            };
            let Some(permit) = permit else {
                let remaining = 1 + members.len();
                for _ in 0..remaining {
                    outcome.tally(MemberOutcome::NotStarted);
                    progress.finish_member(MemberOutcome::NotStarted);
                }
                debug!(campaign_id = %campaign_id, remaining, "Dispatch stopped by cancellation");
                break;
            };

            let worker = worker.clone();
            workers.spawn(async move {
                let _permit = permit;
                worker.run(customer_id).await
            });
        }

        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(member_outcome) => outcome.tally(member_outcome),
                Err(e) => {
                    // The worker died mid-attempt, so it never reported progress.
                    error!(campaign_id = %campaign_id, error = %e, "Delivery worker aborted");
                    outcome.tally(MemberOutcome::Failed);
                    progress.finish_member(MemberOutcome::Failed);
                }
            }
        }

        outcome.cancelled = cancel.is_cancelled();
        info!(
            campaign_id = %campaign_id,
            delivered = outcome.delivered,
            failed = outcome.failed,
            interrupted = outcome.interrupted,
            skipped = outcome.skipped,
            cancelled = outcome.cancelled,
            "Delivery run finished"
        );
        outcome
    }
}

/// Per-member delivery loop, cloned into each spawned task.
#[derive(Clone)]
struct MemberWorker {
    campaign_id: Uuid,
    policy: RetryPolicy,
    log: Arc<dyn DeliveryLogStore>,
    sender: Arc<dyn MessageSender>,
    events: EventPublisher,
    cancel: CancellationToken,
    progress: Arc<DeliveryProgress>,
}

impl MemberWorker {
    async fn run(&self, customer_id: Uuid) -> MemberOutcome {
        let outcome = self.attempt_until_settled(customer_id).await;

        let result = match outcome {
            MemberOutcome::Delivered => "delivered",
            MemberOutcome::Failed => "failed",
            MemberOutcome::Interrupted => "interrupted",
            MemberOutcome::NotStarted => "not_started",
        };
        metrics::counter!("delivery.members", "result" => result).increment(1);

        if self.progress.finish_member(outcome) {
            debug!(campaign_id = %self.campaign_id, "Last member settled");
        }
        outcome
    }

    async fn attempt_until_settled(&self, customer_id: Uuid) -> MemberOutcome {
        if self.cancel.is_cancelled() {
            return MemberOutcome::NotStarted;
        }

        let max_attempts = self.policy.max_attempts();
        let mut attempt = 1u32;
        loop {
            self.progress.record_attempt();
            let result = self.sender.send(customer_id).await;

            match result {
                Ok(receipt) => {
                    debug!(
                        campaign_id = %self.campaign_id,
                        customer_id = %customer_id,
                        attempt,
                        provider_message_id = ?receipt.provider_message_id,
                        "Message sent"
                    );
                    self.record(customer_id, DeliveryStatus::Sent, attempt, None);
                    return MemberOutcome::Delivered;
                }
                Err(SendError::PermanentRejection(reason)) => {
                    warn!(
                        campaign_id = %self.campaign_id,
                        customer_id = %customer_id,
                        attempt,
                        reason = %reason,
                        "Message permanently rejected"
                    );
                    self.record(customer_id, DeliveryStatus::Failed, attempt, Some(reason));
                    return MemberOutcome::Failed;
                }
                Err(SendError::Transport(reason)) if attempt >= max_attempts => {
                    warn!(
                        campaign_id = %self.campaign_id,
                        customer_id = %customer_id,
                        attempt,
                        reason = %reason,
                        "Retries exhausted"
                    );
                    self.record(
                        customer_id,
                        DeliveryStatus::Failed,
                        attempt,
                        Some(format!("retries exhausted: {}", reason)),
                    );
                    return MemberOutcome::Failed;
                }
                Err(SendError::Transport(reason)) => {
                    let delay = self.policy.backoff_after(attempt, &customer_id);
                    debug!(
                        campaign_id = %self.campaign_id,
                        customer_id = %customer_id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        reason = %reason,
                        "Transport failure, will retry"
                    );
                    self.record(customer_id, DeliveryStatus::Retrying, attempt, Some(reason));

                    tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => return MemberOutcome::Interrupted,
                        _ = tokio::time::sleep(delay) => {}
                    }
                    attempt += 1;
                }
            }
        }
    }

    fn record(&self, customer_id: Uuid, status: DeliveryStatus, attempt: u32, detail: Option<String>) {
        let label = match status {
            DeliveryStatus::Sent => "sent",
            DeliveryStatus::Failed => "failed",
            DeliveryStatus::Retrying => "retrying",
        };
        metrics::counter!("delivery.attempts", "outcome" => label).increment(1);

        let entry = new_entry(self.campaign_id, customer_id, status, attempt, detail);
        if let Err(e) = self.log.append(entry) {
            // The attempt already happened; losing its log row must not stop delivery.
            error!(
                campaign_id = %self.campaign_id,
                customer_id = %customer_id,
                attempt,
                error = %e,
                "Failed to append delivery log entry"
            );
            metrics::counter!("delivery.log_append_errors").increment(1);
        }

        self.events
            .publish(EventType::DeliveryAttempted, self.campaign_id, Some(customer_id), None);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::log::InMemoryDeliveryLog;
    use crate::sender::DeliveryReceipt;
    use async_trait::async_trait;
    use dashmap::DashMap;
    use std::collections::VecDeque;
    use std::time::Duration;

    /// Plays back a per-member script of results; once a script runs out the
    /// member's last result repeats. Unscripted members succeed.
    #[derive(Default)]
    struct ScriptedSender {
        scripts: DashMap<Uuid, VecDeque<Result<(), SendError>>>,
        calls: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        delay: Option<Duration>,
    }

    impl ScriptedSender {
        fn script(self, member: Uuid, results: Vec<Result<(), SendError>>) -> Self {
            self.scripts.insert(member, results.into());
            self
        }
    }

    #[async_trait]
    impl MessageSender for ScriptedSender {
        async fn send(&self, customer_id: Uuid) -> Result<DeliveryReceipt, SendError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            let result = match self.scripts.get_mut(&customer_id) {
                Some(mut script) if script.len() > 1 => script.pop_front().unwrap(),
                Some(script) => script.front().cloned().unwrap_or(Ok(())),
                None => Ok(()),
            };
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            result.map(|_| DeliveryReceipt::default())
        }
    }

    fn fast_config() -> DeliveryConfig {
        DeliveryConfig {
            max_retries: 3,
            concurrency_limit: 4,
            initial_backoff_ms: 1,
            max_backoff_ms: 5,
            backoff_multiplier: 2.0,
            jitter: false,
        }
    }

    fn transport() -> Result<(), SendError> {
        Err(SendError::Transport("timeout".into()))
    }

    async fn run(
        config: &DeliveryConfig,
        sender: ScriptedSender,
        audience: Vec<Uuid>,
    ) -> (DeliveryOutcome, Arc<InMemoryDeliveryLog>, Arc<ScriptedSender>) {
        let log = Arc::new(InMemoryDeliveryLog::new());
        let pipeline = DeliveryPipeline::new(config, log.clone());
        let sender = Arc::new(sender);
        let progress = Arc::new(DeliveryProgress::new(audience.len()));
        let outcome = pipeline
            .deliver(
                DeliveryJob {
                    campaign_id: Uuid::new_v4(),
                    audience,
                },
                sender.clone(),
                CancellationToken::new(),
                progress.clone(),
            )
            .await;
        assert_eq!(progress.snapshot().pending, 0);
        (outcome, log, sender)
    }

    #[tokio::test]
    async fn test_all_members_delivered() {
        let audience: Vec<Uuid> = (0..25).map(|_| Uuid::new_v4()).collect();
        let (outcome, log, sender) = run(&fast_config(), ScriptedSender::default(), audience).await;

        assert_eq!(outcome.delivered, 25);
        assert_eq!(outcome.terminal_status(), CampaignStatus::Completed);
        let entries = log.entries_for_campaign(&outcome.campaign_id).unwrap();
        assert_eq!(entries.len(), 25);
        assert!(entries.iter().all(|e| e.status == DeliveryStatus::Sent && e.attempt == 1));
        assert_eq!(sender.calls.load(Ordering::SeqCst), 25);
    }

    #[tokio::test]
    async fn test_always_failing_member_exhausts_retries() {
        let member = Uuid::new_v4();
        let sender = ScriptedSender::default().script(member, vec![transport()]);
        let (outcome, log, _) = run(&fast_config(), sender, vec![member]).await;

        let entries = log.entries_for_member(&outcome.campaign_id, &member);
        let statuses: Vec<_> = entries.iter().map(|e| e.status).collect();
        assert_eq!(
            statuses,
            vec![
                DeliveryStatus::Retrying,
                DeliveryStatus::Retrying,
                DeliveryStatus::Retrying,
                DeliveryStatus::Failed,
            ]
        );
        let attempts: Vec<u32> = entries.iter().map(|e| e.attempt).collect();
        assert_eq!(attempts, vec![1, 2, 3, 4]);
        assert_eq!(outcome.terminal_status(), CampaignStatus::Failed);
    }

    #[tokio::test]
    async fn test_success_on_second_attempt() {
        let member = Uuid::new_v4();
        let sender = ScriptedSender::default().script(member, vec![transport(), Ok(())]);
        let (outcome, log, _) = run(&fast_config(), sender, vec![member]).await;

        let entries = log.entries_for_member(&outcome.campaign_id, &member);
        assert_eq!(entries.len(), 2);
        assert_eq!((entries[0].status, entries[0].attempt), (DeliveryStatus::Retrying, 1));
        assert_eq!((entries[1].status, entries[1].attempt), (DeliveryStatus::Sent, 2));
        assert_eq!(entries[0].detail.as_deref(), Some("timeout"));
        assert_eq!(outcome.terminal_status(), CampaignStatus::Completed);
    }

    #[tokio::test]
    async fn test_permanent_rejection_not_retried() {
        let good = Uuid::new_v4();
        let bad = Uuid::new_v4();
        let sender = ScriptedSender::default().script(
            bad,
            vec![Err(SendError::PermanentRejection("invalid recipient".into()))],
        );
        let (outcome, log, sender) = run(&fast_config(), sender, vec![good, bad]).await;

        let entries = log.entries_for_member(&outcome.campaign_id, &bad);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].status, DeliveryStatus::Failed);
        assert_eq!(sender.calls.load(Ordering::SeqCst), 2);
        assert_eq!(outcome.terminal_status(), CampaignStatus::PartiallyFailed);
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let mut config = fast_config();
        config.concurrency_limit = 3;
        let sender = ScriptedSender {
            delay: Some(Duration::from_millis(5)),
            ..Default::default()
        };
        let audience: Vec<Uuid> = (0..20).map(|_| Uuid::new_v4()).collect();
        let (outcome, _, sender) = run(&config, sender, audience).await;

        assert_eq!(outcome.delivered, 20);
        let peak = sender.max_in_flight.load(Ordering::SeqCst);
        assert!(peak <= 3, "peak in-flight sends was {}", peak);
    }

    #[tokio::test]
    async fn test_cancel_before_start_skips_everyone() {
        let log = Arc::new(InMemoryDeliveryLog::new());
        let pipeline = DeliveryPipeline::new(&fast_config(), log.clone());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let audience: Vec<Uuid> = (0..5).map(|_| Uuid::new_v4()).collect();
        let progress = Arc::new(DeliveryProgress::new(audience.len()));

        let outcome = pipeline
            .deliver(
                DeliveryJob {
                    campaign_id: Uuid::new_v4(),
                    audience,
                },
                Arc::new(ScriptedSender::default()),
                cancel,
                progress.clone(),
            )
            .await;

        assert_eq!(outcome.skipped, 5);
        assert_eq!(outcome.terminal_status(), CampaignStatus::Cancelled);
        assert_eq!(log.total_entries(), 0);
        assert_eq!(progress.snapshot().unfinished, 5);
    }

    #[tokio::test]
    async fn test_cancel_mid_retry_stops_new_attempts() {
        let mut config = fast_config();
        config.initial_backoff_ms = 10_000;
        config.max_backoff_ms = 10_000;
        let member = Uuid::new_v4();
        let sender = ScriptedSender::default().script(member, vec![transport()]);

        let log = Arc::new(InMemoryDeliveryLog::new());
        let pipeline = Arc::new(DeliveryPipeline::new(&config, log.clone()));
        let cancel = CancellationToken::new();
        let progress = Arc::new(DeliveryProgress::new(1));
        let campaign_id = Uuid::new_v4();

        let run = {
            let pipeline = pipeline.clone();
            let cancel = cancel.clone();
            let progress = progress.clone();
            tokio::spawn(async move {
                pipeline
                    .deliver(
                        DeliveryJob {
                            campaign_id,
                            audience: vec![member],
                        },
                        Arc::new(sender),
                        cancel,
                        progress,
                    )
                    .await
            })
        };

        // Wait for the first attempt to be logged, then cancel during backoff.
        while log.total_entries() == 0 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        cancel.cancel();
        let outcome = tokio::time::timeout(Duration::from_secs(5), run)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(outcome.interrupted, 1);
        assert!(outcome.cancelled);
        assert_eq!(outcome.terminal_status(), CampaignStatus::Cancelled);
        assert_eq!(log.entries_for_member(&campaign_id, &member).len(), 1);
    }

    #[test]
    fn test_terminal_status_table() {
        let mut o = DeliveryOutcome::new(Uuid::nil(), 3);
        o.delivered = 3;
        assert_eq!(o.terminal_status(), CampaignStatus::Completed);
        o.delivered = 1;
        o.failed = 2;
        assert_eq!(o.terminal_status(), CampaignStatus::PartiallyFailed);
        o.delivered = 0;
        o.failed = 3;
        assert_eq!(o.terminal_status(), CampaignStatus::Failed);

        // Cancellation that arrived after everything settled changes nothing.
        o.cancelled = true;
        assert_eq!(o.terminal_status(), CampaignStatus::Failed);
        o.failed = 2;
        o.skipped = 1;
        assert_eq!(o.terminal_status(), CampaignStatus::Cancelled);
    }

    #[test]
    fn test_progress_reports_last_member_once() {
        let progress = DeliveryProgress::new(3);
        assert!(!progress.finish_member(MemberOutcome::Delivered));
        assert!(!progress.finish_member(MemberOutcome::Failed));
        assert!(progress.finish_member(MemberOutcome::Delivered));
        let snap = progress.snapshot();
        assert_eq!((snap.delivered, snap.failed, snap.pending), (2, 1, 0));
    }

    #[tokio::test]
    async fn test_every_attempt_is_published() {
        use campaign_core::event_bus::CaptureSink;

        let member = Uuid::new_v4();
        let sender = Arc::new(ScriptedSender::default().script(member, vec![transport(), Ok(())]));
        let sink = Arc::new(CaptureSink::new());
        let log = Arc::new(InMemoryDeliveryLog::new());
        let pipeline = DeliveryPipeline::new(&fast_config(), log)
            .with_events(EventPublisher::new("node-03", sink.clone()));
        let campaign_id = Uuid::new_v4();

        pipeline
            .deliver(
                DeliveryJob {
                    campaign_id,
                    audience: vec![member],
                },
                sender,
                CancellationToken::new(),
                Arc::new(DeliveryProgress::new(1)),
            )
            .await;

        let events = sink.for_campaign(&campaign_id);
        assert_eq!(events.len(), 2);
        assert!(events
            .iter()
            .all(|e| e.event_type == EventType::DeliveryAttempted && e.customer_id == Some(member)));
        assert!(events.iter().all(|e| e.node_id == "node-03"));
    }

    #[test]
    fn test_settled_progress_mirrors_outcome() {
        let mut outcome = DeliveryOutcome::new(Uuid::nil(), 5);
        outcome.delivered = 2;
        outcome.failed = 1;
        outcome.interrupted = 1;
        outcome.skipped = 1;
        outcome.cancelled = true;

        let snap = DeliveryProgress::settled(&outcome, 7).snapshot();
        assert_eq!(
            snap,
            ProgressSnapshot {
                total: 5,
                attempts: 7,
                delivered: 2,
                failed: 1,
                unfinished: 2,
                pending: 0,
            }
        );
    }
}
