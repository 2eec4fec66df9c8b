use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tokio::sync::Mutex;
use tokio::time::Instant;
use uuid::Uuid;

use outbox::{
    ActivationTrigger, ChannelStatus, Dispatcher, DispatcherConfig, MessageStatus, RatePolicy,
    SendChannel, SendError,
    application::usecases::{
        enqueue_message::{EnqueueMessageRequest, EnqueueMessageUseCase},
        list_messages::{ListMessagesRequest, ListMessagesUseCase},
    },
    domain::{
        errors::DomainError,
        models::{NewOutboundMessage, OutboundMessage},
        repositories::{ChannelStatusRepository, OutboundMessageRepository, RatePolicyRepository},
    },
    infrastructure::{
        messaging::local::LocalBus,
        repositories::in_memory::{
            InMemoryChannelStatusRepository, InMemoryOutboundMessageRepository,
            InMemoryRatePolicyRepository,
        },
    },
};

/// Scriptable channel double: outcomes are popped per send, default success.
#[derive(Default)]
struct StubChannel {
    sent: Mutex<Vec<(Uuid, String, String)>>,
    script: Mutex<VecDeque<Result<(), SendError>>>,
    latency: Duration,
}

impl StubChannel {
    fn with_latency(latency: Duration) -> Self {
        Self {
            latency,
            ..Self::default()
        }
    }

    async fn fail_next(&self, error: SendError) {
        self.script.lock().await.push_back(Err(error));
    }

    async fn sent_bodies(&self) -> Vec<String> {
        self.sent
            .lock()
            .await
            .iter()
            .map(|(_, _, body)| body.clone())
            .collect()
    }
}

#[async_trait]
impl SendChannel for StubChannel {
    async fn send(&self, account_id: Uuid, recipient: &str, body: &str) -> Result<(), SendError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let outcome = self.script.lock().await.pop_front().unwrap_or(Ok(()));
        if outcome.is_ok() {
            self.sent
                .lock()
                .await
                .push((account_id, recipient.to_string(), body.to_string()));
        }
        outcome
    }
}

/// Counts store traffic so gated-skip tests can assert it stayed at zero.
struct CountingQueue {
    inner: Arc<InMemoryOutboundMessageRepository>,
    reads: AtomicUsize,
    writes: AtomicUsize,
}

impl CountingQueue {
    fn new(inner: Arc<InMemoryOutboundMessageRepository>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            reads: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl OutboundMessageRepository for CountingQueue {
    async fn insert(&self, message: NewOutboundMessage) -> anyhow::Result<OutboundMessage> {
        self.inner.insert(message).await
    }

    async fn next_eligible(
        &self,
        account_id: Uuid,
        now: DateTime<Utc>,
    ) -> anyhow::Result<Option<OutboundMessage>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.next_eligible(account_id, now).await
    }

    async fn update_status(&self, message_id: Uuid, status: MessageStatus) -> anyhow::Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.update_status(message_id, status).await
    }

    async fn get(&self, message_id: Uuid) -> anyhow::Result<Option<OutboundMessage>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.get(message_id).await
    }

    async fn list_by_account(
        &self,
        account_id: Uuid,
        limit: Option<u32>,
        offset: Option<u32>,
    ) -> anyhow::Result<(Vec<OutboundMessage>, bool)> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.list_by_account(account_id, limit, offset).await
    }

    async fn accounts_with_eligible(&self, now: DateTime<Utc>) -> anyhow::Result<Vec<Uuid>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.accounts_with_eligible(now).await
    }
}

/// Delegating queue whose selection can be made to fail on demand.
struct FaultyQueue {
    inner: Arc<InMemoryOutboundMessageRepository>,
    fail_selection: AtomicBool,
}

impl FaultyQueue {
    fn new(inner: Arc<InMemoryOutboundMessageRepository>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            fail_selection: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl OutboundMessageRepository for FaultyQueue {
    async fn insert(&self, message: NewOutboundMessage) -> anyhow::Result<OutboundMessage> {
        self.inner.insert(message).await
    }

    async fn next_eligible(
        &self,
        account_id: Uuid,
        now: DateTime<Utc>,
    ) -> anyhow::Result<Option<OutboundMessage>> {
        if self.fail_selection.load(Ordering::SeqCst) {
            anyhow::bail!("storage offline");
        }
        self.inner.next_eligible(account_id, now).await
    }

    async fn update_status(&self, message_id: Uuid, status: MessageStatus) -> anyhow::Result<()> {
        self.inner.update_status(message_id, status).await
    }

    async fn get(&self, message_id: Uuid) -> anyhow::Result<Option<OutboundMessage>> {
        self.inner.get(message_id).await
    }

    async fn list_by_account(
        &self,
        account_id: Uuid,
        limit: Option<u32>,
        offset: Option<u32>,
    ) -> anyhow::Result<(Vec<OutboundMessage>, bool)> {
        self.inner.list_by_account(account_id, limit, offset).await
    }

    async fn accounts_with_eligible(&self, now: DateTime<Utc>) -> anyhow::Result<Vec<Uuid>> {
        self.inner.accounts_with_eligible(now).await
    }
}

struct Harness {
    dispatcher: Arc<Dispatcher>,
    queue: Arc<InMemoryOutboundMessageRepository>,
    policies: Arc<InMemoryRatePolicyRepository>,
    channel_status: Arc<InMemoryChannelStatusRepository>,
    channel: Arc<StubChannel>,
    account_id: Uuid,
}

impl Harness {
    async fn connected(channel: StubChannel) -> Self {
        let queue = Arc::new(InMemoryOutboundMessageRepository::new());
        let policies = Arc::new(InMemoryRatePolicyRepository::new());
        let channel_status = Arc::new(InMemoryChannelStatusRepository::new());
        let channel = Arc::new(channel);
        let account_id = Uuid::new_v4();

        channel_status
            .set(account_id, ChannelStatus::Connected)
            .await
            .expect("set status");

        let dispatcher = Dispatcher::new(
            queue.clone(),
            policies.clone(),
            channel_status.clone(),
            channel.clone(),
            DispatcherConfig::default(),
        );

        Self {
            dispatcher,
            queue,
            policies,
            channel_status,
            channel,
            account_id,
        }
    }

    async fn set_policy(&self, policy: RatePolicy) {
        self.policies
            .upsert(self.account_id, policy)
            .await
            .expect("upsert policy");
    }

    async fn enqueue(&self, body: &str) -> OutboundMessage {
        self.enqueue_due(body, None).await
    }

    async fn enqueue_due(&self, body: &str, due_at: Option<DateTime<Utc>>) -> OutboundMessage {
        self.queue
            .insert(NewOutboundMessage {
                account_id: self.account_id,
                recipient: "11999998888".to_string(),
                body: body.to_string(),
                due_at,
            })
            .await
            .expect("insert message")
    }

    async fn status_of(&self, message_id: Uuid) -> MessageStatus {
        self.queue
            .get(message_id)
            .await
            .expect("get message")
            .expect("message exists")
            .status
    }
}

fn paced_policy() -> RatePolicy {
    RatePolicy {
        min_interval_s: 1,
        max_interval_s: 1,
        batch_size: 100,
        batch_cooldown_s: 20,
        daily_cap: None,
        jitter_enabled: false,
        active: true,
    }
}

#[tokio::test]
async fn attempts_oldest_eligible_message_first() {
    let harness = Harness::connected(StubChannel::default()).await;
    harness.enqueue("first").await;
    harness.enqueue("second").await;

    assert!(harness.dispatcher.process_next(harness.account_id).await);
    assert!(harness.dispatcher.process_next(harness.account_id).await);

    assert_eq!(harness.channel.sent_bodies().await, vec!["first", "second"]);
}

#[tokio::test(start_paused = true)]
async fn concurrent_process_next_makes_exactly_one_attempt() {
    let harness = Harness::connected(StubChannel::with_latency(Duration::from_secs(1))).await;
    harness.enqueue("only").await;
    harness.enqueue("later").await;

    let (first, second) = tokio::join!(
        harness.dispatcher.process_next(harness.account_id),
        harness.dispatcher.process_next(harness.account_id),
    );

    // One call wins the in-flight claim; the loser is a pure no-op.
    assert!(first ^ second, "expected exactly one attempt, got {first}/{second}");
    assert_eq!(harness.channel.sent_bodies().await, vec!["only"]);
}

#[tokio::test]
async fn disconnected_channel_skips_without_touching_the_queue() {
    let inner = Arc::new(InMemoryOutboundMessageRepository::new());
    let queue = CountingQueue::new(inner.clone());
    let policies = Arc::new(InMemoryRatePolicyRepository::new());
    let channel_status = Arc::new(InMemoryChannelStatusRepository::new());
    let channel = Arc::new(StubChannel::default());
    let account_id = Uuid::new_v4();

    inner
        .insert(NewOutboundMessage {
            account_id,
            recipient: "11999998888".to_string(),
            body: "stuck".to_string(),
            due_at: None,
        })
        .await
        .expect("insert");
    channel_status
        .set(account_id, ChannelStatus::Disconnected)
        .await
        .expect("set status");

    let dispatcher = Dispatcher::new(
        queue.clone(),
        policies,
        channel_status,
        channel.clone(),
        DispatcherConfig::default(),
    );

    assert!(!dispatcher.process_next(account_id).await);
    assert_eq!(queue.reads.load(Ordering::SeqCst), 0);
    assert_eq!(queue.writes.load(Ordering::SeqCst), 0);
    assert!(channel.sent.lock().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn batch_cooldown_delays_the_next_attempt() {
    let harness = Harness::connected(StubChannel::default()).await;
    harness
        .set_policy(RatePolicy {
            batch_size: 3,
            ..paced_policy()
        })
        .await;
    for n in 0..4 {
        harness.enqueue(&format!("m{n}")).await;
    }

    let started = Instant::now();
    harness
        .dispatcher
        .clone()
        .run_loop(harness.account_id)
        .await;
    let elapsed = started.elapsed();

    assert_eq!(harness.channel.sent_bodies().await.len(), 4);
    // 1s after m1 and m2, 20s cool-down after m3, 1s after m4.
    assert!(
        elapsed >= Duration::from_secs(23) && elapsed < Duration::from_secs(24),
        "unexpected loop duration {elapsed:?}"
    );
}

#[tokio::test(start_paused = true)]
async fn daily_cap_stops_dispatch_for_the_day() {
    let harness = Harness::connected(StubChannel::default()).await;
    harness
        .set_policy(RatePolicy {
            daily_cap: Some(2),
            ..paced_policy()
        })
        .await;
    let third = {
        harness.enqueue("one").await;
        harness.enqueue("two").await;
        harness.enqueue("three").await
    };

    harness
        .dispatcher
        .clone()
        .run_loop(harness.account_id)
        .await;

    assert_eq!(harness.channel.sent_bodies().await, vec!["one", "two"]);
    assert_eq!(harness.status_of(third.id).await, MessageStatus::Pending);
    // Still capped: further cycles stay no-ops until the day rolls over.
    assert!(!harness.dispatcher.process_next(harness.account_id).await);
}

#[tokio::test]
async fn failed_message_is_terminal_and_never_reselected() {
    let harness = Harness::connected(StubChannel::default()).await;
    harness
        .channel
        .fail_next(SendError::Rejected("number does not exist".into()))
        .await;
    let message = harness.enqueue("doomed").await;

    // The failure still counts as an attempt.
    assert!(harness.dispatcher.process_next(harness.account_id).await);
    assert_eq!(
        harness.status_of(message.id).await,
        MessageStatus::Failed {
            reason: "number does not exist".into()
        }
    );

    // Terminal: nothing left to select.
    assert!(!harness.dispatcher.process_next(harness.account_id).await);
    assert!(harness.channel.sent_bodies().await.is_empty());
}

#[tokio::test]
async fn storage_errors_release_the_claim_and_stop_the_loop() {
    let queue = FaultyQueue::new(Arc::new(InMemoryOutboundMessageRepository::new()));
    let policies = Arc::new(InMemoryRatePolicyRepository::new());
    let channel_status = Arc::new(InMemoryChannelStatusRepository::new());
    let channel = Arc::new(StubChannel::default());
    let account_id = Uuid::new_v4();

    channel_status
        .set(account_id, ChannelStatus::Connected)
        .await
        .expect("set status");
    queue
        .insert(NewOutboundMessage {
            account_id,
            recipient: "11999998888".to_string(),
            body: "survivor".to_string(),
            due_at: None,
        })
        .await
        .expect("insert message");

    let dispatcher = Dispatcher::new(
        queue.clone(),
        policies,
        channel_status,
        channel.clone(),
        DispatcherConfig::default(),
    );

    // While selection errors, a cycle reports no work done and the loop
    // winds down without touching the channel.
    queue.fail_selection.store(true, Ordering::SeqCst);
    assert!(!dispatcher.process_next(account_id).await);
    dispatcher.clone().run_loop(account_id).await;
    assert!(channel.sent_bodies().await.is_empty());

    // The error must not leave the claim or loop flag stuck: once storage
    // recovers, the same account dispatches normally.
    queue.fail_selection.store(false, Ordering::SeqCst);
    assert!(dispatcher.process_next(account_id).await);
    assert_eq!(channel.sent_bodies().await, vec!["survivor".to_string()]);
}

#[tokio::test]
async fn channel_level_failure_flips_the_status_gate() {
    let harness = Harness::connected(StubChannel::default()).await;
    harness
        .channel
        .fail_next(SendError::ChannelDown("Connection Closed".into()))
        .await;
    let first = harness.enqueue("first").await;
    let second = harness.enqueue("second").await;

    assert!(harness.dispatcher.process_next(harness.account_id).await);
    assert!(matches!(
        harness.status_of(first.id).await,
        MessageStatus::Failed { .. }
    ));
    assert_eq!(
        harness
            .channel_status
            .get(harness.account_id)
            .await
            .expect("get status"),
        ChannelStatus::Disconnected
    );

    // The gate now short-circuits; the second message stays queued.
    assert!(!harness.dispatcher.process_next(harness.account_id).await);
    assert_eq!(harness.status_of(second.id).await, MessageStatus::Pending);
}

#[tokio::test(start_paused = true)]
async fn inactive_policy_uses_fallback_pacing_and_skips_gates() {
    let harness = Harness::connected(StubChannel::default()).await;
    // Stored values that would stall dispatch if they were honored.
    harness
        .set_policy(RatePolicy {
            min_interval_s: 100,
            max_interval_s: 200,
            batch_size: 1,
            batch_cooldown_s: 500,
            daily_cap: Some(1),
            jitter_enabled: true,
            active: false,
        })
        .await;
    for n in 0..3 {
        harness.enqueue(&format!("m{n}")).await;
    }

    let started = Instant::now();
    harness
        .dispatcher
        .clone()
        .run_loop(harness.account_id)
        .await;
    let elapsed = started.elapsed();

    assert_eq!(harness.channel.sent_bodies().await.len(), 3);
    // Three attempts at the fixed 5s fallback delay, no cool-down, no cap.
    assert!(
        elapsed >= Duration::from_secs(15) && elapsed < Duration::from_secs(16),
        "unexpected loop duration {elapsed:?}"
    );
}

#[tokio::test(start_paused = true)]
async fn paced_run_drains_queue_with_jitter_and_cooldown() {
    let harness = Harness::connected(StubChannel::default()).await;
    harness
        .set_policy(RatePolicy {
            min_interval_s: 10,
            max_interval_s: 15,
            batch_size: 2,
            batch_cooldown_s: 20,
            daily_cap: None,
            jitter_enabled: true,
            active: true,
        })
        .await;
    for n in 0..3 {
        harness.enqueue(&format!("m{n}")).await;
    }

    let started = Instant::now();
    harness
        .dispatcher
        .clone()
        .run_loop(harness.account_id)
        .await;
    let elapsed = started.elapsed();

    assert_eq!(harness.channel.sent_bodies().await, vec!["m0", "m1", "m2"]);
    // Jittered delay after m0 and m2 (10..=15 each), 20s cool-down after m1.
    assert!(
        elapsed >= Duration::from_secs(40) && elapsed <= Duration::from_secs(50),
        "unexpected loop duration {elapsed:?}"
    );
    // Loop self-terminated; a fresh cycle finds nothing.
    assert!(!harness.dispatcher.process_next(harness.account_id).await);
}

#[tokio::test(start_paused = true)]
async fn duplicate_activation_does_not_double_send() {
    let harness = Harness::connected(StubChannel::default()).await;
    harness.enqueue("a").await;
    harness.enqueue("b").await;

    tokio::join!(
        harness.dispatcher.clone().run_loop(harness.account_id),
        harness.dispatcher.clone().run_loop(harness.account_id),
    );

    assert_eq!(harness.channel.sent_bodies().await, vec!["a", "b"]);
}

#[tokio::test(start_paused = true)]
async fn deferred_message_waits_for_its_due_time() {
    let harness = Harness::connected(StubChannel::default()).await;
    let message = harness
        .enqueue_due("later", Some(Utc::now() + ChronoDuration::hours(1)))
        .await;
    assert_eq!(harness.status_of(message.id).await, MessageStatus::Scheduled);

    assert!(!harness.dispatcher.process_next(harness.account_id).await);

    let due_now = harness
        .enqueue_due("now", Some(Utc::now() - ChronoDuration::minutes(1)))
        .await;
    assert!(harness.dispatcher.process_next(harness.account_id).await);
    assert_eq!(harness.status_of(due_now.id).await, MessageStatus::Sent);
}

#[tokio::test(start_paused = true)]
async fn enqueue_event_wakes_the_dispatch_loop() {
    let harness = Harness::connected(StubChannel::default()).await;
    let (bus, worker) = LocalBus::new();
    let worker_handle = worker.spawn(harness.dispatcher.clone());

    let usecase = EnqueueMessageUseCase::new(harness.queue.clone(), bus);
    let response = usecase
        .execute(EnqueueMessageRequest {
            account_id: harness.account_id,
            recipient: "(11) 99999-8888".to_string(),
            body: "hello".to_string(),
            due_at: None,
        })
        .await
        .expect("enqueue");

    // Let the worker activate the loop and the loop finish its one cycle.
    tokio::time::sleep(Duration::from_secs(10)).await;

    assert_eq!(
        harness.status_of(response.message_id).await,
        MessageStatus::Sent
    );
    let sent = harness.channel.sent.lock().await;
    assert_eq!(sent.len(), 1);
    // Recipient was normalized before hitting the channel.
    assert_eq!(sent[0].1, "5511999998888");
    drop(sent);

    worker_handle.abort();
}

#[tokio::test]
async fn enqueue_rejects_blank_input() {
    let harness = Harness::connected(StubChannel::default()).await;
    let (bus, _worker) = LocalBus::new();
    let usecase = EnqueueMessageUseCase::new(harness.queue.clone(), bus);

    let result = usecase
        .execute(EnqueueMessageRequest {
            account_id: harness.account_id,
            recipient: "  ".to_string(),
            body: "hello".to_string(),
            due_at: None,
        })
        .await;

    assert!(matches!(result, Err(DomainError::Validation(_))));
}

#[tokio::test]
async fn terminal_rows_are_visible_through_the_history_listing() {
    let harness = Harness::connected(StubChannel::default()).await;
    harness
        .channel
        .fail_next(SendError::Rejected("invalid recipient".into()))
        .await;
    for n in 0..3 {
        harness.enqueue(&format!("m{n}")).await;
    }
    for _ in 0..3 {
        harness.dispatcher.process_next(harness.account_id).await;
    }

    let usecase = ListMessagesUseCase::new(harness.queue.clone());
    let page = usecase
        .execute(ListMessagesRequest {
            account_id: harness.account_id,
            limit: Some(2),
            offset: None,
        })
        .await
        .expect("list messages");

    assert!(page.has_more);
    assert_eq!(page.messages.len(), 2);
    assert!(matches!(
        page.messages[0].status,
        MessageStatus::Failed { .. }
    ));
    assert_eq!(page.messages[1].status, MessageStatus::Sent);
}

#[tokio::test(start_paused = true)]
async fn startup_reconciliation_activates_accounts_with_queued_rows() {
    let harness = Harness::connected(StubChannel::default()).await;
    let other_account = Uuid::new_v4();
    harness
        .channel_status
        .set(other_account, ChannelStatus::Connected)
        .await
        .expect("set status");

    harness.enqueue("mine").await;
    harness
        .queue
        .insert(NewOutboundMessage {
            account_id: other_account,
            recipient: "11988887777".to_string(),
            body: "theirs".to_string(),
            due_at: None,
        })
        .await
        .expect("insert");

    let trigger = ActivationTrigger::new(harness.dispatcher.clone(), harness.queue.clone());
    trigger.reconcile().await.expect("reconcile");

    tokio::time::sleep(Duration::from_secs(10)).await;

    let mut bodies = harness.channel.sent_bodies().await;
    bodies.sort();
    assert_eq!(bodies, vec!["mine", "theirs"]);
}
