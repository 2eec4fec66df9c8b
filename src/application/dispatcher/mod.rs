use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use rand::Rng;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    application::services::send_channel::SendChannel,
    domain::{
        models::{ChannelStatus, MessageStatus, RatePolicy},
        repositories::{
            ChannelStatusRepository, OutboundMessageRepository, RatePolicyRepository,
        },
    },
};

/// Fixed inter-message delay applied when the account has no active policy.
const FALLBACK_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Prefix applied to recipient numbers that arrive without one.
    pub default_country_code: String,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            default_country_code: "55".to_string(),
        }
    }
}

/// Per-account daily/batch bookkeeping. Only touched while the in-flight
/// claim is held, so a plain mutex is enough.
struct PacingCounters {
    batch_count: u32,
    daily_sent: u32,
    last_reset_day: NaiveDate,
}

struct AccountState {
    send_in_flight: AtomicBool,
    cooldown_active: AtomicBool,
    loop_active: AtomicBool,
    counters: Mutex<PacingCounters>,
}

impl AccountState {
    fn new() -> Self {
        Self {
            send_in_flight: AtomicBool::new(false),
            cooldown_active: AtomicBool::new(false),
            loop_active: AtomicBool::new(false),
            counters: Mutex::new(PacingCounters {
                batch_count: 0,
                daily_sent: 0,
                last_reset_day: Utc::now().date_naive(),
            }),
        }
    }
}

/// Releases the in-flight claim on every exit path, including `?`.
struct InFlightGuard<'a>(&'a AtomicBool);

impl<'a> InFlightGuard<'a> {
    fn claim(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
            .then_some(Self(flag))
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

enum Cycle {
    /// A delivery attempt was made (success or failure); `delay` is how long
    /// the loop waits before the next iteration.
    Attempted {
        delay: Duration,
        cooldown_started: bool,
    },
    /// Queue empty or gated; nothing was attempted.
    Idle,
}

/// Drains the per-account outbound queue: selects the single oldest eligible
/// message, attempts delivery through the channel, records the terminal
/// outcome, and paces itself per the account's rate policy.
pub struct Dispatcher {
    queue: Arc<dyn OutboundMessageRepository>,
    policies: Arc<dyn RatePolicyRepository>,
    channel_status: Arc<dyn ChannelStatusRepository>,
    channel: Arc<dyn SendChannel>,
    config: DispatcherConfig,
    accounts: RwLock<HashMap<Uuid, Arc<AccountState>>>,
}

impl Dispatcher {
    pub fn new(
        queue: Arc<dyn OutboundMessageRepository>,
        policies: Arc<dyn RatePolicyRepository>,
        channel_status: Arc<dyn ChannelStatusRepository>,
        channel: Arc<dyn SendChannel>,
        config: DispatcherConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            queue,
            policies,
            channel_status,
            channel,
            config,
            accounts: RwLock::new(HashMap::new()),
        })
    }

    /// Attempts exactly one delivery for the account. Returns `true` when a
    /// message was selected and an attempt was made, `false` when the cycle
    /// was gated (channel down, cap reached, cool-down, another send in
    /// flight) or the queue had no eligible row.
    ///
    /// Never propagates errors: internal failures are logged and count as
    /// no work done.
    pub async fn process_next(&self, account_id: Uuid) -> bool {
        let state = self.account_state(account_id).await;
        matches!(self.cycle(account_id, &state).await, Cycle::Attempted { .. })
    }

    /// Runs dispatch cycles for the account until no eligible work remains,
    /// sleeping the policy-derived delay between attempts. Idempotent: a
    /// second call while a loop is active returns immediately.
    pub async fn run_loop(self: Arc<Self>, account_id: Uuid) {
        let state = self.account_state(account_id).await;
        if state.loop_active.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!(%account_id, "dispatch loop started");

        loop {
            match self.cycle(account_id, &state).await {
                Cycle::Attempted {
                    delay,
                    cooldown_started,
                } => {
                    tokio::time::sleep(delay).await;
                    if cooldown_started {
                        // The timer task clears this too; whichever runs
                        // first wins and the second store is a no-op.
                        state.cooldown_active.store(false, Ordering::SeqCst);
                    }
                }
                Cycle::Idle => break,
            }
        }

        state.loop_active.store(false, Ordering::SeqCst);
        debug!(%account_id, "dispatch loop idle");
    }

    /// Spawns `run_loop` for the account; safe to call on every activation.
    pub fn activate(self: &Arc<Self>, account_id: Uuid) {
        let dispatcher = Arc::clone(self);
        tokio::spawn(dispatcher.run_loop(account_id));
    }

    async fn cycle(&self, account_id: Uuid, state: &Arc<AccountState>) -> Cycle {
        if state.cooldown_active.load(Ordering::SeqCst) {
            return Cycle::Idle;
        }
        let Some(_claim) = InFlightGuard::claim(&state.send_in_flight) else {
            return Cycle::Idle;
        };

        match self.attempt(account_id, state).await {
            Ok(cycle) => cycle,
            Err(err) => {
                warn!(%account_id, error = %err, "dispatch cycle failed");
                Cycle::Idle
            }
        }
    }

    async fn attempt(&self, account_id: Uuid, state: &Arc<AccountState>) -> anyhow::Result<Cycle> {
        // Connectivity gate comes first so a dead channel costs nothing
        // beyond the status lookup.
        if !self.channel_status.get(account_id).await?.is_connected() {
            debug!(%account_id, "channel not connected, skipping dispatch");
            return Ok(Cycle::Idle);
        }

        let policy = self.policies.get(account_id).await?.unwrap_or_default();

        {
            let mut counters = state.counters.lock().await;
            let today = Utc::now().date_naive();
            if counters.last_reset_day != today {
                counters.daily_sent = 0;
                counters.last_reset_day = today;
            }
            if policy.active {
                if let Some(cap) = policy.daily_cap {
                    if counters.daily_sent >= cap {
                        debug!(%account_id, cap, "daily cap reached, skipping dispatch");
                        return Ok(Cycle::Idle);
                    }
                }
            }
        }

        let Some(message) = self.queue.next_eligible(account_id, Utc::now()).await? else {
            return Ok(Cycle::Idle);
        };

        let recipient = normalize_recipient(&message.recipient, &self.config.default_country_code);
        let mut cooldown_started = false;

        match self.channel.send(account_id, &recipient, &message.body).await {
            Ok(()) => {
                self.queue
                    .update_status(message.id, MessageStatus::Sent)
                    .await?;
                debug!(%account_id, message_id = %message.id, "message sent");

                let mut counters = state.counters.lock().await;
                counters.daily_sent += 1;
                if policy.active {
                    counters.batch_count += 1;
                    if counters.batch_count >= policy.batch_size {
                        counters.batch_count = 0;
                        cooldown_started = true;
                    }
                }
            }
            Err(err) => {
                // One attempt per message: the failure is terminal and a
                // re-send must be enqueued as a new row.
                self.queue
                    .update_status(
                        message.id,
                        MessageStatus::Failed {
                            reason: err.reason().to_string(),
                        },
                    )
                    .await?;
                warn!(%account_id, message_id = %message.id, error = %err, "delivery failed");

                if err.is_channel_error() {
                    self.channel_status
                        .set(account_id, ChannelStatus::Disconnected)
                        .await?;
                    warn!(%account_id, "channel marked disconnected after send failure");
                }
            }
        }

        let delay = if cooldown_started {
            self.start_cooldown(state, Duration::from_secs(policy.batch_cooldown_s));
            Duration::from_secs(policy.batch_cooldown_s)
        } else {
            next_delay(&policy)
        };

        Ok(Cycle::Attempted {
            delay,
            cooldown_started,
        })
    }

    /// Raises the cool-down gate and schedules the timer that lowers it.
    /// Messages keep accumulating in the store while the gate is up.
    fn start_cooldown(&self, state: &Arc<AccountState>, cooldown: Duration) {
        state.cooldown_active.store(true, Ordering::SeqCst);
        let state = Arc::clone(state);
        tokio::spawn(async move {
            tokio::time::sleep(cooldown).await;
            state.cooldown_active.store(false, Ordering::SeqCst);
        });
    }

    async fn account_state(&self, account_id: Uuid) -> Arc<AccountState> {
        if let Some(state) = self.accounts.read().await.get(&account_id) {
            return Arc::clone(state);
        }
        let mut accounts = self.accounts.write().await;
        Arc::clone(
            accounts
                .entry(account_id)
                .or_insert_with(|| Arc::new(AccountState::new())),
        )
    }
}

/// Delay before the next attempt under normal pacing (no cool-down).
fn next_delay(policy: &RatePolicy) -> Duration {
    if !policy.active {
        return FALLBACK_DELAY;
    }
    let min = policy.min_interval_s;
    let max = policy.max_interval_s.max(min);
    let secs = if policy.jitter_enabled && max > min {
        rand::thread_rng().gen_range(min..=max)
    } else {
        min
    };
    Duration::from_secs(secs)
}

/// Strips formatting from a phone number and prefixes the country code when
/// the number arrives without one.
fn normalize_recipient(raw: &str, default_country_code: &str) -> String {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() > 11 && digits.starts_with(default_country_code) {
        digits
    } else {
        format!("{default_country_code}{digits}")
    }
}
