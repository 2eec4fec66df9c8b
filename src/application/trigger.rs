use std::sync::Arc;

use chrono::Utc;
use tracing::info;

use crate::{
    application::dispatcher::Dispatcher, domain::repositories::OutboundMessageRepository,
};

/// Starts dispatch loops when they are worth running instead of polling.
///
/// Insert events arrive through a bus worker that calls
/// [`Dispatcher::activate`] directly; this type covers the other half:
/// the one-time startup scan for rows queued while nothing was listening.
pub struct ActivationTrigger {
    dispatcher: Arc<Dispatcher>,
    queue: Arc<dyn OutboundMessageRepository>,
}

impl ActivationTrigger {
    pub fn new(dispatcher: Arc<Dispatcher>, queue: Arc<dyn OutboundMessageRepository>) -> Self {
        Self { dispatcher, queue }
    }

    /// Activates a loop for every account that already has eligible rows.
    /// Activation is idempotent, so overlapping with live insert events is
    /// harmless.
    pub async fn reconcile(&self) -> anyhow::Result<()> {
        let accounts = self.queue.accounts_with_eligible(Utc::now()).await?;
        if !accounts.is_empty() {
            info!(count = accounts.len(), "reconciling accounts with queued messages");
        }
        for account_id in accounts {
            self.dispatcher.activate(account_id);
        }
        Ok(())
    }
}
