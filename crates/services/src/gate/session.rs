use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

use super::decision::EntitlementFlags;
use crate::entitlement::ports::{EntitlementError, EntitlementService, Plan, StatusSummary};
use crate::TenantId;

/// Ticket handed out when a status refresh starts. Tickets are issued in a
/// strictly increasing order, so a response carrying an older ticket than
/// the last applied one is known to be stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct RefreshTicket(u64);

/// Entitlement state observed by gate consumers. `summary` stays `None`
/// until the first refresh resolves.
#[derive(Debug, Clone, Default)]
pub struct EntitlementState {
    ticket: u64,
    pub summary: Option<StatusSummary>,
}

impl EntitlementState {
    pub fn flags(&self) -> Option<EntitlementFlags> {
        self.summary.as_ref().map(|s| EntitlementFlags {
            trial_active: s.trial_active,
            is_subscribed: s.is_subscribed,
        })
    }

    pub fn plan(&self) -> Option<Plan> {
        self.summary.as_ref().map(|s| s.plan)
    }
}

/// Observable per-session entitlement store. Holds the latest reconciled
/// status summary and pushes changes to subscribers; out-of-order responses
/// from superseded refreshes are discarded, never applied.
pub struct SessionStore {
    service: Arc<dyn EntitlementService>,
    tx: watch::Sender<EntitlementState>,
    next_ticket: AtomicU64,
}

impl SessionStore {
    pub fn new(service: Arc<dyn EntitlementService>) -> Self {
        let (tx, _) = watch::channel(EntitlementState::default());
        Self {
            service,
            tx,
            next_ticket: AtomicU64::new(1),
        }
    }

    /// Reserve a ticket for a refresh about to start. Must be taken before
    /// the network call, not when the response arrives.
    pub fn begin_refresh(&self) -> RefreshTicket {
        RefreshTicket(self.next_ticket.fetch_add(1, Ordering::SeqCst))
    }

    /// Apply a resolved summary unless a newer refresh already landed.
    /// Returns whether the summary was accepted.
    pub fn apply(&self, ticket: RefreshTicket, summary: StatusSummary) -> bool {
        self.tx.send_if_modified(|state| {
            if ticket.0 > state.ticket {
                state.ticket = ticket.0;
                state.summary = Some(summary);
                true
            } else {
                tracing::debug!(
                    "Discarding stale status response: ticket={}, applied={}",
                    ticket.0,
                    state.ticket
                );
                false
            }
        })
    }

    /// Run a full refresh cycle against the reconciler. Returns whether the
    /// result was applied (`false` means a newer refresh won the race).
    pub async fn refresh(
        &self,
        tenant_id: TenantId,
        email: Option<&str>,
    ) -> Result<bool, EntitlementError> {
        let ticket = self.begin_refresh();
        let summary = self.service.check_status(tenant_id, email).await?;
        Ok(self.apply(ticket, summary))
    }

    /// Snapshot of the current state.
    pub fn state(&self) -> EntitlementState {
        self.tx.borrow().clone()
    }

    /// Watch for state changes.
    pub fn subscribe(&self) -> watch::Receiver<EntitlementState> {
        self.tx.subscribe()
    }
}
