use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

use super::ports::{
    EntitlementError, EntitlementService, Plan, PlanLimitsRepository, PriceInfo, Profile,
    ProfileRepository, SnapshotRepository, StatusSummary, SubscriptionPrices,
    SubscriptionSnapshot, SubscriptionSummary,
};
use crate::billing::ports::{
    BillingEvent, BillingProvider, ProviderCheckoutSession, ProviderSubscription,
};
use crate::TenantId;

/// Configuration for EntitlementServiceImpl
pub struct EntitlementServiceConfig {
    pub profile_repo: Arc<dyn ProfileRepository>,
    pub snapshot_repo: Arc<dyn SnapshotRepository>,
    pub plan_limits_repo: Arc<dyn PlanLimitsRepository>,
    pub billing: Arc<dyn BillingProvider>,
    pub price_monthly: Option<String>,
    pub price_quarterly: Option<String>,
    pub price_semiannual: Option<String>,
}

pub struct EntitlementServiceImpl {
    profile_repo: Arc<dyn ProfileRepository>,
    snapshot_repo: Arc<dyn SnapshotRepository>,
    plan_limits_repo: Arc<dyn PlanLimitsRepository>,
    billing: Arc<dyn BillingProvider>,
    price_monthly: Option<String>,
    price_quarterly: Option<String>,
    price_semiannual: Option<String>,
}

/// Derive the plan and plan start from the provider's subscription state.
/// `None` means the provider positively reported no subscription; a
/// provider failure must never reach this function.
///
/// The plan start is preserved across renewals of an already-pro tenant,
/// stamped from the current period on upgrade, and cleared on downgrade.
pub(crate) fn derive_entitlement(
    current_plan: Plan,
    current_started_at: Option<DateTime<Utc>>,
    subscription: Option<&ProviderSubscription>,
) -> (Plan, Option<DateTime<Utc>>) {
    match subscription {
        Some(sub) if sub.status.is_pro_eligible() => {
            let started_at = match (current_plan, current_started_at) {
                (Plan::Pro, Some(ts)) => Some(ts),
                _ => Some(sub.current_period_start),
            };
            (Plan::Pro, started_at)
        }
        _ => (Plan::Free, None),
    }
}

/// Query keys stamped on checkout redirect URLs. Both are stripped before
/// the new flag is set, so a return URL that already carries one (a tenant
/// re-subscribing from a post-checkout page) cannot end up with both.
const CHECKOUT_FLAGS: [&str; 2] = ["success", "canceled"];

/// Set a boolean query flag on an absolute http(s) URL, replacing any
/// existing checkout flag.
fn with_query_flag(return_url: &str, key: &str) -> Result<String, EntitlementError> {
    let parsed = url::Url::parse(return_url)
        .map_err(|e| EntitlementError::InvalidRedirect(e.to_string()))?;
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return Err(EntitlementError::InvalidRedirect(format!(
            "Unsupported scheme: {}",
            parsed.scheme()
        )));
    }

    let kept: Vec<(String, String)> = parsed
        .query_pairs()
        .filter(|(k, _)| !CHECKOUT_FLAGS.contains(&k.as_ref()))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    let mut url = parsed;
    url.set_query(None);
    {
        let mut pairs = url.query_pairs_mut();
        for (k, v) in &kept {
            pairs.append_pair(k, v);
        }
        pairs.append_pair(key, "true");
    }
    Ok(url.to_string())
}

impl EntitlementServiceImpl {
    pub fn new(config: EntitlementServiceConfig) -> Self {
        Self {
            profile_repo: config.profile_repo,
            snapshot_repo: config.snapshot_repo,
            plan_limits_repo: config.plan_limits_repo,
            billing: config.billing,
            price_monthly: config.price_monthly,
            price_quarterly: config.price_quarterly,
            price_semiannual: config.price_semiannual,
        }
    }

    /// Persist the reconciled state for a provider-reported subscription:
    /// the snapshot row, then the derived entitlement fields in a single
    /// profile update.
    async fn apply_subscription(
        &self,
        profile: &Profile,
        sub: &ProviderSubscription,
    ) -> Result<(Plan, SubscriptionSnapshot), EntitlementError> {
        let (plan, plan_started_at) =
            derive_entitlement(profile.plan, profile.plan_started_at, Some(sub));

        let snapshot = self
            .snapshot_repo
            .upsert_snapshot(SubscriptionSnapshot {
                id: sub.id.clone(),
                tenant_id: profile.id,
                price_id: sub.price_id.clone(),
                status: sub.status,
                current_period_start: sub.current_period_start,
                current_period_end: sub.current_period_end,
                cancel_at_period_end: sub.cancel_at_period_end,
                amount: sub.amount,
                currency: sub.currency.clone(),
                interval: sub.interval.clone(),
                interval_count: sub.interval_count,
                billing_customer_id: Some(sub.customer_id.clone()),
                raw: sub.raw.clone(),
                updated_at: Utc::now(),
            })
            .await?;

        let new_customer = (profile.billing_customer_id.as_deref() != Some(sub.customer_id.as_str()))
            .then_some(sub.customer_id.as_str());
        self.profile_repo
            .update_entitlement(profile.id, plan, plan_started_at, new_customer)
            .await?;

        tracing::info!(
            "Entitlement reconciled: tenant_id={}, plan={}, status={}, subscription_id={}",
            profile.id,
            plan,
            sub.status,
            sub.id
        );

        Ok((plan, snapshot))
    }

    /// Record a positively-reported absence of any subscription.
    async fn apply_no_subscription(&self, profile: &Profile) -> Result<(), EntitlementError> {
        let (plan, plan_started_at) =
            derive_entitlement(profile.plan, profile.plan_started_at, None);
        self.profile_repo
            .update_entitlement(profile.id, plan, plan_started_at, None)
            .await?;

        if profile.plan != plan {
            tracing::info!(
                "Entitlement reconciled: tenant_id={}, plan={} (no subscription)",
                profile.id,
                plan
            );
        }
        Ok(())
    }

    async fn build_summary(
        &self,
        plan: Plan,
        trial_active: bool,
        snapshot: Option<&SubscriptionSnapshot>,
    ) -> Result<StatusSummary, EntitlementError> {
        let free_limits = match plan {
            Plan::Free => Some(self.plan_limits_repo.free_plan_limits().await?),
            Plan::Pro => None,
        };

        Ok(StatusSummary {
            plan,
            is_subscribed: plan == Plan::Pro,
            trial_active,
            subscription: snapshot.map(SubscriptionSummary::from),
            free_limits,
        })
    }

    /// Stored state answer for when the provider cannot be reached. The
    /// plan is left exactly as it was.
    async fn stored_summary(&self, profile: &Profile) -> Result<StatusSummary, EntitlementError> {
        let snapshot = self.snapshot_repo.latest_for_tenant(profile.id).await?;
        self.build_summary(
            profile.plan,
            profile.trial_active(Utc::now()),
            snapshot.as_ref(),
        )
        .await
    }

    /// Find the customer id for a profile, recovering a lost mapping by
    /// email when possible. `Ok(None)` means the provider answered and no
    /// customer exists for this tenant.
    async fn resolve_customer(
        &self,
        profile: &Profile,
        email: Option<&str>,
    ) -> Result<Option<String>, EntitlementError> {
        if let Some(customer_id) = &profile.billing_customer_id {
            return Ok(Some(customer_id.clone()));
        }

        let Some(email) = email else {
            return Ok(None);
        };

        match self.billing.find_customer_by_email(email).await? {
            Some(customer_id) => {
                self.profile_repo
                    .set_billing_customer(profile.id, &customer_id)
                    .await?;
                tracing::info!(
                    "Recovered billing customer by email: tenant_id={}, customer_id={}",
                    profile.id,
                    customer_id
                );
                Ok(Some(customer_id))
            }
            None => Ok(None),
        }
    }

    async fn resolve_webhook_tenant(
        &self,
        tenant_ref: Option<TenantId>,
        customer_id: Option<&str>,
    ) -> Result<Option<Profile>, EntitlementError> {
        if let Some(tenant_id) = tenant_ref {
            if let Some(profile) = self.profile_repo.get_profile(tenant_id).await? {
                return Ok(Some(profile));
            }
        }
        if let Some(customer_id) = customer_id {
            return Ok(self.profile_repo.find_by_billing_customer(customer_id).await?);
        }
        Ok(None)
    }

    /// Fetch one configured price, degrading to `None` when the provider
    /// call fails so the rest of the catalog still renders.
    async fn safe_price(&self, price_id: Option<&str>) -> Option<PriceInfo> {
        let price_id = price_id?;
        match self.billing.retrieve_price(price_id).await {
            Ok(price) => {
                let amount = price.amount?;
                let currency = price.currency?;
                Some(PriceInfo {
                    id: price.id,
                    amount,
                    currency,
                })
            }
            Err(e) => {
                tracing::warn!("Price lookup failed: price_id={}, error={}", price_id, e);
                None
            }
        }
    }
}

#[async_trait]
impl EntitlementService for EntitlementServiceImpl {
    async fn check_status(
        &self,
        tenant_id: TenantId,
        email: Option<&str>,
    ) -> Result<StatusSummary, EntitlementError> {
        let profile = self
            .profile_repo
            .get_profile(tenant_id)
            .await?
            .ok_or(EntitlementError::ProfileNotFound)?;

        let customer_id = match self.resolve_customer(&profile, email).await {
            Ok(customer_id) => customer_id,
            Err(EntitlementError::ProviderUnavailable(msg)) => {
                tracing::warn!(
                    "Customer lookup failed, serving stored entitlement: tenant_id={}, error={}",
                    tenant_id,
                    msg
                );
                return self.stored_summary(&profile).await;
            }
            Err(e) => return Err(e),
        };

        let Some(customer_id) = customer_id else {
            // The provider answered: this tenant has no billing identity at
            // all, which is an authoritative "no subscription".
            self.apply_no_subscription(&profile).await?;
            return self
                .build_summary(Plan::Free, profile.trial_active(Utc::now()), None)
                .await;
        };

        match self
            .billing
            .latest_subscription_for_customer(&customer_id)
            .await
        {
            Ok(Some(sub)) => {
                let (plan, snapshot) = self.apply_subscription(&profile, &sub).await?;
                self.build_summary(plan, profile.trial_active(Utc::now()), Some(&snapshot))
                    .await
            }
            Ok(None) => {
                self.apply_no_subscription(&profile).await?;
                self.build_summary(Plan::Free, profile.trial_active(Utc::now()), None)
                    .await
            }
            Err(e) => {
                tracing::warn!(
                    "Subscription lookup failed, serving stored entitlement: tenant_id={}, error={}",
                    tenant_id,
                    e
                );
                self.stored_summary(&profile).await
            }
        }
    }

    async fn handle_webhook(
        &self,
        payload: &[u8],
        signature: &str,
    ) -> Result<(), EntitlementError> {
        let event = self.billing.verify_webhook(payload, signature).await?;

        match event {
            BillingEvent::SubscriptionChanged { subscription } => {
                let profile = self
                    .resolve_webhook_tenant(
                        subscription.tenant_ref,
                        Some(subscription.customer_id.as_str()),
                    )
                    .await?;

                let Some(profile) = profile else {
                    // Unattributable events are acknowledged so the provider
                    // stops retrying a webhook we can never resolve.
                    tracing::warn!(
                        "Webhook subscription has no matching tenant: subscription_id={}, customer_id={}",
                        subscription.id,
                        subscription.customer_id
                    );
                    return Ok(());
                };

                self.apply_subscription(&profile, &subscription).await?;
                Ok(())
            }
            BillingEvent::CheckoutCompleted {
                tenant_ref,
                customer_id,
                subscription_id,
            } => {
                let profile = self
                    .resolve_webhook_tenant(tenant_ref, customer_id.as_deref())
                    .await?;

                let Some(profile) = profile else {
                    tracing::warn!("Checkout completion has no matching tenant");
                    return Ok(());
                };

                if let Some(customer_id) = &customer_id {
                    if profile.billing_customer_id.as_deref() != Some(customer_id.as_str()) {
                        self.profile_repo
                            .set_billing_customer(profile.id, customer_id)
                            .await?;
                    }
                }

                // The subscription event usually lands separately, but the
                // session already names the subscription, so reconcile now
                if let Some(subscription_id) = subscription_id {
                    let sub = self.billing.retrieve_subscription(&subscription_id).await?;
                    self.apply_subscription(&profile, &sub).await?;
                }
                Ok(())
            }
            BillingEvent::Ignored { event_type } => {
                tracing::debug!("Ignoring webhook event: type={}", event_type);
                Ok(())
            }
        }
    }

    async fn create_checkout(
        &self,
        tenant_id: TenantId,
        email: Option<String>,
        price_id: String,
        return_url: String,
    ) -> Result<ProviderCheckoutSession, EntitlementError> {
        if price_id.trim().is_empty() {
            return Err(EntitlementError::InvalidPrice(
                "Missing price id".to_string(),
            ));
        }

        let success_url = with_query_flag(&return_url, "success")?;
        let cancel_url = with_query_flag(&return_url, "canceled")?;

        let profile = self
            .profile_repo
            .get_profile(tenant_id)
            .await?
            .ok_or(EntitlementError::ProfileNotFound)?;

        // Resolve or mint the billing customer, persisting the mapping
        // before the session is created so a completed checkout can always
        // be attributed back to the tenant.
        let customer_id = match self.resolve_customer(&profile, email.as_deref()).await? {
            Some(customer_id) => customer_id,
            None => {
                let customer_id = self
                    .billing
                    .create_customer(tenant_id, email.as_deref(), profile.name.as_deref())
                    .await?;
                self.profile_repo
                    .set_billing_customer(tenant_id, &customer_id)
                    .await?;
                customer_id
            }
        };

        let session = self
            .billing
            .create_checkout_session(tenant_id, &customer_id, &price_id, &success_url, &cancel_url)
            .await?;

        Ok(session)
    }

    async fn subscription_prices(&self) -> Result<SubscriptionPrices, EntitlementError> {
        Ok(SubscriptionPrices {
            monthly: self.safe_price(self.price_monthly.as_deref()).await,
            quarterly: self.safe_price(self.price_quarterly.as_deref()).await,
            semiannual: self.safe_price(self.price_semiannual.as_deref()).await,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::billing::ports::{BillingError, ProviderPrice};
    use crate::entitlement::ports::{FreePlanLimits, SubscriptionStatus};
    use chrono::TimeZone;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;
    use uuid::Uuid;

    #[derive(Default)]
    struct InMemoryProfileRepo {
        profiles: Mutex<HashMap<TenantId, Profile>>,
    }

    impl InMemoryProfileRepo {
        fn insert(&self, profile: Profile) {
            self.profiles
                .lock()
                .expect("lock profiles")
                .insert(profile.id, profile);
        }

        fn get(&self, tenant_id: TenantId) -> Option<Profile> {
            self.profiles
                .lock()
                .expect("lock profiles")
                .get(&tenant_id)
                .cloned()
        }
    }

    #[async_trait]
    impl ProfileRepository for InMemoryProfileRepo {
        async fn get_profile(&self, tenant_id: TenantId) -> anyhow::Result<Option<Profile>> {
            Ok(self.get(tenant_id))
        }

        async fn find_by_billing_customer(
            &self,
            customer_id: &str,
        ) -> anyhow::Result<Option<Profile>> {
            let profiles = self.profiles.lock().expect("lock profiles");
            Ok(profiles
                .values()
                .find(|p| p.billing_customer_id.as_deref() == Some(customer_id))
                .cloned())
        }

        async fn update_entitlement(
            &self,
            tenant_id: TenantId,
            plan: Plan,
            plan_started_at: Option<DateTime<Utc>>,
            billing_customer_id: Option<&str>,
        ) -> anyhow::Result<()> {
            let mut profiles = self.profiles.lock().expect("lock profiles");
            if let Some(profile) = profiles.get_mut(&tenant_id) {
                profile.plan = plan;
                profile.plan_started_at = plan_started_at;
                if let Some(customer_id) = billing_customer_id {
                    profile.billing_customer_id = Some(customer_id.to_string());
                }
                profile.updated_at = Utc::now();
            }
            Ok(())
        }

        async fn set_billing_customer(
            &self,
            tenant_id: TenantId,
            customer_id: &str,
        ) -> anyhow::Result<()> {
            let mut profiles = self.profiles.lock().expect("lock profiles");
            if let Some(profile) = profiles.get_mut(&tenant_id) {
                profile.billing_customer_id = Some(customer_id.to_string());
            }
            Ok(())
        }
    }

    #[derive(Default)]
    struct InMemorySnapshotRepo {
        snapshots: Mutex<HashMap<String, SubscriptionSnapshot>>,
    }

    #[async_trait]
    impl SnapshotRepository for InMemorySnapshotRepo {
        async fn upsert_snapshot(
            &self,
            snapshot: SubscriptionSnapshot,
        ) -> anyhow::Result<SubscriptionSnapshot> {
            self.snapshots
                .lock()
                .expect("lock snapshots")
                .insert(snapshot.id.clone(), snapshot.clone());
            Ok(snapshot)
        }

        async fn latest_for_tenant(
            &self,
            tenant_id: TenantId,
        ) -> anyhow::Result<Option<SubscriptionSnapshot>> {
            let snapshots = self.snapshots.lock().expect("lock snapshots");
            Ok(snapshots
                .values()
                .filter(|s| s.tenant_id == tenant_id)
                .max_by_key(|s| s.updated_at)
                .cloned())
        }
    }

    struct StaticLimitsRepo;

    #[async_trait]
    impl PlanLimitsRepository for StaticLimitsRepo {
        async fn free_plan_limits(&self) -> anyhow::Result<FreePlanLimits> {
            Ok(FreePlanLimits {
                pets: 10,
                products: 20,
                services: 5,
                appointments_per_month: 15,
            })
        }
    }

    #[derive(Default)]
    struct FakeBilling {
        subscription: Mutex<Option<ProviderSubscription>>,
        customer_by_email: Mutex<Option<String>>,
        fail_provider: AtomicBool,
        webhook_event: Mutex<Option<BillingEvent>>,
        prices: Mutex<HashMap<String, ProviderPrice>>,
        created_customers: Mutex<Vec<TenantId>>,
        checkout_calls: Mutex<Vec<(String, String, String)>>,
    }

    impl FakeBilling {
        fn set_subscription(&self, sub: ProviderSubscription) {
            *self.subscription.lock().expect("lock subscription") = Some(sub);
        }

        fn set_webhook_event(&self, event: BillingEvent) {
            *self.webhook_event.lock().expect("lock event") = Some(event);
        }

        fn fail(&self) {
            self.fail_provider.store(true, Ordering::SeqCst);
        }

        fn check_failure(&self) -> Result<(), BillingError> {
            if self.fail_provider.load(Ordering::SeqCst) {
                Err(BillingError::ProviderUnavailable("outage".to_string()))
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl BillingProvider for FakeBilling {
        async fn find_customer_by_email(
            &self,
            _email: &str,
        ) -> Result<Option<String>, BillingError> {
            self.check_failure()?;
            Ok(self.customer_by_email.lock().expect("lock customer").clone())
        }

        async fn create_customer(
            &self,
            tenant_id: TenantId,
            _email: Option<&str>,
            _name: Option<&str>,
        ) -> Result<String, BillingError> {
            self.check_failure()?;
            self.created_customers
                .lock()
                .expect("lock created")
                .push(tenant_id);
            Ok(format!("cus_{}", tenant_id))
        }

        async fn latest_subscription_for_customer(
            &self,
            _customer_id: &str,
        ) -> Result<Option<ProviderSubscription>, BillingError> {
            self.check_failure()?;
            Ok(self.subscription.lock().expect("lock subscription").clone())
        }

        async fn retrieve_subscription(
            &self,
            subscription_id: &str,
        ) -> Result<ProviderSubscription, BillingError> {
            self.check_failure()?;
            self.subscription
                .lock()
                .expect("lock subscription")
                .clone()
                .filter(|s| s.id == subscription_id)
                .ok_or_else(|| BillingError::InvalidRequest("No such subscription".to_string()))
        }

        async fn create_checkout_session(
            &self,
            _tenant_id: TenantId,
            customer_id: &str,
            _price_id: &str,
            success_url: &str,
            cancel_url: &str,
        ) -> Result<ProviderCheckoutSession, BillingError> {
            self.check_failure()?;
            self.checkout_calls.lock().expect("lock checkouts").push((
                customer_id.to_string(),
                success_url.to_string(),
                cancel_url.to_string(),
            ));
            Ok(ProviderCheckoutSession {
                id: "cs_test_1".to_string(),
                url: "https://checkout.example/cs_test_1".to_string(),
            })
        }

        async fn verify_webhook(
            &self,
            _payload: &[u8],
            signature: &str,
        ) -> Result<BillingEvent, BillingError> {
            if signature != "valid" {
                return Err(BillingError::InvalidSignature("bad signature".to_string()));
            }
            self.webhook_event
                .lock()
                .expect("lock event")
                .clone()
                .ok_or_else(|| BillingError::InvalidRequest("No event configured".to_string()))
        }

        async fn retrieve_price(&self, price_id: &str) -> Result<ProviderPrice, BillingError> {
            self.prices
                .lock()
                .expect("lock prices")
                .get(price_id)
                .cloned()
                .ok_or_else(|| BillingError::InvalidPrice("No such price".to_string()))
        }
    }

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).single().expect("valid timestamp")
    }

    fn free_profile(tenant_id: TenantId) -> Profile {
        Profile {
            id: tenant_id,
            name: Some("Clinica Patas".to_string()),
            role: crate::entitlement::ports::Role::Admin,
            plan: Plan::Free,
            plan_started_at: None,
            trial_end_date: None,
            billing_customer_id: None,
            created_at: ts(1_000),
            updated_at: ts(1_000),
        }
    }

    fn pro_profile(tenant_id: TenantId, started_at: DateTime<Utc>) -> Profile {
        Profile {
            plan: Plan::Pro,
            plan_started_at: Some(started_at),
            billing_customer_id: Some("cus_existing".to_string()),
            ..free_profile(tenant_id)
        }
    }

    fn provider_sub(status: SubscriptionStatus) -> ProviderSubscription {
        ProviderSubscription {
            id: "sub_1".to_string(),
            customer_id: "cus_existing".to_string(),
            tenant_ref: None,
            price_id: Some("price_monthly".to_string()),
            status,
            current_period_start: ts(5_000),
            current_period_end: ts(8_000),
            cancel_at_period_end: false,
            amount: Some(49.9),
            currency: Some("brl".to_string()),
            interval: Some("month".to_string()),
            interval_count: Some(1),
            raw: serde_json::json!({"id": "sub_1"}),
        }
    }

    struct Harness {
        profiles: Arc<InMemoryProfileRepo>,
        billing: Arc<FakeBilling>,
        service: EntitlementServiceImpl,
    }

    fn harness() -> Harness {
        let profiles = Arc::new(InMemoryProfileRepo::default());
        let billing = Arc::new(FakeBilling::default());
        let service = EntitlementServiceImpl::new(EntitlementServiceConfig {
            profile_repo: profiles.clone(),
            snapshot_repo: Arc::new(InMemorySnapshotRepo::default()),
            plan_limits_repo: Arc::new(StaticLimitsRepo),
            billing: billing.clone(),
            price_monthly: Some("price_monthly".to_string()),
            price_quarterly: Some("price_quarterly".to_string()),
            price_semiannual: None,
        });
        Harness {
            profiles,
            billing,
            service,
        }
    }

    #[test]
    fn pro_eligibility_covers_every_status() {
        let pro = [
            SubscriptionStatus::Active,
            SubscriptionStatus::Trialing,
            SubscriptionStatus::PastDue,
            SubscriptionStatus::Unpaid,
        ];
        let free = [
            SubscriptionStatus::Canceled,
            SubscriptionStatus::Incomplete,
            SubscriptionStatus::IncompleteExpired,
            SubscriptionStatus::Paused,
        ];

        for status in pro {
            let sub = provider_sub(status);
            let (plan, started_at) = derive_entitlement(Plan::Free, None, Some(&sub));
            assert_eq!(plan, Plan::Pro, "status {} should grant pro", status);
            assert_eq!(started_at, Some(sub.current_period_start));
        }
        for status in free {
            let sub = provider_sub(status);
            let (plan, started_at) = derive_entitlement(Plan::Free, None, Some(&sub));
            assert_eq!(plan, Plan::Free, "status {} should not grant pro", status);
            assert_eq!(started_at, None);
        }
    }

    #[test]
    fn plan_start_survives_renewal() {
        let original = ts(2_000);
        let sub = provider_sub(SubscriptionStatus::Active);
        let (plan, started_at) = derive_entitlement(Plan::Pro, Some(original), Some(&sub));
        assert_eq!(plan, Plan::Pro);
        assert_eq!(started_at, Some(original));
    }

    #[test]
    fn plan_start_cleared_on_downgrade() {
        let sub = provider_sub(SubscriptionStatus::Canceled);
        let (plan, started_at) = derive_entitlement(Plan::Pro, Some(ts(2_000)), Some(&sub));
        assert_eq!(plan, Plan::Free);
        assert_eq!(started_at, None);

        let (plan, started_at) = derive_entitlement(Plan::Pro, Some(ts(2_000)), None);
        assert_eq!(plan, Plan::Free);
        assert_eq!(started_at, None);
    }

    #[tokio::test]
    async fn status_check_upgrades_free_tenant() {
        let h = harness();
        let tenant_id = TenantId(Uuid::new_v4());
        let mut profile = free_profile(tenant_id);
        profile.billing_customer_id = Some("cus_existing".to_string());
        h.profiles.insert(profile);
        h.billing.set_subscription(provider_sub(SubscriptionStatus::Active));

        let summary = h.service.check_status(tenant_id, None).await.expect("status");

        assert_eq!(summary.plan, Plan::Pro);
        assert!(summary.is_subscribed);
        assert!(summary.free_limits.is_none());
        let stored = h.profiles.get(tenant_id).expect("profile");
        assert_eq!(stored.plan, Plan::Pro);
        assert_eq!(stored.plan_started_at, Some(ts(5_000)));
    }

    #[tokio::test]
    async fn status_check_is_idempotent() {
        let h = harness();
        let tenant_id = TenantId(Uuid::new_v4());
        let mut profile = free_profile(tenant_id);
        profile.billing_customer_id = Some("cus_existing".to_string());
        h.profiles.insert(profile);
        h.billing.set_subscription(provider_sub(SubscriptionStatus::Active));

        let first = h.service.check_status(tenant_id, None).await.expect("first");
        let after_first = h.profiles.get(tenant_id).expect("profile");
        let second = h.service.check_status(tenant_id, None).await.expect("second");
        let after_second = h.profiles.get(tenant_id).expect("profile");

        assert_eq!(first.plan, second.plan);
        assert_eq!(after_first.plan, after_second.plan);
        assert_eq!(after_first.plan_started_at, after_second.plan_started_at);
    }

    #[tokio::test]
    async fn provider_outage_keeps_stored_plan() {
        let h = harness();
        let tenant_id = TenantId(Uuid::new_v4());
        h.profiles.insert(pro_profile(tenant_id, ts(2_000)));
        h.billing.fail();

        let summary = h.service.check_status(tenant_id, None).await.expect("status");

        assert_eq!(summary.plan, Plan::Pro);
        let stored = h.profiles.get(tenant_id).expect("profile");
        assert_eq!(stored.plan, Plan::Pro);
        assert_eq!(stored.plan_started_at, Some(ts(2_000)));
    }

    #[tokio::test]
    async fn confirmed_absence_downgrades_to_free() {
        let h = harness();
        let tenant_id = TenantId(Uuid::new_v4());
        h.profiles.insert(pro_profile(tenant_id, ts(2_000)));
        // Provider reachable, customer has no subscription at all

        let summary = h.service.check_status(tenant_id, None).await.expect("status");

        assert_eq!(summary.plan, Plan::Free);
        assert!(!summary.is_subscribed);
        assert!(summary.free_limits.is_some());
        let stored = h.profiles.get(tenant_id).expect("profile");
        assert_eq!(stored.plan, Plan::Free);
        assert_eq!(stored.plan_started_at, None);
    }

    #[tokio::test]
    async fn tenant_without_billing_identity_is_free() {
        let h = harness();
        let tenant_id = TenantId(Uuid::new_v4());
        h.profiles.insert(free_profile(tenant_id));

        let summary = h
            .service
            .check_status(tenant_id, Some("owner@example.com"))
            .await
            .expect("status");

        assert_eq!(summary.plan, Plan::Free);
        assert!(summary.subscription.is_none());
        assert_eq!(
            summary.free_limits.expect("limits").appointments_per_month,
            15
        );
    }

    #[tokio::test]
    async fn unknown_profile_is_rejected() {
        let h = harness();
        let result = h.service.check_status(TenantId(Uuid::new_v4()), None).await;
        assert!(matches!(result, Err(EntitlementError::ProfileNotFound)));
    }

    #[tokio::test]
    async fn webhook_rejects_bad_signature() {
        let h = harness();
        let tenant_id = TenantId(Uuid::new_v4());
        h.profiles.insert(pro_profile(tenant_id, ts(2_000)));

        let result = h.service.handle_webhook(b"{}", "forged").await;

        assert!(matches!(result, Err(EntitlementError::InvalidSignature(_))));
        let stored = h.profiles.get(tenant_id).expect("profile");
        assert_eq!(stored.plan, Plan::Pro);
    }

    #[tokio::test]
    async fn webhook_resolves_tenant_by_customer_id() {
        let h = harness();
        let tenant_id = TenantId(Uuid::new_v4());
        h.profiles.insert(pro_profile(tenant_id, ts(2_000)));
        // Deleted subscription arrives without tenant metadata
        let mut sub = provider_sub(SubscriptionStatus::Canceled);
        sub.tenant_ref = None;
        h.billing
            .set_webhook_event(BillingEvent::SubscriptionChanged { subscription: sub });

        h.service.handle_webhook(b"{}", "valid").await.expect("webhook");

        let stored = h.profiles.get(tenant_id).expect("profile");
        assert_eq!(stored.plan, Plan::Free);
        assert_eq!(stored.plan_started_at, None);
    }

    #[tokio::test]
    async fn webhook_prefers_tenant_metadata() {
        let h = harness();
        let tenant_id = TenantId(Uuid::new_v4());
        h.profiles.insert(free_profile(tenant_id));
        let mut sub = provider_sub(SubscriptionStatus::Active);
        sub.tenant_ref = Some(tenant_id);
        sub.customer_id = "cus_fresh".to_string();
        h.billing
            .set_webhook_event(BillingEvent::SubscriptionChanged { subscription: sub });

        h.service.handle_webhook(b"{}", "valid").await.expect("webhook");

        let stored = h.profiles.get(tenant_id).expect("profile");
        assert_eq!(stored.plan, Plan::Pro);
        assert_eq!(stored.billing_customer_id.as_deref(), Some("cus_fresh"));
    }

    #[tokio::test]
    async fn past_due_webhook_grants_pro() {
        let h = harness();
        let tenant_id = TenantId(Uuid::new_v4());
        h.profiles.insert(free_profile(tenant_id));
        let mut sub = provider_sub(SubscriptionStatus::PastDue);
        sub.tenant_ref = Some(tenant_id);
        h.billing
            .set_webhook_event(BillingEvent::SubscriptionChanged { subscription: sub });

        h.service.handle_webhook(b"{}", "valid").await.expect("webhook");

        let stored = h.profiles.get(tenant_id).expect("profile");
        assert_eq!(stored.plan, Plan::Pro);
        assert_eq!(stored.plan_started_at, Some(ts(5_000)));
    }

    #[tokio::test]
    async fn unresolvable_webhook_is_acknowledged() {
        let h = harness();
        let mut sub = provider_sub(SubscriptionStatus::Active);
        sub.customer_id = "cus_stranger".to_string();
        h.billing
            .set_webhook_event(BillingEvent::SubscriptionChanged { subscription: sub });

        h.service.handle_webhook(b"{}", "valid").await.expect("webhook");
    }

    #[tokio::test]
    async fn ignored_event_is_acknowledged() {
        let h = harness();
        h.billing.set_webhook_event(BillingEvent::Ignored {
            event_type: "invoice.finalized".to_string(),
        });

        h.service.handle_webhook(b"{}", "valid").await.expect("webhook");
    }

    #[tokio::test]
    async fn checkout_completion_links_customer_and_reconciles() {
        let h = harness();
        let tenant_id = TenantId(Uuid::new_v4());
        h.profiles.insert(free_profile(tenant_id));
        let mut sub = provider_sub(SubscriptionStatus::Trialing);
        sub.customer_id = "cus_new".to_string();
        h.billing.set_subscription(sub);
        h.billing.set_webhook_event(BillingEvent::CheckoutCompleted {
            tenant_ref: Some(tenant_id),
            customer_id: Some("cus_new".to_string()),
            subscription_id: Some("sub_1".to_string()),
        });

        h.service.handle_webhook(b"{}", "valid").await.expect("webhook");

        let stored = h.profiles.get(tenant_id).expect("profile");
        assert_eq!(stored.plan, Plan::Pro);
        assert_eq!(stored.billing_customer_id.as_deref(), Some("cus_new"));
    }

    #[tokio::test]
    async fn checkout_persists_customer_before_session() {
        let h = harness();
        let tenant_id = TenantId(Uuid::new_v4());
        h.profiles.insert(free_profile(tenant_id));

        let session = h
            .service
            .create_checkout(
                tenant_id,
                Some("owner@example.com".to_string()),
                "price_monthly".to_string(),
                "https://app.example/assinatura?tab=planos".to_string(),
            )
            .await
            .expect("checkout");

        assert_eq!(session.url, "https://checkout.example/cs_test_1");
        let stored = h.profiles.get(tenant_id).expect("profile");
        assert_eq!(
            stored.billing_customer_id,
            Some(format!("cus_{}", tenant_id))
        );

        let calls = h.billing.checkout_calls.lock().expect("lock checkouts");
        let (customer, success_url, cancel_url) = &calls[0];
        assert_eq!(customer, &format!("cus_{}", tenant_id));
        assert!(success_url.contains("success=true"));
        assert!(success_url.contains("tab=planos"));
        assert!(cancel_url.contains("canceled=true"));
    }

    #[tokio::test]
    async fn checkout_rejects_non_http_return_url() {
        let h = harness();
        let tenant_id = TenantId(Uuid::new_v4());
        h.profiles.insert(free_profile(tenant_id));

        let result = h
            .service
            .create_checkout(
                tenant_id,
                None,
                "price_monthly".to_string(),
                "javascript:alert(1)".to_string(),
            )
            .await;

        assert!(matches!(result, Err(EntitlementError::InvalidRedirect(_))));
    }

    #[tokio::test]
    async fn checkout_rejects_missing_price() {
        let h = harness();
        let tenant_id = TenantId(Uuid::new_v4());
        h.profiles.insert(free_profile(tenant_id));

        let result = h
            .service
            .create_checkout(
                tenant_id,
                None,
                "  ".to_string(),
                "https://app.example/assinatura".to_string(),
            )
            .await;

        assert!(matches!(result, Err(EntitlementError::InvalidPrice(_))));
    }

    #[tokio::test]
    async fn price_catalog_degrades_per_price() {
        let h = harness();
        h.billing.prices.lock().expect("lock prices").insert(
            "price_monthly".to_string(),
            ProviderPrice {
                id: "price_monthly".to_string(),
                amount: Some(49.9),
                currency: Some("brl".to_string()),
            },
        );
        // price_quarterly configured but lookup fails, semiannual unconfigured

        let prices = h.service.subscription_prices().await.expect("prices");

        let monthly = prices.monthly.expect("monthly");
        assert_eq!(monthly.amount, 49.9);
        assert_eq!(monthly.currency, "brl");
        assert!(prices.quarterly.is_none());
        assert!(prices.semiannual.is_none());
    }

    #[test]
    fn query_flag_replaces_existing_value() {
        let url = with_query_flag("https://app.example/assinatura?success=false&x=1", "success")
            .expect("url");
        assert!(url.contains("success=true"));
        assert!(!url.contains("success=false"));
        assert!(url.contains("x=1"));
    }

    #[test]
    fn query_flag_strips_the_opposite_flag() {
        // Re-subscribing from a post-success page must not produce a cancel
        // URL carrying both flags
        let url = with_query_flag("https://app.example/assinatura?success=true", "canceled")
            .expect("url");
        assert!(url.contains("canceled=true"));
        assert!(!url.contains("success"));

        let url = with_query_flag("https://app.example/assinatura?canceled=true", "success")
            .expect("url");
        assert!(url.contains("success=true"));
        assert!(!url.contains("canceled"));
    }
}
