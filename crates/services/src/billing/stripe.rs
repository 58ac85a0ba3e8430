use async_trait::async_trait;
use std::collections::HashMap;
use stripe::{
    CheckoutSession, CheckoutSessionMode, Client, CreateCheckoutSession,
    CreateCheckoutSessionLineItems, CreateCheckoutSessionSubscriptionData, CreateCustomer,
    Customer, EventObject, EventType, ListCustomers, ListSubscriptions, Price,
    Subscription as StripeSubscription, Webhook, WebhookError,
};

use super::ports::{
    BillingError, BillingEvent, BillingProvider, ProviderCheckoutSession, ProviderPrice,
    ProviderSubscription,
};
use crate::TenantId;

/// Metadata key linking provider objects back to a tenant.
const TENANT_METADATA_KEY: &str = "tenant_id";

/// Stripe-backed implementation of [`BillingProvider`].
pub struct StripeBillingProvider {
    stripe_secret_key: String,
    stripe_webhook_secret: String,
}

impl StripeBillingProvider {
    pub fn new(stripe_secret_key: String, stripe_webhook_secret: String) -> Self {
        Self {
            stripe_secret_key,
            stripe_webhook_secret,
        }
    }

    fn client(&self) -> Client {
        Client::new(&self.stripe_secret_key)
    }

    /// Convert a Stripe subscription to the normalized provider model
    fn subscription_to_model(
        stripe_sub: &StripeSubscription,
    ) -> Result<ProviderSubscription, BillingError> {
        let price = stripe_sub
            .items
            .data
            .first()
            .and_then(|item| item.price.as_ref());

        // Extract customer_id from Expandable<Customer>
        let customer_id = match &stripe_sub.customer {
            stripe::Expandable::Id(id) => id.to_string(),
            stripe::Expandable::Object(customer) => customer.id.to_string(),
        };

        let tenant_ref = stripe_sub
            .metadata
            .get(TENANT_METADATA_KEY)
            .and_then(|raw| raw.parse::<TenantId>().ok());

        let status = stripe_sub
            .status
            .to_string()
            .parse()
            .map_err(|e: crate::entitlement::ports::UnknownValue| {
                BillingError::InvalidRequest(e.to_string())
            })?;

        let recurring = price.and_then(|p| p.recurring.as_ref());

        Ok(ProviderSubscription {
            id: stripe_sub.id.to_string(),
            customer_id,
            tenant_ref,
            price_id: price.map(|p| p.id.to_string()),
            status,
            current_period_start: chrono::DateTime::from_timestamp(
                stripe_sub.current_period_start,
                0,
            )
            .ok_or_else(|| BillingError::InvalidRequest("Invalid period start".into()))?,
            current_period_end: chrono::DateTime::from_timestamp(stripe_sub.current_period_end, 0)
                .ok_or_else(|| BillingError::InvalidRequest("Invalid period end".into()))?,
            cancel_at_period_end: stripe_sub.cancel_at_period_end,
            amount: price
                .and_then(|p| p.unit_amount)
                .map(|cents| cents as f64 / 100.0),
            currency: price.and_then(|p| p.currency).map(|c| c.to_string()),
            interval: recurring.map(|r| r.interval.to_string()),
            interval_count: recurring.map(|r| r.interval_count as i32),
            raw: serde_json::to_value(stripe_sub).unwrap_or(serde_json::Value::Null),
        })
    }

    /// Transport failures become `ProviderUnavailable`; a response from
    /// Stripe that rejects the request keeps its own classification.
    fn map_api_error(e: stripe::StripeError) -> BillingError {
        BillingError::ProviderUnavailable(e.to_string())
    }

    fn map_price_error(e: stripe::StripeError) -> BillingError {
        match e {
            stripe::StripeError::Stripe(_) => BillingError::InvalidPrice(e.to_string()),
            _ => BillingError::ProviderUnavailable(e.to_string()),
        }
    }

    fn tenant_metadata(tenant_id: TenantId) -> HashMap<String, String> {
        vec![(TENANT_METADATA_KEY.to_string(), tenant_id.to_string())]
            .into_iter()
            .collect()
    }
}

#[async_trait]
impl BillingProvider for StripeBillingProvider {
    async fn find_customer_by_email(&self, email: &str) -> Result<Option<String>, BillingError> {
        let client = self.client();
        let customers = Customer::list(
            &client,
            &ListCustomers {
                email: Some(email),
                limit: Some(1),
                ..Default::default()
            },
        )
        .await
        .map_err(Self::map_api_error)?;

        Ok(customers.data.first().map(|c| c.id.to_string()))
    }

    async fn create_customer(
        &self,
        tenant_id: TenantId,
        email: Option<&str>,
        name: Option<&str>,
    ) -> Result<String, BillingError> {
        tracing::info!("Creating billing customer for tenant_id={}", tenant_id);
        let client = self.client();

        let customer = Customer::create(
            &client,
            CreateCustomer {
                email,
                name,
                metadata: Some(Self::tenant_metadata(tenant_id)),
                ..Default::default()
            },
        )
        .await
        .map_err(Self::map_api_error)?;

        tracing::info!(
            "Billing customer created: tenant_id={}, customer_id={}",
            tenant_id,
            customer.id
        );

        Ok(customer.id.to_string())
    }

    async fn latest_subscription_for_customer(
        &self,
        customer_id: &str,
    ) -> Result<Option<ProviderSubscription>, BillingError> {
        let client = self.client();
        let customer_id = customer_id
            .parse()
            .map_err(|_| BillingError::InvalidRequest("Invalid customer ID".to_string()))?;

        let subscriptions = StripeSubscription::list(
            &client,
            &ListSubscriptions {
                customer: Some(customer_id),
                limit: Some(1),
                ..Default::default()
            },
        )
        .await
        .map_err(Self::map_api_error)?;

        subscriptions
            .data
            .first()
            .map(Self::subscription_to_model)
            .transpose()
    }

    async fn retrieve_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<ProviderSubscription, BillingError> {
        let client = self.client();
        let subscription_id: stripe::SubscriptionId = subscription_id
            .parse()
            .map_err(|_| BillingError::InvalidRequest("Invalid subscription ID".to_string()))?;

        let stripe_sub = StripeSubscription::retrieve(&client, &subscription_id, &[])
            .await
            .map_err(Self::map_api_error)?;

        Self::subscription_to_model(&stripe_sub)
    }

    async fn create_checkout_session(
        &self,
        tenant_id: TenantId,
        customer_id: &str,
        price_id: &str,
        success_url: &str,
        cancel_url: &str,
    ) -> Result<ProviderCheckoutSession, BillingError> {
        let client = self.client();

        let mut params = CreateCheckoutSession::new();
        params.mode = Some(CheckoutSessionMode::Subscription);
        params.customer = Some(
            customer_id
                .parse()
                .map_err(|_| BillingError::InvalidRequest("Invalid customer ID".to_string()))?,
        );
        params.success_url = Some(success_url);
        params.cancel_url = Some(cancel_url);
        params.line_items = Some(vec![CreateCheckoutSessionLineItems {
            price: Some(price_id.to_string()),
            quantity: Some(1),
            ..Default::default()
        }]);
        // Tag both the session and the resulting subscription so webhook
        // events can be resolved to the tenant without a customer lookup
        params.metadata = Some(Self::tenant_metadata(tenant_id));
        params.subscription_data = Some(CreateCheckoutSessionSubscriptionData {
            metadata: Some(Self::tenant_metadata(tenant_id)),
            ..Default::default()
        });

        let session = CheckoutSession::create(&client, params)
            .await
            .map_err(Self::map_price_error)?;

        let checkout_url = session
            .url
            .ok_or_else(|| BillingError::ProviderUnavailable("No checkout URL returned".into()))?;

        tracing::info!(
            "Checkout session created: tenant_id={}, session_id={}",
            tenant_id,
            session.id
        );

        Ok(ProviderCheckoutSession {
            id: session.id.to_string(),
            url: checkout_url,
        })
    }

    async fn verify_webhook(
        &self,
        payload: &[u8],
        signature: &str,
    ) -> Result<BillingEvent, BillingError> {
        let payload_str = std::str::from_utf8(payload)
            .map_err(|e| BillingError::InvalidSignature(format!("Invalid UTF-8: {}", e)))?;

        // construct_event does BOTH signature verification AND event parsing.
        // Signature failures reject the payload outright; a parse failure
        // after a good signature means an event shape the SDK does not
        // model, which we acknowledge without acting on.
        let event = match Webhook::construct_event(
            payload_str,
            signature,
            &self.stripe_webhook_secret,
        ) {
            Ok(event) => event,
            Err(
                e @ (WebhookError::BadKey
                | WebhookError::BadSignature
                | WebhookError::BadTimestamp(_)
                | WebhookError::BadHeader(_)),
            ) => {
                tracing::error!("Webhook signature verification failed: error={}", e);
                return Err(BillingError::InvalidSignature(e.to_string()));
            }
            Err(WebhookError::BadParse(e)) => {
                tracing::debug!("Webhook event parsing failed (signature OK): error={}", e);
                let payload_json: serde_json::Value = serde_json::from_slice(payload)
                    .map_err(|e| BillingError::InvalidRequest(format!("Invalid JSON: {}", e)))?;
                let event_type = payload_json
                    .get("type")
                    .and_then(|v| v.as_str())
                    .unwrap_or("unknown")
                    .to_string();
                return Ok(BillingEvent::Ignored { event_type });
            }
        };

        match event.type_ {
            EventType::CustomerSubscriptionCreated
            | EventType::CustomerSubscriptionUpdated
            | EventType::CustomerSubscriptionDeleted => match event.data.object {
                EventObject::Subscription(stripe_sub) => Ok(BillingEvent::SubscriptionChanged {
                    subscription: Self::subscription_to_model(&stripe_sub)?,
                }),
                _ => Err(BillingError::InvalidRequest(
                    "Expected subscription object in event".to_string(),
                )),
            },
            EventType::CheckoutSessionCompleted => match event.data.object {
                EventObject::CheckoutSession(session) => {
                    let tenant_ref = session
                        .metadata
                        .as_ref()
                        .and_then(|m| m.get(TENANT_METADATA_KEY))
                        .and_then(|raw| raw.parse::<TenantId>().ok());
                    let customer_id = session.customer.as_ref().map(|c| match c {
                        stripe::Expandable::Id(id) => id.to_string(),
                        stripe::Expandable::Object(customer) => customer.id.to_string(),
                    });
                    let subscription_id = session.subscription.as_ref().map(|s| match s {
                        stripe::Expandable::Id(id) => id.to_string(),
                        stripe::Expandable::Object(sub) => sub.id.to_string(),
                    });
                    Ok(BillingEvent::CheckoutCompleted {
                        tenant_ref,
                        customer_id,
                        subscription_id,
                    })
                }
                _ => Err(BillingError::InvalidRequest(
                    "Expected checkout session object in event".to_string(),
                )),
            },
            other => Ok(BillingEvent::Ignored {
                event_type: other.to_string(),
            }),
        }
    }

    async fn retrieve_price(&self, price_id: &str) -> Result<ProviderPrice, BillingError> {
        let client = self.client();
        let price_id: stripe::PriceId = price_id
            .parse()
            .map_err(|_| BillingError::InvalidPrice("Invalid price ID".to_string()))?;

        let price = Price::retrieve(&client, &price_id, &[])
            .await
            .map_err(Self::map_price_error)?;

        Ok(ProviderPrice {
            id: price.id.to_string(),
            amount: price.unit_amount.map(|cents| cents as f64 / 100.0),
            currency: price.currency.map(|c| c.to_string()),
        })
    }
}
