use crate::{error::ApiError, middleware::AuthenticatedTenant, state::AppState};
use axum::{body::Bytes, extract::State, http::HeaderMap, Extension, Json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use services::entitlement::ports::{
    PriceInfo, StatusSummary, SubscriptionPrices, SubscriptionSummary,
};
use url::Url;
use utoipa::ToSchema;

/// Reconciled entitlement state for the authenticated tenant
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionStatusResponse {
    /// Current plan tier: "free" or "pro"
    pub plan: String,
    pub is_subscribed: bool,
    pub trial_active: bool,
    /// Latest subscription details, when one exists
    pub subscription_data: Option<SubscriptionDataResponse>,
    /// Free-tier ceilings; null for pro tenants
    pub free_limits: Option<FreeLimitsResponse>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionDataResponse {
    pub id: String,
    pub status: String,
    pub price_id: Option<String>,
    pub cancel_at_period_end: bool,
    pub current_period_start: DateTime<Utc>,
    pub current_period_end: DateTime<Utc>,
    pub amount: Option<f64>,
    pub currency: Option<String>,
    pub interval: Option<String>,
    pub interval_count: Option<i32>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct FreeLimitsResponse {
    pub pets: i32,
    pub products: i32,
    pub services: i32,
    pub appointments_per_month: i32,
}

impl From<StatusSummary> for SubscriptionStatusResponse {
    fn from(summary: StatusSummary) -> Self {
        Self {
            plan: summary.plan.to_string(),
            is_subscribed: summary.is_subscribed,
            trial_active: summary.trial_active,
            subscription_data: summary.subscription.map(SubscriptionDataResponse::from),
            free_limits: summary.free_limits.map(|l| FreeLimitsResponse {
                pets: l.pets,
                products: l.products,
                services: l.services,
                appointments_per_month: l.appointments_per_month,
            }),
        }
    }
}

impl From<SubscriptionSummary> for SubscriptionDataResponse {
    fn from(sub: SubscriptionSummary) -> Self {
        Self {
            id: sub.id,
            status: sub.status.to_string(),
            price_id: sub.price_id,
            cancel_at_period_end: sub.cancel_at_period_end,
            current_period_start: sub.current_period_start,
            current_period_end: sub.current_period_end,
            amount: sub.amount,
            currency: sub.currency,
            interval: sub.interval,
            interval_count: sub.interval_count,
        }
    }
}

/// Request to open a hosted checkout session
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateCheckoutRequest {
    /// Page to return to after checkout; `success=true` or `canceled=true`
    /// is appended as a query parameter
    pub return_url: String,
    /// Billing email; defaults to the session email
    pub email: Option<String>,
    /// Provider price id for the chosen plan interval
    pub price_id: String,
}

/// Response containing the hosted checkout session
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateCheckoutResponse {
    pub session_id: String,
    pub url: String,
}

/// Configured plan prices for the paywall page
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SubscriptionPricesResponse {
    pub monthly: Option<PriceResponse>,
    pub quarterly: Option<PriceResponse>,
    pub semiannual: Option<PriceResponse>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct PriceResponse {
    pub id: String,
    /// Unit amount in currency units
    pub amount: f64,
    pub currency: String,
}

impl From<SubscriptionPrices> for SubscriptionPricesResponse {
    fn from(prices: SubscriptionPrices) -> Self {
        let convert = |p: PriceInfo| PriceResponse {
            id: p.id,
            amount: p.amount,
            currency: p.currency,
        };
        Self {
            monthly: prices.monthly.map(convert),
            quarterly: prices.quarterly.map(convert),
            semiannual: prices.semiannual.map(convert),
        }
    }
}

/// Validates that a URL is valid and secure for checkout redirects.
/// Requires https; http is allowed only for localhost/127.0.0.1 (development).
fn validate_redirect_url(url_str: &str, field_name: &str) -> Result<(), ApiError> {
    let url = Url::parse(url_str).map_err(|_| {
        ApiError::bad_request(format!(
            "Invalid {}: must be a valid URL (e.g., https://example.com/assinatura)",
            field_name
        ))
    })?;
    match url.scheme() {
        "https" => Ok(()),
        "http" => {
            let host_ok = url
                .host_str()
                .map(|h| h == "localhost" || h == "127.0.0.1")
                .unwrap_or(false);
            if host_ok {
                Ok(())
            } else {
                Err(ApiError::bad_request(format!(
                    "Invalid {}: URL must use https for non-localhost addresses",
                    field_name
                )))
            }
        }
        _ => Err(ApiError::bad_request(format!(
            "Invalid {}: URL scheme must be https (or http for localhost only)",
            field_name
        ))),
    }
}

/// Pull the reconciled subscription status
///
/// Recomputes the tenant's entitlement against the billing provider's
/// current subscription state. Falls back to the last stored plan when the
/// provider is unreachable.
#[utoipa::path(
    get,
    path = "/v1/subscription/status",
    tag = "Subscription",
    responses(
        (status = 200, description = "Reconciled status", body = SubscriptionStatusResponse),
        (status = 401, description = "Unauthorized", body = crate::error::ApiErrorResponse),
        (status = 404, description = "No profile for tenant", body = crate::error::ApiErrorResponse)
    ),
    security(
        ("session_token" = [])
    )
)]
pub async fn get_subscription_status(
    State(app_state): State<AppState>,
    Extension(tenant): Extension<AuthenticatedTenant>,
) -> Result<Json<SubscriptionStatusResponse>, ApiError> {
    let summary = app_state
        .entitlement_service
        .check_status(tenant.tenant_id, Some(&tenant.email))
        .await?;

    Ok(Json(summary.into()))
}

/// Handle billing provider webhook events (public endpoint - no auth required)
pub async fn handle_billing_webhook(
    State(app_state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<serde_json::Value>, ApiError> {
    tracing::info!("Received billing webhook");

    let signature = headers
        .get("stripe-signature")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::bad_request("Missing Stripe-Signature header"))?;

    app_state
        .entitlement_service
        .handle_webhook(&body, signature)
        .await?;

    Ok(Json(serde_json::json!({ "received": true })))
}

/// Open a hosted checkout session
///
/// Resolves (or creates) the tenant's billing customer and returns the
/// checkout URL. The plan itself only changes later, via webhook or the
/// next status pull.
#[utoipa::path(
    post,
    path = "/v1/subscription/checkout",
    tag = "Subscription",
    request_body = CreateCheckoutRequest,
    responses(
        (status = 200, description = "Checkout session created", body = CreateCheckoutResponse),
        (status = 400, description = "Invalid price or return URL", body = crate::error::ApiErrorResponse),
        (status = 401, description = "Unauthorized", body = crate::error::ApiErrorResponse),
        (status = 502, description = "Billing provider unavailable", body = crate::error::ApiErrorResponse)
    ),
    security(
        ("session_token" = [])
    )
)]
pub async fn create_checkout(
    State(app_state): State<AppState>,
    Extension(tenant): Extension<AuthenticatedTenant>,
    Json(req): Json<CreateCheckoutRequest>,
) -> Result<Json<CreateCheckoutResponse>, ApiError> {
    tracing::info!("Creating checkout for tenant_id={}", tenant.tenant_id);

    validate_redirect_url(&req.return_url, "returnUrl")?;

    let email = req.email.or(Some(tenant.email));
    let session = app_state
        .entitlement_service
        .create_checkout(tenant.tenant_id, email, req.price_id, req.return_url)
        .await?;

    Ok(Json(CreateCheckoutResponse {
        session_id: session.id,
        url: session.url,
    }))
}

/// List configured subscription prices
///
/// Prices the provider fails to report are returned as null so the rest of
/// the catalog still renders.
#[utoipa::path(
    get,
    path = "/v1/subscription/prices",
    tag = "Subscription",
    responses(
        (status = 200, description = "Configured prices", body = SubscriptionPricesResponse)
    )
)]
pub async fn list_prices(
    State(app_state): State<AppState>,
) -> Result<Json<SubscriptionPricesResponse>, ApiError> {
    let prices = app_state.entitlement_service.subscription_prices().await?;
    Ok(Json(prices.into()))
}
