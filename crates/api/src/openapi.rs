use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::OpenApi;

/// OpenAPI documentation configuration
#[derive(OpenApi)]
#[openapi(
    info(
        title = "PetGestor Billing API",
        description = "Subscription entitlement reconciliation for the PetGestor pet-shop platform.",
        version = "1.0.0",
        license(name = "MIT",)
    ),
    paths(
        crate::routes::subscription::get_subscription_status,
        crate::routes::subscription::create_checkout,
        crate::routes::subscription::list_prices,
        crate::routes::auth::logout,
    ),
    components(schemas(
        crate::routes::subscription::SubscriptionStatusResponse,
        crate::routes::subscription::SubscriptionDataResponse,
        crate::routes::subscription::FreeLimitsResponse,
        crate::routes::subscription::CreateCheckoutRequest,
        crate::routes::subscription::CreateCheckoutResponse,
        crate::routes::subscription::SubscriptionPricesResponse,
        crate::routes::subscription::PriceResponse,
        crate::routes::auth::LogoutResponse,
        crate::error::ApiErrorResponse,
    )),
    modifiers(&SecurityAddon),
    tags(
        (name = "Health", description = "Service health endpoints"),
        (name = "Subscription", description = "Entitlement status, checkout and price endpoints"),
        (name = "Auth", description = "Session management endpoints")
    )
)]
pub struct ApiDoc;

/// Security scheme addon for Bearer token authentication
struct SecurityAddon;

impl utoipa::Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "session_token",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("session_token")
                        .description(Some("Session token issued at sign-in"))
                        .build(),
                ),
            )
        }
    }
}
