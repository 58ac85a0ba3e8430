use crate::entitlement::ports::{Profile, Role};

/// Route where the paywall itself lives. A locked-out tenant must still be
/// able to reach it, otherwise the paywall redirect would loop.
pub const BILLING_ROUTE: &str = "/assinatura";
/// Landing page for tenants whose trial ended without a subscription.
pub const PAYWALL_ROUTE: &str = "/expired";
/// Default landing page for authenticated tenants.
pub const DASHBOARD_ROUTE: &str = "/dashboard";

/// Routes only admins may open.
const ADMIN_ONLY_ROUTES: &[&str] = &["/relatorios", BILLING_ROUTE];

/// Authentication state as seen by the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    /// Session lookup still in flight
    Loading,
    /// No session
    Anonymous,
    /// Session exists but the email was never verified
    Unverified,
    Authenticated,
}

/// Role requirement of the target route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteAccess {
    AnyAuthenticated,
    AdminOnly,
}

impl RouteAccess {
    pub fn for_route(route: &str) -> Self {
        if ADMIN_ONLY_ROUTES.contains(&route) {
            Self::AdminOnly
        } else {
            Self::AnyAuthenticated
        }
    }
}

/// Trial/subscription flags from the reconciled entitlement. `None` in the
/// gate context while the status fetch is outstanding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntitlementFlags {
    pub trial_active: bool,
    pub is_subscribed: bool,
}

/// Everything the gate looks at for one navigation.
#[derive(Debug, Clone)]
pub struct GateContext<'a> {
    pub auth: AuthState,
    /// `None` while the profile fetch is outstanding
    pub profile: Option<&'a Profile>,
    /// `None` while the entitlement fetch is outstanding
    pub entitlement: Option<EntitlementFlags>,
    /// Target route path, e.g. `/dashboard`
    pub route: &'a str,
    pub access: RouteAccess,
}

/// Outcome of a gate evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    /// Required state still in flight; render a loading indicator only
    Loading,
    /// Session invalid (unverified email); terminate it and go to login
    SignOut,
    /// No session; send to login, keeping the intended destination
    RedirectToLogin { return_to: String },
    /// Authorization failure; back to the landing page with a notice
    RedirectToDashboard { notice: &'static str },
    /// Trial over, no subscription; send to the paywall
    RedirectToPaywall,
    /// Render the protected content
    Allow,
}

/// Decide what to do with a protected-content request. First match wins,
/// and the order matters: loading states are checked before role and plan
/// so in-flight fetches never flash an incorrect redirect.
pub fn evaluate(ctx: &GateContext<'_>) -> GateDecision {
    match ctx.auth {
        AuthState::Loading => return GateDecision::Loading,
        AuthState::Unverified => return GateDecision::SignOut,
        AuthState::Anonymous => {
            return GateDecision::RedirectToLogin {
                return_to: ctx.route.to_string(),
            }
        }
        AuthState::Authenticated => {}
    }

    let (Some(profile), Some(flags)) = (ctx.profile, ctx.entitlement) else {
        return GateDecision::Loading;
    };

    if ctx.access == RouteAccess::AdminOnly && profile.role != Role::Admin {
        return GateDecision::RedirectToDashboard {
            notice: "Acesso restrito a administradores",
        };
    }

    let on_billing_or_paywall = ctx.route == BILLING_ROUTE || ctx.route == PAYWALL_ROUTE;
    if !flags.trial_active && !flags.is_subscribed && !on_billing_or_paywall {
        return GateDecision::RedirectToPaywall;
    }

    GateDecision::Allow
}
