pub mod decision;
pub mod session;

pub use decision::{evaluate, AuthState, EntitlementFlags, GateContext, GateDecision, RouteAccess};
pub use session::{RefreshTicket, SessionStore};
