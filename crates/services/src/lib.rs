pub mod auth;
pub mod billing;
pub mod entitlement;
pub mod gate;
pub mod types;

pub use types::{SessionId, TenantId};
