pub mod ports;
pub mod stripe;

pub use stripe::StripeBillingProvider;
