pub mod plan_limits_repository;
pub mod profile_repository;
pub mod session_repository;
pub mod subscription_repository;

pub use plan_limits_repository::PostgresPlanLimitsRepository;
pub use profile_repository::PostgresProfileRepository;
pub use session_repository::PostgresSessionRepository;
pub use subscription_repository::PostgresSnapshotRepository;
