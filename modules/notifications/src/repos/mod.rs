pub mod failed_repo;
pub mod processed_repo;

pub use failed_repo::{FailedEvent, PgFailedEventRepository};
pub use processed_repo::{PgProcessedEventRepository, ProcessedEventStore, RepoError};
