pub mod inmemory_outbox;
pub mod outbox_repo;
pub mod user_repo;
pub mod verification_repo;

pub use inmemory_outbox::InMemoryOutboxRepository;
pub use outbox_repo::{OutboxError, OutboxStore, PgOutboxRepository};
pub use user_repo::{PgUserRepository, UserRepoError, UserStore};
pub use verification_repo::{PgVerificationRepository, VerificationError, VerificationStore};
