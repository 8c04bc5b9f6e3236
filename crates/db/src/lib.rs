pub mod connection;
pub mod fixtures;
pub mod migrations;
pub mod repositories;
pub mod store;

pub use connection::{connect, connect_with_config, connect_with_settings, DbPool};
pub use fixtures::{ReferenceSeedDataset, SeedResult, VerificationResult};
pub use repositories::{RepositoryError, SqlIdentityDirectory};
pub use store::{SqlUnitOfWork, SqliteTicketStore};
