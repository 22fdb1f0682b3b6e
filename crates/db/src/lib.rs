pub mod connection;
pub mod fixtures;
pub mod migrations;
pub mod repositories;

pub use connection::{connect_existing, connect_with_config, connect_with_settings, ping, DbPool};
pub use fixtures::{DemoSeedDataset, SeedResult, SeededUser, VerificationResult};
pub use repositories::{
    RepositoryError, SqlAttachmentRepository, SqlUserDirectory, SqlWorkflowStore,
};
