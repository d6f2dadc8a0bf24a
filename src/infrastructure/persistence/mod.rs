//! Persistence implementations

pub mod memory;

#[cfg(feature = "postgres")]
pub mod call_repository;
#[cfg(feature = "postgres")]
pub mod database;
#[cfg(feature = "postgres")]
pub mod directory_repository;

pub use memory::{InMemoryCallRepository, InMemoryDirectory};

#[cfg(feature = "postgres")]
pub use call_repository::PgCallRepository;
#[cfg(feature = "postgres")]
pub use database::{create_pool, run_migrations, DatabaseConfig};
#[cfg(feature = "postgres")]
pub use directory_repository::PgDirectory;
