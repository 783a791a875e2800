//! # Repository Layer
//!
//! SeaORM-backed storage for provider credentials and tenant database descriptors.
//! Every lookup is scoped to a tenant.

pub mod tenant_database;
pub mod third_party_connection;

pub use tenant_database::{NewTenantDatabase, TenantDatabaseRepository};
pub use third_party_connection::{CredentialStore, ThirdPartyConnectionRepository};
