//! Database migrations for the airbridge service.

pub use sea_orm_migration::prelude::*;

mod m2025_11_10_090000_create_third_party_connections;
mod m2025_11_10_090100_create_tenant_database_connections;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m2025_11_10_090000_create_third_party_connections::Migration),
            Box::new(m2025_11_10_090100_create_tenant_database_connections::Migration),
        ]
    }
}
