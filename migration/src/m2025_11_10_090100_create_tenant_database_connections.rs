//! Creates the `tenant_database_connections` table holding user-registered
//! external database descriptors.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(TenantDatabaseConnections::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(TenantDatabaseConnections::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(TenantDatabaseConnections::TenantId)
                            .uuid()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(TenantDatabaseConnections::Name)
                            .text()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(TenantDatabaseConnections::Engine)
                            .text()
                            .not_null()
                            .default("postgres"),
                    )
                    .col(
                        ColumnDef::new(TenantDatabaseConnections::Host)
                            .text()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(TenantDatabaseConnections::Port)
                            .integer()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(TenantDatabaseConnections::DatabaseName)
                            .text()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(TenantDatabaseConnections::Username)
                            .text()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(TenantDatabaseConnections::PasswordCiphertext)
                            .binary()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(TenantDatabaseConnections::ConnectionUrlCiphertext)
                            .binary()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(TenantDatabaseConnections::UseSsl)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(TenantDatabaseConnections::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_tenant_database_connections_tenant_id")
                    .table(TenantDatabaseConnections::Table)
                    .col(TenantDatabaseConnections::TenantId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_tenant_database_connections_tenant_id")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(
                Table::drop()
                    .table(TenantDatabaseConnections::Table)
                    .to_owned(),
            )
            .await
    }
}

#[derive(DeriveIden)]
enum TenantDatabaseConnections {
    Table,
    Id,
    TenantId,
    Name,
    Engine,
    Host,
    Port,
    DatabaseName,
    Username,
    PasswordCiphertext,
    ConnectionUrlCiphertext,
    UseSsl,
    CreatedAt,
}
