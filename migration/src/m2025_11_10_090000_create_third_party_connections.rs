//! Creates the `third_party_connections` table.
//!
//! One row per tenant. The `auth_mode` column selects which of the two nullable
//! column groups (OAuth token fields or the API key) is populated.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(ThirdPartyConnections::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ThirdPartyConnections::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(ThirdPartyConnections::TenantId)
                            .uuid()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ThirdPartyConnections::AuthMode)
                            .text()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ThirdPartyConnections::ProviderAccountId)
                            .text()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(ThirdPartyConnections::AccessTokenCiphertext)
                            .binary()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(ThirdPartyConnections::RefreshTokenCiphertext)
                            .binary()
                            .null(),
                    )
                    .col(ColumnDef::new(ThirdPartyConnections::Scope).text().null())
                    .col(
                        ColumnDef::new(ThirdPartyConnections::TokenType)
                            .text()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(ThirdPartyConnections::ExpiresAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(ThirdPartyConnections::ApiKeyCiphertext)
                            .binary()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(ThirdPartyConnections::ExternalResourceId)
                            .text()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ThirdPartyConnections::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(ThirdPartyConnections::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        // Upserts conflict on this index.
        manager
            .create_index(
                Index::create()
                    .name("idx_third_party_connections_tenant_id")
                    .table(ThirdPartyConnections::Table)
                    .col(ThirdPartyConnections::TenantId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_third_party_connections_tenant_id")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(ThirdPartyConnections::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum ThirdPartyConnections {
    Table,
    Id,
    TenantId,
    AuthMode,
    ProviderAccountId,
    AccessTokenCiphertext,
    RefreshTokenCiphertext,
    Scope,
    TokenType,
    ExpiresAt,
    ApiKeyCiphertext,
    ExternalResourceId,
    CreatedAt,
    UpdatedAt,
}
