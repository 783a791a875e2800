//! Entity for the `tenant_database_connections` table: user-registered external
//! databases reachable through the tenant pool manager.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "tenant_database_connections")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    /// Database engine; only `postgres` is accepted today
    pub engine: String,
    pub host: String,
    pub port: Option<i32>,
    pub database_name: String,
    pub username: String,
    pub password_ciphertext: Option<Vec<u8>>,
    pub connection_url_ciphertext: Option<Vec<u8>>,
    pub use_ssl: bool,
    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
