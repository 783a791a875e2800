//! Entity for the `third_party_connections` table.
//!
//! Flat storage form of [`crate::models::credential::ThirdPartyConnection`]: the
//! `auth_mode` column tags which nullable column group is populated.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "third_party_connections")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Unique: one provider connection per tenant
    #[sea_orm(unique)]
    pub tenant_id: Uuid,

    /// `oauth` or `api_key`
    pub auth_mode: String,

    pub provider_account_id: Option<String>,
    pub access_token_ciphertext: Option<Vec<u8>>,
    pub refresh_token_ciphertext: Option<Vec<u8>>,
    pub scope: Option<String>,
    pub token_type: Option<String>,
    pub expires_at: Option<DateTimeWithTimeZone>,

    pub api_key_ciphertext: Option<Vec<u8>>,

    /// Selected base id
    pub external_resource_id: String,

    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
