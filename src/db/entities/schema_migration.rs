// 迁移记录实体定义

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "schema_migrations")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false, column_type = "String(Some(64))")]
    pub version: String,
    #[sea_orm(column_type = "String(Some(255))")]
    pub name: String,
    #[sea_orm(column_type = "String(Some(64))")]
    pub checksum: String,
    pub applied_at: DateTimeUtc,
    pub execution_time_ms: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
