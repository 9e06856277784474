// 注册表目录条目实体定义

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// 最近一次同步得到的注册表目录，每次同步整体替换
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "plugin_registry")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false, column_type = "String(Some(64))")]
    pub id: String,

    #[sea_orm(column_type = "String(Some(64))")]
    pub version: String,

    /// 完整条目（清单、分发与展示信息）
    #[sea_orm(column_type = "Json")]
    pub entry: Json,

    pub synced_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
