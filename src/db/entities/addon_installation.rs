// 插件安装记录实体定义

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// 插件安装记录实体
///
/// 每个插件 ID 至多一条记录；卸载只把 `installed` 置为 false，不删除行。
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "addon_installations")]
pub struct Model {
    /// 插件 ID
    #[sea_orm(primary_key, auto_increment = false, column_type = "String(Some(64))")]
    pub addon_id: String,

    /// 当前是否已安装
    pub installed: bool,

    /// 已安装版本
    #[sea_orm(column_type = "String(Some(64))", nullable)]
    pub installed_version: Option<String>,

    /// 最近一次安装时间
    #[sea_orm(nullable)]
    pub installed_at: Option<DateTimeUtc>,

    /// 最近一次卸载时间
    #[sea_orm(nullable)]
    pub uninstalled_at: Option<DateTimeUtc>,

    /// 是否启用
    pub enabled: bool,

    /// 注册表出现新版本时自动更新
    pub auto_update: bool,

    /// 插件配置（JSON 对象）
    #[sea_orm(column_type = "Json")]
    pub config: Json,

    /// 最近一次部署失败的错误信息
    #[sea_orm(column_type = "Text", nullable)]
    pub last_error: Option<String>,

    /// 更新时间
    pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
