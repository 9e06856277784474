// 数据库实体模块
// 包含所有 SeaORM 实体定义

pub mod addon_installation;
pub mod plugin_registry;
pub mod schema_migration;

pub mod prelude;
pub use prelude::*;
