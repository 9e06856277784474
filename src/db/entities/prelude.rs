// 实体预导入模块
// 提供便捷的实体导入

pub use super::addon_installation::{
    ActiveModel as AddonInstallationActiveModel, Entity as AddonInstallation,
    Model as AddonInstallationModel,
};
pub use super::plugin_registry::{
    ActiveModel as PluginRegistryActiveModel, Entity as PluginRegistry,
    Model as PluginRegistryModel,
};
pub use super::schema_migration::{
    ActiveModel as SchemaMigrationActiveModel, Entity as SchemaMigration,
    Model as SchemaMigrationModel,
};
