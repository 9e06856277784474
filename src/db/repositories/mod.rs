// 数据库仓储模块
// 封装实体的增删改查操作

pub mod installation;
pub mod plugin_registry;

pub use installation::InstallationRepository;
pub use plugin_registry::PluginRegistryRepository;
