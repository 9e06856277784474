// API 处理器模块

pub mod addons;
pub mod health;
pub mod plugin_store;

#[cfg(test)]
mod tests;

pub use addons::configure_addon_routes;
pub use health::configure_health_routes;
pub use plugin_store::configure_plugin_store_routes;
