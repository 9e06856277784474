// 数据库模块
// 包含数据库连接、实体定义、迁移和仓储

pub mod connection;
pub mod entities;
pub mod migrations;
pub mod repositories;


pub use connection::*;
pub use migrations::*;
pub use repositories::*;

/// 测试用内存数据库（单连接，已迁移）
#[cfg(test)]
pub(crate) async fn memory_database() -> DatabaseManager {
    let config = crate::config::DatabaseConfig {
        url: "sqlite::memory:".to_string(),
        max_connections: 1,
        min_connections: 1,
        connect_timeout: 5,
        idle_timeout: 600,
    };
    let manager = DatabaseManager::connect(config).await.unwrap();
    MigrationManager::new(manager.get_connection().clone())
        .migrate()
        .await
        .unwrap();
    manager
}
