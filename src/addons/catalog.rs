// 注册表目录持久化
// 每次同步在一个事务内整体替换，进程重启后从这里恢复目录

use crate::addons::registry::RegistryEntry;
use crate::db::entities::plugin_registry;
use crate::db::PluginRegistryRepository;
use crate::errors::NasError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::DatabaseConnection;
use tokio::sync::RwLock;
use tracing::warn;

/// 持久化的目录快照
#[derive(Debug, Clone, Default)]
pub struct StoredCatalog {
    pub entries: Vec<RegistryEntry>,
    pub synced_at: Option<DateTime<Utc>>,
}

/// 注册表目录存储
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// 读取最近一次保存的目录
    async fn load(&self) -> Result<StoredCatalog, NasError>;

    /// 整体替换目录；失败时保持原有内容
    async fn replace(&self, entries: &[RegistryEntry], synced_at: DateTime<Utc>)
        -> Result<(), NasError>;
}

/// 基于数据库的目录存储
pub struct DbCatalogStore {
    db: DatabaseConnection,
}

impl DbCatalogStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

#[async_trait]
impl CatalogStore for DbCatalogStore {
    async fn load(&self) -> Result<StoredCatalog, NasError> {
        let rows = PluginRegistryRepository::list(&self.db).await?;

        let mut stored = StoredCatalog::default();
        for row in rows {
            stored.synced_at = stored.synced_at.max(Some(row.synced_at));
            match serde_json::from_value::<RegistryEntry>(row.entry) {
                Ok(entry) => stored.entries.push(entry),
                Err(e) => warn!(addon_id = %row.id, error = %e, "无法解析已保存的注册表条目，已跳过"),
            }
        }

        Ok(stored)
    }

    async fn replace(
        &self,
        entries: &[RegistryEntry],
        synced_at: DateTime<Utc>,
    ) -> Result<(), NasError> {
        let models = entries
            .iter()
            .map(|entry| {
                Ok(plugin_registry::Model {
                    id: entry.manifest.id.clone(),
                    version: entry.manifest.version.clone(),
                    entry: serde_json::to_value(entry)?,
                    synced_at,
                })
            })
            .collect::<Result<Vec<_>, NasError>>()?;

        PluginRegistryRepository::replace_all(&self.db, models).await
    }
}

/// 内存中的目录存储
#[derive(Default)]
pub struct MemoryCatalogStore {
    stored: RwLock<StoredCatalog>,
}

impl MemoryCatalogStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CatalogStore for MemoryCatalogStore {
    async fn load(&self) -> Result<StoredCatalog, NasError> {
        Ok(self.stored.read().await.clone())
    }

    async fn replace(
        &self,
        entries: &[RegistryEntry],
        synced_at: DateTime<Utc>,
    ) -> Result<(), NasError> {
        *self.stored.write().await = StoredCatalog {
            entries: entries.to_vec(),
            synced_at: Some(synced_at),
        };
        Ok(())
    }
}
