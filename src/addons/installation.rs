// 插件安装状态存储
// 每个插件一条记录，卸载只修改状态不删除

use crate::addons::manifest::AddonManifest;
use crate::db::entities::addon_installation;
use crate::db::InstallationRepository;
use crate::errors::NasError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::DatabaseConnection;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tokio::sync::RwLock;
use utoipa::ToSchema;

/// 插件安装记录
///
/// `installed == true` 时 `installed_version` 非空且 `installed_at` 已设置。
/// 启用状态、自动更新与插件配置跨重装保留。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct InstallationRecord {
    pub addon_id: String,
    pub installed: bool,
    pub installed_version: Option<String>,
    pub installed_at: Option<DateTime<Utc>>,
    pub uninstalled_at: Option<DateTime<Utc>>,
    pub enabled: bool,
    pub auto_update: bool,
    #[schema(value_type = Object)]
    pub config: Value,
    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl InstallationRecord {
    /// 安装成功后的记录，保留历史卸载时间
    pub fn installed(manifest: &AddonManifest, previous: Option<&InstallationRecord>) -> Self {
        let now = Utc::now();
        Self {
            addon_id: manifest.id.clone(),
            installed: true,
            installed_version: Some(manifest.version.clone()),
            installed_at: Some(now),
            uninstalled_at: previous.and_then(|r| r.uninstalled_at),
            enabled: true,
            auto_update: previous.is_some_and(|r| r.auto_update),
            config: previous.map_or_else(empty_config, |r| r.config.clone()),
            last_error: None,
            updated_at: now,
        }
    }

    /// 从未安装过的插件的占位记录
    pub fn never_installed(addon_id: impl Into<String>) -> Self {
        Self {
            addon_id: addon_id.into(),
            installed: false,
            installed_version: None,
            installed_at: None,
            uninstalled_at: None,
            enabled: false,
            auto_update: false,
            config: empty_config(),
            last_error: None,
            updated_at: Utc::now(),
        }
    }

    /// 标记为已卸载，保留版本和安装时间
    pub fn uninstalled(&self) -> Self {
        let now = Utc::now();
        Self {
            installed: false,
            uninstalled_at: Some(now),
            enabled: false,
            last_error: None,
            updated_at: now,
            ..self.clone()
        }
    }

    /// 记录一次失败，不改变安装状态
    pub fn with_error(&self, message: impl Into<String>) -> Self {
        Self {
            last_error: Some(message.into()),
            updated_at: Utc::now(),
            ..self.clone()
        }
    }

    /// 切换启用状态
    pub fn with_enabled(&self, enabled: bool) -> Self {
        Self {
            enabled,
            updated_at: Utc::now(),
            ..self.clone()
        }
    }

    /// 更新插件设置，未给出的字段保持不变
    pub fn with_settings(&self, config: Option<Value>, auto_update: Option<bool>) -> Self {
        Self {
            config: config.unwrap_or_else(|| self.config.clone()),
            auto_update: auto_update.unwrap_or(self.auto_update),
            updated_at: Utc::now(),
            ..self.clone()
        }
    }

    /// 当前安装的是否为该版本
    pub fn is_installed_at(&self, version: &str) -> bool {
        self.installed && self.installed_version.as_deref() == Some(version)
    }
}

fn empty_config() -> Value {
    Value::Object(serde_json::Map::new())
}

impl From<addon_installation::Model> for InstallationRecord {
    fn from(model: addon_installation::Model) -> Self {
        Self {
            addon_id: model.addon_id,
            installed: model.installed,
            installed_version: model.installed_version,
            installed_at: model.installed_at,
            uninstalled_at: model.uninstalled_at,
            enabled: model.enabled,
            auto_update: model.auto_update,
            config: model.config,
            last_error: model.last_error,
            updated_at: model.updated_at,
        }
    }
}

impl From<InstallationRecord> for addon_installation::Model {
    fn from(record: InstallationRecord) -> Self {
        Self {
            addon_id: record.addon_id,
            installed: record.installed,
            installed_version: record.installed_version,
            installed_at: record.installed_at,
            uninstalled_at: record.uninstalled_at,
            enabled: record.enabled,
            auto_update: record.auto_update,
            config: record.config,
            last_error: record.last_error,
            updated_at: record.updated_at,
        }
    }
}

/// 安装状态存储
///
/// 所有操作都是单记录原子的。
#[async_trait]
pub trait InstallationStore: Send + Sync {
    /// 查找记录，不存在时返回 `None`
    async fn get(&self, addon_id: &str) -> Result<Option<InstallationRecord>, NasError>;

    /// 插入或覆盖记录
    async fn upsert(&self, record: InstallationRecord) -> Result<(), NasError>;

    /// 全部记录，按插件 ID 排序
    async fn list(&self) -> Result<Vec<InstallationRecord>, NasError>;
}

/// 基于数据库的安装状态存储
pub struct DbInstallationStore {
    db: DatabaseConnection,
}

impl DbInstallationStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

#[async_trait]
impl InstallationStore for DbInstallationStore {
    async fn get(&self, addon_id: &str) -> Result<Option<InstallationRecord>, NasError> {
        Ok(InstallationRepository::find_by_addon_id(&self.db, addon_id)
            .await?
            .map(InstallationRecord::from))
    }

    async fn upsert(&self, record: InstallationRecord) -> Result<(), NasError> {
        InstallationRepository::upsert(&self.db, record.into()).await
    }

    async fn list(&self) -> Result<Vec<InstallationRecord>, NasError> {
        Ok(InstallationRepository::list(&self.db)
            .await?
            .into_iter()
            .map(InstallationRecord::from)
            .collect())
    }
}

/// 内存中的安装状态存储
#[derive(Default)]
pub struct MemoryInstallationStore {
    records: RwLock<BTreeMap<String, InstallationRecord>>,
}

impl MemoryInstallationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl InstallationStore for MemoryInstallationStore {
    async fn get(&self, addon_id: &str) -> Result<Option<InstallationRecord>, NasError> {
        Ok(self.records.read().await.get(addon_id).cloned())
    }

    async fn upsert(&self, record: InstallationRecord) -> Result<(), NasError> {
        self.records
            .write()
            .await
            .insert(record.addon_id.clone(), record);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<InstallationRecord>, NasError> {
        Ok(self.records.read().await.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addons::manifest::builtin_manifests;
    use crate::db::memory_database;

    fn minio() -> AddonManifest {
        builtin_manifests()
            .into_iter()
            .find(|m| m.id == "minio")
            .unwrap()
    }

    #[test]
    fn test_record_transitions_keep_history() {
        let installed = InstallationRecord::installed(&minio(), None);
        assert!(installed.is_installed_at("1.0.0"));
        assert!(installed.installed_at.is_some());

        let uninstalled = installed.uninstalled();
        assert!(!uninstalled.installed);
        assert_eq!(uninstalled.installed_version.as_deref(), Some("1.0.0"));
        assert_eq!(uninstalled.installed_at, installed.installed_at);
        assert!(uninstalled.uninstalled_at.is_some());

        let reinstalled = InstallationRecord::installed(&minio(), Some(&uninstalled));
        assert_eq!(reinstalled.uninstalled_at, uninstalled.uninstalled_at);

        let failed = reinstalled.with_error("apt-get failed");
        assert!(failed.installed);
        assert_eq!(failed.last_error.as_deref(), Some("apt-get failed"));
    }

    #[test]
    fn test_settings_survive_reinstall() {
        let installed = InstallationRecord::installed(&minio(), None);
        assert!(installed.enabled);
        assert!(!installed.auto_update);
        assert_eq!(installed.config, serde_json::json!({}));

        let configured = installed
            .with_settings(Some(serde_json::json!({ "port": 9000 })), Some(true))
            .with_enabled(false);
        let uninstalled = configured.uninstalled();
        assert!(!uninstalled.enabled);

        let reinstalled = InstallationRecord::installed(&minio(), Some(&uninstalled));
        assert!(reinstalled.enabled);
        assert!(reinstalled.auto_update);
        assert_eq!(reinstalled.config["port"], 9000);

        let unchanged = reinstalled.with_settings(None, None);
        assert_eq!(unchanged.config, reinstalled.config);
        assert!(unchanged.auto_update);
    }

    async fn exercise_store(store: &dyn InstallationStore) {
        assert!(store.get("minio").await.unwrap().is_none());

        let record = InstallationRecord::installed(&minio(), None);
        store.upsert(record.clone()).await.unwrap();
        store.upsert(record.uninstalled()).await.unwrap();

        let stored = store.get("minio").await.unwrap().unwrap();
        assert!(!stored.installed);
        assert!(!stored.enabled);
        assert_eq!(stored.installed_version.as_deref(), Some("1.0.0"));

        let all = store.list().await.unwrap();
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn test_memory_store() {
        exercise_store(&MemoryInstallationStore::new()).await;
    }

    #[tokio::test]
    async fn test_db_store() {
        let db = memory_database().await;
        exercise_store(&DbInstallationStore::new(db.get_connection().clone())).await;
    }
}
