// 数据库迁移
// 表结构由实体定义生成，按后端构建 SQL；已应用的版本连同校验和记录在 schema_migrations

use crate::db::entities::{addon_installation, schema_migration, prelude::*};
use crate::errors::NasError;
use sea_orm::sea_query::Index;
use sea_orm::{
    ActiveModelTrait, ConnectionTrait, DatabaseBackend, DatabaseConnection, EntityTrait,
    QueryOrder, Schema, Set, Statement, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use tracing::{info, instrument, warn};

/// 迁移定义
pub struct Migration {
    pub version: &'static str,
    pub name: &'static str,
    build: fn(DatabaseBackend) -> Vec<Statement>,
}

impl Migration {
    /// 针对指定后端构建语句
    pub fn statements(&self, backend: DatabaseBackend) -> Vec<Statement> {
        (self.build)(backend)
    }

    /// 计算迁移内容的校验和
    pub fn checksum(&self, backend: DatabaseBackend) -> String {
        let mut hasher = Sha256::new();
        for stmt in self.statements(backend) {
            hasher.update(stmt.sql.as_bytes());
        }
        format!("{:x}", hasher.finalize())
    }
}

/// 迁移状态
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationStatus {
    pub version: String,
    pub name: String,
    pub applied_at: Option<chrono::DateTime<chrono::Utc>>,
    pub is_applied: bool,
    pub checksum: String,
}

/// 获取所有迁移
pub fn all_migrations() -> Vec<Migration> {
    vec![
        Migration {
            version: "20250101_000001",
            name: "create_addon_installations_table",
            build: |backend| {
                let schema = Schema::new(backend);
                let table = schema
                    .create_table_from_entity(AddonInstallation)
                    .if_not_exists()
                    .to_owned();
                vec![backend.build(&table)]
            },
        },
        Migration {
            version: "20250101_000002",
            name: "index_addon_installations_installed",
            build: |backend| {
                let index = Index::create()
                    .if_not_exists()
                    .name("idx_addon_installations_installed")
                    .table(AddonInstallation)
                    .col(addon_installation::Column::Installed)
                    .to_owned();
                vec![backend.build(&index)]
            },
        },
        Migration {
            version: "20250101_000003",
            name: "create_plugin_registry_table",
            build: |backend| {
                let schema = Schema::new(backend);
                let table = schema
                    .create_table_from_entity(PluginRegistry)
                    .if_not_exists()
                    .to_owned();
                vec![backend.build(&table)]
            },
        },
    ]
}

/// 迁移管理器
pub struct MigrationManager {
    db: DatabaseConnection,
}

impl MigrationManager {
    /// 创建新的迁移管理器
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// 创建迁移记录表
    #[instrument(skip(self))]
    pub async fn init(&self) -> Result<(), NasError> {
        let backend = self.db.get_database_backend();
        let schema = Schema::new(backend);
        let table = schema
            .create_table_from_entity(SchemaMigration)
            .if_not_exists()
            .to_owned();

        self.db.execute(backend.build(&table)).await?;
        Ok(())
    }

    /// 获取已应用的迁移
    #[instrument(skip(self))]
    pub async fn get_applied_migrations(&self) -> Result<Vec<MigrationStatus>, NasError> {
        let records = SchemaMigration::find()
            .order_by_asc(schema_migration::Column::Version)
            .all(&self.db)
            .await?;

        Ok(records
            .into_iter()
            .map(|record| MigrationStatus {
                version: record.version,
                name: record.name,
                applied_at: Some(record.applied_at),
                is_applied: true,
                checksum: record.checksum,
            })
            .collect())
    }

    /// 检查迁移状态
    #[instrument(skip(self))]
    pub async fn check_status(&self) -> Result<Vec<MigrationStatus>, NasError> {
        let backend = self.db.get_database_backend();
        let applied: HashMap<String, MigrationStatus> = self
            .get_applied_migrations()
            .await?
            .into_iter()
            .map(|m| (m.version.clone(), m))
            .collect();

        let status = all_migrations()
            .into_iter()
            .map(|migration| {
                let checksum = migration.checksum(backend);
                match applied.get(migration.version) {
                    Some(record) => {
                        if record.checksum != checksum {
                            warn!(version = %migration.version, "迁移校验和不匹配，可能已被修改");
                        }
                        record.clone()
                    }
                    None => MigrationStatus {
                        version: migration.version.to_string(),
                        name: migration.name.to_string(),
                        applied_at: None,
                        is_applied: false,
                        checksum,
                    },
                }
            })
            .collect();

        Ok(status)
    }

    /// 应用待处理的迁移，返回本次应用的版本
    #[instrument(skip(self))]
    pub async fn migrate(&self) -> Result<Vec<String>, NasError> {
        self.init().await?;

        let pending: Vec<String> = self
            .check_status()
            .await?
            .into_iter()
            .filter(|s| !s.is_applied)
            .map(|s| s.version)
            .collect();

        let mut applied = Vec::new();
        for migration in all_migrations()
            .into_iter()
            .filter(|m| pending.iter().any(|v| v == m.version))
        {
            self.apply_migration(&migration).await?;
            applied.push(migration.version.to_string());
        }

        if applied.is_empty() {
            info!("没有待处理的迁移");
        } else {
            info!(count = applied.len(), "迁移应用完成");
        }

        Ok(applied)
    }

    /// 在事务中应用单个迁移并记录
    #[instrument(skip(self, migration), fields(version = %migration.version))]
    async fn apply_migration(&self, migration: &Migration) -> Result<(), NasError> {
        info!(name = %migration.name, "应用迁移");

        let backend = self.db.get_database_backend();
        let start_time = std::time::Instant::now();
        let txn = self.db.begin().await?;

        for stmt in migration.statements(backend) {
            if let Err(e) = txn.execute(stmt).await {
                txn.rollback().await?;
                return Err(NasError::database(format!(
                    "迁移 {} 执行失败: {}",
                    migration.version, e
                )));
            }
        }

        let execution_time_ms = start_time.elapsed().as_millis() as i64;
        schema_migration::ActiveModel {
            version: Set(migration.version.to_string()),
            name: Set(migration.name.to_string()),
            checksum: Set(migration.checksum(backend)),
            applied_at: Set(chrono::Utc::now()),
            execution_time_ms: Set(execution_time_ms),
        }
        .insert(&txn)
        .await?;

        txn.commit().await?;

        info!(execution_time_ms, "迁移应用成功");
        Ok(())
    }
}
