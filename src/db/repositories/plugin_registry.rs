// 注册表目录仓储实现

use crate::db::entities::{plugin_registry, prelude::*};
use crate::errors::NasError;
use sea_orm::{prelude::*, *};
use tracing::{debug, instrument};

/// 注册表目录仓储
pub struct PluginRegistryRepository;

impl PluginRegistryRepository {
    /// 列出全部条目（按 ID 排序）
    #[instrument(skip(db))]
    pub async fn list(db: &DatabaseConnection) -> Result<Vec<plugin_registry::Model>, NasError> {
        let records = PluginRegistry::find()
            .order_by_asc(plugin_registry::Column::Id)
            .all(db)
            .await?;
        Ok(records)
    }

    /// 在一个事务内清空并写入整个目录
    #[instrument(skip(db, models), fields(count = models.len()))]
    pub async fn replace_all(
        db: &DatabaseConnection,
        models: Vec<plugin_registry::Model>,
    ) -> Result<(), NasError> {
        let txn = db.begin().await?;

        let removed = match Self::write_all(&txn, models).await {
            Ok(removed) => removed,
            Err(e) => {
                txn.rollback().await?;
                return Err(e);
            }
        };

        txn.commit().await?;

        debug!(removed, "注册表目录已替换");
        Ok(())
    }

    async fn write_all(
        txn: &DatabaseTransaction,
        models: Vec<plugin_registry::Model>,
    ) -> Result<u64, NasError> {
        let removed = PluginRegistry::delete_many().exec(txn).await?;

        if !models.is_empty() {
            let active: Vec<plugin_registry::ActiveModel> =
                models.into_iter().map(Into::into).collect();
            PluginRegistry::insert_many(active)
                .exec_without_returning(txn)
                .await?;
        }

        Ok(removed.rows_affected)
    }
}
