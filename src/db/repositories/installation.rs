// 插件安装记录仓储实现

use crate::db::entities::{addon_installation, prelude::*};
use crate::errors::NasError;
use sea_orm::sea_query::OnConflict;
use sea_orm::{prelude::*, *};
use tracing::{debug, instrument};

/// 插件安装记录仓储
pub struct InstallationRepository;

impl InstallationRepository {
    /// 根据插件 ID 查找记录
    #[instrument(skip(db))]
    pub async fn find_by_addon_id(
        db: &DatabaseConnection,
        addon_id: &str,
    ) -> Result<Option<addon_installation::Model>, NasError> {
        let record = AddonInstallation::find_by_id(addon_id.to_string())
            .one(db)
            .await?;
        Ok(record)
    }

    /// 插入或整行覆盖一条记录
    #[instrument(skip(db, model), fields(addon_id = %model.addon_id))]
    pub async fn upsert(
        db: &DatabaseConnection,
        model: addon_installation::Model,
    ) -> Result<(), NasError> {
        let active: addon_installation::ActiveModel = model.into();

        AddonInstallation::insert(active)
            .on_conflict(
                OnConflict::column(addon_installation::Column::AddonId)
                    .update_columns([
                        addon_installation::Column::Installed,
                        addon_installation::Column::InstalledVersion,
                        addon_installation::Column::InstalledAt,
                        addon_installation::Column::UninstalledAt,
                        addon_installation::Column::Enabled,
                        addon_installation::Column::AutoUpdate,
                        addon_installation::Column::Config,
                        addon_installation::Column::LastError,
                        addon_installation::Column::UpdatedAt,
                    ])
                    .to_owned(),
            )
            .exec_without_returning(db)
            .await?;

        debug!("安装记录已写入");
        Ok(())
    }

    /// 列出全部记录（按插件 ID 排序）
    #[instrument(skip(db))]
    pub async fn list(db: &DatabaseConnection) -> Result<Vec<addon_installation::Model>, NasError> {
        let records = AddonInstallation::find()
            .order_by_asc(addon_installation::Column::AddonId)
            .all(db)
            .await?;
        Ok(records)
    }

    /// 列出当前已安装的记录
    #[instrument(skip(db))]
    pub async fn list_installed(
        db: &DatabaseConnection,
    ) -> Result<Vec<addon_installation::Model>, NasError> {
        let records = AddonInstallation::find()
            .filter(addon_installation::Column::Installed.eq(true))
            .order_by_asc(addon_installation::Column::AddonId)
            .all(db)
            .await?;
        Ok(records)
    }
}
