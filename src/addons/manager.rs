// 插件生命周期管理
// 组合清单库、安装状态存储与供给器，负责安装/卸载的决策与一致性

use crate::addons::installation::{InstallationRecord, InstallationStore};
use crate::addons::manifest::{AddonManifest, ManifestStore};
use crate::addons::provisioner::{AddonProvisioner, ProvisionProbe};
use crate::addons::registry::{CatalogItem, RegistryEntry};
use crate::addons::restart::RestartCoordinator;
use crate::errors::NasError;
use nasplane_common::{AddonSource, RestartToken};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;

/// 清单及其安装记录（无记录表示从未安装）
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct AddonWithStatus {
    pub manifest: AddonManifest,
    pub status: Option<InstallationRecord>,
}

/// 安装记录加上系统探测结果
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct AddonStatus {
    #[serde(flatten)]
    pub record: InstallationRecord,
    pub packages_ok: bool,
    pub services_ok: bool,
}

impl AddonStatus {
    pub fn new(record: InstallationRecord, probe: ProvisionProbe) -> Self {
        Self {
            record,
            packages_ok: probe.packages_ok,
            services_ok: probe.services_ok,
        }
    }

    /// 没有安装记录时的合成状态
    pub fn not_installed(addon_id: &str) -> Self {
        Self {
            record: InstallationRecord::never_installed(addon_id),
            packages_ok: false,
            services_ok: false,
        }
    }
}

/// 安装结果
#[derive(Debug, Clone)]
pub struct InstallOutcome {
    pub manifest: AddonManifest,
    pub record: InstallationRecord,
    pub previous_version: Option<String>,
}

/// 插件商店更新结果
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct UpdateOutcome {
    pub addon_id: String,
    pub previous_version: Option<String>,
    pub version: String,
    pub updated: bool,
}

/// 记录提交失败后系统应处于的状态
#[derive(Debug, Clone, PartialEq, Eq)]
enum Expected {
    Installed(String),
    Uninstalled,
}

/// 插件管理器
///
/// 同一插件的安装与卸载由按 ID 的互斥锁串行化，供给期间一直持有该锁。
/// 供给成功但记录提交失败的插件进入待核对集合，下次查询时按系统实际状态修正。
pub struct AddonManager {
    manifests: Arc<ManifestStore>,
    installations: Arc<dyn InstallationStore>,
    provisioner: Arc<dyn AddonProvisioner>,
    restart: Arc<RestartCoordinator>,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    indeterminate: Mutex<HashMap<String, Expected>>,
}

impl AddonManager {
    pub fn new(
        manifests: Arc<ManifestStore>,
        installations: Arc<dyn InstallationStore>,
        provisioner: Arc<dyn AddonProvisioner>,
        restart: Arc<RestartCoordinator>,
    ) -> Self {
        Self {
            manifests,
            installations,
            provisioner,
            restart,
            locks: Mutex::new(HashMap::new()),
            indeterminate: Mutex::new(HashMap::new()),
        }
    }

    pub fn manifests(&self) -> &Arc<ManifestStore> {
        &self.manifests
    }

    pub fn restart_coordinator(&self) -> &Arc<RestartCoordinator> {
        &self.restart
    }

    /// 所有已知清单及其安装记录，按 ID 排序
    pub async fn list_with_status(&self) -> Result<Vec<AddonWithStatus>, NasError> {
        self.reconcile_all().await;

        let mut records: HashMap<String, InstallationRecord> = self
            .installations
            .list()
            .await?
            .into_iter()
            .map(|r| (r.addon_id.clone(), r))
            .collect();

        Ok(self
            .manifests
            .list()
            .await
            .into_iter()
            .map(|manifest| AddonWithStatus {
                status: records.remove(&manifest.id),
                manifest,
            })
            .collect())
    }

    pub async fn get_manifest(&self, id: &str) -> Result<AddonManifest, NasError> {
        self.manifests
            .get(id)
            .await
            .ok_or_else(|| NasError::not_found(format!("addon {}", id)))
    }

    /// 安装记录；清单未知或从未安装时返回 `NotFound`
    pub async fn get_status(&self, id: &str) -> Result<InstallationRecord, NasError> {
        self.get_manifest(id).await?;
        self.reconcile(id).await;

        self.installations
            .get(id)
            .await?
            .ok_or_else(|| NasError::not_found(format!("installation record {}", id)))
    }

    /// 探测系统实际状态，探测失败视为未就绪
    pub async fn probe(&self, manifest: &AddonManifest) -> ProvisionProbe {
        match self.provisioner.probe(manifest).await {
            Ok(probe) => probe,
            Err(e) => {
                warn!(addon_id = %manifest.id, error = %e, "探测插件状态失败");
                ProvisionProbe {
                    packages_ok: false,
                    services_ok: false,
                }
            }
        }
    }

    /// 安装插件
    ///
    /// 同版本已安装时返回 `Conflict`；不同版本则覆盖安装。不会触发重启。
    #[instrument(skip(self))]
    pub async fn install(&self, id: &str) -> Result<InstallOutcome, NasError> {
        let _pin = self.manifests.pin(id);
        let manifest = self.get_manifest(id).await?;

        let lock = self.lock_for(id);
        let _guard = lock.lock().await;

        let previous = self.installations.get(id).await?;
        if let Some(record) = &previous {
            if record.is_installed_at(&manifest.version) {
                return Err(NasError::conflict(format!(
                    "插件 {} 已安装版本 {}",
                    id, manifest.version
                )));
            }
        }

        info!(addon_id = %id, version = %manifest.version, "开始安装插件");

        if let Err(e) = self.provisioner.provision(&manifest).await {
            error!(addon_id = %id, error = %e, "插件供给失败");
            if let Some(record) = &previous {
                if let Err(store_err) = self
                    .installations
                    .upsert(record.with_error(e.to_string()))
                    .await
                {
                    warn!(addon_id = %id, error = %store_err, "记录安装失败信息失败");
                }
            }
            return Err(e);
        }

        let record = InstallationRecord::installed(&manifest, previous.as_ref());
        if let Err(e) = self.installations.upsert(record.clone()).await {
            error!(addon_id = %id, error = %e, "插件已供给但安装记录提交失败，等待核对");
            self.mark_indeterminate(id, Expected::Installed(manifest.version.clone()));
            return Err(NasError::internal(format!("安装记录提交失败: {}", e)));
        }
        self.clear_indeterminate(id);

        info!(addon_id = %id, version = %manifest.version, "插件安装完成");
        Ok(InstallOutcome {
            previous_version: previous
                .filter(|r| r.installed)
                .and_then(|r| r.installed_version),
            manifest,
            record,
        })
    }

    /// 卸载插件；未安装时返回 `Conflict`
    ///
    /// 找不到清单时无法移除资源，返回 `Internal` 且记录保持已安装。
    #[instrument(skip(self))]
    pub async fn uninstall(&self, id: &str) -> Result<InstallationRecord, NasError> {
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;

        let record = self
            .installations
            .get(id)
            .await?
            .ok_or_else(|| NasError::not_found(format!("installation record {}", id)))?;

        if !record.installed {
            return Err(NasError::conflict(format!("插件 {} 未安装", id)));
        }

        info!(addon_id = %id, "开始卸载插件");

        let Some(manifest) = self.manifests.get(id).await else {
            error!(addon_id = %id, "已安装插件的清单不存在，无法移除资源");
            return Err(NasError::internal(format!("插件 {} 的清单不存在，无法卸载", id)));
        };

        if let Err(e) = self.provisioner.deprovision(&manifest).await {
            error!(addon_id = %id, error = %e, "插件资源移除失败");
            if let Err(store_err) =
                self.installations.upsert(record.with_error(e.to_string())).await
            {
                warn!(addon_id = %id, error = %store_err, "记录卸载失败信息失败");
            }
            return Err(e);
        }

        let uninstalled = record.uninstalled();
        if let Err(e) = self.installations.upsert(uninstalled.clone()).await {
            error!(addon_id = %id, error = %e, "插件已移除但卸载记录提交失败，等待核对");
            self.mark_indeterminate(id, Expected::Uninstalled);
            return Err(NasError::internal(format!("卸载记录提交失败: {}", e)));
        }
        self.clear_indeterminate(id);

        info!(addon_id = %id, "插件卸载完成");
        Ok(uninstalled)
    }

    /// 计划一次延迟重启，失败只记录日志
    pub fn schedule_restart(&self) -> Option<RestartToken> {
        let token = self.restart.schedule();
        if token.is_none() {
            warn!("重启计划失败，插件需要手动重启服务后生效");
        }
        token
    }

    /// 任一已更新插件需要重启时计划一次重启，返回是否已计划
    pub async fn restart_after_updates(&self, outcomes: &[UpdateOutcome]) -> bool {
        let mut needs_restart = false;
        for outcome in outcomes.iter().filter(|o| o.updated) {
            match self.manifests.get(&outcome.addon_id).await {
                Some(manifest) => needs_restart |= manifest.requires_restart,
                None => warn!(addon_id = %outcome.addon_id, "已更新插件的清单不存在"),
            }
        }

        needs_restart && self.schedule_restart().is_some()
    }

    /// 将注册表插件更新到目录中的最新版本
    #[instrument(skip(self))]
    pub async fn update(&self, id: &str) -> Result<UpdateOutcome, NasError> {
        let _pin = self.manifests.pin(id);
        let record = self
            .installations
            .get(id)
            .await?
            .filter(|r| r.installed)
            .ok_or_else(|| NasError::not_found(format!("installed plugin {}", id)))?;

        let manifest = self.get_manifest(id).await?;
        if manifest.source != AddonSource::Registry {
            return Err(NasError::not_found(format!("registry plugin {}", id)));
        }

        let previous_version = record.installed_version.clone();
        if record.is_installed_at(&manifest.version) {
            return Ok(UpdateOutcome {
                addon_id: id.to_string(),
                previous_version,
                version: manifest.version,
                updated: false,
            });
        }

        match self.install(id).await {
            Ok(outcome) => Ok(UpdateOutcome {
                addon_id: id.to_string(),
                previous_version,
                version: outcome.manifest.version,
                updated: true,
            }),
            // 并发请求已完成同一版本的安装
            Err(e) if e.is_conflict() => Ok(UpdateOutcome {
                addon_id: id.to_string(),
                previous_version,
                version: manifest.version,
                updated: false,
            }),
            Err(e) => Err(e),
        }
    }

    /// 对开启自动更新且目录中有新版本的注册表插件执行更新
    ///
    /// 单个插件失败只记录日志，返回实际完成更新的结果。
    #[instrument(skip(self))]
    pub async fn apply_auto_updates(&self) -> Result<Vec<UpdateOutcome>, NasError> {
        let mut outcomes = Vec::new();

        for record in self.installations.list().await? {
            if !record.installed || !record.auto_update {
                continue;
            }
            let Some(entry) = self.manifests.registry_entry(&record.addon_id).await else {
                continue;
            };
            if record.is_installed_at(&entry.manifest.version) {
                continue;
            }

            match self.update(&record.addon_id).await {
                Ok(outcome) if outcome.updated => {
                    info!(
                        addon_id = %outcome.addon_id,
                        version = %outcome.version,
                        "插件已自动更新"
                    );
                    outcomes.push(outcome);
                }
                Ok(_) => {}
                Err(e) => warn!(addon_id = %record.addon_id, error = %e, "插件自动更新失败"),
            }
        }

        Ok(outcomes)
    }

    pub async fn enable(&self, id: &str) -> Result<InstallationRecord, NasError> {
        self.set_enabled(id, true).await
    }

    pub async fn disable(&self, id: &str) -> Result<InstallationRecord, NasError> {
        self.set_enabled(id, false).await
    }

    /// 切换已安装插件的启用状态；状态未变化时直接返回现有记录
    #[instrument(skip(self))]
    async fn set_enabled(&self, id: &str, enabled: bool) -> Result<InstallationRecord, NasError> {
        let manifest = self.get_manifest(id).await?;

        let lock = self.lock_for(id);
        let _guard = lock.lock().await;

        let record = self.installed_record(id).await?;
        if record.enabled == enabled {
            return Ok(record);
        }

        let result = if enabled {
            self.provisioner.activate(&manifest).await
        } else {
            self.provisioner.deactivate(&manifest).await
        };
        if let Err(e) = result {
            error!(addon_id = %id, enabled, error = %e, "切换插件启用状态失败");
            return Err(e);
        }

        let updated = record.with_enabled(enabled);
        self.installations.upsert(updated.clone()).await?;

        info!(addon_id = %id, enabled, "插件启用状态已更新");
        Ok(updated)
    }

    /// 更新已安装插件的配置与自动更新开关
    #[instrument(skip(self, config))]
    pub async fn configure(
        &self,
        id: &str,
        config: Option<Value>,
        auto_update: Option<bool>,
    ) -> Result<InstallationRecord, NasError> {
        self.get_manifest(id).await?;
        if config.as_ref().is_some_and(|c| !c.is_object()) {
            return Err(NasError::validation("config", "插件配置必须是 JSON 对象"));
        }

        let lock = self.lock_for(id);
        let _guard = lock.lock().await;

        let record = self.installed_record(id).await?;
        let updated = record.with_settings(config, auto_update);
        self.installations.upsert(updated.clone()).await?;

        info!(addon_id = %id, auto_update = updated.auto_update, "插件设置已更新");
        Ok(updated)
    }

    /// 已安装的记录；无记录返回 `NotFound`，未安装返回 `Conflict`
    async fn installed_record(&self, id: &str) -> Result<InstallationRecord, NasError> {
        let record = self
            .installations
            .get(id)
            .await?
            .ok_or_else(|| NasError::not_found(format!("installation record {}", id)))?;

        if !record.installed {
            return Err(NasError::conflict(format!("插件 {} 未安装", id)));
        }
        Ok(record)
    }

    /// 为注册表条目附加安装状态
    pub async fn catalog_items(
        &self,
        entries: Vec<RegistryEntry>,
    ) -> Result<Vec<CatalogItem>, NasError> {
        let records: HashMap<String, InstallationRecord> = self
            .installations
            .list()
            .await?
            .into_iter()
            .map(|r| (r.addon_id.clone(), r))
            .collect();

        Ok(entries
            .into_iter()
            .map(|entry| {
                let record = records.get(&entry.manifest.id);
                CatalogItem::new(entry, record)
            })
            .collect())
    }

    /// 已安装的注册表插件
    pub async fn installed_registry_addons(&self) -> Result<Vec<CatalogItem>, NasError> {
        let entries = self.manifests.registry_entries().await;
        Ok(self
            .catalog_items(entries)
            .await?
            .into_iter()
            .filter(|item| item.installed)
            .collect())
    }

    fn lock_for(&self, id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = guard(&self.locks);
        Arc::clone(locks.entry(id.to_string()).or_default())
    }

    fn mark_indeterminate(&self, id: &str, expected: Expected) {
        guard(&self.indeterminate).insert(id.to_string(), expected);
    }

    fn clear_indeterminate(&self, id: &str) {
        guard(&self.indeterminate).remove(id);
    }

    /// 待核对的插件 ID
    pub fn pending_reconciliation(&self) -> Vec<String> {
        let mut ids: Vec<String> = guard(&self.indeterminate).keys().cloned().collect();
        ids.sort();
        ids
    }

    async fn reconcile_all(&self) {
        for id in self.pending_reconciliation() {
            self.reconcile(&id).await;
        }
    }

    /// 按系统实际状态修正单个插件的安装记录
    async fn reconcile(&self, id: &str) {
        let Some(expected) = guard(&self.indeterminate).get(id).cloned() else {
            return;
        };

        // 正在安装或卸载的插件由该操作自行提交
        let lock = self.lock_for(id);
        let Ok(_guard) = lock.try_lock() else {
            return;
        };

        match self.reconcile_locked(id, &expected).await {
            Ok(()) => self.clear_indeterminate(id),
            Err(e) => warn!(addon_id = %id, error = %e, "插件状态核对失败，稍后重试"),
        }
    }

    async fn reconcile_locked(&self, id: &str, expected: &Expected) -> Result<(), NasError> {
        let Some(manifest) = self.manifests.get(id).await else {
            warn!(addon_id = %id, "待核对插件的清单已不存在，放弃核对");
            return Ok(());
        };

        let probe = self.provisioner.probe(&manifest).await?;
        let previous = self.installations.get(id).await?;

        match expected {
            Expected::Installed(version) if probe.is_materialized() => {
                if previous.as_ref().is_some_and(|r| r.is_installed_at(version)) {
                    return Ok(());
                }
                let mut record = InstallationRecord::installed(&manifest, previous.as_ref());
                record.installed_version = Some(version.clone());
                self.installations.upsert(record).await?;
                info!(addon_id = %id, version = %version, "核对完成：插件已安装");
            }
            Expected::Uninstalled if !probe.is_materialized() => {
                if let Some(record) = previous.filter(|r| r.installed) {
                    self.installations.upsert(record.uninstalled()).await?;
                    info!(addon_id = %id, "核对完成：插件已卸载");
                }
            }
            _ => {
                info!(addon_id = %id, ?expected, "系统状态与预期不符，保留现有记录");
            }
        }

        Ok(())
    }
}

fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
