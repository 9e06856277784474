// 插件清单与清单库
// 内置清单与注册表清单分开保存，同步时只整体替换注册表部分

use crate::addons::catalog::{CatalogStore, StoredCatalog};
use crate::addons::installation::InstallationStore;
use crate::addons::registry::RegistryEntry;
use crate::errors::NasError;
use nasplane_common::{AddonSource, SyncStats, Timestamped};
use regex::Regex;
use semver::Version;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use utoipa::ToSchema;

/// 插件 ID 格式
pub const ADDON_ID_PATTERN: &str = r"^[a-z0-9][a-z0-9._-]{0,63}$";

/// 插件清单
///
/// 同一版本内不可变；注册表同步时整体替换，不做字段级修改。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct AddonManifest {
    pub id: String,
    pub name: String,
    /// 语义化版本号
    pub version: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    #[schema(value_type = Vec<String>)]
    pub capabilities: BTreeSet<String>,
    #[serde(default)]
    pub requires_restart: bool,
    #[serde(default)]
    #[schema(value_type = String, example = "bundled")]
    pub source: AddonSource,
    #[serde(default)]
    pub icon: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub author: String,
    /// 需要安装的系统软件包
    #[serde(default)]
    pub system_packages: Vec<String>,
    /// 需要启用的 systemd 服务
    #[serde(default)]
    pub services: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_component: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route_prefix: Option<String>,
    #[serde(default)]
    pub minimum_memory_mb: u64,
    #[serde(default)]
    pub minimum_disk_gb: u64,
    #[serde(default)]
    pub architecture: Vec<String>,
    /// 注册表插件的分发信息
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distribution: Option<Distribution>,
}

/// 插件包分发信息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Distribution {
    pub download_url: String,
    /// 十六进制 sha256
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

/// 清单校验器
pub struct ManifestValidator {
    id_pattern: Regex,
}

impl ManifestValidator {
    pub fn new() -> Result<Self, NasError> {
        let id_pattern = Regex::new(ADDON_ID_PATTERN)
            .map_err(|e| NasError::internal(format!("插件 ID 正则无效: {}", e)))?;
        Ok(Self { id_pattern })
    }

    /// 校验插件 ID 格式
    pub fn validate_id(&self, id: &str) -> Result<(), NasError> {
        if self.id_pattern.is_match(id) {
            Ok(())
        } else {
            Err(NasError::validation("id", format!("插件 ID 格式无效: {:?}", id)))
        }
    }

    /// 校验版本号为语义化版本
    pub fn validate_version(&self, id: &str, version: &str) -> Result<(), NasError> {
        Version::parse(version).map(|_| ()).map_err(|e| {
            NasError::validation("version", format!("插件 {} 的版本号无效 {:?}: {}", id, version, e))
        })
    }

    pub fn validate(&self, manifest: &AddonManifest) -> Result<(), NasError> {
        self.validate_id(&manifest.id)?;
        self.validate_version(&manifest.id, &manifest.version)?;

        if manifest.name.trim().is_empty() {
            return Err(NasError::validation(
                "name",
                format!("插件 {} 缺少名称", manifest.id),
            ));
        }

        Ok(())
    }
}

#[derive(Default)]
struct Catalog {
    bundled: BTreeMap<String, AddonManifest>,
    registry: BTreeMap<String, RegistryEntry>,
    last_sync: Option<Timestamped<SyncStats>>,
}

/// 清单库
///
/// 注册表部分由同步整体替换。已安装的插件与正在安装的插件（持有 [`RegistryPin`]）
/// 即使从远程目录消失也保留本地条目。
pub struct ManifestStore {
    catalog: RwLock<Catalog>,
    pins: Mutex<HashMap<String, usize>>,
}

/// 在持有期间阻止同步移除某个注册表条目
pub struct RegistryPin<'a> {
    store: &'a ManifestStore,
    id: String,
}

impl Drop for RegistryPin<'_> {
    fn drop(&mut self) {
        let mut pins = pin_guard(&self.store.pins);
        if let Some(count) = pins.get_mut(&self.id) {
            *count -= 1;
            if *count == 0 {
                pins.remove(&self.id);
            }
        }
    }
}

fn pin_guard(pins: &Mutex<HashMap<String, usize>>) -> MutexGuard<'_, HashMap<String, usize>> {
    pins.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl ManifestStore {
    /// 以给定的内置清单创建清单库
    pub fn new(bundled: Vec<AddonManifest>) -> Result<Self, NasError> {
        let mut catalog = Catalog::default();

        for mut manifest in bundled {
            manifest.source = AddonSource::Bundled;
            let id = manifest.id.clone();
            if catalog.bundled.insert(id.clone(), manifest).is_some() {
                return Err(NasError::validation("id", format!("内置插件 ID 重复: {}", id)));
            }
        }

        info!(count = catalog.bundled.len(), "内置插件清单已加载");
        Ok(Self {
            catalog: RwLock::new(catalog),
            pins: Mutex::new(HashMap::new()),
        })
    }

    /// 仅包含内置插件的清单库
    pub fn with_builtin() -> Result<Self, NasError> {
        Self::new(builtin_manifests())
    }

    /// 按 ID 查找清单（内置优先）
    pub async fn get(&self, id: &str) -> Option<AddonManifest> {
        let catalog = self.catalog.read().await;
        catalog
            .bundled
            .get(id)
            .cloned()
            .or_else(|| catalog.registry.get(id).map(|entry| entry.manifest.clone()))
    }

    /// 全部清单，按 ID 排序
    pub async fn list(&self) -> Vec<AddonManifest> {
        let catalog = self.catalog.read().await;
        let mut merged: BTreeMap<&str, &AddonManifest> = catalog
            .registry
            .iter()
            .map(|(id, entry)| (id.as_str(), &entry.manifest))
            .collect();
        merged.extend(catalog.bundled.iter().map(|(id, m)| (id.as_str(), m)));

        merged.into_values().cloned().collect()
    }

    /// 注册表来源的条目，按 ID 排序
    pub async fn registry_entries(&self) -> Vec<RegistryEntry> {
        self.catalog.read().await.registry.values().cloned().collect()
    }

    pub async fn registry_entry(&self, id: &str) -> Option<RegistryEntry> {
        self.catalog.read().await.registry.get(id).cloned()
    }

    /// 最近一次成功同步
    pub async fn last_sync(&self) -> Option<Timestamped<SyncStats>> {
        self.catalog.read().await.last_sync.clone()
    }

    pub fn pin(&self, id: &str) -> RegistryPin<'_> {
        *pin_guard(&self.pins).entry(id.to_string()).or_insert(0) += 1;
        RegistryPin {
            store: self,
            id: id.to_string(),
        }
    }

    fn pinned_ids(&self) -> HashSet<String> {
        pin_guard(&self.pins).keys().cloned().collect()
    }

    /// 在写锁内整体替换注册表部分
    ///
    /// 与内置插件 ID 冲突的条目被忽略。保留集合（已安装记录与被固定的 ID）在写锁内读取，
    /// 其中已不在新批次里的旧条目保留。新目录先写入 `persisted`，成功后才替换内存。
    pub async fn replace_registry(
        &self,
        entries: BTreeMap<String, RegistryEntry>,
        installations: &dyn InstallationStore,
        persisted: &dyn CatalogStore,
    ) -> Result<SyncStats, NasError> {
        let mut catalog = self.catalog.write().await;

        let mut retain: HashSet<String> = installations
            .list()
            .await?
            .into_iter()
            .filter(|r| r.installed)
            .map(|r| r.addon_id)
            .collect();
        retain.extend(self.pinned_ids());

        let mut next = BTreeMap::new();
        for (id, entry) in entries {
            if catalog.bundled.contains_key(&id) {
                warn!(addon_id = %id, "注册表条目与内置插件 ID 冲突，已忽略");
                continue;
            }
            next.insert(id, entry);
        }

        for id in &retain {
            if next.contains_key(id) {
                continue;
            }
            if let Some(previous) = catalog.registry.get(id) {
                warn!(addon_id = %id, "插件仍在使用但不在远程注册表中，保留本地条目");
                next.insert(id.clone(), previous.clone());
            }
        }

        let mut stats = SyncStats::default();
        for (id, entry) in &next {
            match catalog.registry.get(id) {
                None => stats.added += 1,
                Some(previous) if previous != entry => stats.updated += 1,
                Some(_) => {}
            }
        }

        let synced = Timestamped::now(stats);
        let snapshot: Vec<RegistryEntry> = next.values().cloned().collect();
        persisted.replace(&snapshot, synced.at).await?;

        debug!(
            previous = catalog.registry.len(),
            next = next.len(),
            "替换注册表条目"
        );
        catalog.registry = next;
        catalog.last_sync = Some(synced);

        Ok(stats)
    }

    /// 启动时用已保存的目录填充注册表部分，返回恢复的条目数
    pub async fn restore_registry(&self, stored: StoredCatalog) -> usize {
        let mut catalog = self.catalog.write().await;

        let mut restored = BTreeMap::new();
        for entry in stored.entries {
            let id = entry.manifest.id.clone();
            if catalog.bundled.contains_key(&id) {
                warn!(addon_id = %id, "已保存的注册表条目与内置插件 ID 冲突，已忽略");
                continue;
            }
            restored.insert(id, entry);
        }

        let count = restored.len();
        catalog.registry = restored;
        catalog.last_sync = stored.synced_at.map(|at| Timestamped {
            value: SyncStats::default(),
            at,
        });

        count
    }
}

/// 从目录加载额外的内置清单（每个 *.json 文件一个清单）
pub async fn load_manifest_dir(
    dir: &Path,
    validator: &ManifestValidator,
) -> Result<Vec<AddonManifest>, NasError> {
    let mut reader = tokio::fs::read_dir(dir).await.map_err(|e| {
        NasError::configuration(format!("无法读取插件清单目录 {}: {}", dir.display(), e))
    })?;

    let mut manifests = Vec::new();
    while let Some(entry) = reader.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
            continue;
        }

        let content = tokio::fs::read(&path).await?;
        let mut manifest: AddonManifest = serde_json::from_slice(&content).map_err(|e| {
            NasError::configuration(format!("插件清单 {} 解析失败: {}", path.display(), e))
        })?;
        manifest.source = AddonSource::Bundled;
        manifest.distribution = None;
        validator.validate(&manifest)?;

        debug!(addon_id = %manifest.id, path = %path.display(), "加载插件清单");
        manifests.push(manifest);
    }

    manifests.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(manifests)
}

fn builtin(
    id: &str,
    name: &str,
    description: &str,
    icon: &str,
    category: &str,
    system_packages: &[&str],
    services: &[&str],
    capabilities: &[&str],
) -> AddonManifest {
    let to_strings = |items: &[&str]| items.iter().map(|s| s.to_string()).collect::<Vec<_>>();

    AddonManifest {
        id: id.to_string(),
        name: name.to_string(),
        version: "1.0.0".to_string(),
        description: description.to_string(),
        capabilities: capabilities.iter().map(|s| s.to_string()).collect(),
        requires_restart: false,
        source: AddonSource::Bundled,
        icon: icon.to_string(),
        category: category.to_string(),
        author: "StumpfWorks".to_string(),
        system_packages: to_strings(system_packages),
        services: to_strings(services),
        app_component: None,
        route_prefix: None,
        minimum_memory_mb: 0,
        minimum_disk_gb: 0,
        architecture: vec!["amd64".to_string(), "arm64".to_string()],
        distribution: None,
    }
}

/// 随程序发布的内置插件
pub fn builtin_manifests() -> Vec<AddonManifest> {
    vec![
        AddonManifest {
            requires_restart: true,
            app_component: Some("VMManager".to_string()),
            route_prefix: Some("/api/v1/vms".to_string()),
            minimum_memory_mb: 4096,
            minimum_disk_gb: 50,
            ..builtin(
                "vm-manager",
                "VM Manager",
                "KVM/QEMU virtual machine management with live migration and HA support",
                "🖥️",
                "virtualization",
                &[
                    "qemu-kvm",
                    "libvirt-daemon-system",
                    "libvirt-clients",
                    "bridge-utils",
                    "virt-manager",
                    "qemu-utils",
                ],
                &["libvirtd"],
                &["virtual-machines", "live-migration", "high-availability"],
            )
        },
        AddonManifest {
            requires_restart: true,
            app_component: Some("LXCManager".to_string()),
            route_prefix: Some("/api/v1/lxc".to_string()),
            minimum_memory_mb: 1024,
            minimum_disk_gb: 10,
            ..builtin(
                "lxc-manager",
                "LXC Container Manager",
                "Lightweight Linux container management for efficient workload isolation",
                "📦",
                "virtualization",
                &["lxc", "lxc-templates", "debootstrap"],
                &[],
                &["containers"],
            )
        },
        AddonManifest {
            app_component: Some("MinIOManager".to_string()),
            route_prefix: Some("/api/v1/minio".to_string()),
            minimum_memory_mb: 2048,
            minimum_disk_gb: 20,
            ..builtin(
                "minio",
                "MinIO S3 Storage",
                "High-performance S3-compatible object storage for cloud-native applications",
                "☁️",
                "storage",
                &["minio"],
                &["minio"],
                &["s3", "object-storage"],
            )
        },
        AddonManifest {
            app_component: Some("ISCSIManager".to_string()),
            route_prefix: Some("/api/v1/iscsi".to_string()),
            minimum_memory_mb: 512,
            minimum_disk_gb: 5,
            ..builtin(
                "iscsi-target",
                "iSCSI Target",
                "Block-level storage sharing via iSCSI protocol for SAN environments",
                "🎯",
                "storage",
                &["tgt", "open-iscsi"],
                &["tgt"],
                &["iscsi", "block-storage"],
            )
        },
        // 各协议按需安装，安装插件本身不需要软件包和服务
        AddonManifest {
            app_component: Some("VPNServer".to_string()),
            route_prefix: Some("/api/v1/vpn".to_string()),
            minimum_memory_mb: 512,
            minimum_disk_gb: 2,
            ..builtin(
                "vpn-server",
                "VPN Server",
                "Multi-protocol VPN server with WireGuard, OpenVPN, PPTP, and L2TP/IPsec support",
                "🔒",
                "networking",
                &[],
                &[],
                &["wireguard", "openvpn", "pptp", "l2tp"],
            )
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addons::catalog::MemoryCatalogStore;
    use crate::addons::installation::{InstallationRecord, MemoryInstallationStore};
    use crate::addons::registry::test_entry;

    #[test]
    fn test_builtin_manifests_are_valid() {
        let validator = ManifestValidator::new().unwrap();
        let manifests = builtin_manifests();

        assert_eq!(manifests.len(), 5);
        for manifest in &manifests {
            validator.validate(manifest).unwrap();
            assert_eq!(manifest.source, AddonSource::Bundled);
        }

        let restart: Vec<&str> = manifests
            .iter()
            .filter(|m| m.requires_restart)
            .map(|m| m.id.as_str())
            .collect();
        assert_eq!(restart, vec!["vm-manager", "lxc-manager"]);
    }

    #[test]
    fn test_validator_rejects_malformed() {
        let validator = ManifestValidator::new().unwrap();
        assert!(validator.validate_id("backup-sync").is_ok());
        assert!(validator.validate_id("Backup Sync").is_err());
        assert!(validator.validate_id("../etc").is_err());
        assert!(validator.validate_id("").is_err());
        assert!(validator.validate_version("x", "1.2.3-beta.1").is_ok());
        assert!(validator.validate_version("x", "v1").is_err());
    }

    #[test]
    fn test_duplicate_bundled_ids_rejected() {
        let mut manifests = builtin_manifests();
        manifests.push(manifests[0].clone());
        assert!(ManifestStore::new(manifests).is_err());
    }

    fn batch(entries: Vec<RegistryEntry>) -> BTreeMap<String, RegistryEntry> {
        entries
            .into_iter()
            .map(|e| (e.manifest.id.clone(), e))
            .collect()
    }

    struct BrokenCatalog;

    #[async_trait::async_trait]
    impl CatalogStore for BrokenCatalog {
        async fn load(&self) -> Result<StoredCatalog, NasError> {
            Ok(StoredCatalog::default())
        }

        async fn replace(
            &self,
            _entries: &[RegistryEntry],
            _synced_at: chrono::DateTime<chrono::Utc>,
        ) -> Result<(), NasError> {
            Err(NasError::database("disk full"))
        }
    }

    #[tokio::test]
    async fn test_replace_registry_is_wholesale_and_keeps_bundled() {
        let store = ManifestStore::with_builtin().unwrap();
        let installations = MemoryInstallationStore::new();
        let persisted = MemoryCatalogStore::new();

        let stats = store
            .replace_registry(
                batch(vec![
                    test_entry("jellyfin", "1.0.0", "media", &[]),
                    test_entry("minio", "9.9.9", "storage", &[]),
                ]),
                &installations,
                &persisted,
            )
            .await
            .unwrap();
        assert_eq!(stats, SyncStats { added: 1, updated: 0 });

        // 内置条目不被覆盖
        let minio = store.get("minio").await.unwrap();
        assert_eq!(minio.source, AddonSource::Bundled);
        assert_eq!(minio.version, "1.0.0");
        assert_eq!(store.list().await.len(), 6);

        let stats = store
            .replace_registry(
                batch(vec![test_entry("jellyfin", "1.1.0", "media", &[])]),
                &installations,
                &persisted,
            )
            .await
            .unwrap();
        assert_eq!(stats, SyncStats { added: 0, updated: 1 });
        assert!(store.last_sync().await.is_some());

        let saved = persisted.load().await.unwrap();
        assert_eq!(saved.entries, vec![test_entry("jellyfin", "1.1.0", "media", &[])]);
    }

    #[tokio::test]
    async fn test_replace_registry_retains_installed_entries() {
        let store = ManifestStore::new(Vec::new()).unwrap();
        let installations = MemoryInstallationStore::new();
        let persisted = MemoryCatalogStore::new();
        store
            .replace_registry(
                batch(vec![
                    test_entry("jellyfin", "1.0.0", "media", &[]),
                    test_entry("nextcloud", "27.0.0", "productivity", &[]),
                ]),
                &installations,
                &persisted,
            )
            .await
            .unwrap();

        let jellyfin = store.get("jellyfin").await.unwrap();
        installations
            .upsert(InstallationRecord::installed(&jellyfin, None))
            .await
            .unwrap();
        store
            .replace_registry(BTreeMap::new(), &installations, &persisted)
            .await
            .unwrap();

        assert!(store.registry_entry("jellyfin").await.is_some());
        assert!(store.registry_entry("nextcloud").await.is_none());
        assert_eq!(persisted.load().await.unwrap().entries.len(), 1);
    }

    #[tokio::test]
    async fn test_pinned_entry_survives_sync_until_released() {
        let store = ManifestStore::new(Vec::new()).unwrap();
        let installations = MemoryInstallationStore::new();
        let persisted = MemoryCatalogStore::new();
        store
            .replace_registry(
                batch(vec![test_entry("jellyfin", "1.0.0", "media", &[])]),
                &installations,
                &persisted,
            )
            .await
            .unwrap();

        let pin = store.pin("jellyfin");
        let second = store.pin("jellyfin");
        drop(second);
        store
            .replace_registry(BTreeMap::new(), &installations, &persisted)
            .await
            .unwrap();
        assert!(store.registry_entry("jellyfin").await.is_some());

        drop(pin);
        store
            .replace_registry(BTreeMap::new(), &installations, &persisted)
            .await
            .unwrap();
        assert!(store.registry_entry("jellyfin").await.is_none());
    }

    #[tokio::test]
    async fn test_failed_persist_leaves_catalog_unchanged() {
        let store = ManifestStore::new(Vec::new()).unwrap();
        let installations = MemoryInstallationStore::new();
        store
            .replace_registry(
                batch(vec![test_entry("jellyfin", "1.0.0", "media", &[])]),
                &installations,
                &MemoryCatalogStore::new(),
            )
            .await
            .unwrap();

        let result = store
            .replace_registry(
                batch(vec![test_entry("pihole", "5.17.0", "networking", &[])]),
                &installations,
                &BrokenCatalog,
            )
            .await;

        assert!(result.is_err());
        assert!(store.registry_entry("jellyfin").await.is_some());
        assert!(store.registry_entry("pihole").await.is_none());
    }

    #[tokio::test]
    async fn test_restore_registry_skips_bundled_ids() {
        let store = ManifestStore::with_builtin().unwrap();
        let synced_at = chrono::Utc::now();

        let restored = store
            .restore_registry(StoredCatalog {
                entries: vec![
                    test_entry("jellyfin", "1.0.0", "media", &[]),
                    test_entry("minio", "9.9.9", "storage", &[]),
                ],
                synced_at: Some(synced_at),
            })
            .await;

        assert_eq!(restored, 1);
        assert_eq!(store.get("jellyfin").await.unwrap().source, AddonSource::Registry);
        assert_eq!(store.get("minio").await.unwrap().version, "1.0.0");
        assert_eq!(store.last_sync().await.unwrap().at, synced_at);
    }

    #[tokio::test]
    async fn test_load_manifest_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("backup-sync.json"),
            r#"{"id":"backup-sync","name":"Backup Sync","version":"0.3.0","requires_restart":true,"source":"registry"}"#,
        )
        .unwrap();
        std::fs::write(dir.path().join("README.md"), "ignored").unwrap();

        let validator = ManifestValidator::new().unwrap();
        let manifests = load_manifest_dir(dir.path(), &validator).await.unwrap();

        assert_eq!(manifests.len(), 1);
        assert_eq!(manifests[0].id, "backup-sync");
        assert!(manifests[0].requires_restart);
        assert_eq!(manifests[0].source, AddonSource::Bundled);
    }

    #[tokio::test]
    async fn test_load_manifest_dir_rejects_bad_version() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("bad.json"),
            r#"{"id":"bad","name":"Bad","version":"latest"}"#,
        )
        .unwrap();

        let validator = ManifestValidator::new().unwrap();
        assert!(load_manifest_dir(dir.path(), &validator).await.is_err());
    }
}
