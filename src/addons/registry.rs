// 远程插件注册表客户端
// 拉取远程目录、校验后整体合并进清单库，并提供目录搜索

use crate::addons::catalog::CatalogStore;
use crate::addons::installation::{InstallationRecord, InstallationStore};
use crate::addons::manifest::{AddonManifest, Distribution, ManifestStore, ManifestValidator};
use crate::config::RegistryConfig;
use crate::errors::NasError;
use async_trait::async_trait;
use chrono::Utc;
use nasplane_common::{AddonSource, SyncStats, Timestamped};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};
use url::Url;
use utoipa::ToSchema;

/// 注册表条目：清单加上分发与展示信息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct RegistryEntry {
    #[serde(flatten)]
    pub manifest: AddonManifest,
    pub tags: Vec<String>,
    pub homepage: Option<String>,
    pub repository_url: Option<String>,
    pub min_nas_version: Option<String>,
    pub require_docker: bool,
    pub required_ports: Vec<u16>,
    pub downloads: u64,
    pub rating: Option<f64>,
}

impl RegistryEntry {
    fn matches_query(&self, query: &str) -> bool {
        let m = &self.manifest;
        [&m.id, &m.name, &m.description]
            .into_iter()
            .chain(self.tags.iter())
            .any(|field| field.to_lowercase().contains(query))
    }

    fn matches_category(&self, category: &str) -> bool {
        self.manifest.category.eq_ignore_ascii_case(category)
            || self.tags.iter().any(|tag| tag.eq_ignore_ascii_case(category))
    }
}

/// 带安装状态的目录条目
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CatalogItem {
    #[serde(flatten)]
    pub entry: RegistryEntry,
    pub installed: bool,
    pub installed_version: Option<String>,
}

impl CatalogItem {
    pub fn new(entry: RegistryEntry, record: Option<&InstallationRecord>) -> Self {
        let installed = record.is_some_and(|r| r.installed);
        Self {
            entry,
            installed,
            installed_version: record
                .filter(|r| r.installed)
                .and_then(|r| r.installed_version.clone()),
        }
    }
}

/// 远程 registry.json 文档
#[derive(Debug, Clone, Deserialize)]
pub struct RegistryDocument {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub updated: Option<String>,
    #[serde(default)]
    pub plugins: Vec<RemotePlugin>,
}

/// 远程文档中的单个插件
#[derive(Debug, Clone, Deserialize)]
pub struct RemotePlugin {
    pub id: String,
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub icon: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub repository_url: Option<String>,
    #[serde(default)]
    pub download_url: String,
    #[serde(default)]
    pub checksum: Option<String>,
    #[serde(default)]
    pub homepage: Option<String>,
    #[serde(default)]
    pub min_nas_version: Option<String>,
    #[serde(default)]
    pub require_docker: bool,
    #[serde(default)]
    pub required_ports: Vec<u16>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub downloads: Option<u64>,
    #[serde(default)]
    pub rating: Option<f64>,
    #[serde(default)]
    pub requires_restart: bool,
    #[serde(default)]
    pub capabilities: Vec<String>,
}

impl RemotePlugin {
    fn into_entry(self) -> RegistryEntry {
        RegistryEntry {
            manifest: AddonManifest {
                id: self.id,
                name: self.name,
                version: self.version,
                description: self.description,
                capabilities: self.capabilities.into_iter().collect(),
                requires_restart: self.requires_restart,
                source: AddonSource::Registry,
                icon: self.icon,
                category: self.category,
                author: self.author,
                system_packages: Vec::new(),
                services: Vec::new(),
                app_component: None,
                route_prefix: None,
                minimum_memory_mb: 0,
                minimum_disk_gb: 0,
                architecture: Vec::new(),
                distribution: Some(Distribution {
                    download_url: self.download_url,
                    checksum: self.checksum.map(|c| c.to_lowercase()),
                }),
            },
            tags: self.tags,
            homepage: self.homepage,
            repository_url: self.repository_url,
            min_nas_version: self.min_nas_version,
            require_docker: self.require_docker,
            required_ports: self.required_ports,
            downloads: self.downloads.unwrap_or(0),
            rating: self.rating,
        }
    }
}

/// 注册表数据源
#[async_trait]
pub trait RegistrySource: Send + Sync {
    /// 拉取完整的远程文档
    async fn fetch(&self) -> Result<RegistryDocument, NasError>;
}

/// 基于 HTTP 的注册表数据源
pub struct HttpRegistrySource {
    client: reqwest::Client,
    url: Url,
}

impl HttpRegistrySource {
    pub fn new(config: &RegistryConfig) -> Result<Self, NasError> {
        let url = Url::parse(&config.url)
            .map_err(|e| NasError::configuration(format!("注册表 URL 无效: {}", e)))?;
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .user_agent(concat!("nasplane/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| NasError::configuration(format!("HTTP 客户端创建失败: {}", e)))?;

        Ok(Self { client, url })
    }
}

#[async_trait]
impl RegistrySource for HttpRegistrySource {
    async fn fetch(&self) -> Result<RegistryDocument, NasError> {
        let response = self.client.get(self.url.clone()).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(NasError::external_service(
                "registry",
                format!("注册表返回 HTTP {}", status),
            ));
        }

        Ok(response.json::<RegistryDocument>().await?)
    }
}

/// 注册表客户端
pub struct RegistryClient {
    source: Arc<dyn RegistrySource>,
    manifests: Arc<ManifestStore>,
    installations: Arc<dyn InstallationStore>,
    catalog: Arc<dyn CatalogStore>,
    validator: ManifestValidator,
    cache_ttl: Duration,
}

impl RegistryClient {
    pub fn new(
        source: Arc<dyn RegistrySource>,
        manifests: Arc<ManifestStore>,
        installations: Arc<dyn InstallationStore>,
        catalog: Arc<dyn CatalogStore>,
        cache_ttl: Duration,
    ) -> Result<Self, NasError> {
        Ok(Self {
            source,
            manifests,
            installations,
            catalog,
            validator: ManifestValidator::new()?,
            cache_ttl,
        })
    }

    /// 从已保存的目录恢复注册表条目，启动时在首次同步前调用
    #[instrument(skip(self))]
    pub async fn restore(&self) -> Result<usize, NasError> {
        let stored = self.catalog.load().await?;
        let restored = self.manifests.restore_registry(stored).await;
        info!(restored, "已恢复注册表目录");
        Ok(restored)
    }

    /// 同步远程目录
    ///
    /// 拉取与校验在锁外进行；任何失败都不改动清单库。
    #[instrument(skip(self))]
    pub async fn sync(&self) -> Result<SyncStats, NasError> {
        info!("同步插件注册表");

        let document = self.source.fetch().await.map_err(|e| {
            warn!(error = %e, "拉取插件注册表失败");
            NasError::internal(format!("注册表同步失败: {}", e))
        })?;

        let entries = self.validate_document(document).map_err(|e| {
            warn!(error = %e, "插件注册表校验失败，放弃本次同步");
            NasError::internal(format!("注册表同步失败: {}", e))
        })?;

        let stats = self
            .manifests
            .replace_registry(entries, self.installations.as_ref(), self.catalog.as_ref())
            .await?;
        info!(added = stats.added, updated = stats.updated, "插件注册表同步完成");

        Ok(stats)
    }

    /// 缓存过期时才同步
    pub async fn sync_if_stale(&self) -> Result<Option<SyncStats>, NasError> {
        if let Some(last) = self.manifests.last_sync().await {
            let age = (Utc::now() - last.at).to_std().unwrap_or(Duration::ZERO);
            if age < self.cache_ttl {
                return Ok(None);
            }
        }

        self.sync().await.map(Some)
    }

    /// 校验整个批次，任一条目无效即整体拒绝
    fn validate_document(
        &self,
        document: RegistryDocument,
    ) -> Result<BTreeMap<String, RegistryEntry>, NasError> {
        let mut entries = BTreeMap::new();

        for (index, plugin) in document.plugins.into_iter().enumerate() {
            self.validator.validate_id(&plugin.id)?;
            self.validator.validate_version(&plugin.id, &plugin.version)?;
            if plugin.name.trim().is_empty() {
                return Err(NasError::validation(
                    "name",
                    format!("注册表条目 #{} ({}) 缺少名称", index, plugin.id),
                ));
            }
            Url::parse(&plugin.download_url).map_err(|e| {
                NasError::validation(
                    "download_url",
                    format!("注册表条目 {} 的下载地址无效: {}", plugin.id, e),
                )
            })?;

            let id = plugin.id.clone();
            if entries.insert(id.clone(), plugin.into_entry()).is_some() {
                return Err(NasError::validation("id", format!("注册表条目 ID 重复: {}", id)));
            }
        }

        Ok(entries)
    }

    /// 按关键字与分类搜索，两者同时给出时取交集，结果按 ID 排序
    pub async fn search(&self, query: Option<&str>, category: Option<&str>) -> Vec<RegistryEntry> {
        let query = query
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .map(str::to_lowercase);
        let category = category.map(str::trim).filter(|c| !c.is_empty());

        self.manifests
            .registry_entries()
            .await
            .into_iter()
            .filter(|entry| query.as_deref().is_none_or(|q| entry.matches_query(q)))
            .filter(|entry| category.is_none_or(|c| entry.matches_category(c)))
            .collect()
    }

    /// 完整目录
    pub async fn catalog(&self) -> Vec<RegistryEntry> {
        self.manifests.registry_entries().await
    }

    pub async fn entry(&self, id: &str) -> Option<RegistryEntry> {
        self.manifests.registry_entry(id).await
    }

    pub async fn last_sync(&self) -> Option<Timestamped<SyncStats>> {
        self.manifests.last_sync().await
    }
}

/// 测试用注册表条目
#[cfg(test)]
pub(crate) fn test_entry(id: &str, version: &str, category: &str, tags: &[&str]) -> RegistryEntry {
    RemotePlugin {
        id: id.to_string(),
        name: id.replace('-', " "),
        version: version.to_string(),
        author: "test".to_string(),
        description: format!("{} plugin", id),
        icon: String::new(),
        category: category.to_string(),
        repository_url: None,
        download_url: format!("https://example.com/{}-{}.tar.gz", id, version),
        checksum: None,
        homepage: None,
        min_nas_version: None,
        require_docker: false,
        required_ports: Vec::new(),
        tags: tags.iter().map(|t| t.to_string()).collect(),
        downloads: None,
        rating: None,
        requires_restart: false,
        capabilities: Vec::new(),
    }
    .into_entry()
}
