// 插件生命周期模块
// 清单库、安装状态、注册表目录、系统供给、重启协调与管理器

pub mod catalog;
pub mod installation;
pub mod manager;
pub mod manifest;
pub mod provisioner;
pub mod registry;
pub mod restart;

pub use catalog::{CatalogStore, DbCatalogStore, MemoryCatalogStore, StoredCatalog};
pub use installation::{
    DbInstallationStore, InstallationRecord, InstallationStore, MemoryInstallationStore,
};
pub use manager::{AddonManager, AddonStatus, AddonWithStatus, InstallOutcome, UpdateOutcome};
pub use manifest::{AddonManifest, ManifestStore, ManifestValidator, RegistryPin};
pub use provisioner::{AddonProvisioner, DownloadLimits, ProvisionProbe, SystemProvisioner};
pub use registry::{
    CatalogItem, HttpRegistrySource, RegistryClient, RegistryEntry, RegistrySource,
};
pub use restart::{ProcessControl, RestartCoordinator, RestartStatus};
