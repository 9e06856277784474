// 应用程序设置和配置
// 定义配置结构体和加载逻辑

use config::{Config, ConfigError, Environment, File};
use nasplane_common::CommonError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// 环境变量前缀
pub const ENV_PREFIX: &str = "NASPLANE";

/// 指定配置文件路径的环境变量
pub const CONFIG_PATH_ENV: &str = "NASPLANE_CONFIG";

/// 应用程序配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub addons: AddonsConfig,
    pub registry: RegistryConfig,
    pub restart: RestartConfig,
    pub environment: EnvironmentConfig,
}

/// 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub workers: Option<usize>,
    pub keep_alive: u64,
}

/// 数据库配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout: u64,
    pub idle_timeout: u64,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
    pub file_enabled: bool,
    pub file_path: Option<String>,
}

/// 插件配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddonsConfig {
    /// 额外内置清单目录（*.json）
    pub manifest_dir: Option<String>,
    /// 注册表插件包解压根目录
    pub install_root: String,
    /// 关闭时部署器只记录将要执行的操作
    pub provisioning_enabled: bool,
    /// 插件包下载超时（秒）
    pub download_timeout: u64,
    /// 插件包大小上限（MB）
    pub max_download_mb: u64,
}

/// 远程注册表配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    pub url: String,
    /// 请求超时（秒）
    pub timeout: u64,
    /// 缓存有效期（秒）
    pub cache_ttl: u64,
    pub sync_on_startup: bool,
}

/// 重启协调配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestartConfig {
    /// 延迟（毫秒）
    pub delay_ms: u64,
    /// exit | systemctl
    pub strategy: String,
    pub unit: String,
}

/// 环境配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentConfig {
    pub name: String,
    pub version: String,
}

impl RegistryConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl)
    }
}

impl AddonsConfig {
    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout)
    }

    pub fn max_download_bytes(&self) -> u64 {
        self.max_download_mb.saturating_mul(1024 * 1024)
    }
}

impl RestartConfig {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

impl AppConfig {
    /// 从环境变量和配置文件加载配置
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| "config.toml".to_string());
        Self::load_from(Path::new(&path))
    }

    /// 从指定配置文件（可不存在）与环境变量加载配置
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Config::builder();

        // 1. 默认配置
        config = config.add_source(Config::try_from(&AppConfig::default())?);

        // 2. 配置文件
        if path.exists() {
            config = config.add_source(File::from(path));
        }

        // 3. 环境变量（优先级最高）
        config = config.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__"),
        );

        let mut app_config: AppConfig = config.build()?.try_deserialize()?;
        app_config.environment.version = env!("CARGO_PKG_VERSION").to_string();

        Ok(app_config)
    }

    /// 验证配置
    pub fn validate(&self) -> Result<(), CommonError> {
        use crate::config::ConfigValidator;

        ConfigValidator::validate_all(self).map_err(|errors| {
            let error_messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
            CommonError::configuration(format!("配置验证失败: {}", error_messages.join("; ")))
        })
    }

    pub fn is_development(&self) -> bool {
        self.environment.name == "development"
    }

    pub fn is_production(&self) -> bool {
        self.environment.name == "production"
    }

    pub fn is_test(&self) -> bool {
        self.environment.name == "test"
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
                workers: None,
                keep_alive: 75,
            },
            database: DatabaseConfig {
                url: "sqlite://./data/nasplane.db?mode=rwc".to_string(),
                max_connections: 5,
                min_connections: 1,
                connect_timeout: 30,
                idle_timeout: 600,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                format: "json".to_string(),
                file_enabled: false,
                file_path: None,
            },
            addons: AddonsConfig {
                manifest_dir: None,
                install_root: "/var/lib/nasplane/plugins".to_string(),
                provisioning_enabled: true,
                download_timeout: 300,
                max_download_mb: 512,
            },
            registry: RegistryConfig {
                url: "https://raw.githubusercontent.com/Stumpf-works/stumpfworks-nas-apps/main/registry.json"
                    .to_string(),
                timeout: 30,
                cache_ttl: 3600,
                sync_on_startup: true,
            },
            restart: RestartConfig {
                delay_ms: 3000,
                strategy: "exit".to_string(),
                unit: "nasplane.service".to_string(),
            },
            environment: EnvironmentConfig {
                name: "development".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        }
    }
}
